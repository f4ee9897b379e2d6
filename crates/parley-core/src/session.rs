//! Session-to-user bindings.
//!
//! The relay itself is transport-agnostic; the connection lifecycle owns
//! this side table and passes it into join/leave explicitly rather than
//! stashing the username in transport session state.

use dashmap::DashMap;

/// Side table mapping connection identifiers to usernames.
#[derive(Debug, Default)]
pub struct SessionTable {
    bindings: DashMap<String, String>,
}

impl SessionTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a connection to a username.
    ///
    /// Returns the previously bound username, if any.
    pub fn bind(&self, connection_id: &str, username: &str) -> Option<String> {
        self.bindings
            .insert(connection_id.to_string(), username.to_string())
    }

    /// Remove a connection's binding, returning the username it held.
    pub fn unbind(&self, connection_id: &str) -> Option<String> {
        self.bindings.remove(connection_id).map(|(_, user)| user)
    }

    /// Look up the username bound to a connection.
    #[must_use]
    pub fn username_of(&self, connection_id: &str) -> Option<String> {
        self.bindings.get(connection_id).map(|u| u.clone())
    }

    /// Number of bound sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Check whether no sessions are bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

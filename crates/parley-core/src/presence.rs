//! Presence tracking for the parley relay.
//!
//! The registry owns the authoritative set of currently connected user
//! identifiers. All access goes through atomic add/remove/snapshot
//! operations behind a single lock, so concurrent callers never observe a
//! partially applied update.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// The authoritative in-memory set of connected users.
///
/// Membership is unique by identity; listings preserve insertion order.
/// State lives for the process lifetime only and resets to empty on
/// restart.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Stable insertion-order listing.
    order: Vec<String>,
    /// Membership index.
    members: HashSet<String>,
}

impl PresenceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user. Idempotent: re-adding is a no-op.
    ///
    /// Returns whether the user was newly added, plus the full updated
    /// set for the presence broadcast.
    pub fn join(&self, user: &str) -> (bool, Vec<String>) {
        let mut inner = self.lock();
        let added = inner.members.insert(user.to_string());
        if added {
            inner.order.push(user.to_string());
            debug!(user = %user, online = inner.order.len(), "Presence: user joined");
        }
        (added, inner.order.clone())
    }

    /// Remove a user. Idempotent: removing an absent user is a no-op.
    ///
    /// Returns whether the user was present, plus the full updated set
    /// for the presence broadcast.
    pub fn leave(&self, user: &str) -> (bool, Vec<String>) {
        let mut inner = self.lock();
        let removed = inner.members.remove(user);
        if removed {
            inner.order.retain(|u| u != user);
            debug!(user = %user, online = inner.order.len(), "Presence: user left");
        }
        (removed, inner.order.clone())
    }

    /// Consistent point-in-time copy of the current set.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        self.lock().order.clone()
    }

    /// Check whether a user is currently present.
    #[must_use]
    pub fn contains(&self, user: &str) -> bool {
        self.lock().members.contains(user)
    }

    /// Number of present users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    /// Check whether nobody is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_join_is_idempotent() {
        let registry = PresenceRegistry::new();

        let (added, users) = registry.join("alice");
        assert!(added);
        assert_eq!(users, vec!["alice"]);

        let (added, users) = registry.join("alice");
        assert!(!added);
        assert_eq!(users, vec!["alice"]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_leave_absent_user_is_noop() {
        let registry = PresenceRegistry::new();
        registry.join("alice");

        let (removed, users) = registry.leave("ghost");
        assert!(!removed);
        assert_eq!(users, vec!["alice"]);
    }

    #[test]
    fn test_join_leave_sequence() {
        let registry = PresenceRegistry::new();
        registry.join("alice");
        registry.join("bob");

        let (removed, users) = registry.leave("alice");
        assert!(removed);
        assert_eq!(users, vec!["bob"]);
        assert!(!registry.contains("alice"));
        assert!(registry.contains("bob"));
    }

    #[test]
    fn test_snapshot_preserves_insertion_order() {
        let registry = PresenceRegistry::new();
        registry.join("carol");
        registry.join("alice");
        registry.join("bob");

        assert_eq!(registry.snapshot(), vec!["carol", "alice", "bob"]);
    }

    #[test]
    fn test_concurrent_mutation_never_duplicates() {
        let registry = Arc::new(PresenceRegistry::new());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        if i % 2 == 0 {
                            registry.join("alice");
                        } else {
                            registry.leave("alice");
                        }
                        registry.join("bob");
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let users = registry.snapshot();
        assert_eq!(
            users.iter().filter(|u| u.as_str() == "bob").count(),
            1,
            "duplicate entry in presence set"
        );
        assert!(users.iter().filter(|u| u.as_str() == "alice").count() <= 1);
    }
}

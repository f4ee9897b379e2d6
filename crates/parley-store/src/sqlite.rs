//! Durable message log on SQLite.
//!
//! A single append-only `messages` table. Connection access is serialized
//! behind a mutex and every call runs on the blocking pool so relay
//! traffic never waits on disk inside the async runtime.

use async_trait::async_trait;
use parley_core::{ChatEvent, MessageStore, PersistedMessage, StoreError};
use parley_protocol::EventKind;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

/// SQLite-backed [`MessageStore`].
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the store at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the schema
    /// cannot be initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| StoreError::Open(e.to_string()))?;
        init_schema(&conn).map_err(|e| StoreError::Open(e.to_string()))?;
        info!(path = %path.display(), "Opened message store");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database. History is lost on drop; useful for
    /// tests and ephemeral deployments.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Open(e.to_string()))?;
        init_schema(&conn).map_err(|e| StoreError::Open(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Total number of stored records.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count(&self) -> Result<usize, StoreError> {
        let conn = Arc::clone(&self.conn);
        run_blocking(move || {
            let conn = lock(&conn);
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            type TEXT NOT NULL,
            sender TEXT NOT NULL,
            content TEXT,
            recipient TEXT,
            timestamp INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp)",
        [],
    )?;

    Ok(())
}

fn lock(conn: &Mutex<Connection>) -> std::sync::MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn run_blocking<T, F>(f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce() -> rusqlite::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
        .map_err(|e| StoreError::Storage(e.to_string()))
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<PersistedMessage> {
    let kind: String = row.get(1)?;
    let kind: EventKind = kind.parse().map_err(|e: &str| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, e.into())
    })?;
    let timestamp: i64 = row.get(5)?;

    Ok(PersistedMessage {
        id: row.get(0)?,
        kind,
        sender: row.get(2)?,
        content: row.get(3)?,
        recipient: row.get(4)?,
        timestamp: timestamp as u64,
    })
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn append(&self, event: &ChatEvent) -> Result<PersistedMessage, StoreError> {
        let conn = Arc::clone(&self.conn);
        let event = event.clone();

        run_blocking(move || {
            let conn = lock(&conn);
            conn.execute(
                "INSERT INTO messages (type, sender, content, recipient, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    event.kind.as_str(),
                    event.sender,
                    event.content,
                    event.recipient,
                    event.timestamp as i64,
                ],
            )?;
            let id = conn.last_insert_rowid();
            Ok(PersistedMessage::from_event(id, &event))
        })
        .await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<PersistedMessage>, StoreError> {
        let conn = Arc::clone(&self.conn);

        run_blocking(move || {
            let conn = lock(&conn);
            let mut stmt = conn.prepare(
                "SELECT id, type, sender, content, recipient, timestamp FROM (
                     SELECT id, type, sender, content, recipient, timestamp
                     FROM messages
                     ORDER BY timestamp DESC, id DESC
                     LIMIT ?1
                 )
                 ORDER BY timestamp ASC, id ASC",
            )?;

            let messages = stmt
                .query_map(params![limit as i64], row_to_message)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(messages)
        })
        .await
    }
}

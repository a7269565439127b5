//! SQLite-backed key/value file holding the bearer credential.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, params};

use super::{CREDENTIAL_KEY, CredentialResult, CredentialStore};

/// SQLite implementation of [`crate::credential::CredentialStore`].
pub struct SqliteCredentialStore {
    conn: Connection,
}

impl SqliteCredentialStore {
    /// Opens or creates the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> CredentialResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    /// Opens an in-memory store.
    pub fn open_in_memory() -> CredentialResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> CredentialResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(Self { conn })
    }

    fn get(&self, key: &str) -> CredentialResult<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn put(&mut self, key: &str, value: &str) -> CredentialResult<()> {
        self.conn.execute(
            "INSERT INTO kv(key, value, updated_ms) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_ms = excluded.updated_ms",
            params![key, value, now_ms() as i64],
        )?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> CredentialResult<()> {
        self.conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn load(&self) -> CredentialResult<Option<String>> {
        self.get(CREDENTIAL_KEY)
    }

    fn save(&mut self, key: &str) -> CredentialResult<()> {
        self.put(CREDENTIAL_KEY, key)
    }

    fn clear(&mut self) -> CredentialResult<()> {
        self.remove(CREDENTIAL_KEY)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

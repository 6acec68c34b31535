//! Durable schedule registrations
//!
//! Every active (channel, interval) broadcast registration is persisted so
//! loops can be reconstructed after a process restart.

use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

/// One persisted (channel, interval) registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedEntry {
    pub channel_id: u64,
    pub interval_secs: u32,
    pub message_id: u64,
    pub guild_id: Option<u64>,
    pub running: bool,
    pub server_name: Option<String>,
    pub channel_name: Option<String>,
}

/// SQLite-backed schedule table.
pub struct ScheduleStore {
    conn: Mutex<Connection>,
}

impl ScheduleStore {
    /// Open (or create) the store at `db_path`.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, ScheduleStoreError> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ScheduleStoreError::Io(format!("Failed to create database directory: {}", e))
            })?;
        }

        let conn = Connection::open(db_path).map_err(ScheduleStoreError::Database)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn new_in_memory() -> Result<Self, ScheduleStoreError> {
        let conn = Connection::open_in_memory().map_err(ScheduleStoreError::Database)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), ScheduleStoreError> {
        let conn = self.conn.lock().map_err(|_| ScheduleStoreError::LockError)?;

        // The rank history store keeps its own connection to the same file;
        // wait out its write locks instead of surfacing SQLITE_BUSY.
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(ScheduleStoreError::Database)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS channel_states (
                channel_id INTEGER NOT NULL,
                interval INTEGER NOT NULL,
                message_id INTEGER NOT NULL,
                guild_id INTEGER,
                running BOOLEAN NOT NULL DEFAULT 0,
                server_name TEXT,
                channel_name TEXT,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (channel_id, interval)
            );
            "#,
        )
        .map_err(ScheduleStoreError::Database)?;

        Ok(())
    }

    /// Insert or replace a registration.
    pub fn upsert(&self, entry: &PersistedEntry) -> Result<(), ScheduleStoreError> {
        let conn = self.conn.lock().map_err(|_| ScheduleStoreError::LockError)?;

        conn.execute(
            r#"
            INSERT OR REPLACE INTO channel_states
            (channel_id, interval, message_id, guild_id, running, server_name, channel_name, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, CURRENT_TIMESTAMP)
            "#,
            params![
                entry.channel_id as i64,
                entry.interval_secs,
                entry.message_id as i64,
                entry.guild_id.map(|g| g as i64),
                entry.running,
                entry.server_name,
                entry.channel_name,
            ],
        )
        .map_err(ScheduleStoreError::Database)?;

        Ok(())
    }

    /// Remove one (channel, interval) registration.
    pub fn delete(&self, channel_id: u64, interval_secs: u32) -> Result<(), ScheduleStoreError> {
        let conn = self.conn.lock().map_err(|_| ScheduleStoreError::LockError)?;
        conn.execute(
            "DELETE FROM channel_states WHERE channel_id = ?1 AND interval = ?2",
            params![channel_id as i64, interval_secs],
        )
        .map_err(ScheduleStoreError::Database)?;
        Ok(())
    }

    /// Remove every registration for a channel. Returns how many were
    /// deleted.
    pub fn delete_channel(&self, channel_id: u64) -> Result<usize, ScheduleStoreError> {
        let conn = self.conn.lock().map_err(|_| ScheduleStoreError::LockError)?;
        let deleted = conn
            .execute(
                "DELETE FROM channel_states WHERE channel_id = ?1",
                params![channel_id as i64],
            )
            .map_err(ScheduleStoreError::Database)?;
        Ok(deleted)
    }

    /// Load every registration marked running. Called wholesale at startup.
    pub fn load_running(&self) -> Result<Vec<PersistedEntry>, ScheduleStoreError> {
        let conn = self.conn.lock().map_err(|_| ScheduleStoreError::LockError)?;

        let mut stmt = conn
            .prepare(
                r#"
            SELECT channel_id, interval, message_id, guild_id, running, server_name, channel_name
            FROM channel_states WHERE running = 1
            "#,
            )
            .map_err(ScheduleStoreError::Database)?;

        let rows = stmt
            .query_map([], |row| {
                let channel_id: i64 = row.get(0)?;
                let interval: u32 = row.get(1)?;
                let message_id: i64 = row.get(2)?;
                let guild_id: Option<i64> = row.get(3)?;
                let running: bool = row.get(4)?;
                let server_name: Option<String> = row.get(5)?;
                let channel_name: Option<String> = row.get(6)?;
                Ok(PersistedEntry {
                    channel_id: channel_id as u64,
                    interval_secs: interval,
                    message_id: message_id as u64,
                    guild_id: guild_id.map(|g| g as u64),
                    running,
                    server_name,
                    channel_name,
                })
            })
            .map_err(ScheduleStoreError::Database)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(ScheduleStoreError::Database)?);
        }
        Ok(entries)
    }

    /// Total registration count, running or not. Test support.
    pub fn count(&self) -> Result<usize, ScheduleStoreError> {
        let conn = self.conn.lock().map_err(|_| ScheduleStoreError::LockError)?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM channel_states", [], |row| row.get(0))
            .map_err(ScheduleStoreError::Database)?;
        Ok(count as usize)
    }
}

/// Errors from schedule storage
#[derive(Debug, thiserror::Error)]
pub enum ScheduleStoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Failed to acquire lock")]
    LockError,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(channel_id: u64, interval_secs: u32, message_id: u64) -> PersistedEntry {
        PersistedEntry {
            channel_id,
            interval_secs,
            message_id,
            guild_id: Some(42),
            running: true,
            server_name: Some("test guild".to_string()),
            channel_name: Some("scanner".to_string()),
        }
    }

    #[test]
    fn test_upsert_and_load_running() {
        let store = ScheduleStore::new_in_memory().unwrap();
        store.upsert(&entry(100, 60, 1)).unwrap();
        store.upsert(&entry(100, 300, 2)).unwrap();

        let mut not_running = entry(200, 60, 3);
        not_running.running = false;
        store.upsert(&not_running).unwrap();

        let mut running = store.load_running().unwrap();
        running.sort_by_key(|e| (e.channel_id, e.interval_secs));
        assert_eq!(running.len(), 2);
        assert_eq!(running[0].interval_secs, 60);
        assert_eq!(running[1].interval_secs, 300);
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn test_key_uniqueness_replaces() {
        let store = ScheduleStore::new_in_memory().unwrap();
        store.upsert(&entry(100, 60, 1)).unwrap();
        store.upsert(&entry(100, 60, 99)).unwrap();

        let running = store.load_running().unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].message_id, 99);
    }

    #[test]
    fn test_delete_single_and_channel() {
        let store = ScheduleStore::new_in_memory().unwrap();
        store.upsert(&entry(100, 60, 1)).unwrap();
        store.upsert(&entry(100, 300, 2)).unwrap();
        store.upsert(&entry(200, 60, 3)).unwrap();

        store.delete(100, 60).unwrap();
        assert_eq!(store.count().unwrap(), 2);

        let deleted = store.delete_channel(100).unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_shared_database_file_with_rank_store() {
        let path = std::env::temp_dir().join(format!(
            "scanner-shared-db-{}.db",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        // Both stores open their own connection to the one database file;
        // interleaved writes must not surface SQLITE_BUSY.
        let schedules = ScheduleStore::new(&path).unwrap();
        let ranks = crate::rank_store::RankStore::new(&path).unwrap();

        schedules.upsert(&entry(100, 60, 1)).unwrap();
        ranks
            .record_and_diff("LONDON", 60, &[("BTCUSDT".to_string(), 1)])
            .unwrap();
        schedules.delete(100, 60).unwrap();
        ranks
            .record_and_diff("LONDON", 60, &[("BTCUSDT".to_string(), 2)])
            .unwrap();

        assert_eq!(schedules.count().unwrap(), 0);
        assert_eq!(ranks.retained_scans("LONDON", 60).unwrap(), 2);

        drop((schedules, ranks));
        let _ = std::fs::remove_file(&path);
    }
}

//! Rank history store
//!
//! SQLite-backed store of ranking snapshots, two per (session, interval)
//! key, used to annotate each update with per-symbol rank movement.

use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

/// Signed rank movement per symbol; positive means the rank improved.
pub type RankDelta = HashMap<String, i64>;

/// Durable store of the two most recent ranking snapshots per key.
pub struct RankStore {
    conn: Mutex<Connection>,
}

impl RankStore {
    /// Open (or create) the store at `db_path`.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, RankStoreError> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                RankStoreError::Io(format!("Failed to create database directory: {}", e))
            })?;
        }

        let conn = Connection::open(db_path).map_err(RankStoreError::Database)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn new_in_memory() -> Result<Self, RankStoreError> {
        let conn = Connection::open_in_memory().map_err(RankStoreError::Database)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), RankStoreError> {
        let conn = self.conn.lock().map_err(|_| RankStoreError::LockError)?;

        // The schedule store keeps its own connection to the same file;
        // wait out its write locks instead of surfacing SQLITE_BUSY.
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(RankStoreError::Database)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS previous_rankings (
                session_name TEXT NOT NULL,
                interval INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                rank INTEGER NOT NULL,
                scan_time INTEGER NOT NULL,
                UNIQUE(session_name, interval, symbol, scan_time)
            );

            CREATE INDEX IF NOT EXISTS idx_rankings_key
            ON previous_rankings(session_name, interval, scan_time);
            "#,
        )
        .map_err(RankStoreError::Database)?;

        Ok(())
    }

    /// Persist `ranking` as the newest snapshot for the key and return the
    /// movement against the previously retained snapshot.
    ///
    /// The first scan for a key yields an empty delta. Symbols present in
    /// only one of the two snapshots contribute nothing. Retention is two
    /// scan times per key; older snapshots are pruned.
    pub fn record_and_diff(
        &self,
        session_name: &str,
        interval_secs: u32,
        ranking: &[(String, u32)],
    ) -> Result<RankDelta, RankStoreError> {
        let mut conn = self.conn.lock().map_err(|_| RankStoreError::LockError)?;

        let previous = Self::load_latest(&conn, session_name, interval_secs)?;

        // Strictly increasing scan time even for back-to-back scans within
        // the same millisecond.
        let now_ms = chrono::Utc::now().timestamp_millis();
        let scan_time = match Self::latest_scan_time(&conn, session_name, interval_secs)? {
            Some(prev) if prev >= now_ms => prev + 1,
            _ => now_ms,
        };

        let tx = conn.transaction().map_err(RankStoreError::Database)?;
        for (symbol, rank) in ranking {
            tx.execute(
                r#"
                INSERT INTO previous_rankings (session_name, interval, symbol, rank, scan_time)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![session_name, interval_secs, symbol, rank, scan_time],
            )
            .map_err(RankStoreError::Database)?;
        }

        // Keep only the two most recent scan times for this key.
        tx.execute(
            r#"
            DELETE FROM previous_rankings
            WHERE session_name = ?1 AND interval = ?2 AND scan_time NOT IN (
                SELECT DISTINCT scan_time FROM previous_rankings
                WHERE session_name = ?1 AND interval = ?2
                ORDER BY scan_time DESC LIMIT 2
            )
            "#,
            params![session_name, interval_secs],
        )
        .map_err(RankStoreError::Database)?;

        tx.commit().map_err(RankStoreError::Database)?;

        let mut delta = RankDelta::new();
        if let Some(previous) = previous {
            for (symbol, rank) in ranking {
                if let Some(prev_rank) = previous.get(symbol) {
                    let change = *prev_rank as i64 - *rank as i64;
                    if change != 0 {
                        delta.insert(symbol.clone(), change);
                    }
                }
            }
        }

        Ok(delta)
    }

    fn latest_scan_time(
        conn: &Connection,
        session_name: &str,
        interval_secs: u32,
    ) -> Result<Option<i64>, RankStoreError> {
        conn.query_row(
            "SELECT MAX(scan_time) FROM previous_rankings WHERE session_name = ?1 AND interval = ?2",
            params![session_name, interval_secs],
            |row| row.get(0),
        )
        .map_err(RankStoreError::Database)
    }

    fn load_latest(
        conn: &Connection,
        session_name: &str,
        interval_secs: u32,
    ) -> Result<Option<HashMap<String, u32>>, RankStoreError> {
        let mut stmt = conn
            .prepare(
                r#"
            SELECT symbol, rank FROM previous_rankings
            WHERE session_name = ?1 AND interval = ?2
            AND scan_time = (
                SELECT MAX(scan_time) FROM previous_rankings
                WHERE session_name = ?1 AND interval = ?2
            )
            "#,
            )
            .map_err(RankStoreError::Database)?;

        let rows = stmt
            .query_map(params![session_name, interval_secs], |row| {
                let symbol: String = row.get(0)?;
                let rank: u32 = row.get(1)?;
                Ok((symbol, rank))
            })
            .map_err(RankStoreError::Database)?;

        let mut ranks = HashMap::new();
        for row in rows {
            let (symbol, rank) = row.map_err(RankStoreError::Database)?;
            ranks.insert(symbol, rank);
        }

        if ranks.is_empty() {
            Ok(None)
        } else {
            Ok(Some(ranks))
        }
    }

    /// Number of distinct retained scan times for a key. Test support.
    pub fn retained_scans(
        &self,
        session_name: &str,
        interval_secs: u32,
    ) -> Result<usize, RankStoreError> {
        let conn = self.conn.lock().map_err(|_| RankStoreError::LockError)?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(DISTINCT scan_time) FROM previous_rankings WHERE session_name = ?1 AND interval = ?2",
                params![session_name, interval_secs],
                |row| row.get(0),
            )
            .map_err(RankStoreError::Database)?;
        Ok(count as usize)
    }
}

/// Errors from rank history storage
#[derive(Debug, thiserror::Error)]
pub enum RankStoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Failed to acquire lock")]
    LockError,
}

//! SQLite result store.
//!
//! A single writer connection behind a mutex; WAL journal mode keeps readers
//! from blocking the writer. Each insert commits on its own so an abrupt
//! shutdown loses at most the in-flight row.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, Result as SqlResult};

use super::models::{ProbeResult, Status};
use super::{ResultStore, StoreError};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file and apply migrations.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn insert(conn: &Connection, result: &ProbeResult) -> SqlResult<()> {
        conn.execute(
            "INSERT INTO probe_results (endpoint, ts, success, latency_ms, detail)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                result.endpoint,
                result.timestamp.format(TS_FORMAT).to_string(),
                result.success,
                result.latency_ms(),
                result.detail,
            ],
        )?;
        Ok(())
    }

    fn select_recent(
        conn: &Connection,
        endpoint: &str,
        limit: u32,
    ) -> SqlResult<Vec<ProbeResult>> {
        let mut stmt = conn.prepare(
            "SELECT endpoint, ts, success, latency_ms, detail FROM probe_results
             WHERE endpoint = ?1 ORDER BY ts DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![endpoint, limit], |row| {
                let ts: String = row.get(1)?;
                let success: bool = row.get(2)?;
                let latency_ms: Option<i64> = row.get(3)?;
                Ok(ProbeResult {
                    endpoint: row.get(0)?,
                    timestamp: parse_db_time(&ts).unwrap_or_else(Utc::now),
                    success,
                    status: if success { Status::Up } else { Status::Down },
                    latency: latency_ms.map(|ms| Duration::from_millis(ms as u64)),
                    detail: row.get(4)?,
                    metric_tags: Default::default(),
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(rows)
    }
}

#[async_trait]
impl ResultStore for SqliteStore {
    async fn record(&self, result: &ProbeResult) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        let result = result.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            Self::insert(&conn, &result)
        })
        .await??;
        Ok(())
    }

    async fn recent(&self, endpoint: &str, limit: u32) -> Result<Vec<ProbeResult>, StoreError> {
        let conn = self.conn.clone();
        let endpoint = endpoint.to_string();
        let rows = tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            Self::select_recent(&conn, &endpoint, limit)
        })
        .await??;
        Ok(rows)
    }
}

/// Parse a stored timestamp, tolerating older rows without fractional seconds.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    for format in [TS_FORMAT, "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn store() -> (NamedTempFile, SqliteStore) {
        let tmp = NamedTempFile::new().unwrap();
        let store = SqliteStore::open(tmp.path()).unwrap();
        (tmp, store)
    }

    #[tokio::test]
    async fn record_then_recent_round_trips() {
        let (_tmp, store) = store();

        let written = ProbeResult::up("api", "http", Duration::from_millis(128), "200");
        store.record(&written).await.unwrap();

        let rows = store.recent("api", 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        let read = &rows[0];
        assert_eq!(read.endpoint, written.endpoint);
        assert_eq!(read.success, written.success);
        assert_eq!(read.latency_ms(), written.latency_ms());
        assert_eq!(read.detail, written.detail);
        assert_eq!(read.timestamp.timestamp_micros(), written.timestamp.timestamp_micros());
    }

    #[tokio::test]
    async fn recent_orders_newest_first_and_limits() {
        let (_tmp, store) = store();

        for i in 0..5u64 {
            let mut r = ProbeResult::up("api", "http", Duration::from_millis(i), format!("{i}"));
            r.timestamp = Utc::now() + chrono::Duration::seconds(i as i64);
            store.record(&r).await.unwrap();
        }

        let rows = store.recent("api", 3).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].detail, "4");
        assert_eq!(rows[1].detail, "3");
        assert_eq!(rows[2].detail, "2");
    }

    #[tokio::test]
    async fn failure_rows_keep_null_latency() {
        let (_tmp, store) = store();

        let written = ProbeResult::down("db", "tcp", None, "connection refused");
        store.record(&written).await.unwrap();

        let rows = store.recent("db", 1).await.unwrap();
        assert_eq!(rows[0].latency, None);
        assert_eq!(rows[0].status, Status::Down);
    }

    #[tokio::test]
    async fn recent_is_scoped_per_endpoint() {
        let (_tmp, store) = store();

        store
            .record(&ProbeResult::up("a", "http", Duration::from_millis(1), "200"))
            .await
            .unwrap();
        store
            .record(&ProbeResult::up("b", "http", Duration::from_millis(1), "200"))
            .await
            .unwrap();

        let rows = store.recent("a", 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].endpoint, "a");
    }

    #[test]
    fn parses_both_timestamp_precisions() {
        assert!(parse_db_time("2026-08-02 10:30:00.123456").is_some());
        assert!(parse_db_time("2026-08-02 10:30:00").is_some());
        assert!(parse_db_time("not a time").is_none());
    }
}

//! Result persistence with pluggable backends.

mod models;
mod postgres;
mod sqlite;

pub use models::{ProbeResult, Status};
pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{DatabaseConfig, DatabaseKind};

/// Store error types.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
    #[error("connection pool error: {0}")]
    Pool(String),
    #[error("storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Append-only probe history.
///
/// A failed `record` must never stall the caller's monitoring loop: the
/// scheduler logs it, bumps `store_write_errors`, and drops the row.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Append one result.
    async fn record(&self, result: &ProbeResult) -> Result<(), StoreError>;

    /// The most recent results for an endpoint, newest first.
    async fn recent(&self, endpoint: &str, limit: u32) -> Result<Vec<ProbeResult>, StoreError>;
}

/// Open the backend selected by configuration.
pub async fn open_store(
    config: &DatabaseConfig,
    max_concurrent_checks: usize,
) -> Result<Arc<dyn ResultStore>, StoreError> {
    match config.kind {
        DatabaseKind::Sqlite => Ok(Arc::new(SqliteStore::open(config.sqlite_path())?)),
        DatabaseKind::Postgresql => {
            Ok(Arc::new(PostgresStore::connect(config, max_concurrent_checks).await?))
        }
    }
}

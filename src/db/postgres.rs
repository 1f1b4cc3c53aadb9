//! PostgreSQL result store backed by a deadpool connection pool.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::NoTls;

use super::models::{ProbeResult, Status};
use super::{ResultStore, StoreError};
use crate::config::DatabaseConfig;

/// Readers sharing the pool with the probe writers.
const POOL_READER_SLOTS: usize = 2;

const INIT_SQL: &str = "
CREATE TABLE IF NOT EXISTS probe_results (
    endpoint TEXT NOT NULL,
    ts TIMESTAMPTZ NOT NULL,
    success BOOL NOT NULL,
    latency_ms BIGINT,
    detail TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_probe_results_endpoint_ts
    ON probe_results (endpoint, ts DESC);
";

pub struct PostgresStore {
    pool: Pool,
}

impl PostgresStore {
    /// Connect, size the pool to the probe concurrency cap plus reader slots,
    /// and create the schema if missing.
    pub async fn connect(
        config: &DatabaseConfig,
        max_concurrent_checks: usize,
    ) -> Result<Self, StoreError> {
        let pg_config: tokio_postgres::Config = config.postgres_url().parse()?;
        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig { recycling_method: RecyclingMethod::Fast },
        );
        let pool = Pool::builder(manager)
            .max_size(max_concurrent_checks + POOL_READER_SLOTS)
            .build()
            .map_err(|e| StoreError::Pool(e.to_string()))?;

        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<(), StoreError> {
        let client = self.client().await?;
        client.batch_execute(INIT_SQL).await?;
        Ok(())
    }

    async fn client(&self) -> Result<deadpool_postgres::Object, StoreError> {
        self.pool.get().await.map_err(|e| StoreError::Pool(e.to_string()))
    }
}

#[async_trait]
impl ResultStore for PostgresStore {
    async fn record(&self, result: &ProbeResult) -> Result<(), StoreError> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO probe_results (endpoint, ts, success, latency_ms, detail)
                 VALUES ($1, $2, $3, $4, $5)",
                &[
                    &result.endpoint,
                    &result.timestamp,
                    &result.success,
                    &result.latency_ms(),
                    &result.detail,
                ],
            )
            .await?;
        Ok(())
    }

    async fn recent(&self, endpoint: &str, limit: u32) -> Result<Vec<ProbeResult>, StoreError> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT endpoint, ts, success, latency_ms, detail FROM probe_results
                 WHERE endpoint = $1 ORDER BY ts DESC LIMIT $2",
                &[&endpoint, &i64::from(limit)],
            )
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let success: bool = row.get(2);
                let latency_ms: Option<i64> = row.get(3);
                ProbeResult {
                    endpoint: row.get(0),
                    timestamp: row.get(1),
                    success,
                    status: if success { Status::Up } else { Status::Down },
                    latency: latency_ms.map(|ms| Duration::from_millis(ms as u64)),
                    detail: row.get(4),
                    metric_tags: Default::default(),
                }
            })
            .collect())
    }
}

//! PostgreSQL store on a `sqlx` connection pool.
//!
//! Events are journaled in the `events` table:
//!
//! ```sql
//! CREATE TABLE events (
//!     id         UUID PRIMARY KEY,
//!     channel    VARCHAR(100) NOT NULL,
//!     kind       VARCHAR(50)  NOT NULL,
//!     asset_kind VARCHAR(50)  NOT NULL,
//!     asset_key  VARCHAR(100) NOT NULL,
//!     timestamp  TIMESTAMPTZ  NOT NULL,
//!     asset      JSONB        NOT NULL,
//!     metadata   JSONB        NOT NULL DEFAULT '{}'
//! );
//! ```

use super::{StoreTransaction, TransactionMode, TransactionalStore};
use crate::config::DatabaseConfig;
use crate::error::OrchestratorResult;
use crate::events::Event;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{PgConnection, Postgres, Row};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool sized by configuration
    pub async fn connect(config: &DatabaseConfig) -> OrchestratorResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.url)
            .await?;

        info!(
            max_connections = config.max_connections,
            "🗄️ STORE: PostgreSQL pool ready"
        );
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> OrchestratorResult<bool> {
        let row = sqlx::query("SELECT 1 AS health")
            .fetch_one(&self.pool)
            .await?;
        let health: i32 = row.try_get("health")?;
        Ok(health == 1)
    }
}

#[async_trait]
impl TransactionalStore for PgStore {
    type Transaction = PgTransaction;

    async fn begin(&self, mode: TransactionMode) -> OrchestratorResult<PgTransaction> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(mode.isolation_statement())
            .execute(&mut *tx)
            .await?;

        debug!(mode = %mode, "STORE: transaction opened");
        Ok(PgTransaction { tx, mode })
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("🗄️ STORE: PostgreSQL pool closed");
    }
}

/// A PostgreSQL transaction; handlers run their statements through [`PgTransaction::connection`]
pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
    mode: TransactionMode,
}

impl std::fmt::Debug for PgTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgTransaction")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl PgTransaction {
    pub fn connection(&mut self) -> &mut PgConnection {
        &mut *self.tx
    }
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    fn mode(&self) -> TransactionMode {
        self.mode
    }

    async fn record_events(&mut self, events: &[Event]) -> OrchestratorResult<()> {
        for event in events {
            sqlx::query(
                r#"
                INSERT INTO events
                (id, channel, kind, asset_kind, asset_key, timestamp, asset, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(event.id())
            .bind(event.channel())
            .bind(event.kind().as_str())
            .bind(event.asset_kind().as_str())
            .bind(event.asset_key())
            .bind(event.timestamp())
            .bind(sqlx::types::Json(event.asset()))
            .bind(sqlx::types::Json(event.metadata()))
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn commit(self) -> OrchestratorResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> OrchestratorResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

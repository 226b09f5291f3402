//! # Bootstrap
//!
//! Builds the long-lived pieces of each deployment and tears them down again. Nothing here is a
//! global: a process owns one [`DatabaseCore`] or one [`LedgerCore`], and tests build as many
//! isolated ones as they need.
//!
//! - [`DatabaseCore`]: store, admission scheduler, delivery session, unit of work
//! - [`LedgerCore`]: per-organization ledger pool and the retry policy its clients share

use crate::classifier::MethodClassifier;
use crate::config::OrchestratorConfig;
use crate::error::OrchestratorResult;
use crate::health::{HealthReport, ProcessHealth};
use crate::ledger::{LedgerClient, LedgerConnector, LedgerPool, RetryPolicy};
use crate::messaging::{AmqpConnector, BrokerConnector, DeliverySession};
use crate::scheduler::{self, ExecutionScheduler};
use crate::store::{PgStore, TransactionalStore};
use crate::unit_of_work::UnitOfWork;
use std::sync::Arc;
use tracing::info;

/// Database-backed deployment
pub struct DatabaseCore<S: TransactionalStore = PgStore> {
    health: Arc<ProcessHealth>,
    scheduler: Arc<dyn ExecutionScheduler>,
    session: Arc<DeliverySession>,
    unit_of_work: Arc<UnitOfWork<S>>,
}

impl<S: TransactionalStore> std::fmt::Debug for DatabaseCore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseCore")
            .field("session", &self.session)
            .field("health", &self.health.status())
            .finish_non_exhaustive()
    }
}

impl DatabaseCore<PgStore> {
    /// Connect to PostgreSQL and RabbitMQ as configured
    pub async fn bootstrap(
        config: &OrchestratorConfig,
        classifier: Arc<dyn MethodClassifier>,
    ) -> OrchestratorResult<Self> {
        config.validate()?;
        let store = PgStore::connect(&config.database).await?;
        let connector = Arc::new(AmqpConnector::new(
            config.broker.url.clone(),
            config.broker.connection_name.clone(),
        ));
        Ok(Self::assemble(store, connector, config, classifier))
    }
}

impl<S: TransactionalStore> DatabaseCore<S> {
    /// Wire the core around an existing store and broker connector
    pub fn assemble(
        store: S,
        connector: Arc<dyn BrokerConnector>,
        config: &OrchestratorConfig,
        classifier: Arc<dyn MethodClassifier>,
    ) -> Self {
        let health = Arc::new(ProcessHealth::new());
        let scheduler = scheduler::from_mode(config.scheduler.mode);
        let session = Arc::new(DeliverySession::start(connector, &config.broker));
        let unit_of_work = Arc::new(UnitOfWork::new(
            store,
            scheduler.clone(),
            session.clone(),
            classifier,
            health.clone(),
        ));

        info!(
            scheduler = ?config.scheduler.mode,
            broker = %session.endpoint(),
            "🚀 BOOTSTRAP: database-backed core assembled"
        );

        Self {
            health,
            scheduler,
            session,
            unit_of_work,
        }
    }

    pub fn unit_of_work(&self) -> &Arc<UnitOfWork<S>> {
        &self.unit_of_work
    }

    pub fn session(&self) -> &Arc<DeliverySession> {
        &self.session
    }

    pub fn scheduler(&self) -> &Arc<dyn ExecutionScheduler> {
        &self.scheduler
    }

    pub fn health(&self) -> HealthReport {
        self.health.report()
    }

    /// Stop admitting requests, drain the delivery session, then release the store
    pub async fn shutdown(&self) {
        info!("🛑 BOOTSTRAP: shutting down database-backed core");
        self.scheduler.shutdown().await;
        self.session.close().await;
        self.unit_of_work.store().close().await;
        info!(health = ?self.health.status(), "🛑 BOOTSTRAP: database-backed core stopped");
    }
}

/// Ledger-backed deployment
pub struct LedgerCore {
    health: Arc<ProcessHealth>,
    pool: LedgerPool,
    classifier: Arc<dyn MethodClassifier>,
    policy: RetryPolicy,
    channel: String,
}

impl std::fmt::Debug for LedgerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerCore")
            .field("channel", &self.channel)
            .field("pool", &self.pool)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl LedgerCore {
    pub fn bootstrap(
        config: &OrchestratorConfig,
        connector: Arc<dyn LedgerConnector>,
        classifier: Arc<dyn MethodClassifier>,
    ) -> OrchestratorResult<Self> {
        config.validate()?;
        let health = Arc::new(ProcessHealth::new());
        let pool = LedgerPool::new(connector, health.clone(), config.ledger.queue_capacity);
        let policy = RetryPolicy::from_config(&config.retry);

        info!(
            channel = %config.ledger.channel,
            retry_budget_ms = config.retry.budget_ms,
            matching = ?config.retry.matching,
            "🚀 BOOTSTRAP: ledger-backed core assembled"
        );

        Ok(Self {
            health,
            pool,
            classifier,
            policy,
            channel: config.ledger.channel.clone(),
        })
    }

    /// Client acting as `organization`, backed by that organization's worker
    pub async fn client(&self, organization: &str) -> OrchestratorResult<LedgerClient> {
        let worker = self.pool.worker(organization).await?;
        Ok(LedgerClient::new(
            Arc::new(worker),
            self.classifier.clone(),
            self.policy.clone(),
        ))
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn pool(&self) -> &LedgerPool {
        &self.pool
    }

    pub fn health(&self) -> HealthReport {
        self.health.report()
    }

    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, RabbitMQ in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Asset Orchestrator Core
//!
//! Consistency and concurrency core of a federated-learning asset orchestrator.
//!
//! ## Overview
//!
//! Every RPC request that touches orchestration state runs inside a unit of work: it is admitted
//! by an execution scheduler, executes in a database transaction whose isolation follows the
//! method's read/write classification, buffers the domain events it produces, and only once the
//! transaction has committed hands those events to a reliable message-broker session.
//!
//! A second deployment delegates persistence to a permissioned ledger. There, writes are retried
//! within a wall-clock budget and single-asset creates that conflict right after a timeout are
//! reconciled by reading the asset back.
//!
//! ## Module Organization
//!
//! - [`scheduler`] - FIFO admission of requests into a single execution stream
//! - [`unit_of_work`] - Transaction, event buffering and post-commit dispatch per request
//! - [`events`] - Domain events and the request-scoped event queue
//! - [`messaging`] - Reliable, confirm-based broker delivery session
//! - [`store`] - Transactional storage (PostgreSQL and in-memory)
//! - [`models`] - Compute plan status aggregation
//! - [`ledger`] - Ledger client, per-organization pool, retry and reconciliation
//! - [`bootstrap`] - Assembly and shutdown of each deployment
//! - [`config`], [`error`], [`health`], [`logging`], [`metrics`] - Ambient plumbing
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use asset_orchestrator::bootstrap::DatabaseCore;
//! use asset_orchestrator::classifier::MethodTable;
//! use asset_orchestrator::config::OrchestratorConfig;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! asset_orchestrator::logging::init_structured_logging();
//! let config = OrchestratorConfig::load()?;
//! let methods = MethodTable::new().read_only("/orchestrator.ModelService/GetModel");
//! let core = DatabaseCore::bootstrap(&config, Arc::new(methods)).await?;
//! // ... serve requests through core.unit_of_work() ...
//! core.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod classifier;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod health;
pub mod ledger;
pub mod logging;
pub mod messaging;
pub mod metrics;
pub mod models;
pub mod scheduler;
pub mod store;
pub mod unit_of_work;

pub use bootstrap::{DatabaseCore, LedgerCore};
pub use classifier::{MethodClassifier, MethodKind, MethodTable};
pub use config::{ConfigurationError, OrchestratorConfig};
pub use context::RequestContext;
pub use error::{ErrorKind, OrchestratorError, OrchestratorResult};
pub use events::{AssetKind, Event, EventKind, EventQueue};
pub use health::{HealthReport, HealthStatus, ProcessHealth};
pub use models::{derive_status, PlanStatus, TaskCounters, TaskStatus};
pub use scheduler::{ExecutionScheduler, ExecutionToken, FifoScheduler, ImmediateScheduler};
pub use store::{TransactionMode, TransactionalStore};
pub use unit_of_work::{ExecutionContext, UnitOfWork};

//! # Unit of Work
//!
//! Runs one request end to end and ties the fate of its events to the fate of its transaction:
//! events leave the process only after the transaction has committed, and never after a rollback.
//!
//! ## Request lifecycle
//!
//! 1. Refuse the request when the delivery session is not ready (the process is flagged unhealthy)
//! 2. Wait for the admission token, then check readiness again before touching the store
//! 3. Open a transaction whose isolation matches the method kind
//! 4. Run the handler with the transaction, a fresh [`EventQueue`] and the request context
//! 5. Handler error: roll back and return the handler's error unchanged
//! 6. Handler success: journal the events, commit, then hand the events to the delivery session
//! 7. A dispatch failure after commit still returns success; health is marked degraded
//!
//! The admission token is held until the events have been handed to the session, so dispatch
//! order across requests equals commit order.

use crate::classifier::MethodClassifier;
use crate::context::RequestContext;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::events::{AssetKind, Event, EventKind, EventQueue};
use crate::health::ProcessHealth;
use crate::logging::{log_dispatch_failure, log_transaction_outcome};
use crate::messaging::DeliverySession;
use crate::metrics;
use crate::scheduler::ExecutionScheduler;
use crate::store::{StoreTransaction, TransactionMode, TransactionalStore};
use futures::future::BoxFuture;
use opentelemetry::KeyValue;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

const HEALTH_COMPONENT: &str = "event_delivery";

/// What a handler sees while it runs
#[derive(Debug)]
pub struct ExecutionContext<Tx> {
    tx: Tx,
    events: EventQueue,
    request: RequestContext,
}

impl<Tx: StoreTransaction> ExecutionContext<Tx> {
    fn new(tx: Tx, request: RequestContext) -> Self {
        Self {
            tx,
            events: EventQueue::new(),
            request,
        }
    }

    pub fn tx(&mut self) -> &mut Tx {
        &mut self.tx
    }

    pub fn mode(&self) -> TransactionMode {
        self.tx.mode()
    }

    pub fn request(&self) -> &RequestContext {
        &self.request
    }

    /// Events enqueued so far
    pub fn events(&self) -> &EventQueue {
        &self.events
    }

    /// Enqueue an event on the request's channel
    pub fn emit(
        &mut self,
        kind: EventKind,
        asset_kind: AssetKind,
        asset_key: impl Into<String>,
        asset: Value,
    ) {
        let event = Event::new(kind, asset_kind, asset_key, self.request.channel(), asset);
        self.events.enqueue(event);
    }

    pub fn enqueue(&mut self, event: Event) {
        self.events.enqueue(event);
    }

    fn into_parts(self) -> (Tx, EventQueue) {
        (self.tx, self.events)
    }
}

/// Coordinator binding the transactional store, the admission scheduler and the delivery session
pub struct UnitOfWork<S: TransactionalStore> {
    store: S,
    scheduler: Arc<dyn ExecutionScheduler>,
    session: Arc<DeliverySession>,
    classifier: Arc<dyn MethodClassifier>,
    health: Arc<ProcessHealth>,
}

impl<S: TransactionalStore> std::fmt::Debug for UnitOfWork<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("session", &self.session)
            .field("health", &self.health.status())
            .finish_non_exhaustive()
    }
}

impl<S: TransactionalStore> UnitOfWork<S> {
    pub fn new(
        store: S,
        scheduler: Arc<dyn ExecutionScheduler>,
        session: Arc<DeliverySession>,
        classifier: Arc<dyn MethodClassifier>,
        health: Arc<ProcessHealth>,
    ) -> Self {
        Self {
            store,
            scheduler,
            session,
            classifier,
            health,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn health(&self) -> &Arc<ProcessHealth> {
        &self.health
    }

    /// Run `handler` as one atomic request.
    ///
    /// ```rust,ignore
    /// let created = uow
    ///     .execute(&request, |ctx| {
    ///         Box::pin(async move {
    ///             ctx.tx().insert("model:42", json!({"key": "42"}))?;
    ///             ctx.emit(EventKind::AssetCreated, AssetKind::Model, "42", json!({"key": "42"}));
    ///             Ok("42".to_string())
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn execute<T, F>(&self, request: &RequestContext, handler: F) -> OrchestratorResult<T>
    where
        T: Send,
        F: for<'c> FnOnce(
                &'c mut ExecutionContext<S::Transaction>,
            ) -> BoxFuture<'c, OrchestratorResult<T>>
            + Send,
    {
        let method = request.method();
        let channel = request.channel();

        // Unready requests never queue
        self.ensure_ready()?;

        let token = self.scheduler.acquire().await?;
        // The session may have dropped while this request waited for its turn
        if let Err(err) = self.ensure_ready() {
            token.release();
            debug!(method = %method, "💾 UOW: refused after admission, delivery session not ready");
            return Err(err);
        }
        let started = Instant::now();

        let mode = TransactionMode::from(self.classifier.classify(method));
        let tx = self.store.begin(mode).await?;
        debug!(method = %method, mode = %mode, sequence = token.sequence(), "💾 UOW: transaction started");

        let mut ctx = ExecutionContext::new(tx, request.clone());
        let outcome = handler(&mut ctx).await;
        let (tx, mut queue) = ctx.into_parts();

        let value = match outcome {
            Ok(value) => value,
            Err(err) => {
                // The queue is dropped with the transaction
                self.rollback(tx, method, channel, started, &err).await;
                return Err(err);
            }
        };

        let events = queue.drain();
        self.commit(tx, &events, method, channel, started).await?;

        if !self.session.is_ready() {
            let reason = "delivery session became unready during the request";
            log_dispatch_failure(method, channel, events.len(), reason);
            self.health.mark_unhealthy(HEALTH_COMPONENT, reason);
            metrics::event_dispatch_failures_total()
                .add(1, &[KeyValue::new("channel", channel.to_string())]);
            return Err(OrchestratorError::transient(
                "changes committed but event delivery became unavailable",
            ));
        }

        self.dispatch(method, channel, events);
        token.release();
        Ok(value)
    }

    fn ensure_ready(&self) -> OrchestratorResult<()> {
        if self.session.is_ready() {
            return Ok(());
        }
        self.health
            .mark_unhealthy(HEALTH_COMPONENT, "delivery session not ready, refusing requests");
        Err(OrchestratorError::transient(
            "event delivery unavailable: delivery session not ready",
        ))
    }

    async fn rollback(
        &self,
        tx: S::Transaction,
        method: &str,
        channel: &str,
        started: Instant,
        cause: &OrchestratorError,
    ) {
        if let Err(rollback_err) = tx.rollback().await {
            warn!(method = %method, error = %rollback_err, "💾 UOW: rollback failed");
        }
        metrics::transactions_total().add(1, &metrics::method_outcome(method, "rollback"));
        log_transaction_outcome(
            method,
            channel,
            "rollback",
            0,
            started.elapsed().as_millis() as u64,
            Some(&cause.to_string()),
        );
    }

    async fn commit(
        &self,
        mut tx: S::Transaction,
        events: &[Event],
        method: &str,
        channel: &str,
        started: Instant,
    ) -> OrchestratorResult<()> {
        if !events.is_empty() {
            if let Err(err) = tx.record_events(events).await {
                self.rollback(tx, method, channel, started, &err).await;
                return Err(err);
            }
        }

        if let Err(err) = tx.commit().await {
            metrics::transactions_total().add(1, &metrics::method_outcome(method, "rollback"));
            log_transaction_outcome(
                method,
                channel,
                "commit_failed",
                0,
                started.elapsed().as_millis() as u64,
                Some(&err.to_string()),
            );
            return Err(err);
        }

        metrics::transactions_total().add(1, &metrics::method_outcome(method, "commit"));
        log_transaction_outcome(
            method,
            channel,
            "commit",
            events.len(),
            started.elapsed().as_millis() as u64,
            None,
        );
        Ok(())
    }

    /// Hand committed events to the delivery session, one batch per run of same-channel events.
    ///
    /// Every event is encoded before anything is published: an encoding failure publishes none of
    /// the request's events.
    fn dispatch(&self, method: &str, request_channel: &str, events: Vec<Event>) {
        if events.is_empty() {
            return;
        }

        let payloads = match events
            .iter()
            .map(Event::to_payload)
            .collect::<OrchestratorResult<Vec<_>>>()
        {
            Ok(payloads) => payloads,
            Err(err) => {
                self.dispatch_failed(method, request_channel, events.len(), &err.to_string());
                return;
            }
        };

        let mut batches: Vec<(String, Vec<Vec<u8>>)> = Vec::new();
        for (event, payload) in events.iter().zip(payloads) {
            match batches.last_mut() {
                Some((routing_key, payloads)) if routing_key == event.channel() => {
                    payloads.push(payload)
                }
                _ => batches.push((event.channel().to_string(), vec![payload])),
            }
        }

        for (routing_key, payloads) in batches {
            let count = payloads.len();
            match self.session.publish(&routing_key, payloads) {
                Ok(()) => {
                    metrics::events_dispatched_total()
                        .add(count as u64, &[KeyValue::new("channel", routing_key.clone())]);
                }
                Err(err) => {
                    self.dispatch_failed(method, &routing_key, count, &err.to_string());
                }
            }
        }
    }

    fn dispatch_failed(&self, method: &str, channel: &str, events: usize, reason: &str) {
        log_dispatch_failure(method, channel, events, reason);
        metrics::event_dispatch_failures_total()
            .add(1, &[KeyValue::new("channel", channel.to_string())]);
        self.health.mark_degraded(
            HEALTH_COMPONENT,
            format!("{events} committed events not dispatched on {channel}: {reason}"),
        );
        error!(method = %method, channel = %channel, "📭 UOW: committed write without event dispatch");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::MethodTable;
    use crate::config::BrokerConfig;
    use crate::health::HealthStatus;
    use crate::messaging::InMemoryBroker;
    use crate::scheduler::ImmediateScheduler;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::time::Duration;

    const REGISTER: &str = "/orchestrator.ModelService/RegisterModel";
    const GET: &str = "/orchestrator.ModelService/GetModel";

    async fn coordinator(broker: &InMemoryBroker) -> UnitOfWork<MemoryStore> {
        let config = BrokerConfig {
            reconnect_delay_ms: 10,
            confirm_timeout_ms: 100,
            liveness_interval_ms: 10,
            drain_timeout_ms: 1_000,
            ..BrokerConfig::default()
        };
        let session = Arc::new(DeliverySession::start(Arc::new(broker.clone()), &config));
        assert!(session.wait_ready(Duration::from_secs(2)).await);

        UnitOfWork::new(
            MemoryStore::new(),
            Arc::new(ImmediateScheduler::new()),
            session,
            Arc::new(MethodTable::new().read_only(GET)),
            Arc::new(ProcessHealth::new()),
        )
    }

    #[tokio::test]
    async fn test_read_only_method_gets_read_only_transaction() {
        let broker = InMemoryBroker::new();
        let uow = coordinator(&broker).await;
        let request = RequestContext::new(GET, "MyOrg1MSP", "mychannel");

        let mode = uow
            .execute(&request, |ctx| Box::pin(async move { Ok(ctx.mode()) }))
            .await
            .unwrap();
        assert_eq!(mode, TransactionMode::ReadOnly);
    }

    #[tokio::test]
    async fn test_handler_error_is_returned_unchanged() {
        let broker = InMemoryBroker::new();
        let uow = coordinator(&broker).await;
        let request = RequestContext::new(REGISTER, "MyOrg1MSP", "mychannel");

        let err = uow
            .execute(&request, |ctx| {
                Box::pin(async move {
                    ctx.tx().insert("model:1", json!({}))?;
                    ctx.emit(EventKind::AssetCreated, AssetKind::Model, "1", json!({}));
                    Err::<(), _>(OrchestratorError::incompatible_state("model is disabled"))
                })
            })
            .await
            .unwrap_err();

        assert_eq!(err, OrchestratorError::incompatible_state("model is disabled"));
        assert_eq!(uow.store().asset_count(), 0);
        assert!(uow.store().journal().is_empty());
    }

    #[tokio::test]
    async fn test_emit_tags_request_channel() {
        let broker = InMemoryBroker::new();
        let uow = coordinator(&broker).await;
        let request = RequestContext::new(REGISTER, "MyOrg1MSP", "tenant-b");

        uow.execute(&request, |ctx| {
            Box::pin(async move {
                ctx.emit(EventKind::AssetUpdated, AssetKind::Model, "1", json!({}));
                assert_eq!(ctx.events().len(), 1);
                Ok(())
            })
        })
        .await
        .unwrap();

        let journal = uow.store().journal();
        assert_eq!(journal[0].channel(), "tenant-b");
        assert_eq!(uow.health().status(), HealthStatus::Healthy);
    }
}

//! Atomicity of transactions and their events, end to end over the in-memory store and broker.

mod common;

use asset_orchestrator::config::BrokerConfig;
use asset_orchestrator::health::{HealthStatus, ProcessHealth};
use asset_orchestrator::messaging::{DeliverySession, InMemoryBroker};
use asset_orchestrator::scheduler::{ExecutionScheduler, ImmediateScheduler};
use asset_orchestrator::store::MemoryStore;
use asset_orchestrator::unit_of_work::UnitOfWork;
use asset_orchestrator::{AssetKind, ErrorKind, EventKind, OrchestratorError, RequestContext};
use common::*;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn register_request() -> RequestContext {
    RequestContext::new(REGISTER_MODEL, CALLER, CHANNEL)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never became true");
}

#[tokio::test]
async fn test_commit_delivers_events_in_enqueue_order() {
    let core = TestCoordinator::start().await;

    let key = core
        .uow
        .execute(&register_request(), |ctx| {
            Box::pin(async move {
                ctx.tx().insert("model:m1", json!({"key": "m1"}))?;
                ctx.emit(EventKind::AssetCreated, AssetKind::Model, "m1", json!({"key": "m1"}));
                ctx.emit(EventKind::AssetUpdated, AssetKind::Model, "m1", json!({"key": "m1"}));
                ctx.emit(EventKind::AssetDisabled, AssetKind::Model, "m1", json!({"key": "m1"}));
                Ok::<_, OrchestratorError>("m1".to_string())
            })
        })
        .await
        .unwrap();
    assert_eq!(key, "m1");
    core.shutdown().await;

    let delivered = core.delivered_events(CHANNEL);
    let kinds: Vec<EventKind> = delivered.iter().map(|event| event.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::AssetCreated,
            EventKind::AssetUpdated,
            EventKind::AssetDisabled
        ]
    );
    assert!(delivered.iter().all(|event| event.asset_key() == "m1"));
    assert_eq!(core.uow.store().journal().len(), 3);
    assert_eq!(core.uow.store().asset("model:m1"), Some(json!({"key": "m1"})));
    assert_eq!(core.health.status(), HealthStatus::Healthy);
}

#[tokio::test]
async fn test_rollback_delivers_nothing() {
    let core = TestCoordinator::start().await;

    let err = core
        .uow
        .execute(&register_request(), |ctx| {
            Box::pin(async move {
                ctx.tx().insert("model:m1", json!({"key": "m1"}))?;
                ctx.emit(EventKind::AssetCreated, AssetKind::Model, "m1", json!({"key": "m1"}));
                Err::<(), _>(OrchestratorError::permission_denied(
                    "MyOrg1MSP cannot register models here",
                ))
            })
        })
        .await
        .unwrap_err();
    core.shutdown().await;

    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    assert_eq!(core.broker.delivery_count(), 0);
    assert_eq!(core.uow.store().asset_count(), 0);
    assert!(core.uow.store().journal().is_empty());
    assert_eq!(core.health.status(), HealthStatus::Healthy);
}

#[tokio::test]
async fn test_unready_session_rejects_before_transaction() {
    let broker = InMemoryBroker::new();
    broker.set_reachable(false);
    let session = Arc::new(DeliverySession::start(
        Arc::new(broker.clone()),
        &fast_broker_config(),
    ));
    let health = Arc::new(ProcessHealth::new());
    let uow = UnitOfWork::new(
        MemoryStore::new(),
        Arc::new(ImmediateScheduler::new()),
        session.clone(),
        Arc::new(method_table()),
        health.clone(),
    );

    let invoked = Arc::new(AtomicBool::new(false));
    let flag = invoked.clone();
    let err = uow
        .execute(&register_request(), move |_ctx| {
            Box::pin(async move {
                flag.store(true, Ordering::SeqCst);
                Ok::<_, OrchestratorError>(())
            })
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transient);
    assert!(!invoked.load(Ordering::SeqCst), "handler ran without delivery");
    assert_eq!(health.status(), HealthStatus::Unhealthy);
    assert!(!health.is_live());
    assert_eq!(uow.store().version(), 0);
}

#[tokio::test]
async fn test_session_lost_during_request_fails_after_commit() {
    let core = TestCoordinator::start().await;
    let broker = core.broker.clone();
    let session = core.session.clone();

    let err = core
        .uow
        .execute(&register_request(), move |ctx| {
            Box::pin(async move {
                ctx.tx().insert("model:m1", json!({"key": "m1"}))?;
                ctx.emit(EventKind::AssetCreated, AssetKind::Model, "m1", json!({}));
                broker.set_reachable(false);
                while session.is_ready() {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                Ok::<_, OrchestratorError>(())
            })
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transient);
    // The write is durable even though the request failed
    assert!(core.uow.store().asset("model:m1").is_some());
    assert_eq!(core.health.status(), HealthStatus::Unhealthy);
    assert_eq!(core.broker.delivery_count(), 0);
}

#[tokio::test]
async fn test_session_lost_while_queued_refuses_before_transaction() {
    let core = TestCoordinator::start().await;
    let holder = core.scheduler.acquire().await.unwrap();

    let invoked = Arc::new(AtomicBool::new(false));
    let queued = {
        let uow = core.uow.clone();
        let flag = invoked.clone();
        tokio::spawn(async move {
            uow.execute(&register_request(), move |ctx| {
                Box::pin(async move {
                    flag.store(true, Ordering::SeqCst);
                    ctx.tx().insert("model:late", json!({"key": "late"}))?;
                    ctx.emit(EventKind::AssetCreated, AssetKind::Model, "late", json!({}));
                    Ok::<_, OrchestratorError>(())
                })
            })
            .await
        })
    };
    let scheduler = core.scheduler.clone();
    wait_until(move || scheduler.pending_jobs() >= 2).await;

    core.broker.set_reachable(false);
    let session = core.session.clone();
    wait_until(move || !session.is_ready()).await;
    holder.release();

    let err = queued.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transient);
    assert!(!invoked.load(Ordering::SeqCst), "handler ran after the session dropped");
    assert!(core.uow.store().asset("model:late").is_none());
    assert_eq!(core.uow.store().version(), 0);
    assert_eq!(core.health.status(), HealthStatus::Unhealthy);

    // The refused request gave its token back
    let next = tokio::time::timeout(Duration::from_secs(1), core.scheduler.acquire())
        .await
        .expect("token leaked by the refused request")
        .unwrap();
    next.release();
}

#[tokio::test]
async fn test_dispatch_failure_still_succeeds_and_degrades() {
    let core = TestCoordinator::with_config(BrokerConfig {
        buffer_capacity: 1,
        confirm_timeout_ms: 10_000,
        ..fast_broker_config()
    })
    .await;
    // The first batch occupies the worker waiting on an acknowledgement that never comes
    core.broker.lose_next_acks(1);

    for key in ["m1", "m2", "m3"] {
        let result = core
            .uow
            .execute(&register_request(), move |ctx| {
                Box::pin(async move {
                    ctx.tx().insert(format!("model:{key}"), json!({"key": key}))?;
                    ctx.emit(EventKind::AssetCreated, AssetKind::Model, key, json!({"key": key}));
                    Ok::<_, OrchestratorError>(())
                })
            })
            .await;
        assert!(result.is_ok(), "request {key} must succeed: {result:?}");

        if key == "m1" {
            let broker = core.broker.clone();
            wait_until(move || broker.delivery_count() == 1).await;
        }
    }

    assert_eq!(core.uow.store().asset_count(), 3);
    assert_eq!(core.health.status(), HealthStatus::Degraded);
    assert!(core.health.is_live());
    let report = core.health.report();
    assert!(report
        .issues
        .iter()
        .any(|issue| issue.component == "event_delivery"));
}

#[tokio::test]
async fn test_serialized_increments_do_not_conflict() {
    let core = TestCoordinator::start().await;
    core.uow
        .execute(&register_request(), |ctx| {
            Box::pin(async move {
                ctx.tx().insert("counter", json!(0))?;
                Ok::<_, OrchestratorError>(())
            })
        })
        .await
        .unwrap();

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let uow = core.uow.clone();
            tokio::spawn(async move {
                uow.execute(&register_request(), |ctx| {
                    Box::pin(async move {
                        let current = ctx
                            .tx()
                            .get("counter")
                            .and_then(|value| value.as_u64())
                            .unwrap_or_default();
                        tokio::task::yield_now().await;
                        ctx.tx().update("counter", json!(current + 1))?;
                        ctx.emit(EventKind::AssetUpdated, AssetKind::ComputePlan, "counter", json!(current + 1));
                        Ok::<_, OrchestratorError>(())
                    })
                })
                .await
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap().unwrap();
    }
    core.shutdown().await;

    assert_eq!(core.uow.store().asset("counter"), Some(json!(20)));
    // Commit order is dispatch order
    let values: Vec<u64> = core
        .delivered_events(CHANNEL)
        .iter()
        .filter_map(|event| event.asset().as_u64())
        .collect();
    assert_eq!(values, (1..=20).collect::<Vec<u64>>());
}

#[tokio::test]
async fn test_events_routed_by_channel() {
    let core = TestCoordinator::start().await;

    for channel in ["tenant-a", "tenant-b", "tenant-a"] {
        let request = RequestContext::new(REGISTER_MODEL, CALLER, channel);
        core.uow
            .execute(&request, |ctx| {
                Box::pin(async move {
                    ctx.emit(EventKind::AssetCreated, AssetKind::DataSample, "ds", json!({}));
                    Ok::<_, OrchestratorError>(())
                })
            })
            .await
            .unwrap();
    }
    core.shutdown().await;

    assert_eq!(core.broker.payloads_for("tenant-a").len(), 2);
    assert_eq!(core.broker.payloads_for("tenant-b").len(), 1);
    assert!(core
        .delivered_events("tenant-b")
        .iter()
        .all(|event| event.channel() == "tenant-b"));
}

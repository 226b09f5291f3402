//! At-least-once delivery through broker failures.

mod common;

use asset_orchestrator::config::BrokerConfig;
use asset_orchestrator::messaging::{DeliverySession, InMemoryBroker, MessagingError};
use common::*;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_missing_ack_republishes_and_keeps_both_copies() {
    let broker = InMemoryBroker::new();
    let session = ready_session(&broker, &fast_broker_config()).await;

    broker.lose_next_acks(1);
    session
        .publish(CHANNEL, vec![b"event-1".to_vec()])
        .unwrap();
    session.close().await;

    assert_eq!(
        broker.payloads_for(CHANNEL),
        vec![b"event-1".to_vec(), b"event-1".to_vec()]
    );
    let stats = session.stats();
    assert_eq!(stats.republished, 1);
    assert_eq!(stats.confirmed, 1);
}

#[tokio::test]
async fn test_nack_republishes() {
    let broker = InMemoryBroker::new();
    let session = ready_session(&broker, &fast_broker_config()).await;

    broker.nack_next(2);
    session
        .publish(CHANNEL, vec![b"a".to_vec(), b"b".to_vec()])
        .unwrap();
    session.close().await;

    let payloads = broker.payloads_for(CHANNEL);
    assert_eq!(payloads.len(), 4);
    assert_eq!(payloads.last(), Some(&b"b".to_vec()));
    assert_eq!(session.stats().republished, 2);
    assert_eq!(session.stats().confirmed, 2);
}

#[tokio::test]
async fn test_reconnects_after_severed_connection() {
    let broker = InMemoryBroker::new();
    let session = ready_session(&broker, &fast_broker_config()).await;
    session.publish(CHANNEL, vec![b"before".to_vec()]).unwrap();

    tokio::time::timeout(Duration::from_secs(2), async {
        while broker.delivery_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    broker.sever_connections();
    tokio::time::timeout(Duration::from_secs(2), async {
        while broker.connection_count() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("session never reconnected");
    assert!(session.wait_ready(Duration::from_secs(2)).await);

    session.publish(CHANNEL, vec![b"after".to_vec()]).unwrap();
    session.close().await;

    assert_eq!(
        broker.payloads_for(CHANNEL),
        vec![b"before".to_vec(), b"after".to_vec()]
    );
    assert!(session.stats().reconnects >= 1);
}

#[tokio::test]
async fn test_unreachable_broker_rejects_at_caller_boundary() {
    let broker = InMemoryBroker::new();
    broker.set_reachable(false);
    let session = DeliverySession::start(Arc::new(broker.clone()), &fast_broker_config());

    assert!(!session.wait_ready(Duration::from_millis(100)).await);
    assert_eq!(
        session.publish(CHANNEL, vec![b"x".to_vec()]),
        Err(MessagingError::NotReady)
    );

    broker.set_reachable(true);
    assert!(session.wait_ready(Duration::from_secs(2)).await);
    session.publish(CHANNEL, vec![b"x".to_vec()]).unwrap();
    session.close().await;
    assert_eq!(broker.delivery_count(), 1);
}

#[tokio::test]
async fn test_close_drains_buffer_before_returning() {
    let broker = InMemoryBroker::new();
    let session = ready_session(
        &broker,
        &BrokerConfig {
            buffer_capacity: 64,
            ..fast_broker_config()
        },
    )
    .await;

    for i in 0..32u8 {
        session.publish(CHANNEL, vec![vec![i]]).unwrap();
    }
    session.close().await;

    let payloads = broker.payloads_for(CHANNEL);
    assert_eq!(payloads, (0..32u8).map(|i| vec![i]).collect::<Vec<_>>());
    assert_eq!(session.buffered_batches(), 0);
    assert!(!session.is_ready());
}

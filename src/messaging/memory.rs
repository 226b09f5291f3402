//! # In-Process Broker
//!
//! A broker that lives inside the process, for isolated execution and tests. It records every
//! accepted publish (duplicates included) and can inject the failures the delivery session
//! must survive: refused connections, failing publishes, lost acknowledgements, nacks and
//! severed connections.

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::broker::{BrokerChannel, BrokerConnector, Confirmation, PendingConfirm};
use super::{MessagingError, MessagingResult};

/// One message as the broker received it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
}

#[derive(Debug)]
struct BrokerState {
    reachable: bool,
    generation: u64,
    connections: u64,
    exchanges: HashSet<String>,
    deliveries: Vec<Delivery>,
    failing_connects: usize,
    failing_publishes: usize,
    lost_acks: usize,
    nacks: usize,
}

impl Default for BrokerState {
    fn default() -> Self {
        Self {
            reachable: true,
            generation: 0,
            connections: 0,
            exchanges: HashSet::new(),
            deliveries: Vec::new(),
            failing_connects: 0,
            failing_publishes: 0,
            lost_acks: 0,
            nacks: 0,
        }
    }
}

/// Shared handle to an in-process broker; clones observe the same state
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every accepted publish, in arrival order
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.state.lock().deliveries.clone()
    }

    pub fn payloads_for(&self, routing_key: &str) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .deliveries
            .iter()
            .filter(|d| d.routing_key == routing_key)
            .map(|d| d.payload.clone())
            .collect()
    }

    pub fn delivery_count(&self) -> usize {
        self.state.lock().deliveries.len()
    }

    /// Number of successful connections so far
    pub fn connection_count(&self) -> u64 {
        self.state.lock().connections
    }

    pub fn has_exchange(&self, exchange: &str) -> bool {
        self.state.lock().exchanges.contains(exchange)
    }

    /// Refuse the next `n` connection attempts
    pub fn fail_next_connects(&self, n: usize) {
        self.state.lock().failing_connects = n;
    }

    /// Make the next `n` publish calls error without accepting the message
    pub fn fail_next_publishes(&self, n: usize) {
        self.state.lock().failing_publishes = n;
    }

    /// Accept the next `n` messages but never acknowledge them
    pub fn lose_next_acks(&self, n: usize) {
        self.state.lock().lost_acks = n;
    }

    /// Accept the next `n` messages and answer with a negative acknowledgement
    pub fn nack_next(&self, n: usize) {
        self.state.lock().nacks = n;
    }

    /// Close every open channel; new connections are still accepted
    pub fn sever_connections(&self) {
        self.state.lock().generation += 1;
    }

    /// Take the broker down (existing channels close, connects fail) or bring it back
    pub fn set_reachable(&self, reachable: bool) {
        let mut state = self.state.lock();
        state.reachable = reachable;
        if !reachable {
            state.generation += 1;
        }
    }
}

#[async_trait]
impl BrokerConnector for InMemoryBroker {
    async fn connect(&self) -> MessagingResult<Box<dyn BrokerChannel>> {
        let mut state = self.state.lock();
        if !state.reachable {
            return Err(MessagingError::connection("broker unreachable"));
        }
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(MessagingError::connection("connection refused"));
        }
        state.connections += 1;

        Ok(Box::new(InMemoryChannel {
            broker: self.clone(),
            generation: state.generation,
            closed: AtomicBool::new(false),
            confirms: AtomicBool::new(false),
        }))
    }

    fn endpoint(&self) -> String {
        "memory://broker".to_string()
    }
}

struct InMemoryChannel {
    broker: InMemoryBroker,
    generation: u64,
    closed: AtomicBool,
    confirms: AtomicBool,
}

impl InMemoryChannel {
    fn ensure_open(&self) -> MessagingResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(MessagingError::channel("channel closed"))
        }
    }
}

#[async_trait]
impl BrokerChannel for InMemoryChannel {
    async fn declare_exchange(&self, exchange: &str) -> MessagingResult<()> {
        self.ensure_open()?;
        self.broker
            .state
            .lock()
            .exchanges
            .insert(exchange.to_string());
        Ok(())
    }

    async fn enable_confirms(&self) -> MessagingResult<()> {
        self.ensure_open()?;
        self.confirms.store(true, Ordering::Release);
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> MessagingResult<PendingConfirm> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();

        if state.failing_publishes > 0 {
            state.failing_publishes -= 1;
            return Err(MessagingError::publish(routing_key, "publish refused"));
        }
        if !state.exchanges.contains(exchange) {
            return Err(MessagingError::publish(
                routing_key,
                format!("exchange '{exchange}' not declared"),
            ));
        }

        state.deliveries.push(Delivery {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload: payload.to_vec(),
        });

        if !self.confirms.load(Ordering::Acquire) {
            return Ok(futures::future::ready(Ok(Confirmation::Ack)).boxed());
        }
        if state.lost_acks > 0 {
            state.lost_acks -= 1;
            return Ok(futures::future::pending().boxed());
        }
        if state.nacks > 0 {
            state.nacks -= 1;
            return Ok(futures::future::ready(Ok(Confirmation::Nack)).boxed());
        }
        Ok(futures::future::ready(Ok(Confirmation::Ack)).boxed())
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
            && self.broker.state.lock().generation == self.generation
    }

    async fn close(&self) -> MessagingResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_requires_declared_exchange() {
        let broker = InMemoryBroker::new();
        let channel = broker.connect().await.unwrap();
        assert!(channel.publish("events", "ch", b"x").await.is_err());

        channel.declare_exchange("events").await.unwrap();
        channel.enable_confirms().await.unwrap();
        let confirm = channel.publish("events", "ch", b"x").await.unwrap();
        assert_eq!(confirm.await.unwrap(), Confirmation::Ack);
        assert_eq!(broker.payloads_for("ch"), vec![b"x".to_vec()]);
    }

    #[tokio::test]
    async fn test_sever_closes_existing_channels_only() {
        let broker = InMemoryBroker::new();
        let first = broker.connect().await.unwrap();
        broker.sever_connections();
        assert!(!first.is_open());

        let second = broker.connect().await.unwrap();
        assert!(second.is_open());
        assert_eq!(broker.connection_count(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_broker_refuses_connections() {
        let broker = InMemoryBroker::new();
        broker.set_reachable(false);
        assert!(broker.connect().await.is_err());
        broker.set_reachable(true);
        assert!(broker.connect().await.is_ok());
    }

    #[tokio::test]
    async fn test_nack_still_records_delivery() {
        let broker = InMemoryBroker::new();
        let channel = broker.connect().await.unwrap();
        channel.declare_exchange("events").await.unwrap();
        channel.enable_confirms().await.unwrap();
        broker.nack_next(1);

        let confirm = channel.publish("events", "ch", b"x").await.unwrap();
        assert_eq!(confirm.await.unwrap(), Confirmation::Nack);
        assert_eq!(broker.delivery_count(), 1);
    }
}

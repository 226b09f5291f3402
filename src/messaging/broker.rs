//! # Broker Abstraction
//!
//! The delivery session talks to a broker through these two traits so the reconnect and
//! confirmation protocol is independent of the wire client. [`super::amqp`] speaks AMQP 0.9.1
//! through `lapin`; [`super::memory`] is an in-process broker for isolated execution.

use super::MessagingResult;
use async_trait::async_trait;
use futures::future::BoxFuture;

/// Broker answer to a confirmed publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Ack,
    Nack,
}

/// Resolves once the broker acknowledges (or rejects) one published message
pub type PendingConfirm = BoxFuture<'static, MessagingResult<Confirmation>>;

/// Opens connections to a broker
#[async_trait]
pub trait BrokerConnector: Send + Sync + 'static {
    /// Open a connection and a logical channel on it
    async fn connect(&self) -> MessagingResult<Box<dyn BrokerChannel>>;

    /// Broker address safe for logs (credentials removed)
    fn endpoint(&self) -> String;
}

/// A logical channel on an open broker connection
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declare the durable topic exchange events are published to
    async fn declare_exchange(&self, exchange: &str) -> MessagingResult<()>;

    /// Switch the channel into publisher confirmation mode
    async fn enable_confirms(&self) -> MessagingResult<()>;

    /// Publish one payload; the returned future resolves with the broker's confirmation
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> MessagingResult<PendingConfirm>;

    /// Both the connection and the channel are still usable
    fn is_open(&self) -> bool;

    async fn close(&self) -> MessagingResult<()>;
}

//! # Messaging Module
//!
//! Event delivery to the message broker. The [`DeliverySession`] owns the reconnect and
//! confirmation protocol; it reaches a broker through the [`BrokerConnector`] seam, backed by
//! RabbitMQ ([`AmqpConnector`]) in production and by [`InMemoryBroker`] in isolated execution.

pub mod amqp;
pub mod broker;
pub mod errors;
pub mod memory;
pub mod session;

pub use amqp::AmqpConnector;
pub use broker::{BrokerChannel, BrokerConnector, Confirmation, PendingConfirm};
pub use errors::{MessagingError, MessagingResult};
pub use memory::{Delivery, InMemoryBroker};
pub use session::{DeliverySession, DeliveryStats};

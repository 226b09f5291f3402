//! # AMQP Broker Connector
//!
//! RabbitMQ implementation of [`BrokerConnector`] using the `lapin` crate.
//!
//! - Events go to a durable **topic** exchange; the routing key is the channel name
//! - Messages are published persistent (delivery mode 2) as `application/json`
//! - Publisher confirms are enabled per channel, so every publish yields an ack or nack

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions};
use lapin::publisher_confirm::Confirmation as AmqpConfirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tracing::{debug, info};

use super::broker::{BrokerChannel, BrokerConnector, Confirmation, PendingConfirm};
use super::{MessagingError, MessagingResult};

/// Connects to RabbitMQ over AMQP 0.9.1
#[derive(Debug, Clone)]
pub struct AmqpConnector {
    url: String,
    connection_name: String,
}

impl AmqpConnector {
    pub fn new(url: impl Into<String>, connection_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection_name: connection_name.into(),
        }
    }
}

/// Strip credentials from an AMQP URL before logging it
pub(crate) fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}***{}", &url[..scheme_end + 3], &url[at..])
        }
        _ => url.to_string(),
    }
}

#[async_trait]
impl BrokerConnector for AmqpConnector {
    async fn connect(&self) -> MessagingResult<Box<dyn BrokerChannel>> {
        debug!(endpoint = %self.endpoint(), "🔌 AMQP: opening connection");

        let connection = Connection::connect(
            &self.url,
            ConnectionProperties::default().with_connection_name(self.connection_name.clone().into()),
        )
        .await
        .map_err(|e| MessagingError::connection(format!("RabbitMQ connection failed: {e}")))?;

        let channel = connection.create_channel().await.map_err(|e| {
            MessagingError::channel(format!("RabbitMQ channel creation failed: {e}"))
        })?;

        info!(
            endpoint = %self.endpoint(),
            channel_id = channel.id(),
            "✅ AMQP: connection and channel open"
        );

        Ok(Box::new(AmqpChannel {
            connection,
            channel,
        }))
    }

    fn endpoint(&self) -> String {
        redact_url(&self.url)
    }
}

struct AmqpChannel {
    connection: Connection,
    channel: Channel,
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_exchange(&self, exchange: &str) -> MessagingResult<()> {
        self.channel
            .exchange_declare(
                exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::exchange_declaration(exchange, e.to_string()))
    }

    async fn enable_confirms(&self) -> MessagingResult<()> {
        self.channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| MessagingError::confirm_select(e.to_string()))
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> MessagingResult<PendingConfirm> {
        let confirm = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_delivery_mode(2)
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| MessagingError::publish(routing_key, e.to_string()))?;

        let routing_key = routing_key.to_string();
        Ok(Box::pin(async move {
            match confirm.await {
                Ok(AmqpConfirmation::Ack(_)) => Ok(Confirmation::Ack),
                Ok(AmqpConfirmation::Nack(_)) => Ok(Confirmation::Nack),
                // Only reachable if confirm mode was never enabled on this channel
                Ok(AmqpConfirmation::NotRequested) => Ok(Confirmation::Ack),
                Err(e) => Err(MessagingError::confirmation(routing_key, e.to_string())),
            }
        }))
    }

    fn is_open(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    async fn close(&self) -> MessagingResult<()> {
        if self.channel.status().connected() {
            self.channel
                .close(200, "delivery session closed")
                .await
                .map_err(|e| MessagingError::channel(e.to_string()))?;
        }
        if self.connection.status().connected() {
            self.connection
                .close(200, "delivery session closed")
                .await
                .map_err(|e| MessagingError::connection(e.to_string()))?;
        }
        Ok(())
    }
}

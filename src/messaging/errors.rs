//! # Messaging Error Types
//!
//! Structured errors for the broker abstraction and the delivery session.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessagingError {
    #[error("Broker connection error: {message}")]
    Connection { message: String },

    #[error("Broker channel error: {message}")]
    Channel { message: String },

    #[error("Exchange declaration failed: {exchange}: {message}")]
    ExchangeDeclaration { exchange: String, message: String },

    #[error("Publisher confirms unavailable: {message}")]
    ConfirmSelect { message: String },

    #[error("Publish failed: {routing_key}: {message}")]
    Publish { routing_key: String, message: String },

    #[error("Publish confirmation failed: {routing_key}: {message}")]
    Confirmation { routing_key: String, message: String },

    #[error("Delivery session is not ready")]
    NotReady,

    #[error("Delivery session is closed")]
    Closed,

    #[error("Delivery buffer full: capacity {capacity} batches")]
    BufferFull { capacity: usize },

    #[error("Message serialization error: {message}")]
    Serialization { message: String },
}

impl MessagingError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn channel(message: impl Into<String>) -> Self {
        Self::Channel {
            message: message.into(),
        }
    }

    pub fn exchange_declaration(exchange: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExchangeDeclaration {
            exchange: exchange.into(),
            message: message.into(),
        }
    }

    pub fn confirm_select(message: impl Into<String>) -> Self {
        Self::ConfirmSelect {
            message: message.into(),
        }
    }

    pub fn publish(routing_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Publish {
            routing_key: routing_key.into(),
            message: message.into(),
        }
    }

    pub fn confirmation(routing_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Confirmation {
            routing_key: routing_key.into(),
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Whether the caller was turned away at the session boundary (nothing was buffered)
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::NotReady | Self::Closed | Self::BufferFull { .. } | Self::Serialization { .. }
        )
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        MessagingError::serialization(err.to_string())
    }
}

/// Result type alias for messaging operations
pub type MessagingResult<T> = Result<T, MessagingError>;

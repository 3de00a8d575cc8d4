// src/rabbitmq/errors.rs

use lapin::Error as LapinError;
use serde_json::Error as SerdeError;
use thiserror::Error;
use tokio::time::error::Elapsed;

#[derive(Debug, Error)]
pub enum RabbitMQError {
    /// The broker rejected a request (precondition failed, not found, ...)
    #[error("RabbitMQ broker error: {0}")]
    BrokerError(String),

    #[error("RabbitMQ channel error: {0}")]
    ChannelError(String),

    #[error("Message serialization error: {0}")]
    SerializationError(#[from] SerdeError),

    #[error("RabbitMQ publish error: {0}")]
    PublishError(String),

    #[error("RabbitMQ consume error: {0}")]
    ConsumeError(String),

    #[error("Operation timed out: {0}")]
    TimeoutError(String),
}

// Custom Result type for RabbitMQ operations
pub type Result<T> = std::result::Result<T, RabbitMQError>;

// Converting from lapin errors
impl From<LapinError> for RabbitMQError {
    fn from(error: LapinError) -> Self {
        match error {
            LapinError::InvalidChannel(_) | LapinError::InvalidChannelState(_) => {
                RabbitMQError::ChannelError(error.to_string())
            }
            other => RabbitMQError::BrokerError(other.to_string()),
        }
    }
}

impl From<Elapsed> for RabbitMQError {
    fn from(_: Elapsed) -> Self {
        RabbitMQError::TimeoutError("deadline elapsed".to_string())
    }
}

impl RabbitMQError {
    /// True for deadline expiry, which callers may want to tell apart from rejections.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RabbitMQError::TimeoutError(_))
    }
}

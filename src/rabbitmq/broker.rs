// src/rabbitmq/broker.rs

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::mpsc;

use super::errors::{RabbitMQError, Result};
use super::options::{BindOptions, ConsumeOptions, ExchangeOptions, QueueInfo, QueueOptions};

/// Message bodies handed out by a consume registration
pub type DeliveryStream = BoxStream<'static, Result<Vec<u8>>>;

/// Asynchronous channel-level failures reported by the broker
pub type ErrorReceiver = mpsc::UnboundedReceiver<RabbitMQError>;
pub type ErrorSender = mpsc::UnboundedSender<RabbitMQError>;

/// The primitive calls a channel adapter needs from an AMQP channel.
///
/// Implementations map each call onto one broker round trip and never retry.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    async fn queue_declare(&self, options: &QueueOptions) -> Result<QueueInfo>;

    async fn exchange_declare(&self, options: &ExchangeOptions) -> Result<()>;

    async fn queue_bind(&self, options: &BindOptions) -> Result<()>;

    async fn basic_consume(&self, options: &ConsumeOptions) -> Result<DeliveryStream>;

    /// Publish a single message, returning once the broker has taken it
    /// (or acknowledged it, when publisher confirms are on).
    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
        content_type: &str,
    ) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

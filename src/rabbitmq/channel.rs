// src/rabbitmq/channel.rs

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    options::{BasicPublishOptions, BasicQosOptions, ConfirmSelectOptions},
    BasicProperties, Channel, Connection,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::broker::{BrokerChannel, DeliveryStream, ErrorReceiver};
use super::errors::{RabbitMQError, Result};
use super::options::{BindOptions, ConsumeOptions, ExchangeOptions, QueueInfo, QueueOptions};

pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration options for a RabbitMQ channel
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Channel identifier for logging (defaults to a UUID)
    pub id: String,

    /// Deadline for a single publish, including the broker confirm when enabled
    pub publish_timeout: Duration,

    /// Number of unacknowledged messages allowed (0 leaves the broker default)
    pub prefetch_count: u16,

    /// Whether to use publisher confirms
    pub confirm_mode: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            id: format!("channel-{}", &Uuid::new_v4().simple().to_string()[..8]),
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            prefetch_count: 0,
            confirm_mode: false,
        }
    }
}

/// A `lapin` channel opened on a caller-owned connection
pub struct LapinChannel {
    channel: Channel,
    confirm_mode: bool,
}

impl LapinChannel {
    /// Open and configure a channel, returning it with the receiver that
    /// collects the channel's asynchronous errors.
    pub async fn open(connection: &Connection, config: &ChannelConfig) -> Result<(Self, ErrorReceiver)> {
        let channel = connection.create_channel().await.map_err(|e| {
            error!(channel_id = %config.id, error = %e, "Error when creating channel");
            RabbitMQError::ChannelError(format!("Failed to create channel: {}", e))
        })?;

        if config.prefetch_count > 0 {
            debug!(channel_id = %config.id, prefetch = config.prefetch_count, "Setting channel QoS");
            channel
                .basic_qos(config.prefetch_count, BasicQosOptions::default())
                .await
                .map_err(|e| RabbitMQError::ChannelError(format!("Failed to set QoS: {}", e)))?;
        }

        if config.confirm_mode {
            debug!(channel_id = %config.id, "Enabling confirm mode");
            channel
                .confirm_select(ConfirmSelectOptions::default())
                .await
                .map_err(|e| {
                    RabbitMQError::ChannelError(format!("Failed to enable confirm mode: {}", e))
                })?;
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        channel.on_error(move |err| {
            // The adapter may already be gone; nothing left to notify then.
            let _ = sender.send(RabbitMQError::from(err));
        });

        info!(channel_id = %config.id, amqp_channel = channel.id(), "Channel created and configured");

        Ok((
            Self {
                channel,
                confirm_mode: config.confirm_mode,
            },
            receiver,
        ))
    }
}

#[async_trait]
impl BrokerChannel for LapinChannel {
    async fn queue_declare(&self, options: &QueueOptions) -> Result<QueueInfo> {
        let queue = self
            .channel
            .queue_declare(
                &options.name,
                options.declare_options(),
                options.arguments.to_field_table(),
            )
            .await?;

        Ok(QueueInfo {
            name: queue.name().as_str().to_string(),
            message_count: queue.message_count(),
            consumer_count: queue.consumer_count(),
        })
    }

    async fn exchange_declare(&self, options: &ExchangeOptions) -> Result<()> {
        self.channel
            .exchange_declare(
                &options.name,
                options.kind.clone(),
                options.declare_options(),
                options.arguments.to_field_table(),
            )
            .await?;
        Ok(())
    }

    async fn queue_bind(&self, options: &BindOptions) -> Result<()> {
        self.channel
            .queue_bind(
                &options.queue,
                &options.exchange,
                &options.routing_key,
                options.bind_options(),
                options.arguments.to_field_table(),
            )
            .await?;
        Ok(())
    }

    async fn basic_consume(&self, options: &ConsumeOptions) -> Result<DeliveryStream> {
        let consumer = self
            .channel
            .basic_consume(
                &options.queue,
                &options.consumer_tag,
                options.consume_options(),
                options.arguments.to_field_table(),
            )
            .await?;

        Ok(consumer
            .map(|delivery| {
                delivery
                    .map(|delivery| delivery.data)
                    .map_err(RabbitMQError::from)
            })
            .boxed())
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        let confirm = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_content_type(content_type.into()),
            )
            .await
            .map_err(|e| RabbitMQError::PublishError(e.to_string()))?;

        // Resolves immediately when confirms are off
        let confirmation = confirm
            .await
            .map_err(|e| RabbitMQError::PublishError(e.to_string()))?;

        if self.confirm_mode && confirmation.is_nack() {
            return Err(RabbitMQError::PublishError(
                "broker negatively acknowledged the message".to_string(),
            ));
        }

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.channel.close(200, "Closing channel adapter").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_channel_config() {
        let config = ChannelConfig::default();
        assert!(config.id.starts_with("channel-"));
        assert_eq!(config.id.len(), "channel-".len() + 8);
        assert_eq!(config.publish_timeout, Duration::from_secs(5));
        assert_eq!(config.prefetch_count, 0);
        assert!(!config.confirm_mode);
    }

    #[test]
    fn test_default_ids_are_distinct() {
        assert_ne!(ChannelConfig::default().id, ChannelConfig::default().id);
    }
}

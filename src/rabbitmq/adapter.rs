// src/rabbitmq/adapter.rs

use futures::StreamExt;
use lapin::Connection;
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::broker::{BrokerChannel, DeliveryStream, ErrorReceiver};
use super::channel::{ChannelConfig, LapinChannel};
use super::errors::{RabbitMQError, Result};
use super::options::{
    exchange_kind_name, BindOptions, ConsumeOptions, ExchangeOptions, QueueInfo, QueueOptions,
};

pub const JSON_CONTENT_TYPE: &str = "application/json";

enum Signal {
    Error(RabbitMQError),
    Delivery(Option<Result<Vec<u8>>>),
}

/// Wraps one channel of a caller-owned connection.
///
/// Topology calls and publishing go straight to the broker. Consuming is a
/// two-step affair: `create_message_channel` registers a consumer, after which
/// `listen` hands out message bodies one at a time. Until a registration
/// succeeds, `listen` only ever reports channel errors.
///
/// The adapter never acknowledges deliveries itself; register with
/// `auto_ack: true` unless something else settles them.
pub struct ChannelAdapter<C = LapinChannel> {
    channel: C,
    config: ChannelConfig,
    errors: ErrorReceiver,
    deliveries: Option<DeliveryStream>,
}

impl ChannelAdapter<LapinChannel> {
    /// Open a channel on `connection`. The connection stays owned by the caller.
    pub async fn new(connection: &Connection, config: ChannelConfig) -> Result<Self> {
        let (channel, errors) = LapinChannel::open(connection, &config).await?;
        Ok(Self::with_channel(channel, errors, config))
    }
}

impl<C: BrokerChannel> ChannelAdapter<C> {
    pub fn with_channel(channel: C, errors: ErrorReceiver, config: ChannelConfig) -> Self {
        debug!(
            channel_id = %config.id,
            publish_timeout_ms = config.publish_timeout.as_millis() as u64,
            "Creating channel adapter"
        );
        Self {
            channel,
            config,
            errors,
            deliveries: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Whether a consume registration is currently feeding `listen`
    pub fn is_consuming(&self) -> bool {
        self.deliveries.is_some()
    }

    pub async fn create_queue(&self, options: QueueOptions) -> Result<QueueInfo> {
        match self.channel.queue_declare(&options).await {
            Ok(queue) => {
                debug!(
                    channel_id = %self.config.id,
                    queue = %queue.name,
                    messages = queue.message_count,
                    consumers = queue.consumer_count,
                    "Queue declared"
                );
                Ok(queue)
            }
            Err(e) => {
                error!(
                    channel_id = %self.config.id,
                    error = %e,
                    name = %options.name,
                    durable = options.durable,
                    auto_delete = options.auto_delete,
                    exclusive = options.exclusive,
                    no_wait = options.no_wait,
                    "Error while creating queue"
                );
                Err(e)
            }
        }
    }

    pub async fn create_exchange(&self, options: ExchangeOptions) -> Result<()> {
        if let Err(e) = self.channel.exchange_declare(&options).await {
            error!(
                channel_id = %self.config.id,
                error = %e,
                name = %options.name,
                kind = exchange_kind_name(&options.kind),
                durable = options.durable,
                auto_delete = options.auto_delete,
                internal = options.internal,
                no_wait = options.no_wait,
                "Error while creating exchange"
            );
            return Err(e);
        }

        debug!(channel_id = %self.config.id, exchange = %options.name, "Exchange declared");
        Ok(())
    }

    pub async fn bind_queue_with_exchange(&self, options: BindOptions) -> Result<()> {
        if let Err(e) = self.channel.queue_bind(&options).await {
            error!(
                channel_id = %self.config.id,
                error = %e,
                queue_name = %options.queue,
                exchange = %options.exchange,
                key = %options.routing_key,
                "Error while binding queue"
            );
            return Err(e);
        }

        info!(
            channel_id = %self.config.id,
            queue_name = %options.queue,
            exchange = %options.exchange,
            key = %options.routing_key,
            no_wait = options.no_wait,
            "Queue bound"
        );
        Ok(())
    }

    /// Register a consumer on `options.queue`; its deliveries feed `listen`.
    ///
    /// A successful call replaces any earlier registration's stream. A failed
    /// call leaves the earlier one in place.
    pub async fn create_message_channel(&mut self, options: ConsumeOptions) -> Result<()> {
        match self.channel.basic_consume(&options).await {
            Ok(stream) => {
                info!(
                    channel_id = %self.config.id,
                    queue = %options.queue,
                    consumer = %options.consumer_tag,
                    auto_ack = options.auto_ack,
                    "Consumer registered"
                );
                self.deliveries = Some(stream);
                Ok(())
            }
            Err(e) => {
                error!(
                    channel_id = %self.config.id,
                    error = %e,
                    queue = %options.queue,
                    consumer = %options.consumer_tag,
                    auto_ack = options.auto_ack,
                    exclusive = options.exclusive,
                    no_local = options.no_local,
                    no_wait = options.no_wait,
                    "Error when consuming message"
                );
                Err(e)
            }
        }
    }

    /// Serialize `message` to JSON and publish it in a single attempt,
    /// bounded by the configured publish timeout.
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        exchange_name: &str,
        routing_key: &str,
        message: &T,
    ) -> Result<()> {
        let body = serde_json::to_vec(message).map_err(|e| {
            error!(
                channel_id = %self.config.id,
                error = %e,
                exchange_name,
                routing_key,
                "Error while converting message to json"
            );
            RabbitMQError::from(e)
        })?;

        let publish = self
            .channel
            .basic_publish(exchange_name, routing_key, body, JSON_CONTENT_TYPE);

        match timeout(self.config.publish_timeout, publish).await {
            Ok(Ok(())) => {
                info!(
                    channel_id = %self.config.id,
                    exchange_name,
                    routing_key,
                    "Published message to rabbitmq"
                );
                Ok(())
            }
            Ok(Err(e)) => {
                error!(
                    channel_id = %self.config.id,
                    error = %e,
                    exchange_name,
                    routing_key,
                    "Error while publishing message to rabbitmq"
                );
                Err(e)
            }
            Err(_) => {
                error!(
                    channel_id = %self.config.id,
                    exchange_name,
                    routing_key,
                    timeout_ms = self.config.publish_timeout.as_millis() as u64,
                    "Publish timed out"
                );
                Err(RabbitMQError::TimeoutError(format!(
                    "publish to exchange '{}' with key '{}' did not complete within {:?}",
                    exchange_name, routing_key, self.config.publish_timeout
                )))
            }
        }
    }

    /// Wait for the next delivery body or channel error, whichever comes first.
    ///
    /// When both are ready the error wins. If the consumer's stream ends the
    /// registration is dropped and `ConsumeError` is returned.
    pub async fn listen(&mut self) -> Result<Vec<u8>> {
        let errors = &mut self.errors;
        let deliveries = &mut self.deliveries;

        let signal = tokio::select! {
            biased;
            Some(err) = errors.recv() => Signal::Error(err),
            delivery = next_delivery(deliveries) => Signal::Delivery(delivery),
        };

        match signal {
            Signal::Error(err) => {
                error!(
                    channel_id = %self.config.id,
                    error = %err,
                    "Error while receiving message from rabbitmq"
                );
                Err(err)
            }
            Signal::Delivery(Some(Ok(body))) => {
                debug!(channel_id = %self.config.id, bytes = body.len(), "Received delivery");
                Ok(body)
            }
            Signal::Delivery(Some(Err(err))) => {
                error!(
                    channel_id = %self.config.id,
                    error = %err,
                    "Error while receiving message from rabbitmq"
                );
                Err(err)
            }
            Signal::Delivery(None) => {
                self.deliveries = None;
                error!(channel_id = %self.config.id, "Delivery stream closed");
                Err(RabbitMQError::ConsumeError(
                    "delivery stream closed".to_string(),
                ))
            }
        }
    }

    /// Close the channel. Failures are logged and otherwise ignored.
    pub async fn close(&self) {
        match self.channel.close().await {
            Ok(()) => info!(channel_id = %self.config.id, "Channel closed"),
            Err(e) => warn!(
                channel_id = %self.config.id,
                error = %e,
                "Error while closing channel, ignoring"
            ),
        }
    }
}

async fn next_delivery(deliveries: &mut Option<DeliveryStream>) -> Option<Result<Vec<u8>>> {
    match deliveries {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

use anyhow::{Context, Result};
use lapin::{Connection, ConnectionProperties};
use tokio::time::timeout;
use tracing::{info, warn};

use rust_rabbit_adapter::env::Config;
use rust_rabbit_adapter::message::DemoMessage;
use rust_rabbit_adapter::rabbitmq::{
    BindOptions, ChannelAdapter, ConsumeOptions, ExchangeKind, ExchangeOptions, QueueOptions,
};
use rust_rabbit_adapter::telemetry;

const EXCHANGE: &str = "rust_rmq_demo";
const QUEUE: &str = "rust_rmq_demo_queue";
const ROUTING_KEY: &str = "demo.message";

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init();

    let config = Config::load().context("Failed to load configuration")?;

    info!("Connecting to RabbitMQ");
    let connection = timeout(
        config.connect_timeout(),
        Connection::connect(&config.amqp_addr, ConnectionProperties::default()),
    )
    .await
    .with_context(|| {
        format!(
            "Connection to RabbitMQ timed out after {} seconds",
            config.rabbitmq_connect_timeout_seconds
        )
    })?
    .context("Failed to connect to RabbitMQ")?;

    let result = run(&connection, &config).await;

    // The adapter never owns the connection; close it here.
    if let Err(e) = connection.close(200, "Demo finished").await {
        warn!(error = %e, "Error while closing connection");
    }

    result
}

async fn run(connection: &Connection, config: &Config) -> Result<()> {
    let mut adapter = ChannelAdapter::new(connection, config.channel_config()).await?;

    adapter
        .create_exchange(ExchangeOptions {
            durable: true,
            ..ExchangeOptions::new(EXCHANGE, ExchangeKind::Topic)
        })
        .await?;

    let queue = adapter
        .create_queue(QueueOptions {
            durable: true,
            ..QueueOptions::new(QUEUE)
        })
        .await?;
    info!(queue = %queue.name, messages = queue.message_count, "Queue ready");

    adapter
        .bind_queue_with_exchange(BindOptions::new(QUEUE, ROUTING_KEY, EXCHANGE))
        .await?;

    let consumer_tag = format!("demo-{}", adapter.id());
    adapter
        .create_message_channel(ConsumeOptions {
            auto_ack: true,
            ..ConsumeOptions::new(QUEUE, consumer_tag)
        })
        .await?;

    let message = DemoMessage::new("producer_message", "Message from producer");
    adapter.publish(EXCHANGE, ROUTING_KEY, &message).await?;

    tokio::select! {
        received = adapter.listen() => {
            let body = received?;
            let decoded: DemoMessage = serde_json::from_slice(&body)
                .context("Received a message that is not a DemoMessage")?;
            info!(id = %decoded.id, content = %decoded.content, "Consumed message");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted while waiting for a message");
        }
    }

    adapter.close().await;
    Ok(())
}

// Runs against a live broker; needs AMQP_ADDR (or a .env file) to point at one.

use std::time::Duration;

use lapin::{Connection, ConnectionProperties};
use rust_rabbit_adapter::env::Config;
use rust_rabbit_adapter::rabbitmq::{
    BindOptions, ChannelAdapter, ConsumeOptions, ExchangeKind, ExchangeOptions, QueueOptions,
};
use serde_json::json;
use tokio::time::timeout;
use uuid::Uuid;

#[tokio::test]
#[ignore] // Ignore by default as it requires a running RabbitMQ instance
async fn test_round_trip_through_rabbitmq() {
    let config = Config::load().expect("AMQP_ADDR must be set for live broker tests");
    let connection = timeout(
        config.connect_timeout(),
        Connection::connect(&config.amqp_addr, ConnectionProperties::default()),
    )
    .await
    .expect("connection timed out")
    .expect("failed to connect");

    let suffix = Uuid::new_v4().simple().to_string();
    let exchange = format!("rust_rmq_test.{}", suffix);
    let queue = format!("test_queue_{}", suffix);

    let mut adapter = ChannelAdapter::new(&connection, config.channel_config())
        .await
        .unwrap();
    adapter
        .create_exchange(ExchangeOptions {
            auto_delete: true,
            ..ExchangeOptions::new(exchange.as_str(), ExchangeKind::Direct)
        })
        .await
        .unwrap();
    adapter
        .create_queue(QueueOptions {
            auto_delete: true,
            ..QueueOptions::new(queue.as_str())
        })
        .await
        .unwrap();
    adapter
        .bind_queue_with_exchange(BindOptions::new(queue.as_str(), "k", exchange.as_str()))
        .await
        .unwrap();
    adapter
        .create_message_channel(ConsumeOptions {
            auto_ack: true,
            ..ConsumeOptions::new(queue.as_str(), "")
        })
        .await
        .unwrap();

    adapter.publish(&exchange, "k", &json!({"a": 1})).await.unwrap();
    let body = timeout(Duration::from_secs(5), adapter.listen())
        .await
        .expect("no delivery within 5 seconds")
        .unwrap();
    assert_eq!(body, br#"{"a":1}"#.to_vec());

    // Redeclaring with other flags closes the channel on a real broker.
    let mismatch = adapter
        .create_queue(QueueOptions {
            durable: true,
            ..QueueOptions::new(queue.as_str())
        })
        .await;
    assert!(mismatch.is_err());

    adapter.close().await;
    connection.close(200, "Test completed").await.unwrap();
}

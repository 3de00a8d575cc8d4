// End-to-end flows through the adapter against the in-memory broker

use rust_rabbit_adapter::rabbitmq::{
    BindOptions, ChannelAdapter, ChannelConfig, ConsumeOptions, ExchangeKind, ExchangeOptions,
    InMemoryBroker, InMemoryChannel, QueueOptions,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

fn open(broker: &InMemoryBroker) -> ChannelAdapter<InMemoryChannel> {
    let (channel, errors) = broker.open_channel();
    ChannelAdapter::with_channel(channel, errors, ChannelConfig::default())
}

#[tokio::test]
async fn test_declare_bind_publish_listen() {
    let broker = InMemoryBroker::new();
    let mut adapter = open(&broker);

    let queue = adapter
        .create_queue(QueueOptions {
            durable: true,
            ..QueueOptions::new("q1")
        })
        .await
        .unwrap();
    assert_eq!(queue.name, "q1");

    adapter
        .create_exchange(ExchangeOptions::new("ex1", ExchangeKind::Direct))
        .await
        .unwrap();
    adapter
        .bind_queue_with_exchange(BindOptions::new("q1", "k", "ex1"))
        .await
        .unwrap();
    adapter
        .create_message_channel(ConsumeOptions {
            auto_ack: true,
            ..ConsumeOptions::new("q1", "scenario")
        })
        .await
        .unwrap();

    adapter.publish("ex1", "k", &json!({"a": 1})).await.unwrap();

    assert_eq!(adapter.listen().await.unwrap(), br#"{"a":1}"#.to_vec());
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct OrderCreated {
    order_id: String,
    total: f64,
}

#[tokio::test]
async fn test_publisher_and_consumer_on_separate_channels() {
    let broker = InMemoryBroker::new();
    let publisher = open(&broker);
    let mut consumer = open(&broker);

    publisher
        .create_exchange(ExchangeOptions {
            durable: true,
            ..ExchangeOptions::new("orders", ExchangeKind::Topic)
        })
        .await
        .unwrap();
    let queue = consumer
        .create_queue(QueueOptions {
            exclusive: true,
            ..QueueOptions::new("")
        })
        .await
        .unwrap();
    consumer
        .bind_queue_with_exchange(BindOptions::new(queue.name.as_str(), "orders.*.eu", "orders"))
        .await
        .unwrap();
    consumer
        .create_message_channel(ConsumeOptions {
            auto_ack: true,
            ..ConsumeOptions::new(queue.name.as_str(), "")
        })
        .await
        .unwrap();

    let skipped = OrderCreated {
        order_id: "us-1".to_string(),
        total: 1.0,
    };
    let wanted = OrderCreated {
        order_id: "eu-1".to_string(),
        total: 59.99,
    };
    publisher
        .publish("orders", "orders.created.us", &skipped)
        .await
        .unwrap();
    publisher
        .publish("orders", "orders.created.eu", &wanted)
        .await
        .unwrap();

    let body = consumer.listen().await.unwrap();
    let received: OrderCreated = serde_json::from_slice(&body).unwrap();
    assert_eq!(received, wanted);
    assert_eq!(broker.published().len(), 2);
}

#[tokio::test]
async fn test_redeclare_mismatch_is_reported_to_caller() {
    let broker = InMemoryBroker::new();
    let adapter = open(&broker);

    adapter
        .create_exchange(ExchangeOptions::new("events", ExchangeKind::Fanout))
        .await
        .unwrap();
    let err = adapter
        .create_exchange(ExchangeOptions::new("events", ExchangeKind::Topic))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("PRECONDITION_FAILED"));
    assert!(broker.has_exchange("events"));
}

#[tokio::test]
async fn test_unacked_backlog_survives_until_consumer_registers() {
    let broker = InMemoryBroker::new();
    let mut adapter = open(&broker);
    adapter.create_queue(QueueOptions::new("backlog")).await.unwrap();

    for n in 0..3 {
        adapter.publish("", "backlog", &n).await.unwrap();
    }
    assert_eq!(broker.queued_messages("backlog").len(), 3);

    adapter
        .create_message_channel(ConsumeOptions::new("backlog", "drain"))
        .await
        .unwrap();
    let mut bodies = Vec::new();
    for _ in 0..3 {
        bodies.push(adapter.listen().await.unwrap());
    }

    assert_eq!(bodies, vec![b"0".to_vec(), b"1".to_vec(), b"2".to_vec()]);
    assert_eq!(broker.consumer_tags("backlog"), vec!["drain".to_string()]);
}

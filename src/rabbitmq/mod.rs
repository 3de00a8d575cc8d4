// src/rabbitmq/mod.rs
// Channel adapter over lapin plus the pieces it is built from

pub mod errors;
pub mod options;
pub mod broker;
pub mod channel;
pub mod adapter;
pub mod memory;

// Re-export specific items to simplify imports elsewhere
pub use adapter::{ChannelAdapter, JSON_CONTENT_TYPE};
pub use broker::{BrokerChannel, DeliveryStream, ErrorReceiver};
pub use channel::{ChannelConfig, LapinChannel, DEFAULT_PUBLISH_TIMEOUT};
pub use errors::{RabbitMQError, Result};
pub use memory::{InMemoryBroker, InMemoryChannel, PublishedMessage};
pub use options::{Arguments, BindOptions, ConsumeOptions, ExchangeOptions, QueueInfo, QueueOptions};
pub use lapin::ExchangeKind;

//! Thin channel adapter over `lapin`: declare queues and exchanges, bind them,
//! publish JSON messages and receive deliveries from one AMQP channel.

pub mod env;
pub mod message;
pub mod rabbitmq;
pub mod telemetry;

pub use rabbitmq::{ChannelAdapter, ChannelConfig, RabbitMQError, Result};

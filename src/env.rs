use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use dotenv::dotenv;

use crate::rabbitmq::ChannelConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub amqp_addr: String,
    pub rabbitmq_publish_timeout_seconds: u64,
    pub rabbitmq_prefetch_count: u16,
    pub rabbitmq_confirm_mode: bool,
    pub rabbitmq_connect_timeout_seconds: u64,
}

fn default_publish_timeout_seconds() -> u64 {
    5
}

fn default_prefetch_count() -> u16 {
    0
}

fn default_connect_timeout_seconds() -> u64 {
    10
}

impl Config {
    /// Load from the process environment, reading `.env` first if present.
    pub fn load() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let amqp_addr = lookup("AMQP_ADDR").ok_or_else(|| anyhow!("AMQP_ADDR is not set"))?;
        if amqp_addr.trim().is_empty() {
            return Err(anyhow!("AMQP_ADDR cannot be empty"));
        }

        Ok(Config {
            amqp_addr,
            rabbitmq_publish_timeout_seconds: parse_or(
                &lookup,
                "RABBITMQ_PUBLISH_TIMEOUT_SECONDS",
                default_publish_timeout_seconds(),
            )?,
            rabbitmq_prefetch_count: parse_or(
                &lookup,
                "RABBITMQ_PREFETCH_COUNT",
                default_prefetch_count(),
            )?,
            rabbitmq_confirm_mode: parse_or(&lookup, "RABBITMQ_CONFIRM_MODE", false)?,
            rabbitmq_connect_timeout_seconds: parse_or(
                &lookup,
                "RABBITMQ_CONNECT_TIMEOUT_SECONDS",
                default_connect_timeout_seconds(),
            )?,
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.rabbitmq_connect_timeout_seconds)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.rabbitmq_publish_timeout_seconds)
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            publish_timeout: self.publish_timeout(),
            prefetch_count: self.rabbitmq_prefetch_count,
            confirm_mode: self.rabbitmq_confirm_mode,
            ..ChannelConfig::default()
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(val) => val
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, val)),
        None => Ok(default),
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message published by the demo binary
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct DemoMessage {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub message_type: String,
    pub content: String,
}

impl DemoMessage {
    /// Creates a new DemoMessage with the current timestamp and a generated UUID.
    pub fn new(message_type: impl Into<String>, content: impl Into<String>) -> Self {
        DemoMessage {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            message_type: message_type.into(),
            content: content.into(),
        }
    }

    pub fn is_type(&self, message_type: &str) -> bool {
        self.message_type == message_type
    }
}

// src/rabbitmq/options.rs
// Per-call descriptors for topology and consume operations.

use std::collections::BTreeMap;

use lapin::options::{
    BasicConsumeOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldArray, FieldTable};
use lapin::ExchangeKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Free-form `x-*` arguments passed alongside a declare, bind or consume call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Arguments(BTreeMap<String, Value>);

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_field_table(&self) -> FieldTable {
        let mut table = FieldTable::default();
        for (key, value) in &self.0 {
            table.insert(key.as_str().into(), to_amqp_value(value));
        }
        table
    }
}

impl From<&Arguments> for FieldTable {
    fn from(arguments: &Arguments) -> Self {
        arguments.to_field_table()
    }
}

fn to_amqp_value(value: &Value) -> AMQPValue {
    match value {
        Value::Null => AMQPValue::Void,
        Value::Bool(b) => AMQPValue::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => AMQPValue::LongLongInt(i),
            None => AMQPValue::Double(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => AMQPValue::LongString(s.clone().into()),
        Value::Array(items) => AMQPValue::FieldArray(FieldArray::from(
            items.iter().map(to_amqp_value).collect::<Vec<_>>(),
        )),
        Value::Object(map) => {
            let mut table = FieldTable::default();
            for (key, value) in map {
                table.insert(key.as_str().into(), to_amqp_value(value));
            }
            AMQPValue::FieldTable(table)
        }
    }
}

/// Queue declaration descriptor
#[derive(Debug, Clone, Default)]
pub struct QueueOptions {
    /// Empty name asks the broker to generate one
    pub name: String,
    pub durable: bool,
    pub auto_delete: bool,
    pub exclusive: bool,
    pub no_wait: bool,
    pub arguments: Arguments,
}

impl QueueOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub(crate) fn declare_options(&self) -> QueueDeclareOptions {
        QueueDeclareOptions {
            passive: false,
            durable: self.durable,
            exclusive: self.exclusive,
            auto_delete: self.auto_delete,
            nowait: self.no_wait,
        }
    }
}

/// Exchange declaration descriptor
#[derive(Debug, Clone)]
pub struct ExchangeOptions {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
    pub no_wait: bool,
    pub arguments: Arguments,
}

impl Default for ExchangeOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: ExchangeKind::Direct,
            durable: false,
            auto_delete: false,
            internal: false,
            no_wait: false,
            arguments: Arguments::default(),
        }
    }
}

impl ExchangeOptions {
    pub fn new(name: impl Into<String>, kind: ExchangeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            ..Self::default()
        }
    }

    pub(crate) fn declare_options(&self) -> ExchangeDeclareOptions {
        ExchangeDeclareOptions {
            passive: false,
            durable: self.durable,
            auto_delete: self.auto_delete,
            internal: self.internal,
            nowait: self.no_wait,
        }
    }
}

/// Lower-case AMQP name of an exchange kind ("direct", "topic", ...)
pub fn exchange_kind_name(kind: &ExchangeKind) -> &str {
    match kind {
        ExchangeKind::Custom(name) => name.as_str(),
        ExchangeKind::Direct => "direct",
        ExchangeKind::Fanout => "fanout",
        ExchangeKind::Headers => "headers",
        ExchangeKind::Topic => "topic",
    }
}

/// Queue-to-exchange binding descriptor
#[derive(Debug, Clone, Default)]
pub struct BindOptions {
    pub queue: String,
    pub routing_key: String,
    pub exchange: String,
    pub no_wait: bool,
    pub arguments: Arguments,
}

impl BindOptions {
    pub fn new(
        queue: impl Into<String>,
        routing_key: impl Into<String>,
        exchange: impl Into<String>,
    ) -> Self {
        Self {
            queue: queue.into(),
            routing_key: routing_key.into(),
            exchange: exchange.into(),
            ..Self::default()
        }
    }

    pub(crate) fn bind_options(&self) -> QueueBindOptions {
        QueueBindOptions {
            nowait: self.no_wait,
        }
    }
}

/// Consume registration descriptor
#[derive(Debug, Clone, Default)]
pub struct ConsumeOptions {
    pub queue: String,
    /// Empty tag asks the broker to generate one
    pub consumer_tag: String,
    pub auto_ack: bool,
    pub exclusive: bool,
    pub no_local: bool,
    pub no_wait: bool,
    pub arguments: Arguments,
}

impl ConsumeOptions {
    pub fn new(queue: impl Into<String>, consumer_tag: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            consumer_tag: consumer_tag.into(),
            ..Self::default()
        }
    }

    pub(crate) fn consume_options(&self) -> BasicConsumeOptions {
        BasicConsumeOptions {
            no_local: self.no_local,
            no_ack: self.auto_ack,
            exclusive: self.exclusive,
            nowait: self.no_wait,
        }
    }
}

/// Result of a queue declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub name: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::types::ShortString;
    use serde_json::json;

    fn lookup<'a>(table: &'a FieldTable, key: &str) -> Option<&'a AMQPValue> {
        table.inner().get(&ShortString::from(key))
    }

    #[test]
    fn test_arguments_keep_value_types() {
        let arguments = Arguments::new()
            .with("x-max-length", 10)
            .with("x-queue-type", "quorum")
            .with("x-single-active-consumer", true)
            .with("x-ratio", 0.5);

        let table = arguments.to_field_table();

        assert_eq!(lookup(&table, "x-max-length"), Some(&AMQPValue::LongLongInt(10)));
        assert_eq!(
            lookup(&table, "x-queue-type"),
            Some(&AMQPValue::LongString("quorum".to_string().into()))
        );
        assert_eq!(
            lookup(&table, "x-single-active-consumer"),
            Some(&AMQPValue::Boolean(true))
        );
        assert_eq!(lookup(&table, "x-ratio"), Some(&AMQPValue::Double(0.5)));
    }

    #[test]
    fn test_nested_arguments_become_tables_and_arrays() {
        let arguments = Arguments::new()
            .with("x-match", json!({"format": "pdf"}))
            .with("hosts", json!(["a", "b"]))
            .with("missing", Value::Null);

        let table = arguments.to_field_table();

        match lookup(&table, "x-match") {
            Some(AMQPValue::FieldTable(inner)) => assert_eq!(
                lookup(inner, "format"),
                Some(&AMQPValue::LongString("pdf".to_string().into()))
            ),
            other => panic!("expected nested table, got {:?}", other),
        }
        assert_eq!(
            lookup(&table, "hosts"),
            Some(&AMQPValue::FieldArray(FieldArray::from(vec![
                AMQPValue::LongString("a".to_string().into()),
                AMQPValue::LongString("b".to_string().into()),
            ])))
        );
        assert_eq!(lookup(&table, "missing"), Some(&AMQPValue::Void));
    }

    #[test]
    fn test_descriptors_map_flags_to_lapin_options() {
        let queue = QueueOptions {
            durable: true,
            exclusive: true,
            ..QueueOptions::new("q1")
        };
        let declare = queue.declare_options();
        assert!(declare.durable && declare.exclusive);
        assert!(!declare.auto_delete && !declare.passive);

        let consume = ConsumeOptions {
            auto_ack: true,
            ..ConsumeOptions::new("q1", "worker-1")
        };
        assert!(consume.consume_options().no_ack);
    }

    #[test]
    fn test_exchange_kind_names() {
        assert_eq!(exchange_kind_name(&ExchangeKind::Topic), "topic");
        assert_eq!(
            exchange_kind_name(&ExchangeKind::Custom("x-delayed-message".to_string())),
            "x-delayed-message"
        );
        assert_eq!(exchange_kind_name(&ExchangeOptions::default().kind), "direct");
    }
}

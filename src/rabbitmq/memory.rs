//! In-memory broker for testing and single-process scenarios.
//!
//! `InMemoryBroker` keeps queues, exchanges and bindings behind a shared lock
//! and hands out `InMemoryChannel`s that implement [`BrokerChannel`]. It follows
//! the AMQP 0-9-1 rules the adapter relies on:
//! - redeclaring a queue or exchange with different flags is rejected
//!   (`PRECONDITION_FAILED`)
//! - binding or consuming requires the queue (and exchange) to exist
//! - consumer tags are unique per queue
//! - the default exchange `""` routes straight to the queue named by the key
//! - `direct`, `fanout` and `topic` exchanges route as on a real broker
//!
//! Test hooks: [`InMemoryBroker::set_publish_latency`] delays every publish and
//! [`InMemoryChannel::raise_error`] pushes an asynchronous channel error.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as delivery_mpsc;
use futures::StreamExt;
use lapin::ExchangeKind;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::broker::{BrokerChannel, DeliveryStream, ErrorReceiver, ErrorSender};
use super::errors::{RabbitMQError, Result};
use super::options::{
    exchange_kind_name, BindOptions, ConsumeOptions, ExchangeOptions, QueueInfo, QueueOptions,
};

/// A message accepted by the in-memory broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub content_type: String,
}

type DeliverySender = delivery_mpsc::UnboundedSender<Result<Vec<u8>>>;

struct Consumer {
    tag: String,
    channel_id: u64,
    sender: DeliverySender,
}

struct QueueState {
    durable: bool,
    auto_delete: bool,
    exclusive_owner: Option<u64>,
    messages: VecDeque<Vec<u8>>,
    consumers: Vec<Consumer>,
    next_consumer: usize,
    had_consumers: bool,
}

impl QueueState {
    /// Hand the message to the next live consumer, or keep it.
    fn deliver(&mut self, mut body: Vec<u8>) {
        while !self.consumers.is_empty() {
            let index = self.next_consumer % self.consumers.len();
            match self.consumers[index].sender.unbounded_send(Ok(body)) {
                Ok(()) => {
                    self.next_consumer = index + 1;
                    return;
                }
                Err(failed) => {
                    // Receiver dropped: forget the consumer and try the next one.
                    self.consumers.remove(index);
                    body = match failed.into_inner() {
                        Ok(body) => body,
                        Err(_) => return,
                    };
                }
            }
        }
        self.messages.push_back(body);
    }
}

struct ExchangeState {
    kind: ExchangeKind,
    durable: bool,
    auto_delete: bool,
    internal: bool,
    bindings: Vec<Binding>,
}

#[derive(PartialEq, Eq)]
struct Binding {
    queue: String,
    routing_key: String,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, QueueState>,
    exchanges: HashMap<String, ExchangeState>,
    published: Vec<PublishedMessage>,
    publish_latency: Option<Duration>,
    next_channel_id: u64,
}

/// Shared, cloneable in-memory broker
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a channel, returning it with the receiver of its asynchronous errors.
    pub fn open_channel(&self) -> (InMemoryChannel, ErrorReceiver) {
        let id = {
            let mut state = self.lock();
            state.next_channel_id += 1;
            state.next_channel_id
        };
        let (errors, receiver) = mpsc::unbounded_channel();
        let channel = InMemoryChannel {
            broker: self.clone(),
            id,
            errors,
            closed: Arc::new(AtomicBool::new(false)),
        };
        (channel, receiver)
    }

    /// Delay every subsequent publish by `latency` before it is routed.
    pub fn set_publish_latency(&self, latency: Duration) {
        self.lock().publish_latency = Some(latency);
    }

    /// Every message accepted so far, in publish order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.lock().published.clone()
    }

    /// Messages waiting in `queue` for a consumer.
    pub fn queued_messages(&self, queue: &str) -> Vec<Vec<u8>> {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.messages.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_queue(&self, queue: &str) -> bool {
        self.lock().queues.contains_key(queue)
    }

    pub fn has_exchange(&self, exchange: &str) -> bool {
        self.lock().exchanges.contains_key(exchange)
    }

    pub fn consumer_tags(&self, queue: &str) -> Vec<String> {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.consumers.iter().map(|c| c.tag.clone()).collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        // A panicking test thread must not wedge every other test sharing the broker.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// One channel on an [`InMemoryBroker`]; clones share the same channel.
#[derive(Clone)]
pub struct InMemoryChannel {
    broker: InMemoryBroker,
    id: u64,
    errors: ErrorSender,
    closed: Arc<AtomicBool>,
}

impl InMemoryChannel {
    /// Report an asynchronous channel error, as a broker-initiated close would.
    pub fn raise_error(&self, error: RabbitMQError) {
        let _ = self.errors.send(error);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(RabbitMQError::ChannelError(format!(
                "channel {} is closed",
                self.id
            )));
        }
        Ok(())
    }
}

fn precondition_failed(what: &str, argument: &str, name: &str) -> RabbitMQError {
    RabbitMQError::BrokerError(format!(
        "PRECONDITION_FAILED - inequivalent arg '{}' for {} '{}'",
        argument, what, name
    ))
}

fn not_found(what: &str, name: &str) -> RabbitMQError {
    RabbitMQError::BrokerError(format!("NOT_FOUND - no {} '{}'", what, name))
}

fn resource_locked(queue: &str) -> RabbitMQError {
    RabbitMQError::BrokerError(format!(
        "RESOURCE_LOCKED - cannot obtain exclusive access to locked queue '{}'",
        queue
    ))
}

/// AMQP topic matching: `*` is exactly one word, `#` is zero or more.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match pattern.split_first() {
            None => key.is_empty(),
            Some((&"#", rest)) => (0..=key.len()).any(|skip| matches(rest, &key[skip..])),
            Some((&word, rest)) => match key.split_first() {
                Some((&first, key_rest)) => {
                    (word == "*" || word == first) && matches(rest, key_rest)
                }
                None => false,
            },
        }
    }

    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches(&pattern, &key)
}

fn routes_to(kind: &ExchangeKind, binding_key: &str, routing_key: &str) -> Result<bool> {
    match kind {
        ExchangeKind::Direct => Ok(binding_key == routing_key),
        ExchangeKind::Fanout => Ok(true),
        ExchangeKind::Topic => Ok(topic_matches(binding_key, routing_key)),
        other => Err(RabbitMQError::BrokerError(format!(
            "NOT_IMPLEMENTED - exchange type '{}' is not supported in memory",
            exchange_kind_name(other)
        ))),
    }
}

#[async_trait]
impl BrokerChannel for InMemoryChannel {
    async fn queue_declare(&self, options: &QueueOptions) -> Result<QueueInfo> {
        self.ensure_open()?;
        let mut state = self.broker.lock();

        let name = if options.name.is_empty() {
            format!("amq.gen-{}", Uuid::new_v4().simple())
        } else {
            options.name.clone()
        };

        if let Some(queue) = state.queues.get(&name) {
            if let Some(owner) = queue.exclusive_owner {
                if owner != self.id {
                    return Err(resource_locked(&name));
                }
            }
            if queue.durable != options.durable {
                return Err(precondition_failed("queue", "durable", &name));
            }
            if queue.auto_delete != options.auto_delete {
                return Err(precondition_failed("queue", "auto_delete", &name));
            }
            if queue.exclusive_owner.is_some() != options.exclusive {
                return Err(precondition_failed("queue", "exclusive", &name));
            }
            return Ok(QueueInfo {
                message_count: queue.messages.len() as u32,
                consumer_count: queue.consumers.len() as u32,
                name,
            });
        }

        state.queues.insert(
            name.clone(),
            QueueState {
                durable: options.durable,
                auto_delete: options.auto_delete,
                exclusive_owner: options.exclusive.then_some(self.id),
                messages: VecDeque::new(),
                consumers: Vec::new(),
                next_consumer: 0,
                had_consumers: false,
            },
        );

        Ok(QueueInfo {
            name,
            message_count: 0,
            consumer_count: 0,
        })
    }

    async fn exchange_declare(&self, options: &ExchangeOptions) -> Result<()> {
        self.ensure_open()?;
        if options.name.is_empty() || options.name.starts_with("amq.") {
            return Err(RabbitMQError::BrokerError(format!(
                "ACCESS_REFUSED - exchange name '{}' is reserved",
                options.name
            )));
        }

        let mut state = self.broker.lock();
        if let Some(exchange) = state.exchanges.get(&options.name) {
            if exchange_kind_name(&exchange.kind) != exchange_kind_name(&options.kind) {
                return Err(precondition_failed("exchange", "type", &options.name));
            }
            if exchange.durable != options.durable {
                return Err(precondition_failed("exchange", "durable", &options.name));
            }
            if exchange.auto_delete != options.auto_delete {
                return Err(precondition_failed("exchange", "auto_delete", &options.name));
            }
            if exchange.internal != options.internal {
                return Err(precondition_failed("exchange", "internal", &options.name));
            }
            return Ok(());
        }

        state.exchanges.insert(
            options.name.clone(),
            ExchangeState {
                kind: options.kind.clone(),
                durable: options.durable,
                auto_delete: options.auto_delete,
                internal: options.internal,
                bindings: Vec::new(),
            },
        );
        Ok(())
    }

    async fn queue_bind(&self, options: &BindOptions) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.broker.lock();

        if !state.queues.contains_key(&options.queue) {
            return Err(not_found("queue", &options.queue));
        }
        let exchange = state
            .exchanges
            .get_mut(&options.exchange)
            .ok_or_else(|| not_found("exchange", &options.exchange))?;

        let binding = Binding {
            queue: options.queue.clone(),
            routing_key: options.routing_key.clone(),
        };
        if !exchange.bindings.contains(&binding) {
            exchange.bindings.push(binding);
        }
        Ok(())
    }

    async fn basic_consume(&self, options: &ConsumeOptions) -> Result<DeliveryStream> {
        self.ensure_open()?;
        let mut state = self.broker.lock();

        let queue = state
            .queues
            .get_mut(&options.queue)
            .ok_or_else(|| not_found("queue", &options.queue))?;

        if let Some(owner) = queue.exclusive_owner {
            if owner != self.id {
                return Err(resource_locked(&options.queue));
            }
        }

        let tag = if options.consumer_tag.is_empty() {
            format!("amq.ctag-{}", Uuid::new_v4().simple())
        } else {
            options.consumer_tag.clone()
        };
        if queue.consumers.iter().any(|c| c.tag == tag) {
            return Err(RabbitMQError::BrokerError(format!(
                "NOT_ALLOWED - attempt to reuse consumer tag '{}'",
                tag
            )));
        }
        if options.exclusive && !queue.consumers.is_empty() {
            return Err(RabbitMQError::BrokerError(format!(
                "ACCESS_REFUSED - queue '{}' in use, cannot consume exclusively",
                options.queue
            )));
        }

        let (sender, receiver) = delivery_mpsc::unbounded();
        for body in queue.messages.drain(..) {
            let _ = sender.unbounded_send(Ok(body));
        }
        queue.consumers.push(Consumer {
            tag,
            channel_id: self.id,
            sender,
        });
        queue.had_consumers = true;

        Ok(receiver.boxed())
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        self.ensure_open()?;

        let latency = self.broker.lock().publish_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.broker.lock();
        let targets: Vec<String> = if exchange.is_empty() {
            if state.queues.contains_key(routing_key) {
                vec![routing_key.to_string()]
            } else {
                Vec::new()
            }
        } else {
            let target = state
                .exchanges
                .get(exchange)
                .ok_or_else(|| not_found("exchange", exchange))?;
            if target.internal {
                return Err(RabbitMQError::BrokerError(format!(
                    "ACCESS_REFUSED - cannot publish to internal exchange '{}'",
                    exchange
                )));
            }
            let mut queues = Vec::new();
            for binding in &target.bindings {
                if routes_to(&target.kind, &binding.routing_key, routing_key)?
                    && !queues.contains(&binding.queue)
                {
                    queues.push(binding.queue.clone());
                }
            }
            queues
        };

        // Unroutable messages are dropped, as with mandatory=false.
        for queue in targets {
            if let Some(queue) = state.queues.get_mut(&queue) {
                queue.deliver(payload.clone());
            }
        }

        state.published.push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body: payload,
            content_type: content_type.to_string(),
        });
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(RabbitMQError::ChannelError(format!(
                "channel {} is already closed",
                self.id
            )));
        }

        let mut state = self.broker.lock();
        let id = self.id;
        for queue in state.queues.values_mut() {
            queue.consumers.retain(|c| c.channel_id != id);
        }
        state.queues.retain(|_, queue| {
            let owned = queue.exclusive_owner == Some(id);
            let abandoned = queue.auto_delete && queue.had_consumers && queue.consumers.is_empty();
            !(owned || abandoned)
        });
        let live: Vec<String> = state.queues.keys().cloned().collect();
        for exchange in state.exchanges.values_mut() {
            exchange.bindings.retain(|b| live.contains(&b.queue));
        }
        Ok(())
    }
}

//! In-process broker that records every operation.
//!
//! Queues exist only when registered with [`MemoryBroker::with_queue`] or
//! [`MemoryBroker::enqueue`]. Publishing to the default exchange (`""`)
//! appends to the queue named by the routing key, if it exists.
//!
//! With [`MemoryBroker::close_channel_on_missing_queue`] a 404 on a missing
//! queue closes the session's channel while the connection stays up, the way
//! RabbitMQ behaves.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;

use super::transport::{
    BrokerConnector, BrokerSession, Delivery, DeliveryStream, PublishProperties,
};
use crate::config::BrokerConfig;
use crate::error::BrokerError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub properties: PublishProperties,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    Connected,
    Closed,
    PassiveDeclare { queue: String },
    Published(PublishedMessage),
    Consumed { queue: String, consumer_tag: String },
    Ack { delivery_tag: u64 },
    Nack { delivery_tag: u64, requeue: bool },
}

#[derive(Default)]
struct State {
    queues: HashMap<String, VecDeque<Vec<u8>>>,
    events: Vec<BrokerEvent>,
    refuse_connections: bool,
    fail_publishes: bool,
    close_channel_on_missing_queue: bool,
    connections: usize,
    open_sessions: usize,
    session_closes: usize,
}

#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue(self, queue: &str) -> Self {
        self.lock().queues.entry(queue.to_string()).or_default();
        self
    }

    /// Every connection attempt fails with `Connectivity`.
    pub fn refuse_connections(self) -> Self {
        self.lock().refuse_connections = true;
        self
    }

    /// Every publish fails with `Delivery`.
    pub fn fail_publishes(self) -> Self {
        self.lock().fail_publishes = true;
        self
    }

    /// A passive declare or consume on a missing queue closes the channel.
    pub fn close_channel_on_missing_queue(self) -> Self {
        self.lock().close_channel_on_missing_queue = true;
        self
    }

    pub fn enqueue(&self, queue: &str, body: impl Into<Vec<u8>>) {
        self.lock()
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(body.into());
    }

    pub fn queue_exists(&self, queue: &str) -> bool {
        self.lock().queues.contains_key(queue)
    }

    pub fn queue_depth(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, VecDeque::len)
    }

    pub fn events(&self) -> Vec<BrokerEvent> {
        self.lock().events.clone()
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e {
                BrokerEvent::Published(m) => Some(m.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn acks(&self) -> Vec<u64> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e {
                BrokerEvent::Ack { delivery_tag } => Some(*delivery_tag),
                _ => None,
            })
            .collect()
    }

    pub fn nacks(&self) -> Vec<(u64, bool)> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e {
                BrokerEvent::Nack {
                    delivery_tag,
                    requeue,
                } => Some((*delivery_tag, *requeue)),
                _ => None,
            })
            .collect()
    }

    /// Successful connections opened so far.
    pub fn connection_count(&self) -> usize {
        self.lock().connections
    }

    pub fn open_sessions(&self) -> usize {
        self.lock().open_sessions
    }

    /// Calls to `close` on any session, including ones already closed.
    pub fn session_closes(&self) -> usize {
        self.lock().session_closes
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl BrokerConnector for MemoryBroker {
    async fn connect(&self, config: &BrokerConfig) -> Result<Box<dyn BrokerSession>, BrokerError> {
        let mut state = self.lock();
        if state.refuse_connections {
            return Err(BrokerError::Connectivity {
                endpoint: config.endpoint(),
                reason: "connection refused".to_string(),
            });
        }
        state.connections += 1;
        state.open_sessions += 1;
        state.events.push(BrokerEvent::Connected);
        drop(state);

        Ok(Box::new(MemorySession {
            broker: self.clone(),
            connection_open: AtomicBool::new(true),
            channel_open: AtomicBool::new(true),
            next_tag: AtomicU64::new(1),
        }))
    }
}

struct MemorySession {
    broker: MemoryBroker,
    connection_open: AtomicBool,
    channel_open: AtomicBool,
    next_tag: AtomicU64,
}

impl MemorySession {
    fn record(&self, event: BrokerEvent) {
        self.broker.lock().events.push(event);
    }

    fn missing_queue(&self, close_channel: bool, queue: &str) -> BrokerError {
        if close_channel {
            self.channel_open.store(false, Ordering::SeqCst);
        }
        BrokerError::Topology {
            queue: queue.to_string(),
            reason: "NOT_FOUND - no queue".to_string(),
        }
    }
}

#[async_trait]
impl BrokerSession for MemorySession {
    fn is_open(&self) -> bool {
        self.connection_open.load(Ordering::SeqCst) && self.channel_open.load(Ordering::SeqCst)
    }

    async fn queue_declare_passive(&self, queue: &str) -> Result<u32, BrokerError> {
        let mut state = self.broker.lock();
        state.events.push(BrokerEvent::PassiveDeclare {
            queue: queue.to_string(),
        });
        match state.queues.get(queue) {
            Some(messages) => Ok(u32::try_from(messages.len()).unwrap_or(u32::MAX)),
            None => Err(self.missing_queue(state.close_channel_on_missing_queue, queue)),
        }
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: &PublishProperties,
    ) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        if state.fail_publishes {
            return Err(BrokerError::Delivery {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                reason: "broker rejected the message".to_string(),
            });
        }
        if exchange.is_empty() {
            if let Some(queue) = state.queues.get_mut(routing_key) {
                queue.push_back(body.to_vec());
            }
        }
        state.events.push(BrokerEvent::Published(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body: body.to_vec(),
            properties: properties.clone(),
        }));
        Ok(())
    }

    /// Drains whatever is queued now; the stream then ends.
    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, BrokerError> {
        let mut state = self.broker.lock();
        let close_channel = state.close_channel_on_missing_queue;
        let Some(messages) = state.queues.get_mut(queue) else {
            return Err(self.missing_queue(close_channel, queue));
        };
        let deliveries: Vec<Result<Delivery, BrokerError>> = messages
            .drain(..)
            .map(|body| {
                Ok(Delivery {
                    delivery_tag: self.next_tag.fetch_add(1, Ordering::SeqCst),
                    exchange: String::new(),
                    routing_key: queue.to_string(),
                    redelivered: false,
                    body,
                })
            })
            .collect();
        state.events.push(BrokerEvent::Consumed {
            queue: queue.to_string(),
            consumer_tag: consumer_tag.to_string(),
        });
        Ok(stream::iter(deliveries).boxed())
    }

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.record(BrokerEvent::Ack { delivery_tag });
        Ok(())
    }

    async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        self.record(BrokerEvent::Nack {
            delivery_tag,
            requeue,
        });
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.channel_open.store(false, Ordering::SeqCst);
        let mut state = self.broker.lock();
        state.session_closes += 1;
        if self.connection_open.swap(false, Ordering::SeqCst) {
            state.open_sessions = state.open_sessions.saturating_sub(1);
            state.events.push(BrokerEvent::Closed);
        }
        Ok(())
    }
}

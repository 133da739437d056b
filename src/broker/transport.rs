//! Broker transport seam.
//!
//! `BrokerConnector` opens one connection with exactly one channel and hands
//! it back as a `BrokerSession`. The session exposes only the AMQP
//! operations this service is allowed to perform: there is deliberately no
//! queue or exchange creation here, topology belongs to the orchestrator.

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::config::BrokerConfig;
use crate::error::BrokerError;

/// AMQP delivery mode for messages that must survive a broker restart.
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// Message properties attached to every publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishProperties {
    pub delivery_mode: u8,
    pub content_type: String,
    pub content_encoding: String,
    pub message_id: String,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
}

impl PublishProperties {
    /// Persistent UTF-8 JSON message with a fresh id.
    pub fn persistent_json() -> Self {
        Self {
            delivery_mode: PERSISTENT_DELIVERY_MODE,
            content_type: "application/json".to_string(),
            content_encoding: "utf-8".to_string(),
            message_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now().timestamp().max(0) as u64,
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.delivery_mode == PERSISTENT_DELIVERY_MODE
    }
}

/// A message received under manual acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub body: Vec<u8>,
}

/// Deliveries in arrival order; ends when the connection closes.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, BrokerError>>;

/// Opens broker connections.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self, config: &BrokerConfig) -> Result<Box<dyn BrokerSession>, BrokerError>;
}

/// One connection plus the single channel it owns.
///
/// Not meant to be shared between concurrent callers.
#[async_trait]
pub trait BrokerSession: Send + Sync {
    fn is_open(&self) -> bool;

    /// Passive `queue.declare`: read-only, fails with `Topology` if absent.
    /// Returns the queue's ready message count.
    async fn queue_declare_passive(&self, queue: &str) -> Result<u32, BrokerError>;

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: &PublishProperties,
    ) -> Result<(), BrokerError>;

    /// Start consuming with manual acknowledgment.
    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, BrokerError>;

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), BrokerError>;

    async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;
}

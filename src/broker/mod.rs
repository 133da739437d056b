//! Message broker plumbing: connection lifecycle, publishing and consuming.
//!
//! Queues and exchanges are never created from here; they must already
//! exist on the broker.

pub mod amqp;
pub mod connection;
pub mod consumer;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod publisher;
pub mod transport;

pub use amqp::AmqpConnector;
pub use connection::BrokerConnection;
pub use consumer::{DeliveryContext, MessageConsumer, MessageHandler};
#[cfg(any(test, feature = "test-util"))]
pub use memory::{BrokerEvent, MemoryBroker, PublishedMessage};
pub use publisher::MessagePublisher;
pub use transport::{BrokerConnector, BrokerSession, Delivery, DeliveryStream, PublishProperties};

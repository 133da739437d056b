//! Queue consumer with manual acknowledgement.
//!
//! Each delivery goes to a [`MessageHandler`]. A handler error or panic nacks
//! the delivery with requeue unless the handler already settled it.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::connection::BrokerConnection;
use super::transport::{BrokerConnector, BrokerSession, Delivery};
use crate::config::BrokerConfig;
use crate::error::BrokerError;

/// One in-flight delivery plus the channel it arrived on.
pub struct DeliveryContext<'a> {
    delivery: &'a Delivery,
    session: &'a dyn BrokerSession,
    settled: AtomicBool,
}

impl<'a> DeliveryContext<'a> {
    fn new(delivery: &'a Delivery, session: &'a dyn BrokerSession) -> Self {
        Self {
            delivery,
            session,
            settled: AtomicBool::new(false),
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.delivery.body
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery.delivery_tag
    }

    pub fn redelivered(&self) -> bool {
        self.delivery.redelivered
    }

    pub async fn ack(&self) -> Result<(), BrokerError> {
        self.session.basic_ack(self.delivery.delivery_tag).await?;
        self.settled.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub async fn nack(&self, requeue: bool) -> Result<(), BrokerError> {
        self.session
            .basic_nack(self.delivery.delivery_tag, requeue)
            .await?;
        self.settled.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_settled(&self) -> bool {
        self.settled.load(Ordering::SeqCst)
    }
}

/// Processes one delivery. Acknowledging is the handler's job; an `Err` or a
/// panic gets the message negatively acknowledged and requeued.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, ctx: &DeliveryContext<'_>) -> anyhow::Result<()>;
}

/// Consumes from an existing queue under manual acknowledgment.
pub struct MessageConsumer {
    connection: BrokerConnection,
    consumer_tag: String,
}

impl MessageConsumer {
    pub fn new(config: BrokerConfig, connector: Arc<dyn BrokerConnector>) -> Self {
        Self {
            connection: BrokerConnection::new(config, connector),
            consumer_tag: format!("invoice-extractor-{}", Uuid::new_v4()),
        }
    }

    pub async fn connect(&mut self) -> Result<(), BrokerError> {
        self.connection.connect().await
    }

    pub async fn close(&mut self) -> Result<(), BrokerError> {
        self.connection.close().await
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub async fn ensure_queue_exists(&mut self, queue: &str) -> Result<(), BrokerError> {
        self.connection.ensure_queue_exists(queue).await
    }

    pub async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.connection.ack(delivery_tag).await
    }

    pub async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        self.connection.nack(delivery_tag, requeue).await
    }

    /// Dispatch every delivery from `queue` to `handler` until the stream
    /// ends. The queue must already exist.
    pub async fn consume(
        &mut self,
        queue: &str,
        handler: &dyn MessageHandler,
    ) -> Result<(), BrokerError> {
        self.connection.ensure_queue_exists(queue).await?;
        let session = self.connection.active_session()?;
        let mut deliveries = session.basic_consume(queue, &self.consumer_tag).await?;
        info!(queue, consumer_tag = %self.consumer_tag, "Consuming");

        while let Some(next) = deliveries.next().await {
            let delivery = next?;
            dispatch(session, &delivery, handler).await?;
        }

        info!(queue, "Delivery stream ended");
        Ok(())
    }
}

async fn dispatch(
    session: &dyn BrokerSession,
    delivery: &Delivery,
    handler: &dyn MessageHandler,
) -> Result<(), BrokerError> {
    let ctx = DeliveryContext::new(delivery, session);
    let tag = delivery.delivery_tag;
    debug!(delivery_tag = tag, redelivered = delivery.redelivered, "Received message");

    let failure = match AssertUnwindSafe(handler.handle(&ctx)).catch_unwind().await {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(e)) => format!("{e:#}"),
        Err(panic) => format!("handler panicked: {}", panic_message(panic.as_ref())),
    };

    error!(delivery_tag = tag, error = %failure, "Message handler failed; requeueing");
    if ctx.is_settled() {
        warn!(delivery_tag = tag, "Message already settled by handler; not requeueing");
        return Ok(());
    }
    session.basic_nack(tag, true).await
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

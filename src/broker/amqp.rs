//! RabbitMQ transport over lapin.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::types::{FieldTable, ShortString};
use lapin::uri::AMQPUri;
use lapin::publisher_confirm::Confirmation;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use secrecy::ExposeSecret;
use tracing::debug;

use super::transport::{
    BrokerConnector, BrokerSession, Delivery, DeliveryStream, PublishProperties,
};
use crate::config::BrokerConfig;
use crate::error::BrokerError;

const REPLY_SUCCESS: u16 = 200;
const REPLY_NOT_FOUND: u16 = 404;

/// Connects to RabbitMQ with the configured host, port, vhost and credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct AmqpConnector;

impl AmqpConnector {
    pub fn new() -> Self {
        Self
    }
}

fn amqp_uri(config: &BrokerConfig) -> AMQPUri {
    let mut uri = AMQPUri::default();
    uri.authority.host = config.host.clone();
    uri.authority.port = config.port;
    uri.authority.userinfo.username = config.username.clone();
    uri.authority.userinfo.password = config.password.expose_secret().to_string();
    uri.vhost = config.virtual_host.clone();
    uri
}

#[async_trait]
impl BrokerConnector for AmqpConnector {
    async fn connect(&self, config: &BrokerConfig) -> Result<Box<dyn BrokerSession>, BrokerError> {
        let connectivity = |e: lapin::Error| BrokerError::Connectivity {
            endpoint: config.endpoint(),
            reason: e.to_string(),
        };

        let connection = Connection::connect_uri(amqp_uri(config), ConnectionProperties::default())
            .await
            .map_err(connectivity)?;
        let channel = connection.create_channel().await.map_err(connectivity)?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(connectivity)?;
        debug!(
            endpoint = %config.endpoint(),
            vhost = %config.virtual_host,
            channel_id = channel.id(),
            "AMQP channel opened"
        );

        Ok(Box::new(AmqpSession {
            connection,
            channel,
        }))
    }
}

struct AmqpSession {
    connection: Connection,
    channel: Channel,
}

fn channel_error(operation: &str, e: lapin::Error) -> BrokerError {
    BrokerError::Channel {
        operation: operation.to_string(),
        reason: e.to_string(),
    }
}

fn confirmed(confirm: Confirmation) -> Result<(), &'static str> {
    match confirm {
        Confirmation::Ack(_) => Ok(()),
        Confirmation::Nack(_) => Err("broker rejected the message"),
        Confirmation::NotRequested => Err("channel is not in confirm mode"),
    }
}

/// Only 404 NOT_FOUND means the queue is missing. Other refusals, such as
/// 403 ACCESS_REFUSED, are channel failures.
fn passive_declare_error(queue: &str, e: lapin::Error) -> BrokerError {
    match e {
        lapin::Error::ProtocolError(ref amqp) if amqp.get_id() == REPLY_NOT_FOUND => {
            BrokerError::Topology {
                queue: queue.to_string(),
                reason: amqp.to_string(),
            }
        }
        e => channel_error("queue.declare", e),
    }
}

#[async_trait]
impl BrokerSession for AmqpSession {
    fn is_open(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    async fn queue_declare_passive(&self, queue: &str) -> Result<u32, BrokerError> {
        let options = QueueDeclareOptions {
            passive: true,
            ..QueueDeclareOptions::default()
        };
        self.channel
            .queue_declare(queue, options, FieldTable::default())
            .await
            .map(|declared| declared.message_count())
            .map_err(|e| passive_declare_error(queue, e))
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: &PublishProperties,
    ) -> Result<(), BrokerError> {
        let delivery = |reason: String| BrokerError::Delivery {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            reason,
        };

        let amqp_properties = BasicProperties::default()
            .with_delivery_mode(properties.delivery_mode)
            .with_content_type(ShortString::from(properties.content_type.clone()))
            .with_content_encoding(ShortString::from(properties.content_encoding.clone()))
            .with_message_id(ShortString::from(properties.message_id.clone()))
            .with_timestamp(properties.timestamp);

        // The channel is in confirm mode, so this resolves on the broker's ack.
        let confirm = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                amqp_properties,
            )
            .await
            .map_err(|e| delivery(e.to_string()))?
            .await
            .map_err(|e| delivery(e.to_string()))?;

        confirmed(confirm).map_err(|reason| delivery(reason.to_string()))
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, BrokerError> {
        let options = BasicConsumeOptions {
            no_ack: false,
            ..BasicConsumeOptions::default()
        };
        let consumer = self
            .channel
            .basic_consume(queue, consumer_tag, options, FieldTable::default())
            .await
            .map_err(|e| channel_error("basic.consume", e))?;

        Ok(consumer
            .map(|next| {
                next.map(|d| Delivery {
                    delivery_tag: d.delivery_tag,
                    exchange: d.exchange.as_str().to_string(),
                    routing_key: d.routing_key.as_str().to_string(),
                    redelivered: d.redelivered,
                    body: d.data,
                })
                .map_err(|e| channel_error("basic.deliver", e))
            })
            .boxed())
    }

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| channel_error("basic.ack", e))
    }

    async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        let options = BasicNackOptions {
            multiple: false,
            requeue,
        };
        self.channel
            .basic_nack(delivery_tag, options)
            .await
            .map_err(|e| channel_error("basic.nack", e))
    }

    /// Closes the channel, then the connection even if the channel close
    /// failed. The first error is returned.
    async fn close(&self) -> Result<(), BrokerError> {
        let channel_closed = if self.channel.status().connected() {
            self.channel
                .close(REPLY_SUCCESS, "OK")
                .await
                .map_err(|e| channel_error("channel.close", e))
        } else {
            Ok(())
        };
        let connection_closed = if self.connection.status().connected() {
            self.connection
                .close(REPLY_SUCCESS, "OK")
                .await
                .map_err(|e| channel_error("connection.close", e))
        } else {
            Ok(())
        };
        channel_closed.and(connection_closed)
    }
}

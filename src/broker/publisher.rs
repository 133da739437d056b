//! Persistent JSON publishing over a lazily opened broker connection.

use std::sync::Arc;

use tracing::{error, info};

use super::connection::BrokerConnection;
use super::transport::{BrokerConnector, PublishProperties};
use crate::config::BrokerConfig;
use crate::error::BrokerError;

/// Publishes persistent JSON messages to existing exchanges.
pub struct MessagePublisher {
    connection: BrokerConnection,
}

impl MessagePublisher {
    pub fn new(config: BrokerConfig, connector: Arc<dyn BrokerConnector>) -> Self {
        Self {
            connection: BrokerConnection::new(config, connector),
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

    /// Publish `body` with delivery mode 2. Connects first if needed.
    ///
    /// An empty `exchange` targets the default exchange, where the routing
    /// key is the destination queue name.
    pub async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
    ) -> Result<(), BrokerError> {
        let properties = PublishProperties::persistent_json();
        let session = self.connection.session().await?;

        match session
            .basic_publish(exchange, routing_key, body, &properties)
            .await
        {
            Ok(()) => {
                info!(
                    exchange,
                    routing_key,
                    message_id = %properties.message_id,
                    bytes = body.len(),
                    "Published message"
                );
                Ok(())
            }
            Err(e) => {
                error!(exchange, routing_key, error = %e, "Failed to publish message");
                Err(e)
            }
        }
    }
}

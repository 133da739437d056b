//! Connection lifecycle shared by the publisher and the consumer.
//!
//! ```text
//! Disconnected --connect ok--> Connected --close--> Disconnected
//! Disconnected --connect err-> Disconnected (Connectivity error)
//! ```

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::transport::{BrokerConnector, BrokerSession};
use crate::config::BrokerConfig;
use crate::error::BrokerError;

/// Owns at most one broker connection and its channel.
pub struct BrokerConnection {
    config: BrokerConfig,
    connector: Arc<dyn BrokerConnector>,
    session: Option<Box<dyn BrokerSession>>,
}

impl BrokerConnection {
    pub fn new(config: BrokerConfig, connector: Arc<dyn BrokerConnector>) -> Self {
        Self {
            config,
            connector,
            session: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_open())
    }

    /// Open a fresh connection and channel, replacing any existing one.
    pub async fn connect(&mut self) -> Result<(), BrokerError> {
        if let Some(previous) = self.session.take() {
            if let Err(e) = previous.close().await {
                warn!(error = %e, "Failed to close previous broker connection");
            }
        }

        match self.connector.connect(&self.config).await {
            Ok(session) => {
                self.session = Some(session);
                info!(endpoint = %self.config.endpoint(), "Connected to broker");
                Ok(())
            }
            Err(e) => {
                error!(endpoint = %self.config.endpoint(), error = %e, "Failed to connect to broker");
                Err(e)
            }
        }
    }

    /// Close the connection. No-op when no session is held.
    ///
    /// A session whose channel the broker already closed is still closed here,
    /// so its underlying connection is released.
    pub async fn close(&mut self) -> Result<(), BrokerError> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        if !session.is_open() {
            debug!("Broker channel already closed by peer; releasing connection");
        }
        session.close().await?;
        info!(endpoint = %self.config.endpoint(), "Broker connection closed");
        Ok(())
    }

    /// The open session, connecting first if necessary.
    pub async fn session(&mut self) -> Result<&dyn BrokerSession, BrokerError> {
        if !self.is_connected() {
            self.connect().await?;
        }
        self.active_session()
    }

    /// The open session, without connecting.
    pub fn active_session(&self) -> Result<&dyn BrokerSession, BrokerError> {
        match self.session.as_deref() {
            Some(session) if session.is_open() => Ok(session),
            _ => Err(BrokerError::NotConnected),
        }
    }

    /// Verify a queue exists with a passive declare. Never creates it.
    pub async fn ensure_queue_exists(&mut self, queue: &str) -> Result<(), BrokerError> {
        let session = self.session().await?;
        match session.queue_declare_passive(queue).await {
            Ok(message_count) => {
                info!(queue, message_count, "Queue exists and is accessible");
                Ok(())
            }
            Err(e) => {
                error!(
                    queue,
                    error = %e,
                    "Queue check failed; queues must be created by the topology orchestrator"
                );
                Err(e)
            }
        }
    }

    pub async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.active_session()?.basic_ack(delivery_tag).await
    }

    pub async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        self.active_session()?.basic_nack(delivery_tag, requeue).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::{BrokerEvent, MemoryBroker};

    fn connection(broker: &MemoryBroker) -> BrokerConnection {
        BrokerConnection::new(BrokerConfig::default(), Arc::new(broker.clone()))
    }

    #[tokio::test]
    async fn connect_then_close() {
        let broker = MemoryBroker::new();
        let mut conn = connection(&broker);

        assert!(!conn.is_connected());
        conn.connect().await.unwrap();
        assert!(conn.is_connected());
        conn.close().await.unwrap();
        assert!(!conn.is_connected());

        assert_eq!(broker.events(), vec![BrokerEvent::Connected, BrokerEvent::Closed]);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let broker = MemoryBroker::new();
        let mut conn = connection(&broker);

        conn.close().await.unwrap();
        conn.connect().await.unwrap();
        conn.close().await.unwrap();
        conn.close().await.unwrap();

        assert_eq!(broker.events(), vec![BrokerEvent::Connected, BrokerEvent::Closed]);
    }

    #[tokio::test]
    async fn failed_connect_stays_disconnected() {
        let broker = MemoryBroker::new().refuse_connections();
        let mut conn = connection(&broker);

        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, BrokerError::Connectivity { .. }));
        assert!(!conn.is_connected());
        assert!(matches!(conn.active_session(), Err(BrokerError::NotConnected)));
    }

    #[tokio::test]
    async fn reconnect_replaces_the_session() {
        let broker = MemoryBroker::new();
        let mut conn = connection(&broker);

        conn.connect().await.unwrap();
        conn.close().await.unwrap();
        conn.connect().await.unwrap();
        assert!(conn.is_connected());
        conn.connect().await.unwrap();

        assert_eq!(broker.connection_count(), 3);
        assert_eq!(broker.open_sessions(), 1);
    }

    #[tokio::test]
    async fn ensure_queue_exists_is_passive() {
        let broker = MemoryBroker::new().with_queue("invoices");
        let mut conn = connection(&broker);

        conn.ensure_queue_exists("invoices").await.unwrap();
        let err = conn.ensure_queue_exists("missing").await.unwrap_err();

        assert!(matches!(err, BrokerError::Topology { ref queue, .. } if queue == "missing"));
        assert!(!broker.queue_exists("missing"));
        assert_eq!(
            broker.events(),
            vec![
                BrokerEvent::Connected,
                BrokerEvent::PassiveDeclare { queue: "invoices".into() },
                BrokerEvent::PassiveDeclare { queue: "missing".into() },
            ]
        );
    }

    #[tokio::test]
    async fn close_after_missing_queue_releases_connection() {
        let broker = MemoryBroker::new().close_channel_on_missing_queue();
        let mut conn = connection(&broker);

        let err = conn.ensure_queue_exists("missing").await.unwrap_err();
        assert!(matches!(err, BrokerError::Topology { .. }));
        assert!(!conn.is_connected());
        assert_eq!(broker.open_sessions(), 1);

        conn.close().await.unwrap();
        assert_eq!(broker.session_closes(), 1);
        assert_eq!(broker.open_sessions(), 0);
        assert_eq!(broker.events().last(), Some(&BrokerEvent::Closed));
    }

    #[tokio::test]
    async fn reconnect_after_missing_queue_closes_the_stale_session() {
        let broker = MemoryBroker::new()
            .with_queue("invoices")
            .close_channel_on_missing_queue();
        let mut conn = connection(&broker);

        conn.ensure_queue_exists("missing").await.unwrap_err();
        conn.ensure_queue_exists("invoices").await.unwrap();

        assert_eq!(broker.connection_count(), 2);
        assert_eq!(broker.session_closes(), 1);
        assert_eq!(broker.open_sessions(), 1);
    }

    #[tokio::test]
    async fn ack_requires_connection() {
        let broker = MemoryBroker::new();
        let conn = connection(&broker);
        assert!(matches!(conn.ack(1).await, Err(BrokerError::NotConnected)));
        assert!(matches!(conn.nack(1, true).await, Err(BrokerError::NotConnected)));
    }
}

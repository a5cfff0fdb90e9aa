//! Connection primitive beneath the topic broker

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::BrokerError;

/// What the transport reports back to the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Payload published on a subscribed topic
    Message { topic: String, payload: String },
    /// Link (re-)established; without a retained session every topic must be
    /// subscribed again
    Reconnected { session_present: bool },
    /// Link lost; the transport keeps retrying on its own
    Disconnected,
}

/// A pub/sub connection
///
/// Owned exclusively by the broker's dispatcher task, hence `&mut self`.
#[async_trait]
pub trait BrokerTransport: Send + 'static {
    /// Open the connection and return the stream of transport events
    async fn connect(&mut self, client_id: &str) -> Result<mpsc::UnboundedReceiver<TransportEvent>, BrokerError>;

    async fn subscribe(&mut self, topic: &str) -> Result<(), BrokerError>;

    async fn unsubscribe(&mut self, topic: &str) -> Result<(), BrokerError>;

    async fn disconnect(&mut self) -> Result<(), BrokerError>;
}

//! Topic broker: one shared pub/sub connection, many topic consumers
//!
//! A single dispatcher task owns the transport and the topic registry
//! (`topic → ordered handlers`). [`TopicBroker`] is a cheap cloneable handle
//! that sends commands to that task, so the registry needs no lock.
//!
//! - `subscribe` registers a handler (deduplicated by identity) and issues a
//!   network subscribe only when the topic has none active.
//! - `unsubscribe` removes a handler and releases the network subscription
//!   when the topic has no handlers left.
//! - Handlers run in registration order; an error or panic in one is logged
//!   and the rest still run.

pub mod mqtt;
pub mod transport;

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

pub use mqtt::MqttTransport;
pub use transport::{BrokerTransport, TransportEvent};

use crate::error::BrokerError;

/// Callback invoked with the raw payload of every message on a topic
pub type TopicHandler = Arc<dyn Fn(&str) -> anyhow::Result<()> + Send + Sync>;

/// Wrap a closure as a [`TopicHandler`]
///
/// Keep the returned handle: unsubscribing needs the same `Arc`.
pub fn handler<F>(f: F) -> TopicHandler
where
    F: Fn(&str) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Connect {
        identity: String,
        reply: Reply<Result<String, BrokerError>>,
    },
    Subscribe {
        topic: String,
        handler: TopicHandler,
        reply: Reply<Result<(), BrokerError>>,
    },
    Unsubscribe {
        topic: String,
        handler: TopicHandler,
        reply: Reply<Result<(), BrokerError>>,
    },
    Disconnect {
        reply: Reply<()>,
    },
    TopicCount {
        reply: Reply<usize>,
    },
    HandlerCount {
        topic: String,
        reply: Reply<usize>,
    },
    IsConnected {
        reply: Reply<bool>,
    },
}

#[derive(Default)]
struct TopicEntry {
    handlers: Vec<TopicHandler>,
    /// Network subscription active on the current connection
    subscribed: bool,
}

/// Handle to the broker's dispatcher task
#[derive(Clone)]
pub struct TopicBroker {
    commands: mpsc::UnboundedSender<Command>,
}

impl TopicBroker {
    /// Start the dispatcher task over `transport`
    ///
    /// The task stops, disconnecting the transport, when the last handle is
    /// dropped.
    pub fn spawn<T: BrokerTransport>(transport: T) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher {
            transport,
            commands: rx,
            inbound: None,
            client_id: None,
            topics: HashMap::new(),
        };
        tokio::spawn(dispatcher.run());
        Self { commands: tx }
    }

    async fn call<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, BrokerError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(build(reply)).map_err(|_| BrokerError::Closed)?;
        rx.await.map_err(|_| BrokerError::Closed)
    }

    /// Connect as `frontend-<identity>-<random hex>`; returns the client id
    ///
    /// Idempotent: while connected, returns the existing client id.
    pub async fn connect(&self, identity: &str) -> Result<String, BrokerError> {
        let identity = identity.to_string();
        self.call(|reply| Command::Connect { identity, reply }).await?
    }

    /// Register `handler` for `topic`
    ///
    /// Fails with `BrokerError::NotConnected` while disconnected.
    pub async fn subscribe(&self, topic: &str, handler: TopicHandler) -> Result<(), BrokerError> {
        let topic = topic.to_string();
        self.call(|reply| Command::Subscribe { topic, handler, reply }).await?
    }

    /// Remove `handler` from `topic`; unknown topics and handlers are a no-op
    pub async fn unsubscribe(&self, topic: &str, handler: &TopicHandler) -> Result<(), BrokerError> {
        let topic = topic.to_string();
        let handler = handler.clone();
        self.call(|reply| Command::Unsubscribe { topic, handler, reply }).await?
    }

    /// Tear down the connection, keeping registered handlers
    pub async fn disconnect(&self) -> Result<(), BrokerError> {
        self.call(|reply| Command::Disconnect { reply }).await
    }

    pub async fn topic_count(&self) -> Result<usize, BrokerError> {
        self.call(|reply| Command::TopicCount { reply }).await
    }

    pub async fn handler_count(&self, topic: &str) -> Result<usize, BrokerError> {
        let topic = topic.to_string();
        self.call(|reply| Command::HandlerCount { topic, reply }).await
    }

    pub async fn is_connected(&self) -> Result<bool, BrokerError> {
        self.call(|reply| Command::IsConnected { reply }).await
    }
}

struct Dispatcher<T: BrokerTransport> {
    transport: T,
    commands: mpsc::UnboundedReceiver<Command>,
    inbound: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    client_id: Option<String>,
    topics: HashMap<String, TopicEntry>,
}

async fn next_inbound(inbound: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>) -> Option<TransportEvent> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl<T: BrokerTransport> Dispatcher<T> {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                event = next_inbound(&mut self.inbound) => match event {
                    Some(event) => self.handle_transport_event(event).await,
                    None => {
                        warn!("Broker transport event stream ended");
                        self.inbound = None;
                    }
                },
            }
        }

        if self.client_id.is_some() {
            if let Err(e) = self.transport.disconnect().await {
                warn!("Broker disconnect on shutdown failed: {}", e);
            }
        }
        debug!("Topic broker dispatcher stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { identity, reply } => {
                let result = self.connect(&identity).await;
                let _ = reply.send(result);
            }
            Command::Subscribe { topic, handler, reply } => {
                let result = self.subscribe(topic, handler).await;
                let _ = reply.send(result);
            }
            Command::Unsubscribe { topic, handler, reply } => {
                let result = self.unsubscribe(&topic, &handler).await;
                let _ = reply.send(result);
            }
            Command::Disconnect { reply } => {
                self.disconnect().await;
                let _ = reply.send(());
            }
            Command::TopicCount { reply } => {
                let _ = reply.send(self.topics.len());
            }
            Command::HandlerCount { topic, reply } => {
                let count = self.topics.get(&topic).map(|e| e.handlers.len()).unwrap_or(0);
                let _ = reply.send(count);
            }
            Command::IsConnected { reply } => {
                let _ = reply.send(self.client_id.is_some());
            }
        }
    }

    async fn connect(&mut self, identity: &str) -> Result<String, BrokerError> {
        if let Some(client_id) = &self.client_id {
            debug!(client_id = %client_id, "Broker already connected");
            return Ok(client_id.clone());
        }

        let client_id = format!("frontend-{}-{:08x}", identity, rand::random::<u32>());
        let inbound = self.transport.connect(&client_id).await?;
        info!(client_id = %client_id, "Topic broker connected");

        self.inbound = Some(inbound);
        self.client_id = Some(client_id.clone());
        Ok(client_id)
    }

    async fn subscribe(&mut self, topic: String, handler: TopicHandler) -> Result<(), BrokerError> {
        if self.client_id.is_none() {
            debug!(topic = %topic, "Subscribe rejected, broker not connected");
            return Err(BrokerError::NotConnected);
        }

        let entry = self.topics.entry(topic.clone()).or_default();
        if !entry.handlers.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            entry.handlers.push(handler);
        }

        if !entry.subscribed {
            self.transport.subscribe(&topic).await?;
            entry.subscribed = true;
            info!(topic = %topic, "Subscribed to topic");
        }
        Ok(())
    }

    async fn unsubscribe(&mut self, topic: &str, handler: &TopicHandler) -> Result<(), BrokerError> {
        let Some(entry) = self.topics.get_mut(topic) else {
            return Ok(());
        };
        entry.handlers.retain(|h| !Arc::ptr_eq(h, handler));
        if !entry.handlers.is_empty() {
            return Ok(());
        }

        let was_subscribed = entry.subscribed;
        self.topics.remove(topic);
        if was_subscribed && self.client_id.is_some() {
            self.transport.unsubscribe(topic).await?;
            info!(topic = %topic, "Unsubscribed from topic");
        }
        Ok(())
    }

    async fn disconnect(&mut self) {
        let Some(client_id) = self.client_id.take() else {
            return;
        };
        if let Err(e) = self.transport.disconnect().await {
            warn!(client_id = %client_id, "Broker disconnect failed: {}", e);
        }
        self.inbound = None;
        for entry in self.topics.values_mut() {
            entry.subscribed = false;
        }
        info!(client_id = %client_id, "Topic broker disconnected");
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message { topic, payload } => self.dispatch(&topic, &payload),
            TransportEvent::Reconnected { session_present: true } => {
                debug!("Broker session resumed");
            }
            TransportEvent::Reconnected { session_present: false } => self.resubscribe_all().await,
            TransportEvent::Disconnected => {
                debug!("Broker link down, transport reconnecting");
            }
        }
    }

    async fn resubscribe_all(&mut self) {
        for (topic, entry) in self.topics.iter_mut() {
            match self.transport.subscribe(topic).await {
                Ok(()) => {
                    entry.subscribed = true;
                    debug!(topic = %topic, "Re-subscribed after reconnect");
                }
                Err(e) => {
                    entry.subscribed = false;
                    error!(topic = %topic, "Re-subscribe failed: {}", e);
                }
            }
        }
    }

    fn dispatch(&self, topic: &str, payload: &str) {
        let Some(entry) = self.topics.get(topic) else {
            debug!(topic = %topic, "Message for topic without handlers");
            return;
        };

        for (index, handler) in entry.handlers.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(topic = %topic, handler = index, "Topic handler failed: {:#}", e),
                Err(_) => error!(topic = %topic, handler = index, "Topic handler panicked"),
            }
        }
    }
}

//! MQTT transport for the topic broker
//!
//! Persistent session (`clean_session = false`), QoS 1 subscriptions. The
//! event loop keeps polling after errors, which makes rumqttc reconnect; the
//! loop sleeps for the configured reconnect period between attempts.
//!
//! Requests are queued with the non-blocking `try_*` calls: while the link is
//! down the request queue fills up, and a full queue is reported as a
//! transport error instead of stalling the broker.

use async_trait::async_trait;
use curio_common::config::MqttConfig;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::transport::{BrokerTransport, TransportEvent};
use crate::error::BrokerError;

const REQUEST_CHANNEL_CAPACITY: usize = 64;

pub struct MqttTransport {
    config: MqttConfig,
    client: Option<AsyncClient>,
    cancel: Option<CancellationToken>,
}

impl MqttTransport {
    pub fn new(config: MqttConfig) -> Self {
        Self {
            config,
            client: None,
            cancel: None,
        }
    }

    fn client(&self) -> Result<&AsyncClient, BrokerError> {
        self.client.as_ref().ok_or(BrokerError::NotConnected)
    }
}

#[async_trait]
impl BrokerTransport for MqttTransport {
    async fn connect(&mut self, client_id: &str) -> Result<mpsc::UnboundedReceiver<TransportEvent>, BrokerError> {
        let mut mqtt_opts = MqttOptions::new(client_id, &self.config.host, self.config.port);
        mqtt_opts.set_keep_alive(self.config.keep_alive());
        mqtt_opts.set_clean_session(false);

        let (client, mut eventloop) = AsyncClient::new(mqtt_opts, REQUEST_CHANNEL_CAPACITY);
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let reconnect_period = self.config.reconnect_period();
        let broker = format!("{}:{}", self.config.host, self.config.port);

        let token = cancel.clone();
        tokio::spawn(async move {
            loop {
                let polled = tokio::select! {
                    _ = token.cancelled() => break,
                    polled = eventloop.poll() => polled,
                };

                let event = match polled {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        info!(broker = %broker, session_present = ack.session_present, "MQTT connected");
                        TransportEvent::Reconnected {
                            session_present: ack.session_present,
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => TransportEvent::Message {
                        topic: publish.topic.clone(),
                        payload: String::from_utf8_lossy(&publish.payload).into_owned(),
                    },
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(broker = %broker, "MQTT connection error: {}, retrying in {:?}", e, reconnect_period);
                        if tx.send(TransportEvent::Disconnected).is_err() {
                            break;
                        }
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = tokio::time::sleep(reconnect_period) => {}
                        }
                        continue;
                    }
                };

                if tx.send(event).is_err() {
                    debug!("Broker dropped transport events, stopping MQTT event loop");
                    break;
                }
            }
            info!(broker = %broker, "MQTT event loop stopped");
        });

        self.client = Some(client);
        self.cancel = Some(cancel);
        Ok(rx)
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), BrokerError> {
        self.client()?
            .try_subscribe(topic, QoS::AtLeastOnce)
            .map_err(|e| BrokerError::Transport(e.to_string()))
    }

    async fn unsubscribe(&mut self, topic: &str) -> Result<(), BrokerError> {
        self.client()?
            .try_unsubscribe(topic)
            .map_err(|e| BrokerError::Transport(e.to_string()))
    }

    async fn disconnect(&mut self) -> Result<(), BrokerError> {
        let result = match self.client.take() {
            Some(client) => client
                .try_disconnect()
                .map_err(|e| BrokerError::Transport(e.to_string())),
            None => Ok(()),
        };
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        result
    }
}

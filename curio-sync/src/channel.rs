//! Per-surface duplex notification channel
//!
//! One WebSocket per `(surface, user)`. Inbound text frames are decoded into
//! [`PushEvent`]s exactly once, here, and handed to the surface router;
//! outbound commands are written by a dedicated writer task. Sending is guarded
//! only by the "is open" flag: there is no acknowledgement and no retry.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use curio_common::{JobCommand, OutboundCommand, PushEvent, SurfaceKind};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ChannelError;
use crate::store::CommandSender;

/// `<ws_base>/ws/<segment>?userId=<user>`
pub fn endpoint(ws_base_url: &str, surface: SurfaceKind, user_id: &str) -> String {
    format!(
        "{}/ws/{}?userId={}",
        ws_base_url.trim_end_matches('/'),
        surface.channel_segment(),
        user_id
    )
}

pub struct NotificationChannel {
    surface: SurfaceKind,
    user_id: String,
    outbound: mpsc::UnboundedSender<String>,
    open: Arc<AtomicBool>,
    cancel: CancellationToken,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationChannel {
    /// Connect to the surface endpoint
    ///
    /// Returns the channel and the stream of decoded push events; the stream
    /// ends when the connection closes.
    pub async fn open(
        ws_base_url: &str,
        surface: SurfaceKind,
        user_id: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PushEvent>), ChannelError> {
        let url = endpoint(ws_base_url, surface, user_id);
        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| ChannelError::Connect(format!("{}: {}", url, e)))?;

        info!(%surface, user_id = %user_id, "Notification channel connected to {}", url);

        let (sink, stream) = ws_stream.split();
        Ok(Self::from_parts(surface, user_id, stream, sink))
    }

    /// Build a channel over an already-connected frame stream and sink
    pub fn from_parts<S, K, SE>(
        surface: SurfaceKind,
        user_id: &str,
        stream: S,
        sink: K,
    ) -> (Self, mpsc::UnboundedReceiver<PushEvent>)
    where
        S: Stream<Item = Result<Message, SE>> + Send + Unpin + 'static,
        SE: Display + Send + 'static,
        K: Sink<Message> + Send + Unpin + 'static,
        K::Error: Display + Send,
    {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();

        tokio::spawn(dispatch_frames(stream, events_tx, open.clone(), cancel.clone()));
        let writer = tokio::spawn(write_frames(sink, outbound_rx, open.clone(), cancel.clone()));

        let channel = Self {
            surface,
            user_id: user_id.to_string(),
            outbound: outbound_tx,
            open,
            cancel,
            writer: Mutex::new(Some(writer)),
        };
        (channel, events_rx)
    }

    pub fn surface(&self) -> SurfaceKind {
        self.surface
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Close the connection; later sends fail with `ChannelError::Closed`
    pub fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            info!(surface = %self.surface, user_id = %self.user_id, "Closing notification channel");
        }
        self.cancel.cancel();
    }

    /// Close and wait until queued commands are flushed
    pub async fn shutdown(&self) {
        self.close();
        let writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                warn!(surface = %self.surface, "Channel writer task failed: {}", e);
            }
        }
    }

    pub fn send_command(&self, criteria_id: &str, command: JobCommand) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::Closed);
        }
        let frame = serde_json::to_string(&OutboundCommand::new(criteria_id, command))?;
        debug!(surface = %self.surface, frame = %frame, "Sending command");
        self.outbound.send(frame).map_err(|_| ChannelError::Closed)
    }
}

impl Drop for NotificationChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl CommandSender for NotificationChannel {
    async fn send_command(&self, criteria_id: &str, command: JobCommand) -> Result<(), ChannelError> {
        NotificationChannel::send_command(self, criteria_id, command)
    }
}

/// Read frames until the stream ends or the channel is cancelled
///
/// Text frames outside the push vocabulary are dropped; malformed frames are
/// logged and skipped.
pub async fn dispatch_frames<S, E>(
    mut stream: S,
    events: mpsc::UnboundedSender<PushEvent>,
    open: Arc<AtomicBool>,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => match PushEvent::decode(&text) {
                Ok(Some(event)) => {
                    debug!(kind = %event.kind, signal = ?event.signal, "Push event received");
                    if events.send(event).is_err() {
                        debug!("Push event receiver dropped");
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Malformed push frame skipped: {}", e),
            },
            Some(Ok(Message::Close(_))) | None => {
                info!("Notification channel closed by server");
                break;
            }
            Some(Ok(_)) => {
                // Ping/pong/binary frames carry no events
            }
            Some(Err(e)) => {
                warn!("Notification channel read error: {}", e);
                break;
            }
        }
    }
    open.store(false, Ordering::SeqCst);
    cancel.cancel();
}

async fn write_frames<K>(
    mut sink: K,
    mut outbound: mpsc::UnboundedReceiver<String>,
    open: Arc<AtomicBool>,
    cancel: CancellationToken,
) where
    K: Sink<Message> + Unpin,
    K::Error: Display,
{
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => {
                // Commands queued before close still go out
                while let Ok(frame) = outbound.try_recv() {
                    if sink.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                break;
            }
            frame = outbound.recv() => frame,
        };
        let Some(frame) = frame else { break };

        if let Err(e) = sink.send(Message::Text(frame)).await {
            warn!("Notification channel write failed, command dropped: {}", e);
            open.store(false, Ordering::SeqCst);
            break;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;
}

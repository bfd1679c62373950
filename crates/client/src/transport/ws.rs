//! WebSocket transport built on tokio-tungstenite, with auto-reconnect
//! and exponential backoff.
//!
//! The reconnect policy lives entirely here: after an involuntary drop
//! the adapter retries on its own and reports the outcome as
//! `Connected` / `Disconnected` events. The session core never drives
//! retries itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use taskchat_shared::{ClientCommand, ReadReceipt, ServerEvent, TypingSignal, WsEnvelope};

use super::{ConnectError, DisconnectReason, EventSink, Transport, TransportEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Retry policy applied after an involuntary drop: the wait grows
/// geometrically from `initial_delay` up to the `max_delay` ceiling.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Attempts before giving up; 0 retries forever.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 1.5,
        }
    }
}

impl ReconnectConfig {
    /// Wait before the given zero-based attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        Duration::from_millis(scaled as u64).min(self.max_delay)
    }
}

/// Connection settings for [`WsTransport`].
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// WebSocket endpoint, e.g. `ws://localhost:3001/api/ws`.
    pub url: String,
    pub reconnect: ReconnectConfig,
    /// Handshake timeout applied to every connection attempt.
    pub connect_timeout: Duration,
}

impl WsConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectConfig::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Channels into the running IO loop.
struct IoHandle {
    commands: UnboundedSender<WsEnvelope<ClientCommand>>,
    shutdown: watch::Sender<bool>,
}

/// A managed WebSocket connection to the chat backend.
///
/// Must be used from within a tokio runtime; `connect` spawns the IO
/// loop on it.
pub struct WsTransport {
    config: WsConfig,
    events: EventSink,
    connected: Arc<AtomicBool>,
    io: Mutex<Option<IoHandle>>,
}

impl WsTransport {
    pub fn new(config: WsConfig, events: EventSink) -> Self {
        Self {
            config,
            events,
            connected: Arc::new(AtomicBool::new(false)),
            io: Mutex::new(None),
        }
    }

    fn io_lock(&self) -> std::sync::MutexGuard<'_, Option<IoHandle>> {
        self.io.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl Transport for WsTransport {
    async fn connect(&self, credential: &str) -> Result<(), ConnectError> {
        // Replace any previous IO loop
        self.disconnect();

        let url = format!(
            "{}?token={}",
            self.config.url,
            urlencoding::encode(credential)
        );

        let stream = tokio::time::timeout(self.config.connect_timeout, connect_async(&url))
            .await
            .map_err(|_| ConnectError("connection timeout".to_string()))?
            .map_err(|e| ConnectError(e.to_string()))?
            .0;

        tracing::info!(url = %self.config.url, "websocket connected");

        let (commands, receiver) = unbounded();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.io_lock() = Some(IoHandle {
            commands,
            shutdown: shutdown_tx,
        });
        self.connected.store(true, Ordering::SeqCst);

        spawn_connection_loop(
            url,
            self.config.reconnect.clone(),
            self.connected.clone(),
            self.events.clone(),
            stream,
            receiver,
            shutdown_rx,
        );

        Ok(())
    }

    fn disconnect(&self) {
        if let Some(io) = self.io_lock().take() {
            let _ = io.shutdown.send(true);
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    fn send(&self, command: ClientCommand) {
        let io = self.io_lock();
        let Some(io) = io.as_ref() else {
            tracing::warn!(?command, "dropping command, transport not started");
            return;
        };
        if io.commands.unbounded_send(WsEnvelope::new(command)).is_err() {
            tracing::warn!("dropping command, connection loop has stopped");
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// How a single connection's IO ended.
enum IoEnd {
    /// Client-requested teardown; do not reconnect.
    Shutdown,
    /// Involuntary drop with a detail string; eligible for reconnect.
    Dropped(String),
}

/// Drive the connection until shutdown, reconnecting with backoff after
/// involuntary drops.
#[allow(clippy::too_many_arguments)]
fn spawn_connection_loop(
    url: String,
    reconnect: ReconnectConfig,
    connected: Arc<AtomicBool>,
    events: EventSink,
    stream: WsStream,
    mut receiver: UnboundedReceiver<WsEnvelope<ClientCommand>>,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut stream = Some(stream);
        let mut attempt = 0u32;

        loop {
            let ws = match stream.take() {
                Some(ws) => ws,
                None => {
                    if reconnect.max_attempts > 0 && attempt >= reconnect.max_attempts {
                        events(TransportEvent::Disconnected {
                            reason: DisconnectReason::Rejected(format!(
                                "max reconnect attempts ({}) exceeded",
                                reconnect.max_attempts
                            )),
                        });
                        break;
                    }

                    let delay = reconnect.delay_for_attempt(attempt);
                    tracing::info!(?delay, attempt = attempt + 1, "reconnecting");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                    attempt += 1;

                    match connect_async(&url).await {
                        Ok((ws, _response)) => {
                            attempt = 0;
                            // Announce before draining queued commands so the
                            // session can enqueue room rejoins first.
                            events(TransportEvent::Connected);
                            ws
                        }
                        Err(e) => {
                            tracing::warn!("reconnect attempt failed: {}", e);
                            continue;
                        }
                    }
                }
            };

            connected.store(true, Ordering::SeqCst);
            let end = run_io(ws, &mut receiver, &events, &mut shutdown).await;
            connected.store(false, Ordering::SeqCst);

            match end {
                IoEnd::Shutdown => break,
                IoEnd::Dropped(detail) => {
                    tracing::warn!(detail = %detail, "websocket connection dropped");
                    events(TransportEvent::Disconnected {
                        reason: DisconnectReason::Dropped(detail),
                    });
                }
            }
        }

        connected.store(false, Ordering::SeqCst);
    });
}

/// Pump one established connection: serialize outbound commands, parse
/// inbound frames, watch for shutdown.
async fn run_io(
    ws: WsStream,
    receiver: &mut UnboundedReceiver<WsEnvelope<ClientCommand>>,
    events: &EventSink,
    shutdown: &mut watch::Receiver<bool>,
) -> IoEnd {
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    let _ = write.send(Message::Close(None)).await;
                    return IoEnd::Shutdown;
                }
            }
            envelope = receiver.next() => match envelope {
                Some(envelope) => match serde_json::to_string(&envelope) {
                    Ok(json) => {
                        tracing::debug!(frame = %json, "sending");
                        if let Err(e) = write.send(Message::Text(json.into())).await {
                            return IoEnd::Dropped(format!("send failed: {}", e));
                        }
                    }
                    Err(e) => tracing::error!("failed to serialize command: {}", e),
                },
                None => {
                    // Command sender dropped with the transport
                    return IoEnd::Shutdown;
                }
            },
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<WsEnvelope<ServerEvent>>(&text) {
                        Ok(envelope) => forward_server_event(envelope.payload, events),
                        Err(e) => tracing::error!("failed to parse server frame: {}", e),
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let detail = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "connection closed by server".to_string());
                    return IoEnd::Dropped(detail);
                }
                // Pong is handled by tungstenite; ignore binary frames.
                Some(Ok(_)) => {}
                Some(Err(e)) => return IoEnd::Dropped(e.to_string()),
                None => return IoEnd::Dropped("stream ended".to_string()),
            },
        }
    }
}

/// Map wire events to the core-facing transport events.
fn forward_server_event(event: ServerEvent, events: &EventSink) {
    match event {
        ServerEvent::RoomJoined { room, messages } => {
            // History delivery is a presentation concern, not a session one.
            tracing::debug!(room = %room.id, history = messages.len(), "room joined");
        }
        ServerEvent::MessageNew { message, .. } => {
            events(TransportEvent::Message(message));
        }
        ServerEvent::UserTyping {
            room_id,
            user_id,
            is_typing,
        } => {
            let signal = TypingSignal { room_id, user_id };
            if is_typing {
                events(TransportEvent::Typing(signal));
            } else {
                events(TransportEvent::StopTyping(signal));
            }
        }
        ServerEvent::MessagesRead {
            room_id,
            message_ids,
        } => {
            events(TransportEvent::ReadReceipt(ReadReceipt {
                room_id,
                message_ids,
            }));
        }
        ServerEvent::Error { code, message } => {
            events(TransportEvent::Error { code, message });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let config = ReconnectConfig::default();
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(1500));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(2250));
        assert_eq!(config.delay_for_attempt(20), config.max_delay);
    }

    #[test]
    fn typing_frames_split_by_direction() {
        let collected: Arc<Mutex<Vec<TransportEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink: EventSink = {
            let collected = collected.clone();
            Arc::new(move |event| {
                collected
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(event);
            })
        };

        forward_server_event(
            ServerEvent::UserTyping {
                room_id: "task-1".to_string(),
                user_id: "u1".to_string(),
                is_typing: true,
            },
            &sink,
        );
        forward_server_event(
            ServerEvent::UserTyping {
                room_id: "task-1".to_string(),
                user_id: "u1".to_string(),
                is_typing: false,
            },
            &sink,
        );

        let events = collected.lock().unwrap_or_else(PoisonError::into_inner);
        assert!(matches!(events[0], TransportEvent::Typing(_)));
        assert!(matches!(events[1], TransportEvent::StopTyping(_)));
    }
}

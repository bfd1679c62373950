//! Chat session manager.
//!
//! One [`ChatSession`] owns the logical connection to the messaging
//! backend: it drives the connection state machine, multiplexes
//! per-task rooms over the transport, and fans transport events out to
//! consumers through a typed dispatcher.
//!
//! The session is an explicitly constructed object with an explicit
//! lifecycle — create it at application start, share it as an
//! `Arc<ChatSession>`, tear it down with [`ChatSession::disconnect`].
//! Tests can run any number of independent sessions side by side.

mod dispatcher;
mod handle;
mod rooms;

pub use dispatcher::{ErrorEvent, EventDispatcher, EventKind, HandlerId, SessionEvent};
pub use handle::{ChatHandle, ChatState};

use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::watch;

use taskchat_shared::{ClientCommand, MessageType, MAX_MESSAGE_LEN};

use crate::credentials::CredentialStore;
use crate::error::ChatError;
use crate::transport::{
    DisconnectReason, EventSink, Transport, TransportEvent, WsConfig, WsTransport,
};

use rooms::RoomRegistry;

/// Connection status of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl SessionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionStatus::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, SessionStatus::Connecting | SessionStatus::Reconnecting)
    }
}

/// The process-wide chat session.
///
/// All state transitions are serialized: the status lives in a watch
/// cell claimed by compare-and-set, so concurrent `connect` calls
/// linearize instead of racing, and the room registry is only written
/// on those serialized paths.
pub struct ChatSession {
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialStore>,
    dispatcher: EventDispatcher,
    status: watch::Sender<SessionStatus>,
    rooms: Mutex<RoomRegistry>,
    last_error: Mutex<Option<ErrorEvent>>,
}

impl ChatSession {
    /// Build a session around a transport adapter.
    ///
    /// The factory receives the event sink the adapter must feed its
    /// events into. The adapter must not emit events before `connect`
    /// is called.
    pub fn new<F>(credentials: Arc<dyn CredentialStore>, make_transport: F) -> Arc<Self>
    where
        F: FnOnce(EventSink) -> Arc<dyn Transport>,
    {
        Arc::new_cyclic(|session: &Weak<ChatSession>| {
            let weak = session.clone();
            let sink: EventSink = Arc::new(move |event| {
                // Events racing a session teardown are dropped.
                if let Some(session) = weak.upgrade() {
                    session.handle_transport_event(event);
                }
            });
            let (status, _) = watch::channel(SessionStatus::Disconnected);
            ChatSession {
                transport: make_transport(sink),
                credentials,
                dispatcher: EventDispatcher::new(),
                status,
                rooms: Mutex::new(RoomRegistry::default()),
                last_error: Mutex::new(None),
            }
        })
    }

    /// Session wired to the production WebSocket transport.
    pub fn with_websocket(config: WsConfig, credentials: Arc<dyn CredentialStore>) -> Arc<Self> {
        Self::new(credentials, |sink| Arc::new(WsTransport::new(config, sink)))
    }

    // --- Connection lifecycle ---

    /// Connect to the chat backend.
    ///
    /// Fails fast with [`ChatError::AuthenticationMissing`] when no
    /// credential is stored. Idempotent when already connected. While a
    /// handshake is in flight, concurrent callers await its outcome
    /// instead of starting a second one. A failed handshake is not
    /// retried here; retrying is the caller's decision.
    pub async fn connect(&self) -> Result<(), ChatError> {
        let Some(token) = self.credentials.auth_token() else {
            tracing::warn!("connect refused: no authentication token available");
            return Err(ChatError::AuthenticationMissing);
        };

        loop {
            let mut claimed = false;
            self.status.send_if_modified(|status| {
                if *status == SessionStatus::Disconnected {
                    *status = SessionStatus::Connecting;
                    claimed = true;
                    true
                } else {
                    false
                }
            });
            if claimed {
                break;
            }

            // Copy the status out so the watch read guard is not held
            // across the await below; `send_replace` on the winning
            // caller needs the write lock.
            let status = *self.status.borrow();
            match status {
                SessionStatus::Connected => return Ok(()),
                SessionStatus::Connecting | SessionStatus::Reconnecting => {
                    // Await the in-flight attempt instead of starting a
                    // second handshake.
                    let mut rx = self.status.subscribe();
                    let settled = rx
                        .wait_for(|s| {
                            matches!(s, SessionStatus::Connected | SessionStatus::Disconnected)
                        })
                        .await;
                    return match settled {
                        Ok(status) if status.is_connected() => Ok(()),
                        _ => Err(self.handshake_failure()),
                    };
                }
                SessionStatus::Disconnected => continue,
            }
        }

        tracing::info!("connecting to chat service");
        match self.transport.connect(&token).await {
            Ok(()) => {
                self.lock_error().take();
                self.status.send_replace(SessionStatus::Connected);
                tracing::info!("connected to chat service");
                self.dispatcher.emit(&SessionEvent::Connected);
                Ok(())
            }
            Err(e) => {
                let detail = e.to_string();
                tracing::warn!(detail = %detail, "handshake failed");
                let error = ErrorEvent::HandshakeFailed {
                    detail: detail.clone(),
                };
                *self.lock_error() = Some(error.clone());
                self.status.send_replace(SessionStatus::Disconnected);
                self.dispatcher.emit(&SessionEvent::Error(error));
                Err(ChatError::HandshakeFailed(detail))
            }
        }
    }

    /// Disconnect from the chat backend. Always succeeds: the status
    /// flips immediately even if the transport teardown completes
    /// asynchronously. The joined-room set is cleared without sending
    /// leave messages; membership is purely a client-side replay list.
    pub fn disconnect(&self) {
        tracing::info!("disconnecting from chat service");
        self.transport.disconnect();
        self.status.send_replace(SessionStatus::Disconnected);
        self.lock_rooms().clear();
        self.dispatcher.emit(&SessionEvent::Disconnected {
            reason: DisconnectReason::Client,
        });
    }

    // --- Observability ---

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Synchronous connection snapshot.
    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    /// Subscribe to status transitions.
    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// The most recent error, cleared on the next successful connect.
    pub fn last_error(&self) -> Option<ErrorEvent> {
        self.lock_error().clone()
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Register an event handler. Shorthand for `dispatcher().on`.
    pub fn on(
        &self,
        kind: EventKind,
        handler: impl Fn(&SessionEvent) + Send + Sync + 'static,
    ) -> HandlerId {
        self.dispatcher.on(kind, handler)
    }

    /// Unregister an event handler. Shorthand for `dispatcher().off`.
    pub fn off(&self, id: HandlerId) {
        self.dispatcher.off(id);
    }

    // --- Room registry ---

    /// Join a task's conversation room. Idempotent: joining a room that
    /// is already a member sends nothing. The room is replayed
    /// automatically after a reconnect.
    pub fn join_room(&self, room_id: impl Into<String>) -> Result<(), ChatError> {
        self.require_connected("join_room")?;
        let room_id = room_id.into();
        if !self.lock_rooms().insert(room_id.clone()) {
            tracing::debug!(%room_id, "already joined, skipping duplicate join");
            return Ok(());
        }
        tracing::info!(%room_id, "joining room");
        self.transport.send(ClientCommand::JoinRoom { room_id });
        Ok(())
    }

    /// Rooms currently registered for replay, in insertion order.
    pub fn joined_rooms(&self) -> Vec<String> {
        self.lock_rooms().iter().map(str::to_string).collect()
    }

    // --- Outbound command surface ---
    //
    // Every command requires a live connection; otherwise it is dropped
    // with a warning. Fire, don't buffer: a stale message flushed after
    // a reconnect is worse for live chat than a silent drop.

    /// Send a text message to a room.
    pub fn send_message(&self, room_id: impl Into<String>, body: &str) -> Result<(), ChatError> {
        self.send_message_as(room_id, body, MessageType::Text)
    }

    /// Send a message with an explicit content type.
    pub fn send_message_as(
        &self,
        room_id: impl Into<String>,
        body: &str,
        message_type: MessageType,
    ) -> Result<(), ChatError> {
        self.require_connected("send_message")?;
        let body = body.trim();
        if body.is_empty() {
            tracing::warn!("message cannot be empty");
            return Err(ChatError::EmptyMessage);
        }
        if body.chars().count() > MAX_MESSAGE_LEN {
            tracing::warn!(len = body.chars().count(), "message too long");
            return Err(ChatError::MessageTooLong);
        }
        self.transport.send(ClientCommand::SendMessage {
            room_id: room_id.into(),
            body: body.to_string(),
            message_type,
        });
        Ok(())
    }

    /// Signal that the local user is typing. Callers debounce; the core
    /// does not rate-limit.
    pub fn send_typing(&self, room_id: impl Into<String>) -> Result<(), ChatError> {
        self.require_connected("send_typing")?;
        self.transport.send(ClientCommand::Typing {
            room_id: room_id.into(),
        });
        Ok(())
    }

    /// Signal that the local user stopped typing.
    pub fn send_stop_typing(&self, room_id: impl Into<String>) -> Result<(), ChatError> {
        self.require_connected("send_stop_typing")?;
        self.transport.send(ClientCommand::StopTyping {
            room_id: room_id.into(),
        });
        Ok(())
    }

    /// Acknowledge a batch of messages as read. The batch is forwarded
    /// as given, never merged or split.
    pub fn mark_messages_read(
        &self,
        room_id: impl Into<String>,
        message_ids: Vec<String>,
    ) -> Result<(), ChatError> {
        self.require_connected("mark_messages_read")?;
        self.transport.send(ClientCommand::MarkRead {
            room_id: room_id.into(),
            message_ids,
        });
        Ok(())
    }

    // --- Transport event ingestion ---

    fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.handle_reconnected(),
            TransportEvent::Disconnected { reason } => self.handle_drop(reason),
            TransportEvent::Message(message) => {
                self.dispatcher.emit(&SessionEvent::Message(message));
            }
            TransportEvent::Typing(signal) => {
                self.dispatcher.emit(&SessionEvent::Typing(signal));
            }
            TransportEvent::StopTyping(signal) => {
                self.dispatcher.emit(&SessionEvent::StopTyping(signal));
            }
            TransportEvent::ReadReceipt(receipt) => {
                self.dispatcher.emit(&SessionEvent::ReadReceipt(receipt));
            }
            TransportEvent::Error { code, message } => {
                let error = ErrorEvent::Server { code, message };
                *self.lock_error() = Some(error.clone());
                self.dispatcher.emit(&SessionEvent::Error(error));
            }
        }
    }

    /// The adapter re-established a dropped connection.
    fn handle_reconnected(&self) {
        if self.is_connected() {
            return;
        }
        // Replay joins before announcing readiness, so a consumer that
        // was mid-conversation resumes without re-issuing join_room.
        let rooms = self.joined_rooms();
        for room_id in rooms {
            tracing::info!(%room_id, "replaying room join after reconnect");
            self.transport.send(ClientCommand::JoinRoom { room_id });
        }
        self.lock_error().take();
        self.status.send_replace(SessionStatus::Connected);
        self.dispatcher.emit(&SessionEvent::Connected);
    }

    /// The adapter reported an involuntary drop.
    fn handle_drop(&self, reason: DisconnectReason) {
        match self.status() {
            SessionStatus::Connected => {
                let next = if matches!(reason, DisconnectReason::Rejected(_)) {
                    SessionStatus::Disconnected
                } else {
                    SessionStatus::Reconnecting
                };
                self.status.send_replace(next);
            }
            SessionStatus::Reconnecting => {
                // The adapter has given up retrying.
                self.status.send_replace(SessionStatus::Disconnected);
            }
            // Explicit disconnect already announced, or a stale event.
            _ => return,
        }

        tracing::warn!(reason = reason.detail(), "chat connection lost");
        self.dispatcher.emit(&SessionEvent::Disconnected {
            reason: reason.clone(),
        });

        // Not every disconnect is an error: a recoverable drop stays
        // silent while the adapter retries. A rejection is surfaced.
        if let DisconnectReason::Rejected(detail) = reason {
            let error = ErrorEvent::ConnectionLost { detail };
            *self.lock_error() = Some(error.clone());
            self.dispatcher.emit(&SessionEvent::Error(error));
        }
    }

    // --- Internals ---

    fn require_connected(&self, operation: &str) -> Result<(), ChatError> {
        if self.is_connected() {
            Ok(())
        } else {
            tracing::warn!(operation, "command dropped: not connected to chat service");
            Err(ChatError::NotConnected)
        }
    }

    fn handshake_failure(&self) -> ChatError {
        match self.lock_error().clone() {
            Some(ErrorEvent::HandshakeFailed { detail }) => ChatError::HandshakeFailed(detail),
            _ => ChatError::HandshakeFailed("connection attempt failed".to_string()),
        }
    }

    fn lock_rooms(&self) -> std::sync::MutexGuard<'_, RoomRegistry> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_error(&self) -> std::sync::MutexGuard<'_, Option<ErrorEvent>> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

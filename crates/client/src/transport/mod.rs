//! Transport adapter contract.
//!
//! The adapter owns the physical connection, the authentication
//! handshake, and the reconnect policy. The session core only issues
//! `connect`/`disconnect`/`send` and reacts to the events the adapter
//! feeds back through its [`EventSink`].

use std::sync::Arc;

use async_trait::async_trait;
use taskchat_shared::{ChatMessage, ClientCommand, ReadReceipt, TypingSignal};

mod ws;

pub use ws::{ReconnectConfig, WsConfig, WsTransport};

/// Why a connection went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Explicit client-side disconnect.
    Client,
    /// Involuntary drop; the adapter keeps trying to reconnect.
    Dropped(String),
    /// Server-side rejection or exhausted retries; the adapter has
    /// given up.
    Rejected(String),
}

impl DisconnectReason {
    pub fn detail(&self) -> &str {
        match self {
            DisconnectReason::Client => "client",
            DisconnectReason::Dropped(detail) | DisconnectReason::Rejected(detail) => detail,
        }
    }
}

/// Events an adapter delivers to the session core.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A dropped connection was re-established. The initial handshake
    /// is reported through the `Transport::connect` return value
    /// instead, never as an event.
    Connected,
    Disconnected { reason: DisconnectReason },
    Message(ChatMessage),
    Typing(TypingSignal),
    StopTyping(TypingSignal),
    ReadReceipt(ReadReceipt),
    Error { code: String, message: String },
}

/// Callback through which an adapter delivers events to the session.
pub type EventSink = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// Handshake failure reported by an adapter.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct ConnectError(pub String);

/// Contract the session core requires from its transport collaborator.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform the authentication handshake and open the connection.
    /// Resolves once the connection is usable or has been refused.
    async fn connect(&self, credential: &str) -> Result<(), ConnectError>;

    /// Tear the connection down. Takes effect immediately; no further
    /// events are delivered for the torn-down connection.
    fn disconnect(&self);

    /// Forward a command to the backend. Best effort: a command issued
    /// while the socket is down is dropped with a warning.
    fn send(&self, command: ClientCommand);

    /// Synchronous connection snapshot.
    fn is_connected(&self) -> bool;
}

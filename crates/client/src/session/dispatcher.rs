//! Typed publish/subscribe dispatcher.
//!
//! Decouples transport-level events from consumers: the session emits,
//! registered handlers receive. Handlers for a given kind run in
//! registration order; kinds are independent of each other.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use taskchat_shared::{ChatMessage, ReadReceipt, TypingSignal};

use crate::transport::DisconnectReason;

/// Event payloads fanned out to consumers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Connected,
    Disconnected { reason: DisconnectReason },
    Message(ChatMessage),
    Typing(TypingSignal),
    StopTyping(TypingSignal),
    ReadReceipt(ReadReceipt),
    Error(ErrorEvent),
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::Connected => EventKind::Connected,
            SessionEvent::Disconnected { .. } => EventKind::Disconnected,
            SessionEvent::Message(_) => EventKind::Message,
            SessionEvent::Typing(_) => EventKind::Typing,
            SessionEvent::StopTyping(_) => EventKind::StopTyping,
            SessionEvent::ReadReceipt(_) => EventKind::ReadReceipt,
            SessionEvent::Error(_) => EventKind::Error,
        }
    }
}

/// Payload carried by `EventKind::Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorEvent {
    /// The transport rejected the initial handshake.
    HandshakeFailed { detail: String },
    /// The server closed the connection on its own initiative.
    ConnectionLost { detail: String },
    /// Application-level error pushed by the backend.
    Server { code: String, message: String },
    /// A registered handler panicked while processing an event.
    Handler { detail: String },
}

impl ErrorEvent {
    /// Human-readable form, suitable for a banner.
    pub fn message(&self) -> String {
        match self {
            ErrorEvent::HandshakeFailed { detail } => {
                format!("failed to connect to chat service: {}", detail)
            }
            ErrorEvent::ConnectionLost { detail } => {
                format!("connection to chat service lost: {}", detail)
            }
            ErrorEvent::Server { message, .. } => message.clone(),
            ErrorEvent::Handler { detail } => detail.clone(),
        }
    }
}

/// Event kinds a handler can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    Message,
    Typing,
    StopTyping,
    ReadReceipt,
    Error,
}

/// Token identifying one registration; pass it to [`EventDispatcher::off`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId {
    kind: EventKind,
    id: u64,
}

type Handler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: HashMap<EventKind, Vec<(u64, Handler)>>,
}

/// Typed pub/sub bus for session events.
#[derive(Default)]
pub struct EventDispatcher {
    inner: Mutex<Registry>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event kind. Each call registers a
    /// distinct handler, identified by the returned id.
    pub fn on(
        &self,
        kind: EventKind,
        handler: impl Fn(&SessionEvent) + Send + Sync + 'static,
    ) -> HandlerId {
        let mut registry = self.lock();
        registry.next_id += 1;
        let id = registry.next_id;
        registry
            .handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        HandlerId { kind, id }
    }

    /// Unregister a handler. Unknown or already-removed ids are a
    /// no-op, never an error.
    pub fn off(&self, id: HandlerId) {
        if let Some(list) = self.lock().handlers.get_mut(&id.kind) {
            list.retain(|(handler_id, _)| *handler_id != id.id);
        }
    }

    /// Deliver an event to every handler registered for its kind, in
    /// registration order. A panicking handler does not stop delivery
    /// to the rest; the failure is reported once through the `Error`
    /// kind (a panicking `Error` handler is only logged, so reporting
    /// cannot loop).
    pub fn emit(&self, event: &SessionEvent) {
        let kind = event.kind();
        let handlers: Vec<Handler> = self
            .lock()
            .handlers
            .get(&kind)
            .map(|list| list.iter().map(|(_, handler)| handler.clone()).collect())
            .unwrap_or_default();

        let mut panicked = 0usize;
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                panicked += 1;
                tracing::error!(?kind, "event handler panicked");
            }
        }

        if panicked > 0 && kind != EventKind::Error {
            self.emit(&SessionEvent::Error(ErrorEvent::Handler {
                detail: format!("{} handler(s) panicked while processing {:?}", panicked, kind),
            }));
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

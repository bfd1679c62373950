//! Presentation-facing accessor over a [`ChatSession`].
//!
//! A handle derives the UI-observable state — connected, connecting,
//! last error, unread count — purely from dispatcher events and exposes
//! the outbound command surface by delegation. Dropping the handle
//! deregisters all of its subscriptions.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use taskchat_shared::MessageType;

use crate::error::ChatError;

use super::{ChatSession, ErrorEvent, EventKind, HandlerId, SessionEvent};

/// Snapshot of the observable chat state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatState {
    pub is_connected: bool,
    pub is_connecting: bool,
    pub error: Option<ErrorEvent>,
    pub unread_count: u64,
}

#[derive(Default)]
struct HandleState {
    is_connected: AtomicBool,
    is_connecting: AtomicBool,
    unread_count: AtomicU64,
    error: Mutex<Option<ErrorEvent>>,
    focused_room: Mutex<Option<String>>,
}

impl HandleState {
    fn lock_error(&self) -> std::sync::MutexGuard<'_, Option<ErrorEvent>> {
        self.error.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_focused(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.focused_room
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// A consumer's view of the chat session.
pub struct ChatHandle {
    session: Arc<ChatSession>,
    state: Arc<HandleState>,
    subscriptions: Vec<HandlerId>,
}

impl ChatHandle {
    pub fn new(session: Arc<ChatSession>) -> Self {
        let state = Arc::new(HandleState::default());
        state
            .is_connected
            .store(session.is_connected(), Ordering::SeqCst);

        let mut subscriptions = Vec::new();

        let s = state.clone();
        subscriptions.push(session.on(EventKind::Connected, move |_| {
            s.is_connected.store(true, Ordering::SeqCst);
            // The error banner clears on the next successful connect.
            s.lock_error().take();
        }));

        let s = state.clone();
        subscriptions.push(session.on(EventKind::Disconnected, move |_| {
            s.is_connected.store(false, Ordering::SeqCst);
        }));

        let s = state.clone();
        subscriptions.push(session.on(EventKind::Error, move |event| {
            if let SessionEvent::Error(error) = event {
                *s.lock_error() = Some(error.clone());
            }
        }));

        let s = state.clone();
        subscriptions.push(session.on(EventKind::Message, move |event| {
            if let SessionEvent::Message(message) = event {
                let focused = s.lock_focused();
                if focused.as_deref() != Some(message.room_id.as_str()) {
                    s.unread_count.fetch_add(1, Ordering::SeqCst);
                }
            }
        }));

        Self {
            session,
            state,
            subscriptions,
        }
    }

    // --- Lifecycle ---

    /// Connect the underlying session. `is_connecting` is true exactly
    /// while this call is in flight.
    pub async fn connect(&self) -> Result<(), ChatError> {
        self.state.is_connecting.store(true, Ordering::SeqCst);
        let result = self.session.connect().await;
        self.state.is_connecting.store(false, Ordering::SeqCst);
        if result.is_ok() {
            self.state.is_connected.store(true, Ordering::SeqCst);
        }
        result
    }

    pub fn disconnect(&self) {
        self.session.disconnect();
    }

    // --- Observable state ---

    pub fn is_connected(&self) -> bool {
        self.state.is_connected.load(Ordering::SeqCst)
    }

    pub fn is_connecting(&self) -> bool {
        self.state.is_connecting.load(Ordering::SeqCst)
    }

    /// Last error payload, cleared on the next successful connect.
    pub fn error(&self) -> Option<ErrorEvent> {
        self.state.lock_error().clone()
    }

    pub fn unread_count(&self) -> u64 {
        self.state.unread_count.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> ChatState {
        ChatState {
            is_connected: self.is_connected(),
            is_connecting: self.is_connecting(),
            error: self.error(),
            unread_count: self.unread_count(),
        }
    }

    /// Mark a room as focused; inbound messages for it stop counting as
    /// unread. What "focused" means is up to the presentation layer.
    pub fn set_focused_room(&self, room_id: Option<String>) {
        *self.state.lock_focused() = room_id;
    }

    pub fn reset_unread(&self) {
        self.state.unread_count.store(0, Ordering::SeqCst);
    }

    // --- Command surface (delegation) ---

    pub fn join_room(&self, room_id: impl Into<String>) -> Result<(), ChatError> {
        self.session.join_room(room_id)
    }

    pub fn send_message(&self, room_id: impl Into<String>, body: &str) -> Result<(), ChatError> {
        self.session.send_message(room_id, body)
    }

    pub fn send_message_as(
        &self,
        room_id: impl Into<String>,
        body: &str,
        message_type: MessageType,
    ) -> Result<(), ChatError> {
        self.session.send_message_as(room_id, body, message_type)
    }

    pub fn send_typing(&self, room_id: impl Into<String>) -> Result<(), ChatError> {
        self.session.send_typing(room_id)
    }

    pub fn send_stop_typing(&self, room_id: impl Into<String>) -> Result<(), ChatError> {
        self.session.send_stop_typing(room_id)
    }

    pub fn mark_messages_read(
        &self,
        room_id: impl Into<String>,
        message_ids: Vec<String>,
    ) -> Result<(), ChatError> {
        self.session.mark_messages_read(room_id, message_ids)
    }

    pub fn session(&self) -> &Arc<ChatSession> {
        &self.session
    }
}

impl Drop for ChatHandle {
    fn drop(&mut self) {
        // Leave no dangling subscriptions behind.
        for id in self.subscriptions.drain(..) {
            self.session.off(id);
        }
    }
}

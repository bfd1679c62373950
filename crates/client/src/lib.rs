//! taskchat client core: the chat session manager.
//!
//! This crate owns the persistent bidirectional connection to the
//! messaging backend and everything around it:
//!
//! - [`session::ChatSession`] — the connection state machine and the
//!   outbound command surface
//! - the room registry, which transparently rejoins per-task rooms
//!   after a reconnect
//! - [`session::EventDispatcher`] — a typed pub/sub bus decoupling
//!   transport events from consumers
//! - [`session::ChatHandle`] — the presentation-facing accessor
//!   deriving `is_connected` / `is_connecting` / `error` /
//!   `unread_count`
//! - [`transport::WsTransport`] — the production WebSocket adapter
//!   with auto-reconnect
//!
//! ```rust,ignore
//! let credentials = Arc::new(FileCredentialStore::new());
//! let session = ChatSession::with_websocket(
//!     WsConfig::new("ws://localhost:3001/api/ws"),
//!     credentials,
//! );
//! let chat = ChatHandle::new(session);
//! chat.connect().await?;
//! chat.join_room(room_id_for_task(42))?;
//! chat.send_message("task-42", "hello")?;
//! ```

pub mod credentials;
pub mod error;
pub mod session;
pub mod transport;

pub use credentials::{CredentialStore, FileCredentialStore, StaticCredentials};
pub use error::ChatError;
pub use session::{
    ChatHandle, ChatSession, ChatState, ErrorEvent, EventDispatcher, EventKind, HandlerId,
    SessionEvent, SessionStatus,
};
pub use transport::{
    ConnectError, DisconnectReason, EventSink, ReconnectConfig, Transport, TransportEvent,
    WsConfig, WsTransport,
};

/// Initialize tracing output, honoring `RUST_LOG`. Safe to call more
/// than once; later calls are ignored.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

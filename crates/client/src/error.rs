//! Client-side error taxonomy for the chat session.

use taskchat_shared::MAX_MESSAGE_LEN;
use thiserror::Error;

/// Errors returned by session operations.
///
/// Transport failures never cross the session boundary as panics; they
/// surface either as one of these variants or as a dispatcher event.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChatError {
    /// No credential is stored. Fatal to this connect attempt and
    /// surfaced immediately, before any handshake.
    #[error("no authentication token available")]
    AuthenticationMissing,

    /// The transport adapter rejected the connection attempt. The core
    /// does not retry; retrying is the caller's decision.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// An outbound command was dropped because the session is not
    /// connected. Commands are never queued for later delivery.
    #[error("not connected to chat service")]
    NotConnected,

    /// Message body was empty after trimming.
    #[error("message cannot be empty")]
    EmptyMessage,

    /// Message body exceeds the backend limit.
    #[error("message exceeds {MAX_MESSAGE_LEN} characters")]
    MessageTooLong,
}

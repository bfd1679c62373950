//! Credential source for the connection handshake.
//!
//! The session reads the opaque auth token at connect time; its absence
//! is a hard precondition failure, not a retryable error.

use std::path::PathBuf;
use std::sync::Mutex;

/// Provides the opaque credential required to open a session.
pub trait CredentialStore: Send + Sync {
    /// The stored auth token, if any.
    fn auth_token(&self) -> Option<String>;
}

/// Token persisted on disk, surviving application restarts.
///
/// The default location is `auth_token.json` under the platform config
/// directory (`~/.config/taskchat/` on Linux). Tokens are opaque to
/// this crate; they are stored as a JSON string so arbitrary content
/// round-trips safely.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: Option<PathBuf>,
}

impl FileCredentialStore {
    pub fn new() -> Self {
        Self {
            path: dirs::config_dir().map(|dir| dir.join("taskchat").join("auth_token.json")),
        }
    }

    /// Store backed by an explicit file, for tests and embedders with
    /// their own layout.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Persist a token after login. Returns `true` on success.
    pub fn store_token(&self, token: &str) -> bool {
        let Some(path) = &self.path else {
            return false;
        };
        if let Some(parent) = path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return false;
            }
        }
        match serde_json::to_string(token) {
            Ok(json) => std::fs::write(path, json).is_ok(),
            Err(_) => false,
        }
    }

    /// Remove the stored token on logout.
    pub fn clear_token(&self) {
        if let Some(path) = &self.path {
            let _ = std::fs::remove_file(path);
        }
    }
}

impl Default for FileCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for FileCredentialStore {
    fn auth_token(&self) -> Option<String> {
        let path = self.path.as_ref()?;
        let json = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&json).ok()
    }
}

/// In-memory credentials, for tests and embedding applications that
/// manage tokens themselves.
#[derive(Debug, Default)]
pub struct StaticCredentials {
    token: Mutex<Option<String>>,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }

    /// A store with no token; `connect` against it fails fast.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn set(&self, token: Option<String>) {
        *self
            .token
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = token;
    }
}

impl CredentialStore for StaticCredentials {
    fn auth_token(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

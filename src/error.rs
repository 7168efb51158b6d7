//! Error types for a3s-session

use thiserror::Error;

/// Errors that can occur in the session layer
///
/// Forged or malformed client ids are not errors: the id manager treats them
/// as absent and mints a fresh id instead.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Key absent from a session data mapping
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Durable backend failure (I/O, poisoned lock, corrupt file)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Optimistic concurrency failure detected by the backend at commit
    #[error(
        "Conflicting write for client '{client_id}': expected revision {expected:?}, found {found:?}"
    )]
    Conflict {
        client_id: String,
        expected: Option<u64>,
        found: Option<u64>,
    },

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No container registered under the requested namespace
    #[error("No session data container registered for namespace '{0}'")]
    NotRegistered(String),
}

impl SessionError {
    /// Whether retrying the surrounding unit of work may succeed
    pub fn is_conflict(&self) -> bool {
        matches!(self, SessionError::Conflict { .. })
    }
}

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

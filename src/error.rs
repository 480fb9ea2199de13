use std::io;

use thiserror::Error;

/// Errors surfaced by the mirror core.
///
/// Per-item conditions (`NotFound`, `HashMismatch`) are handled inside the
/// sync loop and never fail a run; the remaining variants are fatal for the
/// run that raised them.
#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("{0}")]
    Error(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    /// Network failure that survived the retry budget.
    #[error("network error: {0}")]
    Network(String),

    /// The stored delta link was rejected with HTTP 410 Gone. Handled by
    /// the orchestrator (cursor dropped, drive re-enumerated), never
    /// surfaced to callers.
    #[error("delta cursor expired")]
    CursorGone,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("hash mismatch for '{path}': server {expected}, computed {actual}")]
    HashMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("another sync is already in progress")]
    AlreadyRunning,

    #[error("sync cancelled")]
    Cancelled,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl MirrorError {
    /// CLI process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            MirrorError::Config(_) => 1,
            MirrorError::Auth(_) | MirrorError::Network(_) => 2,
            MirrorError::AlreadyRunning => 4,
            _ => 3,
        }
    }
}

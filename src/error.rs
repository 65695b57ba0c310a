//! Error taxonomy for the indexing pipeline.
//!
//! Each concern has its own error type. Only [`IndexError`] escapes
//! [`Indexer::run`](crate::ingest::Indexer::run); scan failures on a single
//! file and remote failures on a single chunk are absorbed into persisted
//! state instead (see [`crate::upload`]).

use std::path::PathBuf;

use thiserror::Error;

/// Invalid configuration. Always detected before a run touches any state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("chunk.max_chars must be > 0")]
    ZeroMaxChars,

    #[error("chunk.overlap_chars ({overlap}) must be smaller than chunk.max_chars ({max})")]
    OverlapTooLarge { max: usize, overlap: usize },

    #[error("indexing.max_file_size_kb must be > 0")]
    ZeroMaxFileSize,

    #[error("invalid glob pattern '{pattern}': {message}")]
    InvalidGlob { pattern: String, message: String },

    #[error("{0}")]
    Invalid(String),
}

/// Filesystem enumeration or read failure.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("scan root does not exist: {}", .0.display())]
    MissingRoot(PathBuf),

    #[error("failed to walk {}: {source}", .path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure talking to the remote knowledge store.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("remote returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("remote transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed remote response: {0}")]
    Malformed(String),

    #[error("API key environment variable {0} is not set")]
    MissingApiKey(String),

    #[error("remote call cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl RemoteError {
    /// Whether a retry of the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Status { status, .. } => *status == 429 || *status >= 500,
            RemoteError::Transport(_) => true,
            _ => false,
        }
    }
}

/// Persistence layer failure.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} already exists: {key}")]
    Duplicate { entity: &'static str, key: String },

    /// A compare-and-swap update lost against a concurrent writer.
    #[error("concurrent update of {entity} {id} (expected version {expected})")]
    Conflict {
        entity: &'static str,
        id: String,
        expected: i64,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt stored value: {0}")]
    Corrupt(String),
}

/// Run-level failure of [`Indexer::run`](crate::ingest::Indexer::run).
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("scan failed: {0}")]
    Scan(#[from] ScanError),

    #[error("persistence failure: {0}")]
    Store(#[from] StoreError),

    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error("run cancelled")]
    Cancelled,
}

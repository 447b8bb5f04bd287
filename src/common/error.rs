use thiserror::Error;

use crate::domain::{EntityKind, LocalId};

/// Run-level failures. Only these abort an import; per-record problems are
/// collected into the run result instead.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Event source unavailable: {0}")]
    Source(#[from] SourceError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("An import run is already in progress")]
    AlreadyRunning,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Tagged failures surfaced by the external event API client.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("authentication rejected (HTTP {status})")]
    Auth { status: u16 },

    #[error("rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unexpected HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("could not decode response: {0}")]
    Decode(String),
}

impl SourceError {
    /// Errors that mean the importer can never succeed without operator action
    pub fn is_fatal(&self) -> bool {
        matches!(self, SourceError::Auth { .. })
    }

    /// Errors worth another attempt against the same endpoint
    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::Transport(_) | SourceError::RateLimited { .. } => true,
            SourceError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Failures reported by the local datastore.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("{kind} write rejected: {reason}")]
    Rejected { kind: EntityKind, reason: String },

    #[error("record {0} not found")]
    NotFound(LocalId),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// A single record's failure, carrying enough context for operator triage.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{title} ({external_id}): {cause}")]
pub struct RecordError {
    pub title: String,
    pub external_id: String,
    pub cause: StoreError,
}

impl RecordError {
    pub fn new(title: impl Into<String>, external_id: impl Into<String>, cause: StoreError) -> Self {
        Self {
            title: title.into(),
            external_id: external_id.into(),
            cause,
        }
    }
}

pub type Result<T> = std::result::Result<T, ImportError>;
pub type SourceResult<T> = std::result::Result<T, SourceError>;
pub type StoreResult<T> = std::result::Result<T, StoreError>;

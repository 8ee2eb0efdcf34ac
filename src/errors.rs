// src/errors.rs

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Timeout, 5xx, 429, connection reset. Retried with backoff before
    /// being surfaced.
    Transient,
    /// 4xx (other than 429) or a malformed response. Never retried within
    /// a run.
    Permanent,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transient fetch failure for {url}: {reason}")]
    Transient { url: String, reason: String },

    #[error("permanent fetch failure for {url}: {reason}")]
    Permanent { url: String, reason: String },
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Transient { .. } => FetchErrorKind::Transient,
            FetchError::Permanent { .. } => FetchErrorKind::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == FetchErrorKind::Transient
    }
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Every strategy in the chain either failed to parse or produced
    /// fields that did not validate. This is the "site changed under us"
    /// signal; the orchestrator records it and moves on.
    #[error("no extraction strategy matched the fetched content")]
    NoStrategyMatched,

    #[error("strategy {strategy} produced invalid fields: {reason}")]
    ValidationFailed { strategy: String, reason: String },
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("write failed for {path}: {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot log corrupt at line {line}: {reason}")]
    CorruptLog { line: usize, reason: String },
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification transport failed: {0}")]
    TransportFailed(String),
}

/// Run-level fatal conditions. Anything per-itinerary stays inside the
/// run summary instead of bubbling up here.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

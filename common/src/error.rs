use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transient failure of one upstream fetch.
///
/// Cloneable so the same error can be stored as an entry's `last_error` and
/// handed to every caller attached to a deduplicated refresh.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum FetchError {
    #[error("upstream call timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("upstream returned HTTP {status}")]
    Status { status: u16 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to decode upstream payload: {0}")]
    Decode(String),

    #[error("fetch task aborted: {0}")]
    Aborted(String),
}

impl FetchError {
    /// Short machine-readable label for logs and provenance
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Timeout { .. } => "timeout",
            FetchError::Status { .. } => "status",
            FetchError::Transport(_) => "transport",
            FetchError::Decode(_) => "decode",
            FetchError::Aborted(_) => "aborted",
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Decode(err.to_string())
    }
}

use thiserror::Error;

/// Failures talking to the provenance backend.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("backend unreachable: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot build request url from {0}")]
    InvalidUrl(String),
}

impl ClientError {
    /// Transport failures and 5xx replies may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport(_) => true,
            ClientError::Status { status, .. } => *status >= 500,
            ClientError::Decode { .. } | ClientError::InvalidUrl(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Backend(#[from] ClientError),
}

impl SyncError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Backend(e) => e.is_retryable(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid base url {url:?}: {reason}")]
    BaseUrl { url: String, reason: String },

    #[error("timeout must be at least one second")]
    ZeroTimeout,

    #[error("unrenderable time format {0:?}")]
    TimeFormat(String),
}

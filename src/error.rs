use std::path::PathBuf;

use thiserror::Error;

/// Network-level failure for a single URL, after the fetch layer's own retries.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("http status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<FetchError> },
}

impl FetchError {
    /// Permanent within a run: retrying cannot change the outcome.
    pub fn is_permanent(&self) -> bool {
        match self {
            FetchError::InvalidUrl { .. } => true,
            FetchError::Status(code) => *code < 500 && *code != 429 && *code != 408,
            FetchError::Transport(_) => false,
            FetchError::RetriesExhausted { .. } => true,
        }
    }
}

/// The page was fetched but did not have the expected layout.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{0} container not found")]
    MissingContainer(&'static str),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json error on {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("remote rejected request: {status} - {body}")]
    Rejected { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("count response carried no usable Content-Range header")]
    MissingCountHeader,
}

impl From<reqwest::Error> for UploadError {
    fn from(e: reqwest::Error) -> Self {
        UploadError::Transport(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    MissingCredential(&'static str),
    #[error("invalid setting: {0}")]
    Invalid(String),
    #[error(transparent)]
    Source(#[from] config::ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanence() {
        assert!(FetchError::InvalidUrl { url: "x".into(), reason: "y".into() }.is_permanent());
        assert!(FetchError::Status(404).is_permanent());
        assert!(!FetchError::Status(503).is_permanent());
        assert!(!FetchError::Status(429).is_permanent());
        assert!(!FetchError::Transport("reset".into()).is_permanent());
    }
}

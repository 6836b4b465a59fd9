//! Upstream error types

use std::time::Duration;
use thiserror::Error;

/// Errors from the remote inference services
#[derive(Error, Debug)]
pub enum UpstreamError {
    /// Non-success HTTP status from the upstream
    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Connection-level failure (reset, DNS, TLS, body read)
    #[error("transport error: {0}")]
    Transport(String),

    /// Streaming response produced no data within the idle gap
    #[error("stream stalled: no data for {0:?}")]
    IdleTimeout(Duration),

    /// Hard per-call deadline exceeded
    #[error("upstream call deadline exceeded")]
    DeadlineExceeded,

    /// Upstream payload did not match the expected shape
    #[error("malformed upstream payload: {0}")]
    Malformed(String),
}

impl UpstreamError {
    /// Whether a retry may succeed: 5xx, 429, transport failures and stalls
    /// are transient; other 4xx fail fast.
    pub fn is_transient(&self) -> bool {
        match self {
            UpstreamError::Status { status, .. } => *status == 429 || (500..=599).contains(status),
            UpstreamError::Transport(_) => true,
            UpstreamError::IdleTimeout(_) => true,
            UpstreamError::DeadlineExceeded => true,
            UpstreamError::Malformed(_) => false,
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            UpstreamError::Status {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            UpstreamError::Transport(err.to_string())
        }
    }
}

//! Order service error types

use thiserror::Error;

/// Errors from the order service
#[derive(Error, Debug)]
pub enum OrderError {
    /// QR token does not resolve to a table
    #[error("unknown table token")]
    TableUnknown,

    /// Non-success response from the service
    #[error("order service returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Connection-level failure
    #[error("order service transport error: {0}")]
    Transport(String),

    /// Response did not match the expected shape
    #[error("malformed order service payload: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for OrderError {
    fn from(err: reqwest::Error) -> Self {
        OrderError::Transport(err.to_string())
    }
}

//! Garson gateway server
//!
//! Axum application exposing the duplex voice endpoint plus health checks.

pub mod http;
pub mod messages;
pub mod orders;
pub mod rate_limit;
pub mod session;
pub mod state;
pub mod ws;

pub use http::create_router;
pub use messages::{InboundMessage, OutboundMessage};
pub use session::SessionManager;
pub use state::AppState;

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("session error: {0}")]
    Session(String),

    #[error("startup error: {0}")]
    Startup(String),

    #[error("internal error: {0}")]
    Internal(String),
}

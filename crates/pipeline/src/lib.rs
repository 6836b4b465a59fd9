//! Per-session voice pipeline engine
//!
//! This crate holds the hard real-time machinery of the gateway:
//! - The session state machine with its rolling audio buffer and task registry
//! - The partial-STT scheduler and early-LLM-trigger predicates
//! - Sentence boundary detection over a streaming LLM reply
//! - The streaming bridge that overlaps LLM generation with TTS synthesis
//!
//! Everything here is transport-agnostic; the WebSocket driver in the server
//! crate owns the duplex channel and feeds the pipeline through the outbound
//! envelope channel.

pub mod boundary;
pub mod bridge;
pub mod outbound;
pub mod registry;
pub mod session;

pub use boundary::{extract_spoken_response, first_sentence};
pub use bridge::{BridgeConfig, OrderSink, StreamingBridge, TurnContext};
pub use outbound::{outbound_channel, Envelope, OutboundSender, SessionEvent};
pub use registry::{TaskKey, TaskRegistry};
pub use session::{SessionState, SessionTuning, VoiceSession};

use std::time::Duration;
use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("llm stream failed: {0}")]
    Llm(String),

    #[error("tts stream failed: {0}")]
    Tts(String),

    #[error("llm stream stalled: no token for {0:?}")]
    LlmIdle(Duration),

    #[error("tts stream stalled: no chunk for {0:?}")]
    TtsIdle(Duration),

    #[error(transparent)]
    Upstream(#[from] garson_upstream::UpstreamError),

    #[error("order dispatch failed: {0}")]
    Order(String),

    /// Cooperative cancellation; never surfaced to the client
    #[error("cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Cancellation is control flow, not a failure
    pub fn is_cancellation(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}

//! Remote inference clients for the garson gateway
//!
//! This crate talks to the three remote AI services behind the voice
//! pipeline:
//! - Speech-to-text with per-session serialization, rate limiting and retry
//! - Streaming LLM token generation
//! - Streaming TTS synthesis yielding raw PCM16 frames
//!
//! Plus the process-wide warm-keeper that defeats serverless cold starts.

pub mod error;
pub mod http;
pub mod llm;
pub mod retry;
mod sse;
pub mod stt;
pub mod tts;
pub mod warmer;

pub use error::UpstreamError;
pub use http::UpstreamHttp;
pub use llm::{LlmBackend, LlmClient, LlmEvent};
pub use retry::RetryPolicy;
pub use stt::{SttClient, SttGate, SttOutcome};
pub use tts::{TtsBackend, TtsClient, TtsEvent};
pub use warmer::Warmer;

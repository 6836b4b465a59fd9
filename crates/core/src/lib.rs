//! Core types for the garson voice ordering gateway
//!
//! This crate provides foundational types used across all other crates:
//! - Transcript types and partial-transcript merging
//! - Structured order intents parsed from LLM replies
//! - Menu snapshot types and LLM context rendering
//! - PCM16 audio helpers
//!
//! Fallible operations live in the crates that own them; each carries its
//! own error enum (`UpstreamError`, `PipelineError`, `OrderError`, ...).

pub mod audio;
pub mod intent;
pub mod menu;
pub mod transcript;

pub use audio::{f32_to_pcm16, pcm16_to_f32, OVERLAP_TAIL_BYTES, PCM_BYTES_PER_MS, SAMPLE_RATE_HZ};
pub use intent::{IntentKind, OrderIntent};
pub use menu::{Allergen, MenuSnapshot, Product};
pub use transcript::{merge_transcripts, word_jaccard, TranscriptResult};

//! Transcript types and partial-transcript merging

use serde::{Deserialize, Serialize};

/// Transcript result from the remote STT service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptResult {
    /// Transcribed text
    pub text: String,

    /// Is this a final result?
    pub is_final: bool,

    /// Confidence score (0.0 - 1.0)
    pub confidence: f32,

    /// Upstream processing time in milliseconds
    pub processing_time_ms: u64,
}

impl TranscriptResult {
    /// Create a partial (non-final) transcript
    pub fn partial(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            is_final: false,
            confidence,
            processing_time_ms: 0,
        }
    }

    /// Create a final transcript
    pub fn final_result(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            is_final: true,
            confidence,
            processing_time_ms: 0,
        }
    }

    /// Check if transcript is empty after trimming
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Word count of the transcript
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// Merge two successive partial transcripts of the same utterance.
///
/// Each partial STT call is fed the whole accumulated buffer, so the fresh
/// result normally repeats most of the previous one. The merge looks for the
/// longest suffix of `old` that is a prefix of `new` (word-level, up to five
/// words) and joins the two at that seam. When `new` re-transcribes the whole
/// of `old`, `new` wins outright.
pub fn merge_transcripts(old: &str, new: &str) -> String {
    let old = old.trim();
    let new = new.trim();

    if old.is_empty() {
        return new.to_string();
    }
    if new.is_empty() {
        return old.to_string();
    }

    let old_words: Vec<&str> = old.split_whitespace().collect();
    let new_words: Vec<&str> = new.split_whitespace().collect();

    // Whole-buffer resend: new already contains old as its prefix.
    if new_words.len() >= old_words.len() && new_words[..old_words.len()] == old_words[..] {
        return new.to_string();
    }

    let max_overlap = old_words.len().min(new_words.len()).min(5);
    for n in (1..=max_overlap).rev() {
        if old_words[old_words.len() - n..] == new_words[..n] {
            let mut merged = String::from(old);
            for word in &new_words[n..] {
                merged.push(' ');
                merged.push_str(word);
            }
            return merged;
        }
    }

    format!("{old} {new}")
}

/// Word-level Jaccard similarity between two transcripts.
///
/// Used to decide whether a final STT result diverges enough from the
/// committed partial to warrant restarting the LLM turn. Both-empty inputs
/// compare as identical.
pub fn word_jaccard(a: &str, b: &str) -> f32 {
    use std::collections::HashSet;

    let set_a: HashSet<String> = a.split_whitespace().map(|w| w.to_lowercase()).collect();
    let set_b: HashSet<String> = b.split_whitespace().map(|w| w.to_lowercase()).collect();

    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }

    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f32 / union as f32
}

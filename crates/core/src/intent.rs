//! Structured order intents parsed from LLM replies

use serde::{Deserialize, Serialize};

/// What the user asked for in one turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    /// Add an item to the table's cart
    Add,
    /// Question about the menu or an item
    Info,
    /// Greeting / small talk
    Greet,
    /// Ask for the check
    Check,
    /// Ask for a recommendation
    Recommend,
    /// Anything the model tagged with an unknown label
    #[serde(other)]
    Other,
}

impl Default for IntentKind {
    fn default() -> Self {
        IntentKind::Other
    }
}

/// Structured result of one conversational turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    /// What the assistant speaks back to the guest
    #[serde(default)]
    pub spoken_response: String,

    /// Tagged intent; unknown tags collapse to `Other`
    #[serde(default)]
    pub intent: IntentKind,

    /// Product the intent refers to, when applicable
    #[serde(default)]
    pub product_name: Option<String>,

    /// Quantity for `add` intents
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

impl OrderIntent {
    /// Wrap a raw text reply that carried no JSON structure
    pub fn from_plain_text(text: impl Into<String>) -> Self {
        Self {
            spoken_response: text.into(),
            intent: IntentKind::Info,
            product_name: None,
            quantity: 1,
        }
    }

    /// Parse the structured intent out of a complete LLM reply.
    ///
    /// The reply is expected to be a single JSON object, possibly wrapped in
    /// markdown fences or surrounded by stray prose. Parsing is permissive:
    /// the slice between the first `{` and the last `}` is tried first, and a
    /// reply with no parseable object becomes a plain `info` intent carrying
    /// the raw text as the spoken response.
    pub fn parse_reply(full_text: &str) -> Self {
        let clean = strip_fences(full_text.trim());

        if let (Some(start), Some(end)) = (clean.find('{'), clean.rfind('}')) {
            if start < end {
                let candidate = &clean[start..=end];
                match serde_json::from_str::<OrderIntent>(candidate) {
                    Ok(intent) => return intent,
                    Err(e) => {
                        tracing::debug!(error = %e, "reply JSON did not parse, falling back to plain text");
                    }
                }
            }
        }

        Self::from_plain_text(clean)
    }
}

/// Remove markdown code fences (```json ... ```) around a reply
fn strip_fences(text: &str) -> &str {
    let mut clean = text;
    if let Some(rest) = clean.strip_prefix("```") {
        clean = match rest.find('\n') {
            Some(idx) => &rest[idx + 1..],
            None => rest,
        };
    }
    if let Some(rest) = clean.strip_suffix("```") {
        clean = rest;
    }
    clean.trim()
}

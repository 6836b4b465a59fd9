//! Sentence boundary detection over a streaming LLM reply

use std::sync::OnceLock;

use regex::Regex;

fn spoken_response_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""spoken_response"\s*:\s*"([^"]*)""#).expect("valid regex"))
}

/// First complete sentence of `text`: the prefix up to the first `.`, `!` or
/// `?` that is followed by whitespace or end-of-text.
pub fn first_sentence(text: &str) -> Option<&str> {
    for (idx, ch) in text.char_indices() {
        if matches!(ch, '.' | '!' | '?') {
            let after = &text[idx + ch.len_utf8()..];
            if after.is_empty() || after.starts_with(char::is_whitespace) {
                let sentence = text[..idx + ch.len_utf8()].trim();
                if !sentence.is_empty() {
                    return Some(sentence);
                }
            }
        }
    }
    None
}

/// Decide what to hand to TTS while the reply is still streaming.
///
/// The reply is normally a JSON object arriving token by token. Once the
/// `spoken_response` value is visible and terminated by sentence punctuation
/// the whole value is returned; an unterminated value means more tokens are
/// coming, so the caller waits. Replies with no JSON structure fall back to
/// the first complete sentence of the raw text.
pub fn extract_spoken_response(full_text: &str) -> Option<String> {
    if full_text.contains("\"spoken_response\"") {
        let spoken = spoken_response_re()
            .captures(full_text)
            .map(|caps| caps[1].trim().to_string())?;
        if spoken.ends_with(['.', '!', '?']) {
            return Some(spoken);
        }
        return None;
    }

    first_sentence(full_text).map(|s| s.to_string())
}

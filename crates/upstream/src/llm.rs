//! Streaming LLM client
//!
//! Tokens are streamed over SSE and forwarded through a bounded channel.
//! Dropping the receiver tears the HTTP stream down at the next chunk read,
//! which is how barge-in and corrective restarts cancel generation.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;

use garson_config::UpstreamConfig;

use crate::http::status_error;
use crate::sse::{SseData, SseLineBuffer};
use crate::{UpstreamError, UpstreamHttp};

/// Compact system prompt: brief Turkish waiter, single JSON object out.
const SYSTEM_PROMPT: &str = "Sen GarsonAI, masadaki sesli sipariş asistanısın. \
Türkçe, kısa ve samimi konuş; spoken_response en fazla 10 kelime olsun. \
Yanıtın TEK bir düz JSON nesnesi olmalı: \
{\"spoken_response\": \"...\", \"intent\": \"add|info|greet|check|recommend|other\", \
\"product_name\": \"...\", \"quantity\": 1}";

/// One event of a token stream
#[derive(Debug, Clone)]
pub enum LlmEvent {
    /// A fresh token together with the accumulated text
    Token { token: String, full_text: String },
    /// Stream drained normally
    Complete { full_text: String },
    /// Stream failed mid-flight
    Error(String),
}

/// Seam for the streaming bridge; the HTTP client implements it, tests
/// substitute channel-fed fakes.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Start a generation stream; the sequence is finite and not restartable.
    async fn generate_stream(
        &self,
        user_message: &str,
        menu_context: &str,
    ) -> Result<mpsc::Receiver<LlmEvent>, UpstreamError>;
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Deserialize, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Extract the token delta out of one SSE payload
fn parse_token(payload: &str) -> Option<String> {
    let chunk: ChatChunk = serde_json::from_str(payload).ok()?;
    chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|t| !t.is_empty())
}

/// Build the generation prompt from the cached menu context
fn build_prompt(user_message: &str, menu_context: &str) -> String {
    if menu_context.is_empty() {
        format!("{SYSTEM_PROMPT}\n\nMüşteri: {user_message}\n\nYanıt ver (JSON formatında):")
    } else {
        format!(
            "{SYSTEM_PROMPT}\n\nMenü:\n{menu_context}\n\nMüşteri: {user_message}\n\nYanıt ver (JSON formatında):"
        )
    }
}

/// Remote LLM client, shared process-wide
pub struct LlmClient {
    http: UpstreamHttp,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl LlmClient {
    pub fn new(http: UpstreamHttp, upstream: &UpstreamConfig) -> Self {
        Self {
            http,
            base_url: upstream.llm_base_url.trim_end_matches('/').to_string(),
            api_key: upstream.llm_api_key.clone(),
            model: upstream.llm_model.clone(),
            temperature: upstream.temperature,
            max_tokens: upstream.max_tokens,
        }
    }

    async fn open_stream(&self, prompt: &str) -> Result<reqwest::Response, UpstreamError> {
        let response = self
            .http
            .client()
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "messages": [{"role": "user", "content": prompt}],
                "temperature": self.temperature,
                "max_tokens": self.max_tokens,
                "stream": true,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        Ok(response)
    }

    async fn stream_events(
        &self,
        user_message: &str,
        menu_context: &str,
    ) -> Result<mpsc::Receiver<LlmEvent>, UpstreamError> {
        // The in-flight slot covers the whole streaming response
        let slot = self.http.acquire().await;
        let prompt = build_prompt(user_message, menu_context);
        let response = self.open_stream(&prompt).await?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let _slot = slot;
            let mut stream = response.bytes_stream();
            let mut buf = SseLineBuffer::new();
            let mut full_text = String::new();

            'read: while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(LlmEvent::Error(e.to_string())).await;
                        return;
                    }
                };
                buf.push(&bytes);

                while let Some(data) = buf.next_data() {
                    match data {
                        SseData::Done => break 'read,
                        SseData::Payload(payload) => {
                            if let Some(token) = parse_token(&payload) {
                                full_text.push_str(&token);
                                let event = LlmEvent::Token {
                                    token,
                                    full_text: full_text.clone(),
                                };
                                // Receiver gone means the turn was cancelled
                                if tx.send(event).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                }
            }

            let _ = tx.send(LlmEvent::Complete { full_text }).await;
        });

        Ok(rx)
    }
}

#[async_trait]
impl LlmBackend for LlmClient {
    async fn generate_stream(
        &self,
        user_message: &str,
        menu_context: &str,
    ) -> Result<mpsc::Receiver<LlmEvent>, UpstreamError> {
        self.stream_events(user_message, menu_context).await
    }
}

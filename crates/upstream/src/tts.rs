//! Streaming TTS client
//!
//! The upstream streams SSE events, each carrying a base64-encoded chunk of
//! PCM16 audio (16 kHz, mono). Chunks are decoded here and yielded as raw
//! bytes in arrival order; the client schedules them gaplessly on its side.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;

use garson_config::UpstreamConfig;
use garson_core::SAMPLE_RATE_HZ;

use crate::http::status_error;
use crate::sse::{SseData, SseLineBuffer};
use crate::{UpstreamError, UpstreamHttp};

/// One event of a synthesis stream
#[derive(Debug, Clone)]
pub enum TtsEvent {
    /// Raw PCM16 LE frame
    Chunk(Bytes),
    /// Stream drained normally
    Complete,
    /// Stream failed mid-flight
    Error(String),
}

/// Seam for the streaming bridge; tests substitute channel-fed fakes.
#[async_trait]
pub trait TtsBackend: Send + Sync {
    /// Start a synthesis stream; the sequence is finite and not restartable.
    async fn speak_stream(&self, text: &str) -> Result<mpsc::Receiver<TtsEvent>, UpstreamError>;
}

#[derive(Debug, Deserialize)]
struct AudioChunk {
    #[serde(default)]
    audio: Option<String>,
}

/// Decode the PCM payload out of one SSE event
fn parse_audio(payload: &str) -> Result<Option<Bytes>, UpstreamError> {
    let chunk: AudioChunk =
        serde_json::from_str(payload).map_err(|e| UpstreamError::Malformed(e.to_string()))?;
    match chunk.audio {
        Some(encoded) if !encoded.is_empty() => {
            let bytes = BASE64
                .decode(encoded.as_bytes())
                .map_err(|e| UpstreamError::Malformed(e.to_string()))?;
            Ok(Some(Bytes::from(bytes)))
        }
        _ => Ok(None),
    }
}

/// Remote TTS client, shared process-wide
pub struct TtsClient {
    http: UpstreamHttp,
    base_url: String,
    api_key: String,
    voice: String,
    speaking_rate: f32,
    language: String,
}

impl TtsClient {
    pub fn new(http: UpstreamHttp, upstream: &UpstreamConfig) -> Self {
        Self {
            http,
            base_url: upstream.tts_base_url.trim_end_matches('/').to_string(),
            api_key: upstream.tts_api_key.clone(),
            voice: upstream.tts_voice.clone(),
            speaking_rate: upstream.speaking_rate,
            language: upstream.language.clone(),
        }
    }

    async fn open_stream(&self, text: &str) -> Result<reqwest::Response, UpstreamError> {
        let response = self
            .http
            .client()
            .post(format!("{}/speak", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "input": text,
                "voice": self.voice,
                "language": self.language,
                "speaking_rate": self.speaking_rate,
                "format": "pcm16",
                "sample_rate": SAMPLE_RATE_HZ,
                "stream": true,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        Ok(response)
    }

    /// Trivial keep-alive call for the warm-keeper
    pub async fn warm(&self) -> Result<(), UpstreamError> {
        let mut rx = self.speak_stream(".").await?;
        while rx.recv().await.is_some() {}
        Ok(())
    }
}

#[async_trait]
impl TtsBackend for TtsClient {
    async fn speak_stream(&self, text: &str) -> Result<mpsc::Receiver<TtsEvent>, UpstreamError> {
        // The in-flight slot covers the whole streaming response
        let slot = self.http.acquire().await;
        let response = self.open_stream(text).await?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let _slot = slot;
            let mut stream = response.bytes_stream();
            let mut buf = SseLineBuffer::new();

            'read: while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(TtsEvent::Error(e.to_string())).await;
                        return;
                    }
                };
                buf.push(&bytes);

                while let Some(data) = buf.next_data() {
                    match data {
                        SseData::Done => break 'read,
                        SseData::Payload(payload) => match parse_audio(&payload) {
                            Ok(Some(frame)) => {
                                // Receiver gone means barge-in tore us down
                                if tx.send(TtsEvent::Chunk(frame)).await.is_err() {
                                    return;
                                }
                            }
                            Ok(None) => {}
                            Err(e) => {
                                let _ = tx.send(TtsEvent::Error(e.to_string())).await;
                                return;
                            }
                        },
                    }
                }
            }

            let _ = tx.send(TtsEvent::Complete).await;
        });

        Ok(rx)
    }
}

//! Remote speech-to-text client
//!
//! The upstream is a serverless transcription service: audio is uploaded to
//! its file store, then transcribed through a subscribe call against the
//! resulting URL. The result fetch is flaky under load, so subscribe calls
//! retry with exponential backoff on 5xx and 429.

use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::{Mutex, MutexGuard};

use garson_config::{PipelineConfig, UpstreamConfig};
use garson_core::TranscriptResult;

use crate::http::status_error;
use crate::{RetryPolicy, UpstreamError, UpstreamHttp};

/// Per-session STT serialization gate.
///
/// At most one STT call per session is in flight, and consecutive calls are
/// spaced by a minimum gap. The gate is a tokio mutex because it is held
/// across the upstream I/O, unlike the session state lock.
#[derive(Debug, Default)]
pub struct SttGate {
    last_request: Mutex<Option<Instant>>,
}

/// Held for the duration of one STT call
pub struct SttGatePermit<'a> {
    _guard: MutexGuard<'a, Option<Instant>>,
}

impl SttGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialise and space out calls: blocks while a call is in flight, then
    /// sleeps out whatever remains of `min_gap` since the last issue time.
    pub async fn acquire(&self, min_gap: Duration) -> SttGatePermit<'_> {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let since = prev.elapsed();
            if since < min_gap {
                tokio::time::sleep(min_gap - since).await;
            }
        }
        *last = Some(Instant::now());
        SttGatePermit { _guard: last }
    }
}

/// Outcome of a transcription request
#[derive(Debug)]
pub enum SttOutcome {
    /// Input was too small to be worth an upstream call
    Skipped,
    /// Upstream transcript
    Transcript(TranscriptResult),
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: String,
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    chunks: Vec<TranscribeChunk>,
}

#[derive(Debug, Deserialize)]
struct TranscribeChunk {
    #[serde(default)]
    text: String,
}

impl TranscribeResponse {
    fn into_text(self) -> (String, f32) {
        if !self.chunks.is_empty() {
            let joined = self
                .chunks
                .iter()
                .map(|c| c.text.trim())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            return (joined, 0.85);
        }
        match self.text {
            Some(text) if !text.trim().is_empty() => (text, 0.75),
            _ => (String::new(), 0.5),
        }
    }
}

/// Remote STT client, shared process-wide
pub struct SttClient {
    http: UpstreamHttp,
    base_url: String,
    api_key: String,
    language: String,
    request_timeout: Duration,
    min_gap: Duration,
    min_input_bytes: usize,
    retry: RetryPolicy,
}

impl SttClient {
    pub fn new(http: UpstreamHttp, upstream: &UpstreamConfig, pipeline: &PipelineConfig) -> Self {
        Self {
            http,
            base_url: upstream.stt_base_url.trim_end_matches('/').to_string(),
            api_key: upstream.stt_api_key.clone(),
            language: upstream.language.clone(),
            request_timeout: upstream.stt_timeout(),
            min_gap: pipeline.partial_min_gap(),
            min_input_bytes: pipeline.min_stt_input_bytes,
            retry: RetryPolicy::stt_default(),
        }
    }

    /// Transcribe the accumulated buffer of one session.
    ///
    /// Near-silent inputs below the minimum size return `Skipped` without
    /// contacting the upstream. The per-session gate serialises calls and
    /// enforces the minimum gap; the hard deadline covers upload, subscribe
    /// and all retries.
    pub async fn transcribe(
        &self,
        gate: &SttGate,
        audio: &[u8],
        is_final: bool,
    ) -> Result<SttOutcome, UpstreamError> {
        if audio.len() < self.min_input_bytes {
            tracing::debug!(bytes = audio.len(), "audio below minimum, skipping STT");
            return Ok(SttOutcome::Skipped);
        }

        let _permit = gate.acquire(self.min_gap).await;
        let started = Instant::now();

        let response = tokio::time::timeout(self.request_timeout, self.call(audio))
            .await
            .map_err(|_| UpstreamError::DeadlineExceeded)??;

        let (text, confidence) = response.into_text();
        tracing::debug!(
            bytes = audio.len(),
            is_final,
            elapsed_ms = started.elapsed().as_millis() as u64,
            transcript = %text,
            "transcription complete"
        );

        Ok(SttOutcome::Transcript(TranscriptResult {
            text,
            is_final,
            confidence,
            processing_time_ms: started.elapsed().as_millis() as u64,
        }))
    }

    async fn call(&self, audio: &[u8]) -> Result<TranscribeResponse, UpstreamError> {
        let _slot = self.http.acquire().await;

        let audio_url = self.upload(audio).await?;
        self.retry.run(|_| self.subscribe(&audio_url)).await
    }

    /// Upload the audio to the upstream file store, returning its URL.
    /// Unique file names avoid CDN cache clashes between successive partials.
    async fn upload(&self, audio: &[u8]) -> Result<String, UpstreamError> {
        let file_name = format!("audio_{}.webm", uuid::Uuid::new_v4());
        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name(file_name)
            .mime_str("audio/webm")
            .map_err(|e| UpstreamError::Malformed(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .http
            .client()
            .post(format!("{}/files", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let upload: UploadResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::Malformed(e.to_string()))?;
        Ok(upload.url)
    }

    async fn subscribe(&self, audio_url: &str) -> Result<TranscribeResponse, UpstreamError> {
        let response = self
            .http
            .client()
            .post(format!("{}/transcribe", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "audio_url": audio_url,
                "task": "transcribe",
                "language": self.language,
                "chunk_level": "segment",
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| UpstreamError::Malformed(e.to_string()))
    }

    /// Trivial keep-alive call for the warm-keeper; content is irrelevant.
    pub async fn warm(&self) -> Result<(), UpstreamError> {
        // Minimal WebM header, enough to reach the container
        let dummy = [0x1a, 0x45, 0xdf, 0xa3];
        let _slot = self.http.acquire().await;
        let url = self.upload(&dummy).await?;
        self.subscribe(&url).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use garson_config::{PipelineConfig, UpstreamConfig};

    fn client() -> SttClient {
        let upstream = UpstreamConfig::default();
        let http = UpstreamHttp::new(&upstream).unwrap();
        SttClient::new(http, &upstream, &PipelineConfig::default())
    }

    #[tokio::test]
    async fn test_tiny_input_skipped_without_upstream_call() {
        let client = client();
        let gate = SttGate::new();

        let outcome = client.transcribe(&gate, &[0u8; 999], false).await.unwrap();
        assert!(matches!(outcome, SttOutcome::Skipped));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_enforces_minimum_gap() {
        let gate = SttGate::new();
        let gap = Duration::from_millis(500);

        let start = tokio::time::Instant::now();
        drop(gate.acquire(gap).await);
        drop(gate.acquire(gap).await);
        assert!(start.elapsed() >= gap);
    }

    #[tokio::test]
    async fn test_gate_serialises_concurrent_callers() {
        use std::sync::Arc;

        let gate = Arc::new(SttGate::new());
        let permit = gate.acquire(Duration::ZERO).await;

        let contender = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.acquire(Duration::ZERO).await;
            })
        };

        tokio::task::yield_now().await;
        assert!(!contender.is_finished());

        drop(permit);
        contender.await.unwrap();
    }

    #[test]
    fn test_transcribe_response_prefers_chunks() {
        let response = TranscribeResponse {
            text: Some("ignored".to_string()),
            chunks: vec![
                TranscribeChunk { text: "iki".to_string() },
                TranscribeChunk { text: "pizza".to_string() },
            ],
        };
        let (text, confidence) = response.into_text();
        assert_eq!(text, "iki pizza");
        assert_eq!(confidence, 0.85);
    }

    #[test]
    fn test_transcribe_response_plain_text() {
        let response = TranscribeResponse {
            text: Some("test".to_string()),
            chunks: vec![],
        };
        let (text, confidence) = response.into_text();
        assert_eq!(text, "test");
        assert_eq!(confidence, 0.75);
    }

    #[test]
    fn test_transcribe_response_empty() {
        let response = TranscribeResponse {
            text: None,
            chunks: vec![],
        };
        let (text, confidence) = response.into_text();
        assert!(text.is_empty());
        assert_eq!(confidence, 0.5);
    }
}

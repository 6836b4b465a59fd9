//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Remote inference upstream configuration
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Voice pipeline tuning
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Warm-keeper configuration
    #[serde(default)]
    pub warmer: WarmerConfig,

    /// Order service (persistence collaborator) connection
    #[serde(default)]
    pub orders: OrdersConfig,

    /// Logging configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    /// Validate settings; the engine refuses to start on failure
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream.stt_api_key.is_empty() {
            return Err(ConfigError::MissingKey("upstream.stt_api_key"));
        }
        if self.upstream.llm_api_key.is_empty() {
            return Err(ConfigError::MissingKey("upstream.llm_api_key"));
        }
        if self.upstream.tts_api_key.is_empty() {
            return Err(ConfigError::MissingKey("upstream.tts_api_key"));
        }

        if self.upstream.max_inflight == 0 {
            return Err(ConfigError::InvalidValue {
                field: "upstream.max_inflight".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.pipeline.truncate_to_bytes > self.pipeline.max_buffer_bytes {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.truncate_to_bytes".to_string(),
                message: "must not exceed max_buffer_bytes".to_string(),
            });
        }

        if !(10..=120).contains(&self.warmer.interval_secs) {
            tracing::warn!(
                interval = self.warmer.interval_secs,
                "warmer interval outside 10-120s, clamping"
            );
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// CORS allowed origins; empty means deny cross-origin
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Maximum concurrent voice sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Session idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub session_idle_timeout_secs: u64,

    /// Inbound rate limiting
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_max_sessions() -> usize {
    200
}
fn default_idle_timeout() -> u64 {
    300
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
            max_sessions: default_max_sessions(),
            session_idle_timeout_secs: default_idle_timeout(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout_secs)
    }
}

/// Inbound rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum control messages per second per connection
    #[serde(default = "default_messages_per_second")]
    pub messages_per_second: u32,

    /// Maximum inbound audio bytes per second per connection
    #[serde(default = "default_audio_bytes_per_second")]
    pub audio_bytes_per_second: u32,

    /// Burst allowance (multiple of the rate limit)
    #[serde(default = "default_burst_multiplier")]
    pub burst_multiplier: f32,

    /// Largest accepted single binary frame
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

fn default_messages_per_second() -> u32 {
    50
}
fn default_audio_bytes_per_second() -> u32 {
    // 16 kbps Opus plus generous headroom
    64_000
}
fn default_burst_multiplier() -> f32 {
    2.0
}
fn default_max_frame_bytes() -> usize {
    256 * 1024
}
fn default_true() -> bool {
    true
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            messages_per_second: default_messages_per_second(),
            audio_bytes_per_second: default_audio_bytes_per_second(),
            burst_multiplier: default_burst_multiplier(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

/// Remote inference upstream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// STT service base URL
    #[serde(default = "default_stt_base_url")]
    pub stt_base_url: String,

    /// STT API key (required)
    #[serde(default)]
    pub stt_api_key: String,

    /// LLM service base URL
    #[serde(default = "default_llm_base_url")]
    pub llm_base_url: String,

    /// LLM API key (required)
    #[serde(default)]
    pub llm_api_key: String,

    /// TTS service base URL
    #[serde(default = "default_tts_base_url")]
    pub tts_base_url: String,

    /// TTS API key (required)
    #[serde(default)]
    pub tts_api_key: String,

    /// Hard timeout for a single STT call, seconds
    #[serde(default = "default_stt_timeout")]
    pub stt_timeout_secs: u64,

    /// Fail the turn if no LLM token arrives within this gap, seconds
    #[serde(default = "default_llm_token_gap")]
    pub llm_token_gap_secs: u64,

    /// Fail the TTS task if no chunk arrives within this gap, seconds
    #[serde(default = "default_tts_chunk_gap")]
    pub tts_chunk_gap_secs: u64,

    /// Process-wide cap on in-flight upstream calls
    #[serde(default = "default_max_inflight")]
    pub max_inflight: usize,

    /// Keep-alive connections per upstream host
    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle: usize,

    /// LLM model identifier
    #[serde(default = "default_llm_model")]
    pub llm_model: String,

    /// LLM sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// LLM maximum output tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// TTS voice identifier
    #[serde(default = "default_tts_voice")]
    pub tts_voice: String,

    /// TTS speaking rate multiplier
    #[serde(default = "default_speaking_rate")]
    pub speaking_rate: f32,

    /// Transcription and synthesis language
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_stt_base_url() -> String {
    "https://api.garson.dev/stt".to_string()
}
fn default_llm_base_url() -> String {
    "https://api.garson.dev/llm".to_string()
}
fn default_tts_base_url() -> String {
    "https://api.garson.dev/tts".to_string()
}
fn default_stt_timeout() -> u64 {
    60
}
fn default_llm_token_gap() -> u64 {
    30
}
fn default_tts_chunk_gap() -> u64 {
    15
}
fn default_max_inflight() -> usize {
    10
}
fn default_pool_max_idle() -> usize {
    8
}
fn default_llm_model() -> String {
    "google/gemini-2.5-flash".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    100
}
fn default_tts_voice() -> String {
    "zeynep".to_string()
}
fn default_speaking_rate() -> f32 {
    1.15
}
fn default_language() -> String {
    "tr".to_string()
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            stt_base_url: default_stt_base_url(),
            stt_api_key: String::new(),
            llm_base_url: default_llm_base_url(),
            llm_api_key: String::new(),
            tts_base_url: default_tts_base_url(),
            tts_api_key: String::new(),
            stt_timeout_secs: default_stt_timeout(),
            llm_token_gap_secs: default_llm_token_gap(),
            tts_chunk_gap_secs: default_tts_chunk_gap(),
            max_inflight: default_max_inflight(),
            pool_max_idle: default_pool_max_idle(),
            llm_model: default_llm_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            tts_voice: default_tts_voice(),
            speaking_rate: default_speaking_rate(),
            language: default_language(),
        }
    }
}

impl UpstreamConfig {
    pub fn stt_timeout(&self) -> Duration {
        Duration::from_secs(self.stt_timeout_secs)
    }

    pub fn llm_token_gap(&self) -> Duration {
        Duration::from_secs(self.llm_token_gap_secs)
    }

    pub fn tts_chunk_gap(&self) -> Duration {
        Duration::from_secs(self.tts_chunk_gap_secs)
    }
}

/// Voice pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Minimum gap between partial STT calls, milliseconds
    #[serde(default = "default_partial_min_gap")]
    pub partial_min_gap_ms: u64,

    /// Minimum buffered audio before a partial STT fires, milliseconds
    #[serde(default = "default_partial_min_audio")]
    pub partial_min_audio_ms: u64,

    /// Silence required for the early LLM trigger, milliseconds
    #[serde(default = "default_early_silence")]
    pub early_trigger_silence_ms: u64,

    /// Hard cap on the session audio buffer
    #[serde(default = "default_max_buffer")]
    pub max_buffer_bytes: usize,

    /// Suffix kept when the buffer overruns the cap
    #[serde(default = "default_truncate_to")]
    pub truncate_to_bytes: usize,

    /// Acoustic overlap tail kept across turns
    #[serde(default = "default_overlap_tail")]
    pub overlap_tail_bytes: usize,

    /// Inputs below this size skip the STT upstream entirely
    #[serde(default = "default_min_stt_input")]
    pub min_stt_input_bytes: usize,

    /// Restart the LLM when the final transcript diverges from the partial
    #[serde(default = "default_true")]
    pub corrective_restart: bool,

    /// Word-level Jaccard below which the divergence triggers a restart
    #[serde(default = "default_restart_jaccard")]
    pub restart_jaccard_threshold: f32,
}

fn default_partial_min_gap() -> u64 {
    500
}
fn default_partial_min_audio() -> u64 {
    1200
}
fn default_early_silence() -> u64 {
    400
}
fn default_max_buffer() -> usize {
    1024 * 1024
}
fn default_truncate_to() -> usize {
    500_000
}
fn default_overlap_tail() -> usize {
    8_000
}
fn default_min_stt_input() -> usize {
    1024
}
fn default_restart_jaccard() -> f32 {
    0.7
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            partial_min_gap_ms: default_partial_min_gap(),
            partial_min_audio_ms: default_partial_min_audio(),
            early_trigger_silence_ms: default_early_silence(),
            max_buffer_bytes: default_max_buffer(),
            truncate_to_bytes: default_truncate_to(),
            overlap_tail_bytes: default_overlap_tail(),
            min_stt_input_bytes: default_min_stt_input(),
            corrective_restart: true,
            restart_jaccard_threshold: default_restart_jaccard(),
        }
    }
}

impl PipelineConfig {
    pub fn partial_min_gap(&self) -> Duration {
        Duration::from_millis(self.partial_min_gap_ms)
    }

    pub fn partial_min_audio(&self) -> Duration {
        Duration::from_millis(self.partial_min_audio_ms)
    }

    /// Buffered bytes equivalent to `partial_min_audio_ms` of 16 kHz mono PCM16
    pub fn partial_min_audio_bytes(&self) -> usize {
        self.partial_min_audio_ms as usize * 32
    }

    pub fn early_trigger_silence(&self) -> Duration {
        Duration::from_millis(self.early_trigger_silence_ms)
    }
}

/// Warm-keeper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmerConfig {
    /// Enable the warm-keeper
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between keep-alive calls (accepted range 10-120)
    #[serde(default = "default_warmer_interval")]
    pub interval_secs: u64,
}

fn default_warmer_interval() -> u64 {
    30
}

impl Default for WarmerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_warmer_interval(),
        }
    }
}

impl WarmerConfig {
    /// Interval clamped to the accepted 10-120 s range
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.clamp(10, 120))
    }
}

/// Order service connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrdersConfig {
    /// Order service base URL
    #[serde(default = "default_orders_base_url")]
    pub base_url: String,

    /// Bearer token for internal calls
    #[serde(default)]
    pub api_key: String,

    /// Per-request timeout, seconds
    #[serde(default = "default_orders_timeout")]
    pub request_timeout_secs: u64,
}

fn default_orders_base_url() -> String {
    "http://127.0.0.1:8090".to_string()
}
fn default_orders_timeout() -> u64 {
    10
}

impl Default for OrdersConfig {
    fn default() -> Self {
        Self {
            base_url: default_orders_base_url(),
            api_key: String::new(),
            request_timeout_secs: default_orders_timeout(),
        }
    }
}

impl OrdersConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Default log level when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON-structured logs
    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

/// Load settings from files and environment
///
/// Priority (highest to lowest):
/// 1. Environment variables (GARSON prefix, `__` separator)
/// 2. config/{env}.yaml (if env specified)
/// 3. config/default.yaml
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder = builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("GARSON")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

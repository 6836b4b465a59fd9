//! Configuration for the garson voice ordering gateway

pub mod settings;

pub use settings::{
    load_settings, ObservabilityConfig, OrdersConfig, PipelineConfig, RateLimitConfig,
    ServerConfig, Settings, UpstreamConfig, WarmerConfig,
};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    MissingKey(&'static str),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("config source error: {0}")]
    Source(#[from] config::ConfigError),
}

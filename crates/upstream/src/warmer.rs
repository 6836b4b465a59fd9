//! Warm-keeper for the serverless inference containers
//!
//! Idle containers cold-start at 2-3 s for the first request. A single
//! process-wide task issues one trivial STT call and one trivial TTS call on
//! a fixed interval so real calls land on warm containers. Every failure is
//! swallowed; keep-alive traffic must never disturb live sessions.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use garson_config::WarmerConfig;

use crate::{SttClient, TtsClient};

/// Process-wide keep-alive task, started at engine init
pub struct Warmer {
    config: WarmerConfig,
    stt: Arc<SttClient>,
    tts: Arc<TtsClient>,
}

impl Warmer {
    pub fn new(config: WarmerConfig, stt: Arc<SttClient>, tts: Arc<TtsClient>) -> Self {
        Self { config, stt, tts }
    }

    /// Start the background task.
    ///
    /// Returns a shutdown sender; send `true` to stop the task. Starting a
    /// disabled warmer returns a sender whose task exits immediately, so
    /// engine shutdown is uniform either way.
    pub fn start(self) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        if !self.config.enabled {
            tracing::info!("warm-keeper disabled");
            return shutdown_tx;
        }

        let interval = self.config.interval();
        tokio::spawn(async move {
            tracing::info!(interval_secs = interval.as_secs(), "warm-keeper started");

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick fires immediately; skip it so startup stays quiet
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.warm_once().await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("warm-keeper shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }

    /// One keep-alive round: STT and TTS in parallel, results discarded
    async fn warm_once(&self) {
        let started = Instant::now();

        let (stt_result, tts_result) = tokio::join!(self.stt.warm(), self.tts.warm());

        if let Err(e) = stt_result {
            tracing::debug!(error = %e, "STT keep-alive failed");
        }
        if let Err(e) = tts_result {
            tracing::debug!(error = %e, "TTS keep-alive failed");
        }

        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "keep-alive round complete"
        );
    }
}

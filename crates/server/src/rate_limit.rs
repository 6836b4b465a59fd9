//! Inbound frame admission
//!
//! One limiter per connection decides whether an inbound frame is accepted:
//! oversized binary frames are rejected outright, and token buckets cap the
//! control message rate and the audio byte rate so a misbehaving client
//! degrades only its own session. Rejections carry their reason so the
//! driver can log unreadable input and flooding differently.

use std::time::Instant;

use garson_config::RateLimitConfig;

/// Why an inbound frame was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRejected {
    /// Single binary frame above the accepted maximum
    Oversized { bytes: usize, limit: usize },
    /// Audio byte budget exhausted
    AudioThrottled,
    /// Control message budget exhausted
    MessageThrottled,
}

impl std::fmt::Display for FrameRejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameRejected::Oversized { bytes, limit } => {
                write!(f, "frame of {bytes} bytes exceeds the {limit} byte maximum")
            }
            FrameRejected::AudioThrottled => write!(f, "audio byte rate exceeded"),
            FrameRejected::MessageThrottled => write!(f, "control message rate exceeded"),
        }
    }
}

impl std::error::Error for FrameRejected {}

/// Continuously refilling token bucket
#[derive(Debug)]
struct TokenBucket {
    capacity: f32,
    tokens: f32,
    refill_per_sec: f32,
    last_refill: Instant,
}

impl TokenBucket {
    /// A bucket that refills at `rate` per second and holds `rate * burst`
    fn new(rate: f32, burst: f32) -> Self {
        let capacity = rate * burst;
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: rate,
            last_refill: Instant::now(),
        }
    }

    fn try_take(&mut self, amount: f32) -> bool {
        let now = Instant::now();
        let refill = now.duration_since(self.last_refill).as_secs_f32() * self.refill_per_sec;
        self.tokens = (self.tokens + refill).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= amount {
            self.tokens -= amount;
            true
        } else {
            false
        }
    }
}

/// Per-connection inbound admission
#[derive(Debug)]
pub struct InboundLimiter {
    enabled: bool,
    max_frame_bytes: usize,
    messages: TokenBucket,
    audio: TokenBucket,
}

impl InboundLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_frame_bytes: config.max_frame_bytes,
            messages: TokenBucket::new(config.messages_per_second as f32, config.burst_multiplier),
            audio: TokenBucket::new(
                config.audio_bytes_per_second as f32,
                config.burst_multiplier,
            ),
        }
    }

    /// Admit one binary audio frame. The size cap applies even with rate
    /// limiting disabled; an oversized frame is unreadable input, not load.
    pub fn admit_audio(&mut self, bytes: usize) -> Result<(), FrameRejected> {
        if bytes > self.max_frame_bytes {
            return Err(FrameRejected::Oversized {
                bytes,
                limit: self.max_frame_bytes,
            });
        }
        if self.enabled && !self.audio.try_take(bytes as f32) {
            return Err(FrameRejected::AudioThrottled);
        }
        Ok(())
    }

    /// Admit one control message
    pub fn admit_message(&mut self) -> Result<(), FrameRejected> {
        if self.enabled && !self.messages.try_take(1.0) {
            return Err(FrameRejected::MessageThrottled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(messages: u32, audio: u32, burst: f32) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            messages_per_second: messages,
            audio_bytes_per_second: audio,
            burst_multiplier: burst,
            max_frame_bytes: 4096,
        }
    }

    #[test]
    fn test_messages_allowed_up_to_burst() {
        let mut limiter = InboundLimiter::new(config(10, 1000, 2.0));
        for _ in 0..20 {
            assert!(limiter.admit_message().is_ok());
        }
        assert_eq!(
            limiter.admit_message(),
            Err(FrameRejected::MessageThrottled)
        );
    }

    #[test]
    fn test_audio_bytes_throttled() {
        let mut limiter = InboundLimiter::new(config(100, 1000, 1.0));
        assert!(limiter.admit_audio(500).is_ok());
        assert!(limiter.admit_audio(500).is_ok());
        assert_eq!(limiter.admit_audio(100), Err(FrameRejected::AudioThrottled));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut limiter = InboundLimiter::new(config(100, 1_000_000, 2.0));
        assert_eq!(
            limiter.admit_audio(5000),
            Err(FrameRejected::Oversized {
                bytes: 5000,
                limit: 4096
            })
        );
    }

    #[test]
    fn test_disabled_still_rejects_oversized() {
        let mut limiter = InboundLimiter::new(RateLimitConfig {
            enabled: false,
            messages_per_second: 1,
            audio_bytes_per_second: 1,
            burst_multiplier: 1.0,
            max_frame_bytes: 4096,
        });

        // No throttling when disabled
        for _ in 0..1000 {
            assert!(limiter.admit_message().is_ok());
            assert!(limiter.admit_audio(100).is_ok());
        }
        // Unreadable input is refused regardless
        assert!(matches!(
            limiter.admit_audio(10_000),
            Err(FrameRejected::Oversized { .. })
        ));
    }
}

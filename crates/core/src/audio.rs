//! PCM16 audio helpers
//!
//! Outbound audio frames are raw PCM, 16-bit signed little-endian, 16 kHz,
//! mono. Inbound audio is treated as opaque compressed bytes; the constants
//! here only size the acoustic overlap tail kept between turns.

/// Sample rate of the synthesized audio stream
pub const SAMPLE_RATE_HZ: u32 = 16_000;

/// Bytes of PCM16 mono audio per millisecond at 16 kHz
pub const PCM_BYTES_PER_MS: usize = (SAMPLE_RATE_HZ as usize * 2) / 1000;

/// Acoustic overlap retained across turn boundaries, roughly 500 ms of
/// compressed inbound audio
pub const OVERLAP_TAIL_BYTES: usize = 8_000;

/// Decode PCM16 LE bytes into normalized f32 samples
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|chunk| {
            let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
            sample as f32 / 32768.0
        })
        .collect()
}

/// Encode normalized f32 samples as PCM16 LE bytes
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&sample| {
            let clamped = sample.clamp(-1.0, 1.0);
            let value = (clamped * 32767.0) as i16;
            value.to_le_bytes()
        })
        .collect()
}

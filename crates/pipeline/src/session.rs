//! Voice session state machine
//!
//! One `VoiceSession` per duplex channel. The session owns the rolling audio
//! buffer, the partial transcript, the timing marks and the task registry;
//! all are destroyed when the channel closes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use garson_config::PipelineConfig;
use garson_core::merge_transcripts;
use garson_upstream::SttGate;

use crate::registry::TaskRegistry;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Channel open, no capture in flight
    Idle,
    /// Inbound audio accepted; partial STT may fire
    Listening,
    /// An STT call is in flight; inbound audio still buffers
    ProcessingStt,
    /// LLM token stream active; inbound audio is potential barge-in
    GeneratingLlm,
    /// TTS frames flowing to the client
    StreamingTts,
    /// Transient barge-in state while cancellations settle
    Interrupted,
}

/// Pipeline thresholds resolved from configuration
#[derive(Debug, Clone)]
pub struct SessionTuning {
    /// Minimum buffered audio before a partial STT fires
    pub min_partial_bytes: usize,
    /// Minimum time since the last STT submission (same threshold as above)
    pub min_stt_gap: Duration,
    /// Silence required for the early LLM trigger
    pub early_trigger_silence: Duration,
    /// Minimum words before silence alone can trigger
    pub min_words_for_silence: usize,
    /// Hard buffer cap
    pub max_buffer_bytes: usize,
    /// Suffix kept on overrun
    pub truncate_to_bytes: usize,
    /// Acoustic overlap kept across turns
    pub overlap_tail_bytes: usize,
}

impl From<&PipelineConfig> for SessionTuning {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            min_partial_bytes: config.partial_min_audio_bytes(),
            min_stt_gap: config.partial_min_audio(),
            early_trigger_silence: config.early_trigger_silence(),
            min_words_for_silence: 3,
            max_buffer_bytes: config.max_buffer_bytes,
            truncate_to_bytes: config.truncate_to_bytes,
            overlap_tail_bytes: config.overlap_tail_bytes,
        }
    }
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

#[derive(Debug)]
struct Inner {
    state: SessionState,
    buffer: Vec<u8>,
    partial_transcript: String,
    /// Transcript captured when the current turn committed to the LLM
    committed_transcript: Option<String>,
    session_start: Instant,
    last_chunk_time: Option<Instant>,
    last_stt_time: Option<Instant>,
    /// Next STT submission id
    stt_seq: u64,
    /// Highest submission id merged so far; older results are dropped
    stt_merged: u64,
}

/// Per-session pipeline state.
///
/// State mutations go through one lock: take it, mutate, release. The lock is
/// never held across upstream I/O; the STT gate is a separate lock acquired
/// around the I/O itself.
pub struct VoiceSession {
    id: String,
    qr_token: String,
    tuning: SessionTuning,
    inner: Mutex<Inner>,
    /// Cancellable tasks of the current turn
    pub registry: TaskRegistry,
    /// Serialises this session's STT calls
    pub stt_gate: SttGate,
    /// Fence for outbound messages; bumped on barge-in and corrective restart
    epoch: AtomicU64,
    last_activity: RwLock<Instant>,
}

impl VoiceSession {
    pub fn new(id: impl Into<String>, qr_token: impl Into<String>, tuning: SessionTuning) -> Self {
        Self {
            id: id.into(),
            qr_token: qr_token.into(),
            tuning,
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                buffer: Vec::new(),
                partial_transcript: String::new(),
                committed_transcript: None,
                session_start: Instant::now(),
                last_chunk_time: None,
                last_stt_time: None,
                stt_seq: 0,
                stt_merged: 0,
            }),
            registry: TaskRegistry::new(),
            stt_gate: SttGate::new(),
            epoch: AtomicU64::new(0),
            last_activity: RwLock::new(Instant::now()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn qr_token(&self) -> &str {
        &self.qr_token
    }

    pub fn tuning(&self) -> &SessionTuning {
        &self.tuning
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn set_state(&self, state: SessionState) {
        self.inner.lock().state = state;
    }

    /// Update the activity mark used by idle cleanup
    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.last_activity.read().elapsed() > timeout
    }

    /// Append an inbound audio frame; Idle transitions to Listening.
    /// Returns the state after the append.
    pub fn add_audio_chunk(&self, bytes: &[u8]) -> SessionState {
        let mut inner = self.inner.lock();
        inner.buffer.extend_from_slice(bytes);
        inner.last_chunk_time = Some(Instant::now());

        if inner.buffer.len() > self.tuning.max_buffer_bytes {
            let keep = self.tuning.truncate_to_bytes;
            let start = inner.buffer.len() - keep;
            inner.buffer.drain(..start);
            tracing::warn!(
                session = %self.id,
                kept = keep,
                "audio buffer overran cap, truncated to most recent suffix"
            );
        }

        if inner.state == SessionState::Idle {
            inner.state = SessionState::Listening;
        }
        inner.state
    }

    /// Scheduler predicate: enough audio buffered, and enough time since the
    /// last STT submission. The in-flight tie-break (skip while a call is
    /// running) is the caller's registry check.
    pub fn can_process_partial_stt(&self) -> bool {
        let inner = self.inner.lock();
        if inner.state != SessionState::Listening {
            return false;
        }
        if inner.buffer.len() < self.tuning.min_partial_bytes {
            return false;
        }
        match inner.last_stt_time {
            Some(last) => last.elapsed() >= self.tuning.min_stt_gap,
            None => true,
        }
    }

    /// Stamp a new STT submission and snapshot the whole buffer for it.
    /// The whole buffer is sent each time, not a delta.
    pub fn begin_stt_submission(&self) -> (u64, Vec<u8>) {
        let mut inner = self.inner.lock();
        let seq = inner.stt_seq;
        inner.stt_seq += 1;
        inner.last_stt_time = Some(Instant::now());
        inner.state = SessionState::ProcessingStt;
        (seq, inner.buffer.clone())
    }

    /// Return to Listening after an STT call settles without a merge
    /// (skipped or failed submissions).
    pub fn finish_stt_submission(&self) {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::ProcessingStt {
            inner.state = SessionState::Listening;
        }
    }

    /// Merge an STT result into the partial transcript.
    ///
    /// Returns the merged transcript, or `None` when a newer submission has
    /// already merged — a stale partial must never reach the client after a
    /// fresher one.
    pub fn merge_stt_result(&self, seq: u64, text: &str) -> Option<String> {
        let mut inner = self.inner.lock();
        if seq < inner.stt_merged {
            tracing::debug!(session = %self.id, seq, newest = inner.stt_merged, "dropping stale STT result");
            return None;
        }
        inner.stt_merged = seq;
        inner.partial_transcript = merge_transcripts(&inner.partial_transcript, text);
        if inner.state == SessionState::ProcessingStt {
            inner.state = SessionState::Listening;
        }
        Some(inner.partial_transcript.clone())
    }

    /// Early-trigger predicate: the partial ends in sentence punctuation, or
    /// carries at least three words followed by sustained silence.
    pub fn should_trigger_llm(&self) -> bool {
        let inner = self.inner.lock();
        let partial = inner.partial_transcript.trim();
        if partial.is_empty() {
            return false;
        }

        if partial.ends_with(['.', '!', '?']) {
            return true;
        }

        if partial.split_whitespace().count() >= self.tuning.min_words_for_silence {
            if let Some(last_chunk) = inner.last_chunk_time {
                return last_chunk.elapsed() >= self.tuning.early_trigger_silence;
            }
        }

        false
    }

    pub fn partial_transcript(&self) -> String {
        self.inner.lock().partial_transcript.clone()
    }

    /// Commit the current partial as this turn's transcript
    pub fn commit_turn(&self) -> String {
        let mut inner = self.inner.lock();
        let transcript = inner.partial_transcript.trim().to_string();
        inner.committed_transcript = Some(transcript.clone());
        inner.state = SessionState::GeneratingLlm;
        transcript
    }

    /// Transcript the in-flight turn committed to, if any
    pub fn committed_transcript(&self) -> Option<String> {
        self.inner.lock().committed_transcript.clone()
    }

    /// Snapshot the buffer for a final STT run
    pub fn buffer_snapshot(&self) -> Vec<u8> {
        self.inner.lock().buffer.clone()
    }

    pub fn buffer_len(&self) -> usize {
        self.inner.lock().buffer.len()
    }

    /// Drop processed audio, optionally keeping the acoustic overlap tail
    /// for context continuity into the next turn.
    pub fn clear_processed_audio(&self, keep_overlap: bool) {
        let mut inner = self.inner.lock();
        if keep_overlap && inner.buffer.len() > self.tuning.overlap_tail_bytes {
            let start = inner.buffer.len() - self.tuning.overlap_tail_bytes;
            inner.buffer.drain(..start);
        } else if !keep_overlap {
            inner.buffer.clear();
        }
    }

    /// Finish a turn: transcript cleared, overlap tail retained, back to Idle
    pub fn end_turn(&self) {
        {
            let mut inner = self.inner.lock();
            inner.partial_transcript.clear();
            inner.committed_transcript = None;
            inner.state = SessionState::Idle;
        }
        self.clear_processed_audio(true);
    }

    /// Current outbound fence value
    pub fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Advance the fence so queued outbound messages from the old turn are
    /// dropped by the writer. Used by barge-in and corrective restarts.
    pub fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Cancel every task in the registry
    pub fn cancel_active_streams(&self) {
        self.registry.cancel_all();
    }

    /// Barge-in: fence off the old turn, cancel everything, reset capture
    /// state and return to Listening. Returns the new epoch.
    pub fn interrupt(&self) -> u64 {
        self.set_state(SessionState::Interrupted);
        let epoch = self.bump_epoch();
        self.registry.cancel_all();

        let mut inner = self.inner.lock();
        inner.buffer.clear();
        inner.partial_transcript.clear();
        inner.committed_transcript = None;
        inner.state = SessionState::Listening;
        epoch
    }

    /// Seconds since the channel opened (diagnostics)
    pub fn age(&self) -> Duration {
        self.inner.lock().session_start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TaskKey;

    fn session() -> VoiceSession {
        VoiceSession::new("s1", "qr-1", SessionTuning::default())
    }

    /// Small thresholds so timing tests run on the real clock
    fn fast_session() -> VoiceSession {
        VoiceSession::new(
            "s1",
            "qr-1",
            SessionTuning {
                min_partial_bytes: 1_000,
                min_stt_gap: Duration::from_millis(80),
                early_trigger_silence: Duration::from_millis(200),
                min_words_for_silence: 3,
                max_buffer_bytes: 1024 * 1024,
                truncate_to_bytes: 500_000,
                overlap_tail_bytes: 8_000,
            },
        )
    }

    #[test]
    fn test_first_chunk_starts_listening() {
        let session = session();
        assert_eq!(session.state(), SessionState::Idle);

        let state = session.add_audio_chunk(&[0u8; 100]);
        assert_eq!(state, SessionState::Listening);
        assert_eq!(session.buffer_len(), 100);
    }

    #[test]
    fn test_buffer_overrun_keeps_recent_suffix() {
        let session = session();
        let max = session.tuning().max_buffer_bytes;

        session.add_audio_chunk(&vec![1u8; max]);
        assert_eq!(session.buffer_len(), max);

        // One more byte trips the cap
        session.add_audio_chunk(&[2u8]);
        assert_eq!(session.buffer_len(), session.tuning().truncate_to_bytes);

        // The retained suffix is the most recent audio
        let snapshot = session.buffer_snapshot();
        assert_eq!(*snapshot.last().unwrap(), 2u8);
    }

    #[tokio::test]
    async fn test_partial_stt_needs_enough_audio_and_gap() {
        let session = fast_session();
        let min_bytes = session.tuning().min_partial_bytes;

        session.add_audio_chunk(&vec![0u8; min_bytes - 1]);
        assert!(!session.can_process_partial_stt());

        session.add_audio_chunk(&[0u8]);
        assert!(session.can_process_partial_stt());

        // A submission stamps last_stt_time; the predicate stays false until
        // the minimum gap elapses again
        let (_, audio) = session.begin_stt_submission();
        assert_eq!(audio.len(), min_bytes);
        session.merge_stt_result(0, "iki");
        assert!(!session.can_process_partial_stt());

        tokio::time::sleep(session.tuning().min_stt_gap + Duration::from_millis(20)).await;
        assert!(session.can_process_partial_stt());
    }

    #[test]
    fn test_partial_stt_never_fires_outside_listening() {
        let session = session();
        session.add_audio_chunk(&vec![0u8; session.tuning().min_partial_bytes]);
        session.set_state(SessionState::GeneratingLlm);
        assert!(!session.can_process_partial_stt());
    }

    #[test]
    fn test_early_trigger_on_punctuation() {
        let session = session();
        session.add_audio_chunk(&[0u8; 10]);
        session.begin_stt_submission();
        session.merge_stt_result(0, "hi.");
        assert!(session.should_trigger_llm());
    }

    #[tokio::test]
    async fn test_early_trigger_on_silence_threshold() {
        // Tuned silence threshold: 200 ms
        let session = fast_session();
        session.add_audio_chunk(&[0u8; 10]);
        session.begin_stt_submission();
        session.merge_stt_result(0, "bir iki üç");

        // Well under the threshold: no trigger yet
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!session.should_trigger_llm());

        // Well past it: silence trigger fires
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(session.should_trigger_llm());
    }

    #[tokio::test]
    async fn test_no_silence_trigger_under_three_words() {
        let session = fast_session();
        session.add_audio_chunk(&[0u8; 10]);
        session.begin_stt_submission();
        session.merge_stt_result(0, "bir iki");

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!session.should_trigger_llm());
    }

    #[test]
    fn test_empty_partial_never_triggers() {
        let session = session();
        assert!(!session.should_trigger_llm());
    }

    #[test]
    fn test_stale_stt_result_dropped() {
        let session = session();
        session.add_audio_chunk(&[0u8; 10]);

        let (first, _) = session.begin_stt_submission();
        let (second, _) = session.begin_stt_submission();

        assert!(session.merge_stt_result(second, "iki pizza").is_some());
        assert!(session.merge_stt_result(first, "iki").is_none());
        assert_eq!(session.partial_transcript(), "iki pizza");
    }

    #[test]
    fn test_clear_processed_audio_keeps_overlap_tail() {
        let session = session();
        let tail = session.tuning().overlap_tail_bytes;

        session.add_audio_chunk(&vec![0u8; tail * 3]);
        session.clear_processed_audio(true);
        assert_eq!(session.buffer_len(), tail);

        session.clear_processed_audio(false);
        assert_eq!(session.buffer_len(), 0);
    }

    #[tokio::test]
    async fn test_interrupt_resets_session() {
        let session = session();
        session.add_audio_chunk(&[0u8; 100]);
        session.begin_stt_submission();
        session.merge_stt_result(0, "bir kola");
        session.commit_turn();

        session.registry.register(
            TaskKey::Llm,
            tokio::spawn(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }),
        );

        let before = session.current_epoch();
        let after = session.interrupt();

        assert_eq!(after, before + 1);
        assert!(session.registry.is_empty());
        assert_eq!(session.state(), SessionState::Listening);
        assert_eq!(session.buffer_len(), 0);
        assert!(session.partial_transcript().is_empty());
        assert!(session.committed_transcript().is_none());
    }

    #[test]
    fn test_commit_turn_captures_transcript() {
        let session = session();
        session.add_audio_chunk(&[0u8; 10]);
        session.begin_stt_submission();
        session.merge_stt_result(0, " bir kola ");

        let committed = session.commit_turn();
        assert_eq!(committed, "bir kola");
        assert_eq!(session.state(), SessionState::GeneratingLlm);
        assert_eq!(session.committed_transcript().unwrap(), "bir kola");
    }

    #[test]
    fn test_end_turn_returns_to_idle() {
        let session = session();
        session.add_audio_chunk(&[0u8; 10]);
        session.begin_stt_submission();
        session.merge_stt_result(0, "bir kola.");
        session.commit_turn();

        session.end_turn();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.partial_transcript().is_empty());
    }
}

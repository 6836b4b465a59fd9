//! Outbound event plumbing between pipeline tasks and the channel writer
//!
//! Pipeline tasks never write to the duplex channel themselves. Everything
//! flows through one bounded mpsc into the driver's writer task, which owns
//! the socket. Each event carries the turn epoch it was produced under; the
//! writer drops events whose epoch is no longer current, so nothing from a
//! cancelled turn follows an `interrupt_ack`.

use bytes::Bytes;
use tokio::sync::mpsc;

use garson_core::{OrderIntent, Product};

/// One outbound pipeline event
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Greeting { text: String },
    Status { message: &'static str },
    PartialTranscript { text: String, confidence: f32 },
    Transcript { text: String },
    AiToken { token: String, full_text: String },
    AiComplete { intent: OrderIntent },
    Recommendation { product: Product },
    TtsStart,
    /// Raw PCM16 frame relayed to the client as a binary payload
    TtsAudio(Bytes),
    TtsComplete,
    InterruptAck,
    Pong,
    Error { message: String },
}

impl SessionEvent {
    /// Turn-scoped events are fenced by epoch: once a barge-in or corrective
    /// restart advances the session epoch, queued events of the old turn are
    /// discarded by the writer. Driver-level events (greetings, transcripts,
    /// acks, errors) always go out.
    pub fn is_turn_scoped(&self) -> bool {
        matches!(
            self,
            SessionEvent::AiToken { .. }
                | SessionEvent::AiComplete { .. }
                | SessionEvent::Recommendation { .. }
                | SessionEvent::TtsStart
                | SessionEvent::TtsAudio(_)
                | SessionEvent::TtsComplete
        )
    }
}

/// Event plus the epoch it belongs to
#[derive(Debug, Clone)]
pub struct Envelope {
    pub epoch: u64,
    pub event: SessionEvent,
}

/// Create the outbound channel owned by the driver's writer task
pub fn outbound_channel(capacity: usize) -> (mpsc::Sender<Envelope>, mpsc::Receiver<Envelope>) {
    mpsc::channel(capacity)
}

/// Sender handle pinned to one turn epoch
#[derive(Clone)]
pub struct OutboundSender {
    tx: mpsc::Sender<Envelope>,
    epoch: u64,
}

impl OutboundSender {
    pub fn new(tx: mpsc::Sender<Envelope>, epoch: u64) -> Self {
        Self { tx, epoch }
    }

    /// Same channel, different fence value
    pub fn with_epoch(&self, epoch: u64) -> Self {
        Self {
            tx: self.tx.clone(),
            epoch,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Send an event under this sender's epoch. Returns false when the
    /// writer is gone (channel closing), which callers treat as cancellation.
    pub async fn send(&self, event: SessionEvent) -> bool {
        self.tx
            .send(Envelope {
                epoch: self.epoch,
                event,
            })
            .await
            .is_ok()
    }
}

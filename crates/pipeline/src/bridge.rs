//! Streaming LLM to TTS bridge
//!
//! Drives one conversational turn: pull LLM tokens, forward each to the
//! client, watch the accumulating text for the first usable sentence
//! boundary, and spawn the TTS relay the moment one appears so synthesis
//! overlaps the rest of the generation. When the reply never produced a
//! boundary mid-stream, the whole `spoken_response` is synthesized after the
//! fact instead.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::time::timeout;

use garson_config::UpstreamConfig;
use garson_core::{IntentKind, MenuSnapshot, OrderIntent};
use garson_upstream::{LlmBackend, LlmEvent, TtsBackend, TtsEvent};

use crate::boundary::extract_spoken_response;
use crate::outbound::{OutboundSender, SessionEvent};
use crate::registry::TaskKey;
use crate::session::{SessionState, VoiceSession};
use crate::PipelineError;

/// Sink for completed turn intents; the persistence collaborator owns
/// idempotency, the bridge only awaits its acknowledgement.
#[async_trait]
pub trait OrderSink: Send + Sync {
    async fn place_order(&self, qr_token: &str, intent: &OrderIntent) -> Result<(), PipelineError>;
    async fn request_check(&self, qr_token: &str) -> Result<(), PipelineError>;
}

/// Bridge timeouts
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// No LLM token for this long fails the turn
    pub llm_token_gap: Duration,
    /// No TTS chunk for this long fails the TTS task
    pub tts_chunk_gap: Duration,
}

impl From<&UpstreamConfig> for BridgeConfig {
    fn from(config: &UpstreamConfig) -> Self {
        Self {
            llm_token_gap: config.llm_token_gap(),
            tts_chunk_gap: config.tts_chunk_gap(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            llm_token_gap: Duration::from_secs(30),
            tts_chunk_gap: Duration::from_secs(15),
        }
    }
}

/// Per-session turn inputs resolved at channel open
#[derive(Clone)]
pub struct TurnContext {
    pub qr_token: String,
    pub menu: Arc<MenuSnapshot>,
    /// Rendered menu context, cached for the session lifetime
    pub menu_context: Arc<String>,
}

/// Orchestrates LLM and TTS streaming for one session turn
pub struct StreamingBridge {
    llm: Arc<dyn LlmBackend>,
    tts: Arc<dyn TtsBackend>,
    orders: Arc<dyn OrderSink>,
    config: BridgeConfig,
}

impl StreamingBridge {
    pub fn new(
        llm: Arc<dyn LlmBackend>,
        tts: Arc<dyn TtsBackend>,
        orders: Arc<dyn OrderSink>,
        config: BridgeConfig,
    ) -> Self {
        Self {
            llm,
            tts,
            orders,
            config,
        }
    }

    /// Run one turn to completion.
    ///
    /// The caller runs this inside the task registered under `TaskKey::Llm`;
    /// aborting that task tears down the token stream (receiver drop) and the
    /// TTS relay (registry cancellation by the interrupt path).
    pub async fn run_turn(
        &self,
        session: &Arc<VoiceSession>,
        ctx: &TurnContext,
        transcript: &str,
        out: &OutboundSender,
    ) -> Result<OrderIntent, PipelineError> {
        session.set_state(SessionState::GeneratingLlm);
        tracing::info!(session = %session.id(), transcript = %transcript, "turn started");

        let mut rx = self.llm.generate_stream(transcript, &ctx.menu_context).await?;

        let mut full_text = String::new();
        let mut tts: Option<(oneshot::Receiver<Result<(), PipelineError>>, String)> = None;

        loop {
            let event = timeout(self.config.llm_token_gap, rx.recv())
                .await
                .map_err(|_| PipelineError::LlmIdle(self.config.llm_token_gap))?;

            let Some(event) = event else { break };
            match event {
                LlmEvent::Token { token, full_text: accumulated } => {
                    full_text = accumulated.clone();
                    out.send(SessionEvent::AiToken {
                        token,
                        full_text: accumulated,
                    })
                    .await;

                    if tts.is_none() {
                        if let Some(spoken) = extract_spoken_response(&full_text) {
                            tracing::debug!(session = %session.id(), spoken = %spoken, "first sentence boundary, starting TTS");
                            let done = self.spawn_tts(session, &spoken, out).await;
                            tts = Some((done, spoken));
                        }
                    }
                }
                LlmEvent::Complete { full_text: final_text } => {
                    full_text = final_text;
                    break;
                }
                LlmEvent::Error(message) => return Err(PipelineError::Llm(message)),
            }
        }

        let mut intent = OrderIntent::parse_reply(&full_text);

        match tts.take() {
            Some((done, spoken)) => {
                if intent.spoken_response.trim().is_empty() {
                    intent.spoken_response = spoken;
                }
                Self::await_tts(done).await?;
            }
            None => {
                // No boundary ever surfaced during streaming
                let spoken = intent.spoken_response.trim().to_string();
                if !spoken.is_empty() {
                    let done = self.spawn_tts(session, &spoken, out).await;
                    Self::await_tts(done).await?;
                }
            }
        }

        out.send(SessionEvent::AiComplete {
            intent: intent.clone(),
        })
        .await;

        self.dispatch_intent(ctx, &intent, out).await?;

        tracing::info!(session = %session.id(), intent = ?intent.intent, "turn complete");
        Ok(intent)
    }

    /// Voice a standalone utterance outside a turn (the session greeting).
    /// The relay runs under the `Tts` slot; the session returns to Idle when
    /// it drains.
    pub fn speak_standalone(&self, session: &Arc<VoiceSession>, text: &str, out: &OutboundSender) {
        let tts = self.tts.clone();
        let out = out.clone();
        let chunk_gap = self.config.tts_chunk_gap;
        let text = text.to_string();
        let session = session.clone();

        let registry_session = session.clone();
        let handle = tokio::spawn(async move {
            out.send(SessionEvent::TtsStart).await;
            session.set_state(SessionState::StreamingTts);

            if let Err(e) = Self::relay_tts(tts, &text, chunk_gap, &out).await {
                if !e.is_cancellation() {
                    tracing::warn!(session = %session.id(), error = %e, "standalone TTS failed");
                }
            }

            if session.state() == SessionState::StreamingTts {
                session.set_state(SessionState::Idle);
            }
        });
        registry_session.registry.register(TaskKey::Tts, handle);
    }

    /// Register the TTS relay under the session's `Tts` slot and stream
    /// frames through the outbound channel. `tts_start` precedes every frame
    /// of the task and `tts_complete` follows the last one.
    async fn spawn_tts(
        &self,
        session: &Arc<VoiceSession>,
        text: &str,
        out: &OutboundSender,
    ) -> oneshot::Receiver<Result<(), PipelineError>> {
        out.send(SessionEvent::TtsStart).await;
        session.set_state(SessionState::StreamingTts);

        let tts = self.tts.clone();
        let out = out.clone();
        let chunk_gap = self.config.tts_chunk_gap;
        let text = text.to_string();
        let (done_tx, done_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let result = Self::relay_tts(tts, &text, chunk_gap, &out).await;
            let _ = done_tx.send(result);
        });
        session.registry.register(TaskKey::Tts, handle);

        done_rx
    }

    async fn relay_tts(
        tts: Arc<dyn TtsBackend>,
        text: &str,
        chunk_gap: Duration,
        out: &OutboundSender,
    ) -> Result<(), PipelineError> {
        let mut rx = tts.speak_stream(text).await?;

        loop {
            let event = timeout(chunk_gap, rx.recv())
                .await
                .map_err(|_| PipelineError::TtsIdle(chunk_gap))?;

            match event {
                Some(TtsEvent::Chunk(frame)) => {
                    // Frames go out in arrival order; the client schedules
                    // them gaplessly on its side
                    if !out.send(SessionEvent::TtsAudio(frame)).await {
                        return Err(PipelineError::Cancelled);
                    }
                }
                Some(TtsEvent::Error(message)) => return Err(PipelineError::Tts(message)),
                Some(TtsEvent::Complete) | None => break,
            }
        }

        out.send(SessionEvent::TtsComplete).await;
        Ok(())
    }

    async fn await_tts(
        done: oneshot::Receiver<Result<(), PipelineError>>,
    ) -> Result<(), PipelineError> {
        match done.await {
            Ok(result) => result,
            // Sender dropped without a result: the relay was aborted
            Err(_) => Err(PipelineError::Cancelled),
        }
    }

    /// Hand the structured intent to its collaborator
    async fn dispatch_intent(
        &self,
        ctx: &TurnContext,
        intent: &OrderIntent,
        out: &OutboundSender,
    ) -> Result<(), PipelineError> {
        match intent.intent {
            IntentKind::Add => self.orders.place_order(&ctx.qr_token, intent).await,
            IntentKind::Check => self.orders.request_check(&ctx.qr_token).await,
            IntentKind::Recommend => {
                if let Some(name) = &intent.product_name {
                    match ctx.menu.find_product(name) {
                        Some(product) => {
                            out.send(SessionEvent::Recommendation {
                                product: product.clone(),
                            })
                            .await;
                        }
                        None => {
                            tracing::debug!(product = %name, "recommended product not on the menu");
                        }
                    }
                }
                Ok(())
            }
            IntentKind::Info | IntentKind::Greet | IntentKind::Other => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::outbound_channel;
    use crate::session::SessionTuning;
    use bytes::Bytes;
    use garson_core::{Allergen, Product};
    use garson_upstream::UpstreamError;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    struct FakeLlm {
        tokens: Vec<&'static str>,
    }

    #[async_trait]
    impl LlmBackend for FakeLlm {
        async fn generate_stream(
            &self,
            _user_message: &str,
            _menu_context: &str,
        ) -> Result<mpsc::Receiver<LlmEvent>, UpstreamError> {
            let (tx, rx) = mpsc::channel(64);
            let tokens: Vec<String> = self.tokens.iter().map(|t| t.to_string()).collect();
            tokio::spawn(async move {
                let mut full = String::new();
                for token in tokens {
                    full.push_str(&token);
                    if tx
                        .send(LlmEvent::Token {
                            token,
                            full_text: full.clone(),
                        })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                let _ = tx.send(LlmEvent::Complete { full_text: full }).await;
            });
            Ok(rx)
        }
    }

    struct FakeTts {
        frames: usize,
    }

    #[async_trait]
    impl TtsBackend for FakeTts {
        async fn speak_stream(
            &self,
            _text: &str,
        ) -> Result<mpsc::Receiver<TtsEvent>, UpstreamError> {
            let (tx, rx) = mpsc::channel(64);
            let frames = self.frames;
            tokio::spawn(async move {
                for i in 0..frames {
                    let frame = Bytes::from(vec![i as u8; 320]);
                    if tx.send(TtsEvent::Chunk(frame)).await.is_err() {
                        return;
                    }
                }
                let _ = tx.send(TtsEvent::Complete).await;
            });
            Ok(rx)
        }
    }

    #[derive(Default)]
    struct RecordingOrders {
        placed: Mutex<Vec<(String, OrderIntent)>>,
        checks: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl OrderSink for RecordingOrders {
        async fn place_order(
            &self,
            qr_token: &str,
            intent: &OrderIntent,
        ) -> Result<(), PipelineError> {
            self.placed
                .lock()
                .push((qr_token.to_string(), intent.clone()));
            Ok(())
        }

        async fn request_check(&self, qr_token: &str) -> Result<(), PipelineError> {
            self.checks.lock().push(qr_token.to_string());
            Ok(())
        }
    }

    fn menu() -> MenuSnapshot {
        MenuSnapshot {
            restaurant_name: "Deniz".to_string(),
            table_number: "T1".to_string(),
            products: vec![
                Product {
                    id: 1,
                    name: "Pizza".to_string(),
                    description: None,
                    price: 150.0,
                    category: None,
                    image_url: None,
                    allergens: vec![Allergen {
                        id: 1,
                        name: "Gluten".to_string(),
                        icon: None,
                    }],
                },
                Product {
                    id: 2,
                    name: "Kola".to_string(),
                    description: None,
                    price: 25.0,
                    category: None,
                    image_url: None,
                    allergens: vec![],
                },
            ],
            allergens: vec![],
        }
    }

    fn context() -> TurnContext {
        let menu = Arc::new(menu());
        let menu_context = Arc::new(menu.context_block());
        TurnContext {
            qr_token: "qr-1".to_string(),
            menu,
            menu_context,
        }
    }

    fn bridge(llm: FakeLlm, tts: FakeTts, orders: Arc<RecordingOrders>) -> StreamingBridge {
        StreamingBridge::new(Arc::new(llm), Arc::new(tts), orders, BridgeConfig::default())
    }

    async fn collect_events(
        rx: &mut mpsc::Receiver<crate::Envelope>,
    ) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            events.push(envelope.event);
        }
        events
    }

    #[tokio::test]
    async fn test_happy_path_event_order() {
        let llm = FakeLlm {
            tokens: vec![
                r#"{"spoken_response":"#,
                r#" "İki pizza ekledim.","#,
                r#" "intent": "add", "product_name": "Pizza", "quantity": 2}"#,
            ],
        };
        let orders = Arc::new(RecordingOrders::default());
        let bridge = bridge(llm, FakeTts { frames: 3 }, orders.clone());

        let session = Arc::new(VoiceSession::new("s1", "qr-1", SessionTuning::default()));
        let (tx, mut rx) = outbound_channel(256);
        let out = OutboundSender::new(tx, 0);

        let intent = bridge
            .run_turn(&session, &context(), "iki pizza lütfen", &out)
            .await
            .unwrap();

        assert_eq!(intent.intent, IntentKind::Add);
        assert_eq!(intent.quantity, 2);

        let events = collect_events(&mut rx).await;

        let token_count = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::AiToken { .. }))
            .count();
        assert!(token_count >= 1);

        let position = |pred: &dyn Fn(&SessionEvent) -> bool| {
            events.iter().position(|e| pred(e)).unwrap()
        };
        let tts_start = position(&|e| matches!(e, SessionEvent::TtsStart));
        let first_audio = position(&|e| matches!(e, SessionEvent::TtsAudio(_)));
        let last_audio = events
            .iter()
            .rposition(|e| matches!(e, SessionEvent::TtsAudio(_)))
            .unwrap();
        let tts_complete = position(&|e| matches!(e, SessionEvent::TtsComplete));
        let ai_complete = position(&|e| matches!(e, SessionEvent::AiComplete { .. }));

        assert!(tts_start < first_audio);
        assert!(last_audio < tts_complete);
        assert!(tts_complete < ai_complete);

        // spoken_response in ai_complete equals the text handed to TTS
        let spoken = events.iter().find_map(|e| match e {
            SessionEvent::AiComplete { intent } => Some(intent.spoken_response.clone()),
            _ => None,
        });
        assert_eq!(spoken.unwrap().trim(), "İki pizza ekledim.");

        // The add intent reached the order sink
        let placed = orders.placed.lock();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].0, "qr-1");
        assert_eq!(placed[0].1.product_name.as_deref(), Some("Pizza"));
    }

    #[tokio::test]
    async fn test_fallback_tts_when_no_boundary_streams() {
        // Whole reply arrives as one final chunk with no mid-stream boundary
        let llm = FakeLlm {
            tokens: vec![r#"{"spoken_response":"Buyrun","intent":"greet","quantity":1}"#],
        };
        let orders = Arc::new(RecordingOrders::default());
        let bridge = bridge(llm, FakeTts { frames: 2 }, orders);

        let session = Arc::new(VoiceSession::new("s2", "qr-1", SessionTuning::default()));
        let (tx, mut rx) = outbound_channel(256);
        let out = OutboundSender::new(tx, 0);

        let intent = bridge
            .run_turn(&session, &context(), "merhaba", &out)
            .await
            .unwrap();
        assert_eq!(intent.intent, IntentKind::Greet);

        let events = collect_events(&mut rx).await;
        assert!(events.iter().any(|e| matches!(e, SessionEvent::TtsStart)));
        assert!(events.iter().any(|e| matches!(e, SessionEvent::TtsAudio(_))));
        assert!(events.iter().any(|e| matches!(e, SessionEvent::TtsComplete)));
    }

    #[tokio::test]
    async fn test_check_intent_reaches_collaborator() {
        let llm = FakeLlm {
            tokens: vec![r#"{"spoken_response":"Hesap geliyor.","intent":"check","quantity":1}"#],
        };
        let orders = Arc::new(RecordingOrders::default());
        let bridge = bridge(llm, FakeTts { frames: 1 }, orders.clone());

        let session = Arc::new(VoiceSession::new("s3", "qr-9", SessionTuning::default()));
        let (tx, _rx) = outbound_channel(256);
        let out = OutboundSender::new(tx, 0);

        bridge
            .run_turn(&session, &context_with_token("qr-9"), "hesap lütfen", &out)
            .await
            .unwrap();

        assert_eq!(orders.checks.lock().as_slice(), ["qr-9"]);
    }

    fn context_with_token(token: &str) -> TurnContext {
        let mut ctx = context();
        ctx.qr_token = token.to_string();
        ctx
    }

    #[tokio::test]
    async fn test_recommend_intent_emits_product() {
        let llm = FakeLlm {
            tokens: vec![
                r#"{"spoken_response":"Pizza öneririm.","intent":"recommend","product_name":"Pizza","quantity":1}"#,
            ],
        };
        let orders = Arc::new(RecordingOrders::default());
        let bridge = bridge(llm, FakeTts { frames: 1 }, orders);

        let session = Arc::new(VoiceSession::new("s4", "qr-1", SessionTuning::default()));
        let (tx, mut rx) = outbound_channel(256);
        let out = OutboundSender::new(tx, 0);

        bridge
            .run_turn(&session, &context(), "ne önerirsin", &out)
            .await
            .unwrap();

        let events = collect_events(&mut rx).await;
        let product = events.iter().find_map(|e| match e {
            SessionEvent::Recommendation { product } => Some(product.clone()),
            _ => None,
        });
        assert_eq!(product.unwrap().id, 1);
    }

    #[tokio::test]
    async fn test_turn_ends_with_session_streaming_state() {
        let llm = FakeLlm {
            tokens: vec![r#"{"spoken_response":"Tamam.","intent":"info","quantity":1}"#],
        };
        let orders = Arc::new(RecordingOrders::default());
        let bridge = bridge(llm, FakeTts { frames: 1 }, orders);

        let session = Arc::new(VoiceSession::new("s5", "qr-1", SessionTuning::default()));
        let (tx, _rx) = outbound_channel(256);
        let out = OutboundSender::new(tx, 0);

        bridge
            .run_turn(&session, &context(), "tamam", &out)
            .await
            .unwrap();

        // The driver moves the session back to Idle when it ends the turn
        assert_eq!(session.state(), SessionState::StreamingTts);
    }
}

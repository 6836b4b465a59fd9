//! Duplex voice session driver
//!
//! One WebSocket per table carries inbound compressed audio and control
//! messages, and outbound control messages plus raw PCM16 frames. The driver
//! demultiplexes inbound traffic, schedules partial STT, fires the early LLM
//! trigger, and owns the single writer task through which every outbound
//! message flows.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use garson_core::word_jaccard;
use garson_persistence::OrderError;
use garson_pipeline::{
    outbound_channel, Envelope, OutboundSender, SessionEvent, SessionState, TaskKey, TurnContext,
    VoiceSession,
};
use garson_upstream::SttOutcome;

use crate::messages::{InboundMessage, OutboundMessage};
use crate::rate_limit::{FrameRejected, InboundLimiter};
use crate::state::AppState;

/// Close code for an unregistered QR token
const CLOSE_UNKNOWN_TABLE: u16 = 4004;
/// Close code for an internal failure before the session could start
const CLOSE_INTERNAL: u16 = 1011;

/// How long channel-close cleanup waits for registry tasks to drain
const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Spoken welcome emitted on every channel open, reconnects included
const GREETING_TEXT: &str =
    "Hoş geldiniz! Size nasıl yardımcı olabilirim? Mikrofona basarak sipariş verebilirsiniz.";

/// Duplex voice endpoint
pub struct VoiceSocket;

impl VoiceSocket {
    /// Handle the WebSocket upgrade at `/voice/{qr_token}`
    pub async fn handle(
        ws: WebSocketUpgrade,
        State(state): State<AppState>,
        Path(qr_token): Path<String>,
    ) -> Response {
        ws.on_upgrade(move |socket| Self::drive(socket, state, qr_token))
    }

    async fn drive(mut socket: WebSocket, state: AppState, qr_token: String) {
        // Resolve the table before anything else; unknown tokens close 4004
        let menu = match state.orders.get_menu(&qr_token).await {
            Ok(menu) => Arc::new(menu),
            Err(OrderError::TableUnknown) => {
                tracing::warn!(qr_token = %qr_token, "unknown table token");
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: CLOSE_UNKNOWN_TABLE,
                        reason: Cow::from("table not found"),
                    })))
                    .await;
                return;
            }
            Err(e) => {
                tracing::error!(qr_token = %qr_token, error = %e, "menu load failed");
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: CLOSE_INTERNAL,
                        reason: Cow::from("internal error"),
                    })))
                    .await;
                return;
            }
        };

        let session = match state.sessions.create(&qr_token) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(qr_token = %qr_token, error = %e, "session refused");
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: CLOSE_INTERNAL,
                        reason: Cow::from("session unavailable"),
                    })))
                    .await;
                return;
            }
        };

        let ctx = TurnContext {
            qr_token: qr_token.clone(),
            menu_context: Arc::new(menu.context_block()),
            menu,
        };

        let (sink, mut stream) = socket.split();
        let (out_tx, out_rx) = outbound_channel(256);

        let writer = tokio::spawn(Self::write_outbound(sink, out_rx, session.clone()));

        // Greeting on every open, voiced through the normal TTS path
        let out = OutboundSender::new(out_tx.clone(), session.current_epoch());
        out.send(SessionEvent::Greeting {
            text: GREETING_TEXT.to_string(),
        })
        .await;
        state
            .bridge
            .speak_standalone(&session, GREETING_TEXT, &out);

        let idle_timeout = state.settings.server.idle_timeout();
        let mut limiter = InboundLimiter::new(state.settings.server.rate_limit.clone());

        loop {
            let frame = match tokio::time::timeout(idle_timeout, stream.next()).await {
                Ok(Some(Ok(frame))) => frame,
                Ok(Some(Err(e))) => {
                    tracing::warn!(session = %session.id(), error = %e, "channel error");
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::info!(session = %session.id(), "session idle timeout");
                    break;
                }
            };

            session.touch();

            match frame {
                Message::Binary(data) => {
                    Self::on_audio(&state, &session, &ctx, &out_tx, &mut limiter, data).await;
                }
                Message::Text(text) => {
                    if Self::on_control(&state, &session, &ctx, &out_tx, &mut limiter, &text).await
                    {
                        break;
                    }
                }
                Message::Close(_) => break,
                // Transport-level ping/pong is handled by the stack
                _ => {}
            }
        }

        // Cancel everything and wait briefly for the tasks to drain; beyond
        // the timeout they are abandoned
        let handles = session.registry.take_all();
        let drain = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(CLOSE_DRAIN_TIMEOUT, drain).await.is_err() {
            tracing::warn!(session = %session.id(), "registry tasks did not drain, abandoning");
        }

        writer.abort();
        state.sessions.remove(session.id());
        tracing::info!(session = %session.id(), "channel closed");
    }

    /// Single socket owner. Turn-scoped events whose epoch is stale are
    /// dropped, so no frame or token of a cancelled turn ever follows its
    /// `interrupt_ack`.
    async fn write_outbound(
        mut sink: futures::stream::SplitSink<WebSocket, Message>,
        mut out_rx: mpsc::Receiver<Envelope>,
        session: Arc<VoiceSession>,
    ) {
        while let Some(envelope) = out_rx.recv().await {
            if envelope.event.is_turn_scoped() && envelope.epoch != session.current_epoch() {
                tracing::debug!(session = %session.id(), epoch = envelope.epoch, "dropping stale turn event");
                continue;
            }

            let message = match envelope.event {
                SessionEvent::TtsAudio(frame) => Message::Binary(frame.to_vec()),
                event => match OutboundMessage::from_event(event) {
                    Some(control) => match serde_json::to_string(&control) {
                        Ok(json) => Message::Text(json),
                        Err(e) => {
                            tracing::error!(error = %e, "control message serialization failed");
                            continue;
                        }
                    },
                    None => continue,
                },
            };

            if sink.send(message).await.is_err() {
                break;
            }
        }
    }

    /// Inbound binary frame: buffer it and run the partial-STT scheduler
    async fn on_audio(
        state: &AppState,
        session: &Arc<VoiceSession>,
        ctx: &TurnContext,
        out_tx: &mpsc::Sender<Envelope>,
        limiter: &mut InboundLimiter,
        data: Vec<u8>,
    ) {
        let out = OutboundSender::new(out_tx.clone(), session.current_epoch());

        match limiter.admit_audio(data.len()) {
            Ok(()) => {}
            Err(reason @ FrameRejected::Oversized { .. }) => {
                tracing::warn!(session = %session.id(), %reason, "unreadable frame dropped");
                return;
            }
            Err(reason) => {
                tracing::warn!(session = %session.id(), %reason, "inbound audio throttled");
                return;
            }
        }

        let was_idle = session.state() == SessionState::Idle;
        session.add_audio_chunk(&data);
        if was_idle {
            out.send(SessionEvent::Status {
                message: "receiving",
            })
            .await;
        }

        // Scheduler tick: skip when a previous STT call is still in flight,
        // otherwise the per-session mutex would queue calls and build latency
        if session.can_process_partial_stt() && !session.registry.is_running(TaskKey::Stt) {
            Self::spawn_partial_stt(state, session, ctx, out_tx);
        }
    }

    /// Inbound control message; returns true when the loop should end
    async fn on_control(
        state: &AppState,
        session: &Arc<VoiceSession>,
        ctx: &TurnContext,
        out_tx: &mpsc::Sender<Envelope>,
        limiter: &mut InboundLimiter,
        text: &str,
    ) -> bool {
        let out = OutboundSender::new(out_tx.clone(), session.current_epoch());

        if let Err(reason) = limiter.admit_message() {
            tracing::warn!(session = %session.id(), %reason, "control messages throttled");
            return false;
        }

        let message: InboundMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(session = %session.id(), error = %e, "unparseable control message dropped");
                return false;
            }
        };

        match message {
            InboundMessage::Ping => {
                out.send(SessionEvent::Pong).await;
            }
            InboundMessage::PlaybackComplete => {
                tracing::debug!(session = %session.id(), "client playback complete");
            }
            InboundMessage::Interrupt => {
                tracing::info!(session = %session.id(), "barge-in");
                let epoch = session.interrupt();
                // Acked under the new epoch, even if nothing was running
                out.with_epoch(epoch).send(SessionEvent::InterruptAck).await;
            }
            InboundMessage::AudioEnd => {
                if session.state() == SessionState::Idle
                    && session.buffer_len() == 0
                    && session.partial_transcript().trim().is_empty()
                {
                    tracing::debug!(session = %session.id(), "audio_end while idle, ignored");
                    return false;
                }
                Self::spawn_finalize(state, session, ctx, out_tx);
            }
        }

        false
    }

    /// Partial STT under the `Stt` slot: transcribe the whole buffer, merge
    /// the result, emit the partial, then consult the early trigger.
    fn spawn_partial_stt(
        state: &AppState,
        session: &Arc<VoiceSession>,
        ctx: &TurnContext,
        out_tx: &mpsc::Sender<Envelope>,
    ) {
        let (seq, audio) = session.begin_stt_submission();
        let out = OutboundSender::new(out_tx.clone(), session.current_epoch());
        let state = state.clone();
        let session_task = session.clone();
        let ctx = ctx.clone();
        let out_tx = out_tx.clone();

        let handle = tokio::spawn(async move {
            let session = session_task;
            out.send(SessionEvent::Status {
                message: "transcribing",
            })
            .await;

            match state.stt.transcribe(&session.stt_gate, &audio, false).await {
                Ok(SttOutcome::Skipped) => session.finish_stt_submission(),
                Ok(SttOutcome::Transcript(result)) => {
                    if result.is_empty() {
                        session.finish_stt_submission();
                        return;
                    }
                    let Some(merged) = session.merge_stt_result(seq, &result.text) else {
                        return;
                    };
                    out.send(SessionEvent::PartialTranscript {
                        text: merged,
                        confidence: result.confidence,
                    })
                    .await;

                    if session.should_trigger_llm() && !session.registry.is_running(TaskKey::Llm) {
                        let transcript = session.commit_turn();
                        Self::spawn_turn(&state, &session, &ctx, &out_tx, transcript);
                    }
                }
                Err(e) if e.is_transient() => {
                    // Retries are already exhausted inside the client; keep
                    // listening and let the next scheduler tick try again
                    session.finish_stt_submission();
                    tracing::warn!(session = %session.id(), error = %e, "partial STT failed");
                }
                Err(e) => {
                    session.finish_stt_submission();
                    tracing::error!(session = %session.id(), error = %e, "speech service rejected the request");
                    out.send(SessionEvent::Error {
                        message: "Ses tanıma servisi geçici olarak kullanılamıyor. Lütfen tekrar deneyin."
                            .to_string(),
                    })
                    .await;
                    session.set_state(SessionState::Idle);
                }
            }
        });
        session.registry.register(TaskKey::Stt, handle);
    }

    /// `audio_end`: run the opportunistic final STT, emit the final
    /// transcript, then either start the turn or correctively restart a
    /// diverged in-flight one.
    fn spawn_finalize(
        state: &AppState,
        session: &Arc<VoiceSession>,
        ctx: &TurnContext,
        out_tx: &mpsc::Sender<Envelope>,
    ) {
        let state = state.clone();
        let session_task = session.clone();
        let ctx = ctx.clone();
        let out_tx = out_tx.clone();

        let handle = tokio::spawn(async move {
            let session = session_task;
            let out = OutboundSender::new(out_tx.clone(), session.current_epoch());

            if session.buffer_len() > 0 {
                out.send(SessionEvent::Status {
                    message: "processing",
                })
                .await;

                let (seq, audio) = session.begin_stt_submission();
                match state.stt.transcribe(&session.stt_gate, &audio, true).await {
                    Ok(SttOutcome::Skipped) => session.finish_stt_submission(),
                    Ok(SttOutcome::Transcript(result)) => {
                        if result.is_empty() {
                            session.finish_stt_submission();
                        } else {
                            session.merge_stt_result(seq, &result.text);
                        }
                    }
                    Err(e) => {
                        session.finish_stt_submission();
                        tracing::warn!(session = %session.id(), error = %e, "final STT failed");
                        // With no usable transcript at all the turn is lost;
                        // tell the client and settle back to Idle
                        if session.partial_transcript().trim().is_empty()
                            && session.committed_transcript().is_none()
                        {
                            out.send(SessionEvent::Error {
                                message:
                                    "Ses tanıma servisi geçici olarak kullanılamıyor. Lütfen tekrar deneyin."
                                        .to_string(),
                            })
                            .await;
                            session.set_state(SessionState::Idle);
                            session.clear_processed_audio(true);
                            return;
                        }
                    }
                }
            }

            session.clear_processed_audio(true);

            let transcript = session.partial_transcript().trim().to_string();
            if transcript.is_empty() {
                tracing::debug!(session = %session.id(), "no speech detected");
                session.set_state(SessionState::Idle);
                return;
            }

            out.send(SessionEvent::Transcript {
                text: transcript.clone(),
            })
            .await;

            let turn_running = session.registry.is_running(TaskKey::Llm);
            match session.committed_transcript() {
                Some(committed) if turn_running => {
                    let threshold = state.settings.pipeline.restart_jaccard_threshold;
                    let similarity = word_jaccard(&committed, &transcript);
                    if state.settings.pipeline.corrective_restart && similarity < threshold {
                        tracing::info!(
                            session = %session.id(),
                            committed = %committed,
                            corrected = %transcript,
                            similarity,
                            "final transcript diverged, restarting turn"
                        );
                        // The stale TTS dies with its registry slot; the epoch
                        // bump fences whatever the old turn already queued
                        session.registry.cancel(TaskKey::Tts);
                        session.bump_epoch();
                        let corrected = session.commit_turn();
                        Self::spawn_turn(&state, &session, &ctx, &out_tx, corrected);
                    }
                }
                _ => {
                    let transcript = session.commit_turn();
                    Self::spawn_turn(&state, &session, &ctx, &out_tx, transcript);
                }
            }
        });
        session.registry.register(TaskKey::Stt, handle);
    }

    /// Run one turn under the `Llm` slot; registering replaces (and cancels)
    /// any in-flight turn, which is how corrective restarts work.
    fn spawn_turn(
        state: &AppState,
        session: &Arc<VoiceSession>,
        ctx: &TurnContext,
        out_tx: &mpsc::Sender<Envelope>,
        transcript: String,
    ) {
        let out = OutboundSender::new(out_tx.clone(), session.current_epoch());
        let bridge = state.bridge.clone();
        let session_task = session.clone();
        let ctx = ctx.clone();

        let handle = tokio::spawn(async move {
            let session = session_task;
            out.send(SessionEvent::Status { message: "thinking" }).await;

            match bridge.run_turn(&session, &ctx, &transcript, &out).await {
                Ok(_) => session.end_turn(),
                Err(e) if e.is_cancellation() => {
                    tracing::debug!(session = %session.id(), "turn cancelled");
                }
                Err(e) => {
                    tracing::error!(session = %session.id(), error = %e, "turn failed");
                    out.send(SessionEvent::Error {
                        message: "Bir hata oluştu. Lütfen tekrar deneyin.".to_string(),
                    })
                    .await;
                    session.set_state(SessionState::Idle);
                }
            }
        });
        session.registry.register(TaskKey::Llm, handle);
    }
}

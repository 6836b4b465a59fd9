//! Session management
//!
//! Tracks the live voice sessions and reaps the ones whose channel died
//! without a clean close. A session is only considered dead when its channel
//! has gone quiet AND nothing is still streaming: a guest silently listening
//! to a long TTS reply produces no inbound traffic but must not be reaped
//! mid-sentence.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;

use garson_config::{PipelineConfig, ServerConfig};
use garson_pipeline::{SessionTuning, TaskKey, VoiceSession};

use crate::ServerError;

/// Session manager
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<VoiceSession>>>,
    max_sessions: usize,
    idle_timeout: Duration,
    sweep_interval: Duration,
    tuning: SessionTuning,
}

impl SessionManager {
    pub fn new(server: &ServerConfig, pipeline: &PipelineConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions: server.max_sessions,
            idle_timeout: server.idle_timeout(),
            sweep_interval: Duration::from_secs(60),
            tuning: SessionTuning::from(pipeline),
        }
    }

    /// Background sweeper for sessions whose channel leaked. Returns the
    /// shutdown sender.
    pub fn start_sweeper(self: &Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let manager = Arc::clone(self);
        let interval = manager.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        tracing::info!("session sweeper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let reaped = manager.sweep();
                        if reaped > 0 {
                            tracing::info!(reaped, live = manager.count(), "voice session sweep");
                        }
                    }
                }
            }
        });

        shutdown_tx
    }

    /// Create a session for a resolved table. Dead sessions are swept first
    /// so a channel that leaked never blocks a new guest at capacity.
    pub fn create(&self, qr_token: &str) -> Result<Arc<VoiceSession>, ServerError> {
        let mut sessions = self.sessions.write();
        Self::sweep_locked(&mut sessions, self.idle_timeout);

        if sessions.len() >= self.max_sessions {
            return Err(ServerError::Session(format!(
                "at capacity ({} live sessions)",
                sessions.len()
            )));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let session = Arc::new(VoiceSession::new(&id, qr_token, self.tuning.clone()));
        sessions.insert(id.clone(), session.clone());

        tracing::info!(session = %id, qr_token = %qr_token, "session created");
        Ok(session)
    }

    pub fn get(&self, id: &str) -> Option<Arc<VoiceSession>> {
        self.sessions.read().get(id).cloned()
    }

    /// Remove a session. Anything still in its task registry is cancelled
    /// and counted; a non-zero count here means the driver's close path did
    /// not drain cleanly.
    pub fn remove(&self, id: &str) {
        if let Some(session) = self.sessions.write().remove(id) {
            let abandoned = session.registry.take_all().len();
            if abandoned > 0 {
                tracing::warn!(session = %id, abandoned, "session removed with tasks still registered");
            } else {
                tracing::info!(session = %id, "session removed");
            }
        }
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Reap dead sessions; returns how many were removed
    pub fn sweep(&self) -> usize {
        let mut sessions = self.sessions.write();
        Self::sweep_locked(&mut sessions, self.idle_timeout)
    }

    /// Quiet channel alone is not death: an in-flight turn or TTS stream
    /// keeps the session alive past the idle timeout.
    fn is_reapable(session: &VoiceSession, idle_timeout: Duration) -> bool {
        if !session.is_expired(idle_timeout) {
            return false;
        }
        session.registry.reap();
        !session.registry.is_running(TaskKey::Llm) && !session.registry.is_running(TaskKey::Tts)
    }

    fn sweep_locked(
        sessions: &mut HashMap<String, Arc<VoiceSession>>,
        idle_timeout: Duration,
    ) -> usize {
        let dead: Vec<String> = sessions
            .iter()
            .filter(|(_, session)| Self::is_reapable(session, idle_timeout))
            .map(|(id, _)| id.clone())
            .collect();

        for id in &dead {
            if let Some(session) = sessions.remove(id) {
                let abandoned = session.registry.take_all().len();
                tracing::info!(session = %id, abandoned, "idle session reaped");
            }
        }
        dead.len()
    }
}

//! Per-session cancellable task registry

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// Logical slot for a long-running session task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKey {
    /// Partial or final STT call in flight
    Stt,
    /// LLM turn task (owns the token stream)
    Llm,
    /// TTS relay task spawned by the bridge
    Tts,
    /// Process-wide warm-keeper (engine registry only)
    Warmer,
}

/// Map from logical key to the currently-running task for that slot.
///
/// At most one task per key: registering a key aborts the previous holder
/// before inserting the new one. Barge-in cancels the whole registry.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<TaskKey, JoinHandle<()>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a task under `key`, cancelling the previous holder first
    pub fn register(&self, key: TaskKey, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        if let Some(prev) = tasks.remove(&key) {
            prev.abort();
        }
        tasks.insert(key, handle);
    }

    /// Cancel one slot; true if a task was present
    pub fn cancel(&self, key: TaskKey) -> bool {
        match self.tasks.lock().remove(&key) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every task and clear the registry
    pub fn cancel_all(&self) {
        let mut tasks = self.tasks.lock();
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
    }

    /// Cancel every task and hand the join handles back so the caller can
    /// await their drain under a timeout (channel-close cleanup).
    pub fn take_all(&self) -> Vec<JoinHandle<()>> {
        let mut tasks = self.tasks.lock();
        tasks
            .drain()
            .map(|(_, handle)| {
                handle.abort();
                handle
            })
            .collect()
    }

    /// Is a live task registered under `key`?
    pub fn is_running(&self, key: TaskKey) -> bool {
        self.tasks
            .lock()
            .get(&key)
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Drop handles of tasks that have already finished
    pub fn reap(&self) {
        self.tasks.lock().retain(|_, handle| !handle.is_finished());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sleeper() -> JoinHandle<()> {
        tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        })
    }

    #[tokio::test]
    async fn test_one_task_per_key() {
        let registry = TaskRegistry::new();
        registry.register(TaskKey::Stt, sleeper());
        registry.register(TaskKey::Stt, sleeper());
        registry.register(TaskKey::Llm, sleeper());

        assert_eq!(registry.len(), 2);
        assert!(registry.len() <= 4);
        registry.cancel_all();
    }

    #[tokio::test]
    async fn test_register_aborts_previous() {
        let registry = TaskRegistry::new();
        let first = sleeper();
        let abort_probe = first.abort_handle();

        registry.register(TaskKey::Tts, first);
        registry.register(TaskKey::Tts, sleeper());

        let settled = tokio::time::timeout(Duration::from_secs(1), async {
            while !abort_probe.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await;
        assert!(settled.is_ok(), "replaced task was not aborted");
        registry.cancel_all();
    }

    #[tokio::test]
    async fn test_cancel_all_clears() {
        let registry = TaskRegistry::new();
        registry.register(TaskKey::Stt, sleeper());
        registry.register(TaskKey::Llm, sleeper());
        registry.register(TaskKey::Tts, sleeper());

        registry.cancel_all();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_take_all_drains_within_timeout() {
        let registry = TaskRegistry::new();
        registry.register(TaskKey::Llm, sleeper());
        registry.register(TaskKey::Tts, sleeper());

        let handles = registry.take_all();
        assert_eq!(handles.len(), 2);
        assert!(registry.is_empty());

        for handle in handles {
            let joined = tokio::time::timeout(Duration::from_secs(2), handle).await;
            // Aborted tasks resolve promptly with a cancellation error
            assert!(joined.expect("task did not reach a terminal state").is_err());
        }
    }

    #[tokio::test]
    async fn test_is_running_tracks_completion() {
        let registry = TaskRegistry::new();
        registry.register(TaskKey::Stt, tokio::spawn(async {}));

        let settled = tokio::time::timeout(Duration::from_secs(1), async {
            while registry.is_running(TaskKey::Stt) {
                tokio::task::yield_now().await;
            }
        })
        .await;
        assert!(settled.is_ok());

        registry.reap();
        assert!(registry.is_empty());
    }
}

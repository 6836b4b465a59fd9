//! Shared HTTP plumbing for the upstream clients

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use garson_config::UpstreamConfig;

use crate::UpstreamError;

/// Process-wide HTTP client and concurrency limiter.
///
/// All three remote clients share one keep-alive connection pool and one
/// semaphore capping in-flight upstream calls across every session, so a
/// burst of tables cannot stampede the inference containers.
#[derive(Clone)]
pub struct UpstreamHttp {
    client: reqwest::Client,
    limiter: Arc<Semaphore>,
}

impl UpstreamHttp {
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.pool_max_idle)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(10))
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            limiter: Arc::new(Semaphore::new(config.max_inflight.max(1))),
        })
    }

    /// The shared request client
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Acquire an in-flight slot; held for the duration of one upstream call
    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        self.limiter
            .clone()
            .acquire_owned()
            .await
            .expect("upstream limiter never closed")
    }

    /// Slots currently available (diagnostics)
    pub fn available_slots(&self) -> usize {
        self.limiter.available_permits()
    }
}

/// Map a non-success response into a typed status error
pub(crate) async fn status_error(response: reqwest::Response) -> UpstreamError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    UpstreamError::Status { status, body }
}

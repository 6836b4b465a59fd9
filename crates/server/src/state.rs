//! Application state
//!
//! Shared state across all handlers: configuration, the process-wide remote
//! clients, the streaming bridge and the session manager.

use std::sync::Arc;

use garson_config::Settings;
use garson_persistence::{OrderServiceClient, OrderServiceConfig};
use garson_pipeline::{BridgeConfig, StreamingBridge};
use garson_upstream::{LlmClient, SttClient, TtsClient, UpstreamHttp, Warmer};

use crate::orders::OrderDispatcher;
use crate::session::SessionManager;
use crate::ServerError;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub sessions: Arc<SessionManager>,
    pub orders: Arc<OrderServiceClient>,
    pub stt: Arc<SttClient>,
    pub bridge: Arc<StreamingBridge>,
    tts: Arc<TtsClient>,
}

impl AppState {
    /// Build the full engine wiring from validated settings
    pub fn new(settings: Settings) -> Result<Self, ServerError> {
        let http = UpstreamHttp::new(&settings.upstream)
            .map_err(|e| ServerError::Startup(e.to_string()))?;

        let stt = Arc::new(SttClient::new(
            http.clone(),
            &settings.upstream,
            &settings.pipeline,
        ));
        let llm = Arc::new(LlmClient::new(http.clone(), &settings.upstream));
        let tts = Arc::new(TtsClient::new(http, &settings.upstream));

        let orders = Arc::new(
            OrderServiceClient::new(OrderServiceConfig {
                base_url: settings.orders.base_url.clone(),
                api_key: settings.orders.api_key.clone(),
                request_timeout: settings.orders.request_timeout(),
            })
            .map_err(|e| ServerError::Startup(e.to_string()))?,
        );

        let bridge = Arc::new(StreamingBridge::new(
            llm,
            tts.clone(),
            Arc::new(OrderDispatcher::new(orders.as_ref().clone())),
            BridgeConfig::from(&settings.upstream),
        ));

        let sessions = Arc::new(SessionManager::new(&settings.server, &settings.pipeline));

        Ok(Self {
            settings: Arc::new(settings),
            sessions,
            orders,
            stt,
            bridge,
            tts,
        })
    }

    /// Start the process-wide warm-keeper; send `true` on the returned
    /// channel at shutdown.
    pub fn start_warmer(&self) -> tokio::sync::watch::Sender<bool> {
        Warmer::new(
            self.settings.warmer.clone(),
            self.stt.clone(),
            self.tts.clone(),
        )
        .start()
    }
}

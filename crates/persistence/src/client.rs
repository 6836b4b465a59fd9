//! HTTP client for the order service

use std::time::Duration;

use serde::{Deserialize, Serialize};

use garson_core::MenuSnapshot;

use crate::OrderError;

/// Order service connection settings
#[derive(Debug, Clone)]
pub struct OrderServiceConfig {
    pub base_url: String,
    pub api_key: String,
    pub request_timeout: Duration,
}

impl Default for OrderServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8090".to_string(),
            api_key: String::new(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// One line of an order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_name: String,
    pub quantity: u32,
}

/// Acknowledgement of a placed order
#[derive(Debug, Clone, Deserialize)]
pub struct OrderReceipt {
    pub order_id: i64,
    pub total: f64,
    pub status: String,
}

/// Typed client over the order service REST surface
#[derive(Clone)]
pub struct OrderServiceClient {
    client: reqwest::Client,
    config: OrderServiceConfig,
}

impl OrderServiceClient {
    pub fn new(config: OrderServiceConfig) -> Result<Self, OrderError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| OrderError::Transport(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Resolve a QR token into the table's menu snapshot.
    /// Called once at channel open; 404 means the token is unregistered.
    pub async fn get_menu(&self, qr_token: &str) -> Result<MenuSnapshot, OrderError> {
        let response = self
            .client
            .get(self.url(&format!("/internal/menu/{qr_token}")))
            .bearer_auth(&self.config.api_key)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(OrderError::TableUnknown);
        }
        if !response.status().is_success() {
            return Err(self.status_error(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| OrderError::Malformed(e.to_string()))
    }

    /// Add items to the table's cart
    pub async fn place_order(
        &self,
        qr_token: &str,
        items: &[OrderItem],
    ) -> Result<OrderReceipt, OrderError> {
        let response = self
            .client
            .post(self.url(&format!("/internal/orders/{qr_token}")))
            .bearer_auth(&self.config.api_key)
            .json(&serde_json::json!({ "items": items }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.status_error(response).await);
        }

        let receipt: OrderReceipt = response
            .json()
            .await
            .map_err(|e| OrderError::Malformed(e.to_string()))?;

        tracing::info!(
            qr_token = %qr_token,
            order_id = receipt.order_id,
            total = receipt.total,
            "order placed"
        );
        Ok(receipt)
    }

    /// Raise a check request for the table
    pub async fn request_check(&self, qr_token: &str) -> Result<(), OrderError> {
        let response = self
            .client
            .post(self.url(&format!("/internal/check-requests/{qr_token}")))
            .bearer_auth(&self.config.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.status_error(response).await);
        }

        tracing::info!(qr_token = %qr_token, "check requested");
        Ok(())
    }

    async fn status_error(&self, response: reqwest::Response) -> OrderError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        OrderError::Status { status, body }
    }
}

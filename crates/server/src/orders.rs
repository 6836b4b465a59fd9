//! Order sink adapter over the order service client

use async_trait::async_trait;

use garson_core::OrderIntent;
use garson_persistence::{OrderItem, OrderServiceClient};
use garson_pipeline::{OrderSink, PipelineError};

/// Wires the streaming bridge's order sink to the persistence collaborator
pub struct OrderDispatcher {
    client: OrderServiceClient,
}

impl OrderDispatcher {
    pub fn new(client: OrderServiceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OrderSink for OrderDispatcher {
    async fn place_order(&self, qr_token: &str, intent: &OrderIntent) -> Result<(), PipelineError> {
        let Some(product_name) = intent.product_name.clone() else {
            tracing::warn!(qr_token = %qr_token, "add intent without a product name, nothing to order");
            return Ok(());
        };

        let items = [OrderItem {
            product_name,
            quantity: intent.quantity.max(1),
        }];

        self.client
            .place_order(qr_token, &items)
            .await
            .map(|_| ())
            .map_err(|e| PipelineError::Order(e.to_string()))
    }

    async fn request_check(&self, qr_token: &str) -> Result<(), PipelineError> {
        self.client
            .request_check(qr_token)
            .await
            .map_err(|e| PipelineError::Order(e.to_string()))
    }
}

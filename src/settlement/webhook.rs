//! HTTP webhook notifying the ordering service of settled orders.
//!
//! POSTs a small JSON body authenticated with the `X-Internal-Secret` header.
//! Failures are returned to the caller, which only logs them.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, error};

use super::{OrderingWebhook, Result, SettlementConfig, SettlementError};

/// Header carrying the shared secret.
pub const INTERNAL_SECRET_HEADER: &str = "X-Internal-Secret";

/// Status reported for every settled order.
pub const COMPLETED_STATUS: &str = "COMPLETED";

#[derive(Debug, Serialize)]
struct OrderCompleted<'a> {
    order_id: &'a str,
    status: &'a str,
    total_price: f64,
}

#[derive(Debug, Serialize)]
struct RestockCompleted<'a> {
    order_id: &'a str,
    status: &'a str,
    total_cost: f64,
}

/// `OrderingWebhook` over plain HTTP.
pub struct HttpOrderingWebhook {
    client: Client,
    order_url: String,
    restock_url: String,
    secret: String,
}

impl HttpOrderingWebhook {
    pub fn new(config: &SettlementConfig) -> Result<Self> {
        if config.order_webhook_url.is_empty() || config.restock_webhook_url.is_empty() {
            return Err(SettlementError::Config(
                "webhook URLs not configured".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.webhook_timeout())
            .build()
            .map_err(|e| SettlementError::Config(e.to_string()))?;

        Ok(Self {
            client,
            order_url: config.order_webhook_url.clone(),
            restock_url: config.restock_webhook_url.clone(),
            secret: config.resolved_secret(),
        })
    }

    async fn post<T: Serialize + Sync>(&self, url: &str, body: &T) -> Result<()> {
        let response = self
            .client
            .post(url)
            .header(INTERNAL_SECRET_HEADER, &self.secret)
            .json(body)
            .send()
            .await
            .map_err(|e| SettlementError::Webhook(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(url = %url, "Webhook delivered");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        error!(url = %url, status = %status, body = %body, "Webhook rejected");
        Err(SettlementError::WebhookStatus {
            status: status.as_u16(),
            body: body.chars().take(200).collect(),
        })
    }
}

#[async_trait]
impl OrderingWebhook for HttpOrderingWebhook {
    async fn order_completed(&self, order_id: &str, total_price: f64) -> Result<()> {
        let body = OrderCompleted {
            order_id,
            status: COMPLETED_STATUS,
            total_price,
        };
        self.post(&self.order_url, &body).await
    }

    async fn restock_completed(&self, order_id: &str, total_cost: f64) -> Result<()> {
        let body = RestockCompleted {
            order_id,
            status: COMPLETED_STATUS,
            total_cost,
        };
        self.post(&self.restock_url, &body).await
    }
}

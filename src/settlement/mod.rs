//! Settlement collaborators: pricing and the ordering service webhook.
//!
//! This module contains:
//! - `PricingService` trait: bill calculation and stock metric pushes
//! - `OrderingWebhook` trait: completion notifications to the ordering service
//! - Settlement configuration types
//! - Implementations: gRPC pricing client, HTTP webhook, mocks

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::config::INTERNAL_SECRET_ENV_VAR;
use crate::ledger::StockMetric;

pub mod mock;
pub mod pricing;
pub mod webhook;

pub use mock::{MockPricing, MockWebhook, WebhookCall};
pub use pricing::GrpcPricingService;
pub use webhook::HttpOrderingWebhook;

/// Result type for settlement operations.
pub type Result<T> = std::result::Result<T, SettlementError>;

/// Errors that can occur while talking to settlement collaborators.
///
/// Carries rendered messages only so reports can be cloned to every
/// settlement subscriber.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SettlementError {
    #[error("Pricing call failed: {0}")]
    Pricing(String),

    #[error("Webhook request failed: {0}")]
    Webhook(String),

    #[error("Webhook returned status {status}: {body}")]
    WebhookStatus { status: u16, body: String },

    #[error("Invalid settlement configuration: {0}")]
    Config(String),
}

/// One priced line of a bill.
#[derive(Debug, Clone, PartialEq)]
pub struct BillLine {
    pub sku: String,
    pub name: String,
    pub unit_price: f64,
    pub quantity: u32,
    pub total_price: f64,
}

/// A priced client order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bill {
    pub lines: Vec<BillLine>,
    pub grand_total: f64,
}

/// Interface to the pricing collaborator.
#[async_trait]
pub trait PricingService: Send + Sync {
    /// Price a set of SKU quantities.
    async fn calculate_bill(&self, items: &BTreeMap<String, u32>) -> Result<Bill>;

    /// Push fresh quantity and cost figures so prices can be recomputed.
    async fn update_stock_metrics(&self, metrics: Vec<StockMetric>) -> Result<()>;
}

/// Interface to the ordering service's completion webhooks.
#[async_trait]
pub trait OrderingWebhook: Send + Sync {
    /// A client order was picked and priced.
    async fn order_completed(&self, order_id: &str, total_price: f64) -> Result<()>;

    /// A restock delivery was stowed and costed.
    async fn restock_completed(&self, order_id: &str, total_cost: f64) -> Result<()>;
}

// ============================================================================
// Configuration
// ============================================================================

/// Settlement collaborator configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// Pricing service gRPC address.
    pub pricing_address: String,
    /// Ordering webhook for settled client orders.
    pub order_webhook_url: String,
    /// Ordering webhook for settled restock orders.
    pub restock_webhook_url: String,
    /// Shared secret sent as `X-Internal-Secret`. Falls back to `INTERNAL_SECRET`.
    pub internal_secret: Option<String>,
    /// Per-request webhook timeout.
    pub webhook_timeout_secs: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            pricing_address: "localhost:50052".to_string(),
            order_webhook_url: "http://localhost:5050/internal/webhook/update-order".to_string(),
            restock_webhook_url: "http://localhost:5050/internal/webhook/update-restock"
                .to_string(),
            internal_secret: None,
            webhook_timeout_secs: 5,
        }
    }
}

impl SettlementConfig {
    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    /// Configured secret, else the environment, else empty.
    pub fn resolved_secret(&self) -> String {
        self.internal_secret
            .clone()
            .or_else(|| std::env::var(INTERNAL_SECRET_ENV_VAR).ok())
            .unwrap_or_default()
    }
}

/// Initialize the pricing client and ordering webhook.
pub fn init_settlement(
    config: &SettlementConfig,
) -> std::result::Result<(Arc<dyn PricingService>, Arc<dyn OrderingWebhook>), Box<dyn std::error::Error>>
{
    let pricing: Arc<dyn PricingService> =
        Arc::new(GrpcPricingService::connect_lazy(&config.pricing_address)?);
    let webhook: Arc<dyn OrderingWebhook> = Arc::new(HttpOrderingWebhook::new(config)?);
    info!(
        pricing = %config.pricing_address,
        order_webhook = %config.order_webhook_url,
        restock_webhook = %config.restock_webhook_url,
        "Settlement collaborators configured"
    );
    Ok((pricing, webhook))
}

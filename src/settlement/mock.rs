//! Mock settlement collaborators for testing.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Bill, BillLine, OrderingWebhook, PricingService, Result, SettlementError};
use crate::ledger::StockMetric;

/// Prices items from a fixed table; unknown SKUs cost nothing.
#[derive(Default)]
pub struct MockPricing {
    prices: RwLock<HashMap<String, f64>>,
    fail_on_bill: RwLock<bool>,
    bill_delay: RwLock<Option<Duration>>,
    metrics_delay: RwLock<Option<Duration>>,
    bills: RwLock<Vec<BTreeMap<String, u32>>>,
    metric_pushes: RwLock<Vec<Vec<StockMetric>>>,
}

impl MockPricing {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_price(&self, sku: &str, unit_price: f64) {
        self.prices.write().await.insert(sku.to_string(), unit_price);
    }

    pub async fn set_fail_on_bill(&self, fail: bool) {
        *self.fail_on_bill.write().await = fail;
    }

    /// Sleep this long inside every bill calculation.
    pub async fn set_bill_delay(&self, delay: Option<Duration>) {
        *self.bill_delay.write().await = delay;
    }

    /// Sleep this long before recording a metrics push.
    pub async fn set_metrics_delay(&self, delay: Option<Duration>) {
        *self.metrics_delay.write().await = delay;
    }

    pub async fn bill_count(&self) -> usize {
        self.bills.read().await.len()
    }

    pub async fn metric_pushes(&self) -> Vec<Vec<StockMetric>> {
        self.metric_pushes.read().await.clone()
    }
}

#[async_trait]
impl PricingService for MockPricing {
    async fn calculate_bill(&self, items: &BTreeMap<String, u32>) -> Result<Bill> {
        let delay = *self.bill_delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.bills.write().await.push(items.clone());
        if *self.fail_on_bill.read().await {
            return Err(SettlementError::Pricing("Mock pricing outage".to_string()));
        }

        let prices = self.prices.read().await;
        let lines: Vec<BillLine> = items
            .iter()
            .map(|(sku, qty)| {
                let unit_price = prices.get(sku).copied().unwrap_or(0.0);
                BillLine {
                    sku: sku.clone(),
                    name: sku.clone(),
                    unit_price,
                    quantity: *qty,
                    total_price: unit_price * f64::from(*qty),
                }
            })
            .collect();
        let grand_total = lines.iter().map(|l| l.total_price).sum();
        Ok(Bill { lines, grand_total })
    }

    async fn update_stock_metrics(&self, metrics: Vec<StockMetric>) -> Result<()> {
        let delay = *self.metrics_delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.metric_pushes.write().await.push(metrics);
        Ok(())
    }
}

/// A webhook call as received by `MockWebhook`.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookCall {
    OrderCompleted { order_id: String, total_price: f64 },
    RestockCompleted { order_id: String, total_cost: f64 },
}

/// Records webhook calls; can be told to fail.
#[derive(Default)]
pub struct MockWebhook {
    calls: RwLock<Vec<WebhookCall>>,
    fail_on_call: RwLock<bool>,
}

impl MockWebhook {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_call(&self, fail: bool) {
        *self.fail_on_call.write().await = fail;
    }

    pub async fn calls(&self) -> Vec<WebhookCall> {
        self.calls.read().await.clone()
    }

    async fn record(&self, call: WebhookCall) -> Result<()> {
        self.calls.write().await.push(call);
        if *self.fail_on_call.read().await {
            return Err(SettlementError::WebhookStatus {
                status: 503,
                body: "Mock webhook failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl OrderingWebhook for MockWebhook {
    async fn order_completed(&self, order_id: &str, total_price: f64) -> Result<()> {
        self.record(WebhookCall::OrderCompleted {
            order_id: order_id.to_string(),
            total_price,
        })
        .await
    }

    async fn restock_completed(&self, order_id: &str, total_cost: f64) -> Result<()> {
        self.record(WebhookCall::RestockCompleted {
            order_id: order_id.to_string(),
            total_cost,
        })
        .await
    }
}

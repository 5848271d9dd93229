//! Settlement of a fully reported order.
//!
//! Runs on a detached task under a deadline. Exactly one task per order gets
//! here: the caller must have won `try_claim_finalize`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{error, info, warn};

use super::error::Result;
use super::state::{OrderPhase, SettlementOutcome, SettlementReport};
use crate::coordination::{CoordinationError, CoordinationStore};
use crate::ledger::{StockLedger, StockMetric};
use crate::order::{OrderClass, OrderKey, OrderManifest};
use crate::settlement::{OrderingWebhook, PricingService};

/// Everything a settlement run needs, cheap to clone into a task.
#[derive(Clone)]
pub(crate) struct Settler {
    pub ledger: Arc<dyn StockLedger>,
    pub coordination: Arc<dyn CoordinationStore>,
    pub pricing: Arc<dyn PricingService>,
    pub webhook: Arc<dyn OrderingWebhook>,
    pub reports: broadcast::Sender<SettlementReport>,
}

impl Settler {
    /// Settle `key` within `deadline` and publish the outcome.
    ///
    /// A timeout abandons the run where it stands; nothing is unwound.
    pub async fn run(self, key: OrderKey, deadline: Duration) {
        info!(
            order_id = %key.order_id,
            class = %key.class,
            phase = %OrderPhase::Settling,
            "Settling order"
        );

        let outcome = match tokio::time::timeout(deadline, self.settle(&key, deadline)).await {
            Ok(Ok(amount)) => {
                info!(
                    order_id = %key.order_id,
                    class = %key.class,
                    phase = %OrderPhase::Done,
                    amount,
                    "Order settled"
                );
                SettlementOutcome::Settled { amount }
            }
            Ok(Err(e)) => {
                error!(
                    order_id = %key.order_id,
                    class = %key.class,
                    error = %e,
                    "Settlement aborted, order left unsettled"
                );
                SettlementOutcome::Failed {
                    reason: e.to_string(),
                }
            }
            Err(_) => {
                error!(
                    order_id = %key.order_id,
                    class = %key.class,
                    deadline_secs = deadline.as_secs_f64(),
                    "Settlement timed out, order left unsettled"
                );
                SettlementOutcome::TimedOut
            }
        };

        #[cfg(feature = "otel")]
        crate::utils::metrics::SETTLEMENT_TOTAL.add(
            1,
            &[
                crate::utils::metrics::class_attr(key.class),
                crate::utils::metrics::outcome_attr(outcome.label()),
            ],
        );

        // No subscribers is fine.
        let _ = self.reports.send(SettlementReport { key, outcome });
    }

    async fn settle(&self, key: &OrderKey, deadline: Duration) -> Result<f64> {
        match key.class {
            OrderClass::Client => self.settle_client(key).await,
            OrderClass::Restock => self.settle_restock(key, deadline).await,
        }
    }

    async fn settle_client(&self, key: &OrderKey) -> Result<f64> {
        let OrderManifest::Client(items) = self.coordination.load_items(key).await? else {
            return Err(CoordinationError::ClassMismatch {
                key: key.clone(),
                actual: OrderClass::Restock,
            }
            .into());
        };

        let price = match self.pricing.calculate_bill(&items).await {
            Ok(bill) => bill.grand_total,
            Err(e) => {
                warn!(
                    order_id = %key.order_id,
                    error = %e,
                    "Pricing failed, settling at price 0"
                );
                0.0
            }
        };

        if let Err(e) = self.webhook.order_completed(&key.order_id, price).await {
            error!(order_id = %key.order_id, error = %e, "Order webhook failed");
        }

        self.coordination.delete_all(key).await?;
        Ok(price)
    }

    /// Stow every line it can, then notify and clean up regardless.
    ///
    /// A failed upsert is logged and skipped; only stowed SKUs are re-read
    /// and pushed to pricing. The push runs detached under `deadline`.
    async fn settle_restock(&self, key: &OrderKey, deadline: Duration) -> Result<f64> {
        let OrderManifest::Restock(lines) = self.coordination.load_items(key).await? else {
            return Err(CoordinationError::ClassMismatch {
                key: key.clone(),
                actual: OrderClass::Client,
            }
            .into());
        };

        let total_cost: f64 = lines.iter().map(|l| l.line_cost()).sum();

        let mut stowed: Vec<String> = Vec::with_capacity(lines.len());
        for line in &lines {
            match self.ledger.upsert(line).await {
                Ok(()) => stowed.push(line.sku.clone()),
                Err(e) => {
                    error!(
                        order_id = %key.order_id,
                        sku = %line.sku,
                        quantity = line.quantity,
                        error = %e,
                        "Restock line not stowed"
                    );
                }
            }
        }

        if !stowed.is_empty() {
            self.push_stock_metrics(key, &stowed, deadline).await;
        }

        if let Err(e) = self.webhook.restock_completed(&key.order_id, total_cost).await {
            error!(order_id = %key.order_id, error = %e, "Restock webhook failed");
        }

        self.coordination.delete_all(key).await?;
        Ok(total_cost)
    }

    async fn push_stock_metrics(&self, key: &OrderKey, skus: &[String], deadline: Duration) {
        let records = match self.ledger.batch_lookup(skus).await {
            Ok(records) => records,
            Err(e) => {
                warn!(order_id = %key.order_id, error = %e, "Could not re-read restocked SKUs");
                return;
            }
        };

        let metrics: Vec<StockMetric> = records
            .into_values()
            .map(|r| StockMetric {
                sku: r.sku,
                quantity: r.quantity,
                unit_cost: r.unit_cost,
            })
            .collect();
        let pricing = Arc::clone(&self.pricing);
        let order_id = key.order_id.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(deadline, pricing.update_stock_metrics(metrics)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(order_id = %order_id, error = %e, "Stock metrics push failed");
                }
                Err(_) => {
                    warn!(
                        order_id = %order_id,
                        deadline_secs = deadline.as_secs_f64(),
                        "Stock metrics push timed out"
                    );
                }
            }
        });
    }
}

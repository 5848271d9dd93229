//! Fulfillment orchestration.
//!
//! Ties the stock ledger, the coordination store, the dispatch channel and
//! the settlement collaborators together:
//!
//! 1. `reserve` takes stock, all-or-nothing from the caller's point of view
//! 2. `dispatch_*_order` records the manifest and broadcasts work to the fleet
//! 3. `report_completion` counts worker reports; the report that reaches the
//!    fleet size and wins the finalize claim spawns settlement
//! 4. settlement prices or costs the order, notifies ordering, and deletes
//!    the coordination state

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::FulfillmentConfig;
use crate::coordination::CoordinationStore;
use crate::dispatch::DispatchChannel;
use crate::ledger::{StockLedger, StockMetric, StockRecord};
use crate::order::{
    CompletionReport, DispatchMessage, OrderClass, OrderKey, OrderManifest, StockDelivery,
    WorkItem, WorkerStatus,
};
use crate::settlement::{OrderingWebhook, PricingService};

mod error;
mod guard;
mod settle;
mod state;

pub use error::{FulfillmentError, Result, Shortfall};
pub use state::{
    CompletionProgress, DispatchOutcome, OrderPhase, SettlementOutcome, SettlementReport,
};

use guard::CompensationGuard;
use settle::Settler;

/// Aisle used when neither the delivery nor the ledger knows one.
pub const UNKNOWN_AISLE: &str = "Unknown";

const SETTLEMENT_REPORT_CAPACITY: usize = 256;

/// Coordinates reservation, dispatch, completion counting and settlement.
pub struct FulfillmentOrchestrator {
    ledger: Arc<dyn StockLedger>,
    coordination: Arc<dyn CoordinationStore>,
    dispatch: Arc<dyn DispatchChannel>,
    settler: Settler,
    config: FulfillmentConfig,
}

impl FulfillmentOrchestrator {
    pub fn new(
        ledger: Arc<dyn StockLedger>,
        coordination: Arc<dyn CoordinationStore>,
        dispatch: Arc<dyn DispatchChannel>,
        pricing: Arc<dyn PricingService>,
        webhook: Arc<dyn OrderingWebhook>,
        config: FulfillmentConfig,
    ) -> Self {
        let (reports, _) = broadcast::channel(SETTLEMENT_REPORT_CAPACITY);
        let settler = Settler {
            ledger: Arc::clone(&ledger),
            coordination: Arc::clone(&coordination),
            pricing,
            webhook,
            reports,
        };
        Self {
            ledger,
            coordination,
            dispatch,
            settler,
            config,
        }
    }

    pub fn fleet_size(&self) -> u64 {
        self.config.fleet_size
    }

    /// Receive one report per settlement run started after this call.
    pub fn subscribe_settlements(&self) -> broadcast::Receiver<SettlementReport> {
        self.settler.reports.subscribe()
    }

    /// Current name, aisle and quantity for `skus`. Unknown SKUs are absent.
    pub async fn check_availability(&self, skus: &[String]) -> Result<HashMap<String, StockRecord>> {
        if skus.is_empty() {
            return Ok(HashMap::new());
        }
        Ok(self.ledger.batch_lookup(skus).await?)
    }

    /// Reserve every requested quantity or nothing.
    ///
    /// Partial fills are returned to the ledger and reported as
    /// `FulfillmentError::InsufficientStock`. On success the requested items
    /// are recorded as the order's client manifest.
    pub async fn reserve(
        &self,
        order_id: &str,
        items: &BTreeMap<String, u32>,
    ) -> Result<BTreeMap<String, u32>> {
        validate_order_id(order_id)?;
        validate_quantities(items)?;

        let taken = self.ledger.reserve(items).await.inspect_err(|_| {
            record_reservation("error");
        })?;
        let guard = CompensationGuard::release(order_id, Arc::clone(&self.ledger), taken.clone());

        let shortfalls = shortfalls(items, &taken);
        if !shortfalls.is_empty() {
            guard.compensate().await;
            info!(
                order_id = %order_id,
                short_skus = shortfalls.len(),
                "Reservation rejected, insufficient stock"
            );
            record_reservation("insufficient");
            return Err(FulfillmentError::InsufficientStock { shortfalls });
        }

        let key = OrderKey::client(order_id);
        if let Err(e) = self
            .coordination
            .save_items(&key, &OrderManifest::Client(items.clone()))
            .await
        {
            guard.compensate().await;
            record_reservation("error");
            return Err(e.into());
        }
        guard.disarm();

        info!(
            order_id = %order_id,
            class = %OrderClass::Client,
            phase = %OrderPhase::Reserved,
            skus = taken.len(),
            "Stock reserved"
        );
        record_reservation("reserved");
        Ok(taken)
    }

    /// Return stock to the ledger.
    pub async fn release(&self, order_id: &str, items: &BTreeMap<String, u32>) -> Result<()> {
        self.ledger.release(items).await?;
        info!(order_id = %order_id, skus = items.len(), "Stock released");
        Ok(())
    }

    /// Record the client manifest and broadcast the picking work.
    ///
    /// A publish failure is answered with `DispatchOutcome::Failed`; the
    /// reservation is not rolled back. If the call is cancelled before it
    /// answers, the items are released and coordination state removed.
    pub async fn dispatch_client_order(
        &self,
        order_id: &str,
        items: &BTreeMap<String, u32>,
    ) -> Result<DispatchOutcome> {
        validate_order_id(order_id)?;
        validate_quantities(items)?;

        let key = OrderKey::client(order_id);
        let guard = CompensationGuard::release(order_id, Arc::clone(&self.ledger), items.clone())
            .with_cleanup(Arc::clone(&self.coordination), key.clone());
        let result = self.dispatch_client_inner(&key, items).await;
        guard.disarm();
        result
    }

    async fn dispatch_client_inner(
        &self,
        key: &OrderKey,
        items: &BTreeMap<String, u32>,
    ) -> Result<DispatchOutcome> {
        self.coordination
            .save_items(key, &OrderManifest::Client(items.clone()))
            .await?;

        let skus: Vec<String> = items.keys().cloned().collect();
        let records = self.ledger.batch_lookup(&skus).await?;
        let work = items
            .iter()
            .map(|(sku, qty)| WorkItem {
                sku: sku.clone(),
                quantity: *qty,
                aisle: records
                    .get(sku)
                    .map(|r| r.aisle.clone())
                    .unwrap_or_else(|| UNKNOWN_AISLE.to_string()),
            })
            .collect();

        Ok(self.publish(key, work).await)
    }

    /// Record the delivery lines and broadcast the stowing work.
    ///
    /// Aisles come from the delivery itself, then the ledger, then
    /// `UNKNOWN_AISLE`. Stock is only added at settlement.
    pub async fn dispatch_restock_order(
        &self,
        order_id: &str,
        lines: Vec<StockDelivery>,
    ) -> Result<DispatchOutcome> {
        validate_order_id(order_id)?;
        validate_deliveries(&lines)?;

        let key = OrderKey::restock(order_id);
        let guard = CompensationGuard::release(order_id, Arc::clone(&self.ledger), BTreeMap::new())
            .with_cleanup(Arc::clone(&self.coordination), key.clone());
        let result = self.dispatch_restock_inner(&key, lines).await;
        guard.disarm();
        result
    }

    async fn dispatch_restock_inner(
        &self,
        key: &OrderKey,
        lines: Vec<StockDelivery>,
    ) -> Result<DispatchOutcome> {
        self.coordination
            .save_items(key, &OrderManifest::Restock(lines.clone()))
            .await?;

        let missing: Vec<String> = lines
            .iter()
            .filter(|l| l.aisle.trim().is_empty())
            .map(|l| l.sku.clone())
            .collect();
        let known = if missing.is_empty() {
            HashMap::new()
        } else {
            self.ledger.batch_lookup(&missing).await?
        };

        let work = lines
            .into_iter()
            .map(|line| {
                let aisle = if !line.aisle.trim().is_empty() {
                    line.aisle
                } else {
                    known
                        .get(&line.sku)
                        .map(|r| r.aisle.clone())
                        .unwrap_or_else(|| UNKNOWN_AISLE.to_string())
                };
                WorkItem {
                    sku: line.sku,
                    quantity: line.quantity,
                    aisle,
                }
            })
            .collect();

        Ok(self.publish(key, work).await)
    }

    async fn publish(&self, key: &OrderKey, items: Vec<WorkItem>) -> DispatchOutcome {
        let count = items.len();
        let message = DispatchMessage {
            order_id: key.order_id.clone(),
            class: key.class,
            items,
        };

        match self.dispatch.publish(&message).await {
            Ok(()) => {
                info!(
                    order_id = %key.order_id,
                    class = %key.class,
                    phase = %OrderPhase::Dispatched,
                    items = count,
                    "Work order dispatched"
                );
                record_dispatch(key.class, "dispatched");
                DispatchOutcome::Dispatched { items: count }
            }
            Err(e) => {
                error!(
                    order_id = %key.order_id,
                    class = %key.class,
                    phase = %OrderPhase::DispatchFailed,
                    error = %e,
                    "Work order publish failed"
                );
                record_dispatch(key.class, "failed");
                DispatchOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Count a worker report; settle once the whole fleet has reported.
    pub async fn report_completion(&self, report: CompletionReport) -> Result<CompletionProgress> {
        validate_order_id(&report.key.order_id)?;
        let key = report.key;

        if report.status != WorkerStatus::Success.as_str()
            && report.status != WorkerStatus::NoOp.as_str()
        {
            warn!(
                order_id = %key.order_id,
                worker_id = %report.worker_id,
                status = %report.status,
                "Unrecognised worker status, counting it anyway"
            );
        }
        debug!(
            order_id = %key.order_id,
            worker_id = %report.worker_id,
            processed = ?report.processed,
            "Worker processed items"
        );

        let count = self.coordination.increment_completion_count(&key).await?;
        info!(
            order_id = %key.order_id,
            class = %key.class,
            worker_id = %report.worker_id,
            status = %report.status,
            count,
            fleet_size = self.config.fleet_size,
            "Worker reported"
        );

        if count < self.config.fleet_size {
            return Ok(CompletionProgress {
                count,
                settling: false,
            });
        }

        let settling = self.coordination.try_claim_finalize(&key).await?;
        if settling {
            self.spawn_settlement(key);
        } else {
            debug!(order_id = %key.order_id, count, "Settlement already claimed");
        }
        Ok(CompletionProgress { count, settling })
    }

    fn spawn_settlement(&self, key: OrderKey) {
        let settler = self.settler.clone();
        let deadline = self.config.settle_timeout();
        tokio::spawn(settler.run(key, deadline));
    }

    /// Quantity and unit cost of every SKU.
    pub async fn inventory_metrics(&self) -> Result<Vec<StockMetric>> {
        Ok(self.ledger.all_metrics().await?)
    }
}

fn validate_order_id(order_id: &str) -> Result<()> {
    if order_id.trim().is_empty() {
        return Err(FulfillmentError::invalid("order_id is required"));
    }
    Ok(())
}

fn validate_quantities(items: &BTreeMap<String, u32>) -> Result<()> {
    if items.is_empty() {
        return Err(FulfillmentError::invalid("at least one item is required"));
    }
    for (sku, qty) in items {
        if sku.trim().is_empty() {
            return Err(FulfillmentError::invalid("sku must not be empty"));
        }
        if *qty == 0 {
            return Err(FulfillmentError::invalid(format!(
                "quantity for '{}' must be positive",
                sku
            )));
        }
    }
    Ok(())
}

fn validate_deliveries(lines: &[StockDelivery]) -> Result<()> {
    if lines.is_empty() {
        return Err(FulfillmentError::invalid("at least one delivery line is required"));
    }
    for line in lines {
        if line.sku.trim().is_empty() {
            return Err(FulfillmentError::invalid("sku must not be empty"));
        }
        if line.quantity == 0 {
            return Err(FulfillmentError::invalid(format!(
                "quantity for '{}' must be positive",
                line.sku
            )));
        }
        if !line.unit_cost.is_finite() || line.unit_cost < 0.0 {
            return Err(FulfillmentError::invalid(format!(
                "unit cost for '{}' must be a non-negative number",
                line.sku
            )));
        }
    }
    Ok(())
}

fn shortfalls(
    requested: &BTreeMap<String, u32>,
    taken: &BTreeMap<String, u32>,
) -> BTreeMap<String, Shortfall> {
    requested
        .iter()
        .filter_map(|(sku, want)| {
            let got = taken.get(sku).copied().unwrap_or(0);
            (got < *want).then(|| {
                (
                    sku.clone(),
                    Shortfall {
                        requested: *want,
                        available: got,
                    },
                )
            })
        })
        .collect()
}

#[cfg(feature = "otel")]
fn record_reservation(outcome: &str) {
    crate::utils::metrics::RESERVATION_TOTAL
        .add(1, &[crate::utils::metrics::outcome_attr(outcome)]);
}

#[cfg(not(feature = "otel"))]
fn record_reservation(_outcome: &str) {}

#[cfg(feature = "otel")]
fn record_dispatch(class: OrderClass, outcome: &str) {
    crate::utils::metrics::DISPATCH_TOTAL.add(
        1,
        &[
            crate::utils::metrics::class_attr(class),
            crate::utils::metrics::outcome_attr(outcome),
        ],
    );
}

#[cfg(not(feature = "otel"))]
fn record_dispatch(_class: OrderClass, _outcome: &str) {}

#[cfg(test)]
mod tests;

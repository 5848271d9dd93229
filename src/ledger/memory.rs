//! In-memory StockLedger implementation.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio::sync::Mutex;

use super::{LedgerError, Result, StockLedger, StockMetric, StockRecord};
use crate::order::StockDelivery;

/// Ledger held in a single mutex-guarded map.
///
/// Backs the standalone profile's tests and scenario suites. Can be switched
/// into a failing mode to exercise error paths.
#[derive(Default)]
pub struct InMemoryLedger {
    records: Mutex<BTreeMap<String, StockRecord>>,
    unavailable: AtomicBool,
    rejected_upserts: Mutex<HashSet<String>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with `LedgerError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make upserts of `sku` fail with `LedgerError::Unavailable`.
    pub async fn reject_upserts_of(&self, sku: &str) {
        self.rejected_upserts.lock().await.insert(sku.to_string());
    }

    /// Current on-hand quantity, if the SKU exists.
    pub async fn quantity(&self, sku: &str) -> Option<u32> {
        self.records.lock().await.get(sku).map(|r| r.quantity)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("in-memory ledger offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StockLedger for InMemoryLedger {
    async fn batch_lookup(&self, skus: &[String]) -> Result<HashMap<String, StockRecord>> {
        self.check_available()?;
        let records = self.records.lock().await;
        Ok(skus
            .iter()
            .filter_map(|sku| records.get(sku).map(|r| (sku.clone(), r.clone())))
            .collect())
    }

    async fn reserve(&self, requests: &BTreeMap<String, u32>) -> Result<BTreeMap<String, u32>> {
        self.check_available()?;
        let mut records = self.records.lock().await;
        let now = Utc::now();
        let mut taken = BTreeMap::new();

        for (sku, requested) in requests {
            let Some(record) = records.get_mut(sku) else {
                continue;
            };
            let take = record.quantity.min(*requested);
            if take == 0 {
                continue;
            }
            record.quantity -= take;
            record.last_updated = now;
            taken.insert(sku.clone(), take);
        }

        Ok(taken)
    }

    async fn release(&self, returns: &BTreeMap<String, u32>) -> Result<()> {
        self.check_available()?;
        let mut records = self.records.lock().await;
        let now = Utc::now();

        for (sku, quantity) in returns {
            if let Some(record) = records.get_mut(sku) {
                record.quantity = record.quantity.saturating_add(*quantity);
                record.last_updated = now;
            }
        }

        Ok(())
    }

    async fn upsert(&self, delivery: &StockDelivery) -> Result<()> {
        self.check_available()?;
        if self.rejected_upserts.lock().await.contains(&delivery.sku) {
            return Err(LedgerError::Unavailable(format!(
                "upsert of {} rejected",
                delivery.sku
            )));
        }
        let mut records = self.records.lock().await;
        let now = Utc::now();

        records
            .entry(delivery.sku.clone())
            .and_modify(|record| {
                record.quantity = record.quantity.saturating_add(delivery.quantity);
                record.unit_cost = delivery.unit_cost;
                record.name = delivery.name.clone();
                record.last_updated = now;
            })
            .or_insert_with(|| StockRecord {
                sku: delivery.sku.clone(),
                name: delivery.name.clone(),
                aisle: delivery.aisle.clone(),
                quantity: delivery.quantity,
                unit_cost: delivery.unit_cost,
                mfd_date: delivery.mfd_date,
                expiry_date: delivery.expiry_date,
                last_updated: now,
            });

        Ok(())
    }

    async fn sweep_expired(&self, as_of: NaiveDate) -> Result<u64> {
        self.check_available()?;
        let mut records = self.records.lock().await;
        let now = Utc::now();
        let mut swept = 0;

        for record in records.values_mut() {
            if record.expiry_date < as_of && record.quantity > 0 {
                record.quantity = 0;
                record.last_updated = now;
                swept += 1;
            }
        }

        Ok(swept)
    }

    async fn all_metrics(&self) -> Result<Vec<StockMetric>> {
        self.check_available()?;
        let records = self.records.lock().await;
        Ok(records
            .values()
            .map(|r| StockMetric {
                sku: r.sku.clone(),
                quantity: r.quantity,
                unit_cost: r.unit_cost,
            })
            .collect())
    }
}

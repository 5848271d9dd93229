//! Shared StockLedger contract tests.
//!
//! Each backend's test binary builds a ledger and runs
//! `run_ledger_tests!` against it. Tests use disjoint SKU prefixes so they
//! can share one database.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::Barrier;

use autogrocer::ledger::StockLedger;
use autogrocer::order::StockDelivery;

fn far_future() -> NaiveDate {
    NaiveDate::from_ymd_opt(2099, 12, 31).unwrap()
}

/// Build a delivery line that will not expire during the test run.
pub fn delivery(sku: &str, quantity: u32, unit_cost: f64) -> StockDelivery {
    StockDelivery {
        sku: sku.to_string(),
        name: format!("{} (name)", sku),
        aisle: "produce".to_string(),
        quantity,
        unit_cost,
        mfd_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        expiry_date: far_future(),
    }
}

fn items(pairs: &[(&str, u32)]) -> BTreeMap<String, u32> {
    pairs.iter().map(|(s, q)| (s.to_string(), *q)).collect()
}

async fn on_hand<L: StockLedger>(ledger: &L, sku: &str) -> Option<u32> {
    ledger
        .batch_lookup(&[sku.to_string()])
        .await
        .expect("lookup should succeed")
        .get(sku)
        .map(|r| r.quantity)
}

// =============================================================================
// batch_lookup / upsert
// =============================================================================

pub async fn test_lookup_omits_unknown_skus<L: StockLedger>(ledger: &L) {
    ledger.upsert(&delivery("LK-A", 4, 1.0)).await.unwrap();

    let found = ledger
        .batch_lookup(&["LK-A".to_string(), "LK-MISSING".to_string()])
        .await
        .unwrap();

    assert_eq!(found.len(), 1);
    let record = &found["LK-A"];
    assert_eq!(record.quantity, 4);
    assert_eq!(record.aisle, "produce");
    assert_eq!(record.name, "LK-A (name)");

    assert!(ledger.batch_lookup(&[]).await.unwrap().is_empty());
}

pub async fn test_upsert_accumulates_and_overwrites<L: StockLedger>(ledger: &L) {
    ledger.upsert(&delivery("UP-A", 10, 2.0)).await.unwrap();

    let mut second = delivery("UP-A", 5, 2.5);
    second.name = "Renamed".to_string();
    ledger.upsert(&second).await.unwrap();

    let found = ledger.batch_lookup(&["UP-A".to_string()]).await.unwrap();
    let record = &found["UP-A"];
    assert_eq!(record.quantity, 15, "quantities accumulate");
    assert_eq!(record.unit_cost, 2.5, "cost is overwritten");
    assert_eq!(record.name, "Renamed", "name is overwritten");
}

pub async fn test_upsert_is_not_idempotent<L: StockLedger>(ledger: &L) {
    let line = delivery("UP-B", 3, 1.0);
    ledger.upsert(&line).await.unwrap();
    ledger.upsert(&line).await.unwrap();

    assert_eq!(on_hand(ledger, "UP-B").await, Some(6));
}

// =============================================================================
// reserve
// =============================================================================

pub async fn test_reserve_full_fill<L: StockLedger>(ledger: &L) {
    ledger.upsert(&delivery("RF-A", 10, 1.0)).await.unwrap();
    ledger.upsert(&delivery("RF-B", 3, 1.0)).await.unwrap();

    let taken = ledger
        .reserve(&items(&[("RF-A", 4), ("RF-B", 3)]))
        .await
        .unwrap();

    assert_eq!(taken, items(&[("RF-A", 4), ("RF-B", 3)]));
    assert_eq!(on_hand(ledger, "RF-A").await, Some(6));
    assert_eq!(on_hand(ledger, "RF-B").await, Some(0));
}

pub async fn test_reserve_partial_fill_takes_what_exists<L: StockLedger>(ledger: &L) {
    ledger.upsert(&delivery("RP-A", 2, 1.0)).await.unwrap();

    let taken = ledger.reserve(&items(&[("RP-A", 5)])).await.unwrap();

    assert_eq!(taken, items(&[("RP-A", 2)]));
    assert_eq!(on_hand(ledger, "RP-A").await, Some(0));
}

pub async fn test_reserve_omits_empty_and_unknown<L: StockLedger>(ledger: &L) {
    ledger.upsert(&delivery("RE-A", 1, 1.0)).await.unwrap();
    ledger.reserve(&items(&[("RE-A", 1)])).await.unwrap();

    let taken = ledger
        .reserve(&items(&[("RE-A", 2), ("RE-UNKNOWN", 2)]))
        .await
        .unwrap();

    assert!(taken.is_empty(), "nothing taken means nothing reported");
    assert_eq!(on_hand(ledger, "RE-A").await, Some(0));
}

pub async fn test_reserve_conserves_quantity<L: StockLedger>(ledger: &L) {
    ledger.upsert(&delivery("RC-A", 7, 1.0)).await.unwrap();
    ledger.upsert(&delivery("RC-B", 1, 1.0)).await.unwrap();
    let requested = items(&[("RC-A", 3), ("RC-B", 4)]);

    let taken = ledger.reserve(&requested).await.unwrap();

    for (sku, before) in [("RC-A", 7u32), ("RC-B", 1u32)] {
        let got = taken.get(sku).copied().unwrap_or(0);
        assert!(got <= requested[sku]);
        assert_eq!(on_hand(ledger, sku).await, Some(before - got));
    }
}

// =============================================================================
// release
// =============================================================================

pub async fn test_release_restores_quantity<L: StockLedger>(ledger: &L) {
    ledger.upsert(&delivery("RL-A", 5, 1.0)).await.unwrap();
    let taken = ledger.reserve(&items(&[("RL-A", 5)])).await.unwrap();

    ledger.release(&taken).await.unwrap();

    assert_eq!(on_hand(ledger, "RL-A").await, Some(5));
}

pub async fn test_release_ignores_unknown_skus<L: StockLedger>(ledger: &L) {
    ledger
        .release(&items(&[("RL-UNKNOWN", 3)]))
        .await
        .expect("release of unknown sku should succeed");

    assert_eq!(on_hand(ledger, "RL-UNKNOWN").await, None);
}

// =============================================================================
// concurrency
// =============================================================================

pub async fn test_concurrent_reservations_never_oversell<L: StockLedger + 'static>(
    ledger: &Arc<L>,
) {
    ledger.upsert(&delivery("CC-A", 10, 1.0)).await.unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let mut handles = Vec::new();
    for qty in [8u32, 5u32] {
        let ledger = Arc::clone(ledger);
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            let taken = ledger.reserve(&items(&[("CC-A", qty)])).await.unwrap();
            (qty, taken.get("CC-A").copied().unwrap_or(0))
        }));
    }

    let mut total = 0;
    for handle in handles {
        let (requested, got) = handle.await.unwrap();
        assert!(got <= requested);
        total += got;
    }

    assert_eq!(total, 10, "combined takes equal the stock");
    assert_eq!(on_hand(ledger.as_ref(), "CC-A").await, Some(0));
}

// =============================================================================
// sweep_expired / all_metrics
// =============================================================================

pub async fn test_sweep_expired_zeroes_only_expired_stock<L: StockLedger>(ledger: &L) {
    let as_of = NaiveDate::from_ymd_opt(2030, 6, 1).unwrap();

    let mut expired = delivery("SW-EXPIRED", 4, 1.0);
    expired.expiry_date = NaiveDate::from_ymd_opt(2030, 5, 31).unwrap();
    let mut empty = delivery("SW-EMPTY", 2, 1.0);
    empty.expiry_date = NaiveDate::from_ymd_opt(2030, 5, 1).unwrap();
    let mut boundary = delivery("SW-BOUNDARY", 3, 1.0);
    boundary.expiry_date = as_of;

    ledger.upsert(&expired).await.unwrap();
    ledger.upsert(&empty).await.unwrap();
    ledger.upsert(&boundary).await.unwrap();
    ledger.reserve(&items(&[("SW-EMPTY", 2)])).await.unwrap();

    let swept = ledger.sweep_expired(as_of).await.unwrap();

    assert_eq!(swept, 1, "only stocked records past expiry are counted");
    assert_eq!(on_hand(ledger, "SW-EXPIRED").await, Some(0));
    assert_eq!(on_hand(ledger, "SW-BOUNDARY").await, Some(3));

    assert_eq!(ledger.sweep_expired(as_of).await.unwrap(), 0);
}

pub async fn test_all_metrics_reports_every_record<L: StockLedger>(ledger: &L) {
    ledger.upsert(&delivery("MT-A", 9, 3.25)).await.unwrap();

    let metrics = ledger.all_metrics().await.unwrap();
    let metric = metrics
        .iter()
        .find(|m| m.sku == "MT-A")
        .expect("metric for MT-A");

    assert_eq!(metric.quantity, 9);
    assert_eq!(metric.unit_cost, 3.25);
}

// =============================================================================
// Test runner macro
// =============================================================================

/// Run all StockLedger contract tests against an `Arc`-wrapped ledger.
#[macro_export]
macro_rules! run_ledger_tests {
    ($ledger:expr) => {
        use $crate::ledger::*;

        let ledger = $ledger;

        test_lookup_omits_unknown_skus(ledger.as_ref()).await;
        println!("  test_lookup_omits_unknown_skus: PASSED");

        test_upsert_accumulates_and_overwrites(ledger.as_ref()).await;
        println!("  test_upsert_accumulates_and_overwrites: PASSED");

        test_upsert_is_not_idempotent(ledger.as_ref()).await;
        println!("  test_upsert_is_not_idempotent: PASSED");

        test_reserve_full_fill(ledger.as_ref()).await;
        println!("  test_reserve_full_fill: PASSED");

        test_reserve_partial_fill_takes_what_exists(ledger.as_ref()).await;
        println!("  test_reserve_partial_fill_takes_what_exists: PASSED");

        test_reserve_omits_empty_and_unknown(ledger.as_ref()).await;
        println!("  test_reserve_omits_empty_and_unknown: PASSED");

        test_reserve_conserves_quantity(ledger.as_ref()).await;
        println!("  test_reserve_conserves_quantity: PASSED");

        test_release_restores_quantity(ledger.as_ref()).await;
        println!("  test_release_restores_quantity: PASSED");

        test_release_ignores_unknown_skus(ledger.as_ref()).await;
        println!("  test_release_ignores_unknown_skus: PASSED");

        test_concurrent_reservations_never_oversell(&ledger).await;
        println!("  test_concurrent_reservations_never_oversell: PASSED");

        test_sweep_expired_zeroes_only_expired_stock(ledger.as_ref()).await;
        println!("  test_sweep_expired_zeroes_only_expired_stock: PASSED");

        test_all_metrics_reports_every_record(ledger.as_ref()).await;
        println!("  test_all_metrics_reports_every_record: PASSED");
    };
}

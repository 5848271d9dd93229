//! End-to-end fulfillment with the standalone stack.
//!
//! SQLite ledger, in-memory coordination, in-process dispatch and a
//! simulated robot per aisle. Pricing and the ordering webhook are mocks.
//!
//! Run with: cargo test --test standalone_fleet --features sqlite -- --nocapture

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::sync::broadcast;

use autogrocer::config::FulfillmentConfig;
use autogrocer::coordination::InMemoryCoordinationStore;
use autogrocer::dispatch::ChannelDispatch;
use autogrocer::fleet::{spawn_fleet, FleetConfig};
use autogrocer::fulfillment::{FulfillmentOrchestrator, SettlementOutcome, SettlementReport};
use autogrocer::ledger::{SqliteLedger, StockLedger};
use autogrocer::order::{OrderKey, StockDelivery};
use autogrocer::settlement::{MockPricing, MockWebhook, WebhookCall};

struct Store {
    ledger: Arc<SqliteLedger>,
    coordination: Arc<InMemoryCoordinationStore>,
    pricing: Arc<MockPricing>,
    webhook: Arc<MockWebhook>,
    orchestrator: Arc<FulfillmentOrchestrator>,
}

fn line(sku: &str, aisle: &str, qty: u32, cost: f64) -> StockDelivery {
    StockDelivery {
        sku: sku.to_string(),
        name: sku.to_lowercase(),
        aisle: aisle.to_string(),
        quantity: qty,
        unit_cost: cost,
        mfd_date: NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
        expiry_date: NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
    }
}

async fn start_store() -> Store {
    let ledger = Arc::new(
        SqliteLedger::connect(":memory:")
            .await
            .expect("Failed to open in-memory SQLite"),
    );
    ledger.init().await.expect("Failed to create schema");
    for delivery in [
        line("BREAD-SOUR", "bread", 20, 1.2),
        line("MILK-2L", "dairy", 10, 0.9),
        line("APPLE-GALA", "produce", 50, 0.3),
    ] {
        ledger.upsert(&delivery).await.unwrap();
    }

    let coordination = Arc::new(InMemoryCoordinationStore::default());
    let dispatch = Arc::new(ChannelDispatch::new());
    let pricing = Arc::new(MockPricing::new());
    pricing.set_price("BREAD-SOUR", 4.0).await;
    pricing.set_price("MILK-2L", 2.5).await;
    let webhook = Arc::new(MockWebhook::new());

    let orchestrator = Arc::new(FulfillmentOrchestrator::new(
        ledger.clone(),
        coordination.clone(),
        dispatch.clone(),
        pricing.clone(),
        webhook.clone(),
        FulfillmentConfig::default(),
    ));

    let fleet = FleetConfig {
        work_millis_per_item: 5,
        ..Default::default()
    };
    let workers = spawn_fleet(&fleet, dispatch, orchestrator.clone())
        .await
        .expect("Failed to start fleet");
    assert_eq!(workers.len() as u64, orchestrator.fleet_size());

    Store {
        ledger,
        coordination,
        pricing,
        webhook,
        orchestrator,
    }
}

async fn settled(rx: &mut broadcast::Receiver<SettlementReport>) -> SettlementReport {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("order was not settled in time")
        .expect("settlement channel closed")
}

async fn on_hand(ledger: &SqliteLedger, sku: &str) -> u32 {
    ledger.batch_lookup(&[sku.to_string()]).await.unwrap()[sku].quantity
}

#[tokio::test]
async fn test_client_order_is_picked_priced_and_reported() {
    let store = start_store().await;
    let mut reports = store.orchestrator.subscribe_settlements();
    let order = BTreeMap::from([("BREAD-SOUR".to_string(), 2), ("MILK-2L".to_string(), 4)]);

    store.orchestrator.reserve("web-1001", &order).await.unwrap();
    let outcome = store
        .orchestrator
        .dispatch_client_order("web-1001", &order)
        .await
        .unwrap();
    assert!(outcome.is_success());

    let report = settled(&mut reports).await;
    assert_eq!(report.key, OrderKey::client("web-1001"));
    assert_eq!(report.outcome, SettlementOutcome::Settled { amount: 18.0 });
    assert_eq!(
        store.webhook.calls().await,
        vec![WebhookCall::OrderCompleted {
            order_id: "web-1001".to_string(),
            total_price: 18.0
        }]
    );
    assert_eq!(on_hand(&store.ledger, "BREAD-SOUR").await, 18);
    assert_eq!(on_hand(&store.ledger, "MILK-2L").await, 6);
    assert_eq!(store.coordination.live_keys().await, 0);
    assert_eq!(store.pricing.bill_count().await, 1);
}

#[tokio::test]
async fn test_restock_order_lands_in_ledger_after_fleet_finishes() {
    let store = start_store().await;
    let mut reports = store.orchestrator.subscribe_settlements();

    let outcome = store
        .orchestrator
        .dispatch_restock_order(
            "truck-77",
            vec![
                line("MILK-2L", "dairy", 30, 0.8),
                line("STEAK-RIB", "meat", 5, 7.0),
            ],
        )
        .await
        .unwrap();
    assert!(outcome.is_success());

    let report = settled(&mut reports).await;
    assert_eq!(report.key, OrderKey::restock("truck-77"));
    assert_eq!(report.outcome, SettlementOutcome::Settled { amount: 59.0 });
    assert_eq!(on_hand(&store.ledger, "MILK-2L").await, 40);
    assert_eq!(on_hand(&store.ledger, "STEAK-RIB").await, 5);
    assert_eq!(
        store.webhook.calls().await,
        vec![WebhookCall::RestockCompleted {
            order_id: "truck-77".to_string(),
            total_cost: 59.0
        }]
    );
}

#[tokio::test]
async fn test_concurrent_orders_each_settle_once() {
    let store = start_store().await;
    let mut reports = store.orchestrator.subscribe_settlements();

    let mut tasks = Vec::new();
    for n in 0..4 {
        let orchestrator = store.orchestrator.clone();
        tasks.push(tokio::spawn(async move {
            let order_id = format!("web-{}", 2000 + n);
            let order = BTreeMap::from([("APPLE-GALA".to_string(), 3)]);
            orchestrator.reserve(&order_id, &order).await.unwrap();
            orchestrator
                .dispatch_client_order(&order_id, &order)
                .await
                .unwrap()
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap().is_success());
    }

    let mut seen = Vec::new();
    for _ in 0..4 {
        seen.push(settled(&mut reports).await.key.order_id);
    }
    seen.sort();
    assert_eq!(seen, vec!["web-2000", "web-2001", "web-2002", "web-2003"]);
    assert_eq!(store.webhook.calls().await.len(), 4);
    assert_eq!(on_hand(&store.ledger, "APPLE-GALA").await, 38);
    assert!(
        tokio::time::timeout(Duration::from_millis(200), reports.recv())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_oversized_order_is_rejected_without_dispatch() {
    let store = start_store().await;
    let order = BTreeMap::from([("MILK-2L".to_string(), 11)]);

    let err = store
        .orchestrator
        .reserve("web-3000", &order)
        .await
        .unwrap_err();
    assert!(err.is_business_rejection());
    assert_eq!(on_hand(&store.ledger, "MILK-2L").await, 10);
    assert_eq!(store.coordination.live_keys().await, 0);
}

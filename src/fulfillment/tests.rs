use std::time::Duration;

use chrono::NaiveDate;

use super::*;
use crate::coordination::InMemoryCoordinationStore;
use crate::dispatch::MockDispatch;
use crate::ledger::InMemoryLedger;
use crate::settlement::{MockPricing, MockWebhook, WebhookCall};

struct Harness {
    ledger: Arc<InMemoryLedger>,
    coordination: Arc<InMemoryCoordinationStore>,
    dispatch: Arc<MockDispatch>,
    pricing: Arc<MockPricing>,
    webhook: Arc<MockWebhook>,
    orchestrator: Arc<FulfillmentOrchestrator>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(FulfillmentConfig::default())
    }

    fn with_config(config: FulfillmentConfig) -> Self {
        let ledger = Arc::new(InMemoryLedger::new());
        let coordination = Arc::new(InMemoryCoordinationStore::default());
        let dispatch = Arc::new(MockDispatch::new());
        let pricing = Arc::new(MockPricing::new());
        let webhook = Arc::new(MockWebhook::new());
        let orchestrator = Arc::new(FulfillmentOrchestrator::new(
            ledger.clone(),
            coordination.clone(),
            dispatch.clone(),
            pricing.clone(),
            webhook.clone(),
            config,
        ));
        Self {
            ledger,
            coordination,
            dispatch,
            pricing,
            webhook,
            orchestrator,
        }
    }

    async fn stock(&self, sku: &str, aisle: &str, qty: u32) {
        self.ledger.upsert(&delivery(sku, aisle, qty, 1.0)).await.unwrap();
    }

    async fn report(&self, key: &OrderKey, worker: &str) -> CompletionProgress {
        self.orchestrator
            .report_completion(CompletionReport {
                key: key.clone(),
                worker_id: worker.to_string(),
                status: WorkerStatus::Success.as_str().to_string(),
                processed: BTreeMap::new(),
            })
            .await
            .unwrap()
    }

    async fn report_fleet(&self, key: &OrderKey) {
        for n in 0..self.orchestrator.fleet_size() {
            self.report(key, &format!("robot-{}", n)).await;
        }
    }
}

fn delivery(sku: &str, aisle: &str, qty: u32, cost: f64) -> StockDelivery {
    StockDelivery {
        sku: sku.to_string(),
        name: format!("{} name", sku),
        aisle: aisle.to_string(),
        quantity: qty,
        unit_cost: cost,
        mfd_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
        expiry_date: NaiveDate::from_ymd_opt(2026, 4, 1).unwrap(),
    }
}

fn items(pairs: &[(&str, u32)]) -> BTreeMap<String, u32> {
    pairs.iter().map(|(s, q)| (s.to_string(), *q)).collect()
}

async fn next_report(rx: &mut broadcast::Receiver<SettlementReport>) -> SettlementReport {
    tokio::time::timeout(Duration::from_secs(30), rx.recv())
        .await
        .expect("settlement report")
        .unwrap()
}

// ============================================================================
// Reservation
// ============================================================================

#[tokio::test]
async fn test_reserve_takes_stock_and_records_manifest() {
    let h = Harness::new();
    h.stock("BREAD-1", "bread", 10).await;

    let taken = h
        .orchestrator
        .reserve("o-1", &items(&[("BREAD-1", 4)]))
        .await
        .unwrap();

    assert_eq!(taken, items(&[("BREAD-1", 4)]));
    assert_eq!(h.ledger.quantity("BREAD-1").await, Some(6));
    assert!(h.coordination.has_state(&OrderKey::client("o-1")).await);
}

#[tokio::test]
async fn test_insufficient_stock_releases_everything_taken() {
    let h = Harness::new();
    h.stock("BREAD-1", "bread", 10).await;
    h.stock("MILK-1", "dairy", 2).await;

    let err = h
        .orchestrator
        .reserve("o-2", &items(&[("BREAD-1", 4), ("MILK-1", 5), ("GHOST", 1)]))
        .await
        .unwrap_err();

    match err {
        FulfillmentError::InsufficientStock { shortfalls } => {
            assert_eq!(
                shortfalls.get("MILK-1"),
                Some(&Shortfall {
                    requested: 5,
                    available: 2
                })
            );
            assert_eq!(
                shortfalls.get("GHOST"),
                Some(&Shortfall {
                    requested: 1,
                    available: 0
                })
            );
            assert!(!shortfalls.contains_key("BREAD-1"));
        }
        other => panic!("expected insufficient stock, got {other:?}"),
    }
    assert_eq!(h.ledger.quantity("BREAD-1").await, Some(10));
    assert_eq!(h.ledger.quantity("MILK-1").await, Some(2));
    assert!(!h.coordination.has_state(&OrderKey::client("o-2")).await);
}

#[tokio::test]
async fn test_reserve_validation_mutates_nothing() {
    let h = Harness::new();
    h.stock("BREAD-1", "bread", 10).await;

    for (order_id, request) in [
        ("", items(&[("BREAD-1", 1)])),
        ("o-3", BTreeMap::new()),
        ("o-3", items(&[("BREAD-1", 0)])),
        ("o-3", items(&[("", 1)])),
    ] {
        let err = h.orchestrator.reserve(order_id, &request).await.unwrap_err();
        assert!(matches!(err, FulfillmentError::InvalidArgument(_)));
    }
    assert_eq!(h.ledger.quantity("BREAD-1").await, Some(10));
    assert_eq!(h.coordination.live_keys().await, 0);
}

#[tokio::test]
async fn test_reserve_surfaces_ledger_outage() {
    let h = Harness::new();
    h.ledger.set_unavailable(true);

    let err = h
        .orchestrator
        .reserve("o-4", &items(&[("BREAD-1", 1)]))
        .await
        .unwrap_err();
    assert!(matches!(err, FulfillmentError::Ledger(_)));
}

#[tokio::test]
async fn test_reserve_undone_when_manifest_cannot_be_saved() {
    let h = Harness::new();
    h.stock("BREAD-1", "bread", 10).await;
    h.coordination.set_unavailable(true);

    let err = h
        .orchestrator
        .reserve("o-5", &items(&[("BREAD-1", 3)]))
        .await
        .unwrap_err();
    assert!(matches!(err, FulfillmentError::Coordination(_)));
    assert_eq!(h.ledger.quantity("BREAD-1").await, Some(10));
}

#[tokio::test]
async fn test_release_returns_stock() {
    let h = Harness::new();
    h.stock("BREAD-1", "bread", 10).await;
    h.orchestrator
        .reserve("o-6", &items(&[("BREAD-1", 7)]))
        .await
        .unwrap();

    h.orchestrator
        .release("o-6", &items(&[("BREAD-1", 7)]))
        .await
        .unwrap();
    assert_eq!(h.ledger.quantity("BREAD-1").await, Some(10));
}

#[tokio::test]
async fn test_check_availability_reports_known_skus_only() {
    let h = Harness::new();
    h.stock("BREAD-1", "bread", 10).await;

    let found = h
        .orchestrator
        .check_availability(&["BREAD-1".to_string(), "GHOST".to_string()])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found["BREAD-1"].aisle, "bread");
    assert_eq!(found["BREAD-1"].quantity, 10);

    assert!(h.orchestrator.check_availability(&[]).await.unwrap().is_empty());
}

// ============================================================================
// Dispatch
// ============================================================================

#[tokio::test]
async fn test_client_dispatch_enriches_aisles() {
    let h = Harness::new();
    h.stock("BREAD-1", "bread", 10).await;

    let outcome = h
        .orchestrator
        .dispatch_client_order("o-10", &items(&[("BREAD-1", 2), ("GHOST", 1)]))
        .await
        .unwrap();
    assert!(outcome.is_success());

    let published = h.dispatch.take_published().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].class, OrderClass::Client);
    assert_eq!(
        published[0].items,
        vec![
            WorkItem {
                sku: "BREAD-1".to_string(),
                quantity: 2,
                aisle: "bread".to_string()
            },
            WorkItem {
                sku: "GHOST".to_string(),
                quantity: 1,
                aisle: UNKNOWN_AISLE.to_string()
            },
        ]
    );
}

#[tokio::test]
async fn test_publish_failure_keeps_reservation() {
    let h = Harness::new();
    h.stock("BREAD-1", "bread", 10).await;
    let order = items(&[("BREAD-1", 3)]);
    h.orchestrator.reserve("o-11", &order).await.unwrap();
    h.dispatch.set_fail_on_publish(true).await;

    let outcome = h
        .orchestrator
        .dispatch_client_order("o-11", &order)
        .await
        .unwrap();

    assert!(!outcome.is_success());
    assert!(outcome.message().starts_with("Dispatch failed"));
    assert_eq!(h.ledger.quantity("BREAD-1").await, Some(7));
    assert!(h.coordination.has_state(&OrderKey::client("o-11")).await);
}

#[tokio::test]
async fn test_cancelled_dispatch_compensates() {
    let h = Harness::new();
    h.stock("BREAD-1", "bread", 10).await;
    let order = items(&[("BREAD-1", 3)]);
    h.orchestrator.reserve("o-12", &order).await.unwrap();
    h.dispatch
        .set_publish_delay(Some(Duration::from_secs(5)))
        .await;

    let cancelled = tokio::time::timeout(
        Duration::from_millis(50),
        h.orchestrator.dispatch_client_order("o-12", &order),
    )
    .await;
    assert!(cancelled.is_err());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.ledger.quantity("BREAD-1").await, Some(10));
    assert!(!h.coordination.has_state(&OrderKey::client("o-12")).await);
    assert_eq!(h.dispatch.published_count().await, 0);
}

#[tokio::test]
async fn test_restock_dispatch_aisle_fallback() {
    let h = Harness::new();
    h.stock("MILK-1", "dairy", 1).await;

    let lines = vec![
        delivery("CAKE-1", "party", 5, 2.0),
        delivery("MILK-1", "", 5, 1.0),
        delivery("NEW-1", " ", 5, 1.0),
    ];
    let outcome = h
        .orchestrator
        .dispatch_restock_order("r-1", lines)
        .await
        .unwrap();
    assert!(outcome.is_success());

    let published = h.dispatch.take_published().await;
    let aisles: Vec<&str> = published[0].items.iter().map(|i| i.aisle.as_str()).collect();
    assert_eq!(aisles, vec!["party", "dairy", UNKNOWN_AISLE]);
    assert_eq!(published[0].class, OrderClass::Restock);
    // Stock only lands at settlement
    assert_eq!(h.ledger.quantity("MILK-1").await, Some(1));
    assert!(h.coordination.has_state(&OrderKey::restock("r-1")).await);
}

#[tokio::test]
async fn test_restock_dispatch_rejects_bad_lines() {
    let h = Harness::new();
    let err = h
        .orchestrator
        .dispatch_restock_order("r-2", vec![delivery("X", "bread", 1, -1.0)])
        .await
        .unwrap_err();
    assert!(matches!(err, FulfillmentError::InvalidArgument(_)));

    let err = h
        .orchestrator
        .dispatch_restock_order("r-2", vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, FulfillmentError::InvalidArgument(_)));
    assert_eq!(h.dispatch.published_count().await, 0);
}

// ============================================================================
// Completion and settlement
// ============================================================================

#[tokio::test]
async fn test_concurrent_reports_settle_exactly_once() {
    let h = Harness::new();
    h.stock("BREAD-1", "bread", 10).await;
    h.pricing.set_price("BREAD-1", 2.5).await;
    let order = items(&[("BREAD-1", 4)]);
    h.orchestrator.reserve("o-20", &order).await.unwrap();
    h.orchestrator
        .dispatch_client_order("o-20", &order)
        .await
        .unwrap();

    let mut reports = h.orchestrator.subscribe_settlements();
    let key = OrderKey::client("o-20");
    let mut tasks = Vec::new();
    for n in 0..5 {
        let orchestrator = Arc::clone(&h.orchestrator);
        let key = key.clone();
        tasks.push(tokio::spawn(async move {
            orchestrator
                .report_completion(CompletionReport {
                    key,
                    worker_id: format!("robot-{}", n),
                    status: "NO_OP".to_string(),
                    processed: BTreeMap::new(),
                })
                .await
                .unwrap()
        }));
    }
    let mut winners = 0;
    for task in tasks {
        if task.await.unwrap().settling {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);

    let report = next_report(&mut reports).await;
    assert_eq!(report.key, key);
    assert_eq!(report.outcome, SettlementOutcome::Settled { amount: 10.0 });
    assert_eq!(
        h.webhook.calls().await,
        vec![WebhookCall::OrderCompleted {
            order_id: "o-20".to_string(),
            total_price: 10.0
        }]
    );
    assert!(!h.coordination.has_state(&key).await);
    assert!(
        tokio::time::timeout(Duration::from_millis(100), reports.recv())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_partial_fleet_does_not_settle() {
    let h = Harness::new();
    let key = OrderKey::client("o-21");
    h.orchestrator
        .dispatch_client_order("o-21", &items(&[("BREAD-1", 1)]))
        .await
        .unwrap();

    for n in 0..4 {
        let progress = h.report(&key, &format!("robot-{}", n)).await;
        assert_eq!(progress.count, n + 1);
        assert!(!progress.settling);
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.webhook.calls().await.is_empty());
    assert_eq!(h.pricing.bill_count().await, 0);
}

#[tokio::test]
async fn test_reports_past_threshold_do_not_settle_twice() {
    let h = Harness::with_config(FulfillmentConfig {
        fleet_size: 2,
        ..Default::default()
    });
    let key = OrderKey::client("o-22");
    h.orchestrator
        .dispatch_client_order("o-22", &items(&[("BREAD-1", 1)]))
        .await
        .unwrap();

    h.pricing.set_bill_delay(Some(Duration::from_millis(100))).await;
    let mut reports = h.orchestrator.subscribe_settlements();
    assert!(!h.report(&key, "a").await.settling);
    assert!(h.report(&key, "b").await.settling);
    // Settlement still running; the marker holds
    let late = h.report(&key, "c").await;
    assert_eq!(late.count, 3);
    assert!(!late.settling);

    next_report(&mut reports).await;
    assert_eq!(h.webhook.calls().await.len(), 1);
}

#[tokio::test]
async fn test_pricing_outage_settles_at_zero() {
    let h = Harness::new();
    let key = OrderKey::client("o-23");
    h.orchestrator
        .dispatch_client_order("o-23", &items(&[("BREAD-1", 2)]))
        .await
        .unwrap();
    h.pricing.set_fail_on_bill(true).await;

    let mut reports = h.orchestrator.subscribe_settlements();
    h.report_fleet(&key).await;

    let report = next_report(&mut reports).await;
    assert_eq!(report.outcome, SettlementOutcome::Settled { amount: 0.0 });
    assert_eq!(
        h.webhook.calls().await,
        vec![WebhookCall::OrderCompleted {
            order_id: "o-23".to_string(),
            total_price: 0.0
        }]
    );
    assert!(!h.coordination.has_state(&key).await);
}

#[tokio::test]
async fn test_webhook_failure_still_cleans_up() {
    let h = Harness::new();
    let key = OrderKey::client("o-24");
    h.orchestrator
        .dispatch_client_order("o-24", &items(&[("BREAD-1", 2)]))
        .await
        .unwrap();
    h.webhook.set_fail_on_call(true).await;

    let mut reports = h.orchestrator.subscribe_settlements();
    h.report_fleet(&key).await;

    let report = next_report(&mut reports).await;
    assert!(matches!(report.outcome, SettlementOutcome::Settled { .. }));
    assert!(!h.coordination.has_state(&key).await);
}

#[tokio::test]
async fn test_missing_manifest_fails_settlement() {
    let h = Harness::new();
    let key = OrderKey::client("never-dispatched");

    let mut reports = h.orchestrator.subscribe_settlements();
    h.report_fleet(&key).await;

    let report = next_report(&mut reports).await;
    assert!(matches!(report.outcome, SettlementOutcome::Failed { .. }));
    assert!(h.webhook.calls().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_settlement_deadline() {
    let h = Harness::with_config(FulfillmentConfig {
        fleet_size: 1,
        settle_timeout_secs: 10,
    });
    let key = OrderKey::client("o-25");
    h.orchestrator
        .dispatch_client_order("o-25", &items(&[("BREAD-1", 2)]))
        .await
        .unwrap();
    h.pricing.set_bill_delay(Some(Duration::from_secs(60))).await;

    let mut reports = h.orchestrator.subscribe_settlements();
    h.report(&key, "solo").await;

    let report = next_report(&mut reports).await;
    assert_eq!(report.outcome, SettlementOutcome::TimedOut);
    assert!(h.webhook.calls().await.is_empty());
    // Nothing unwound; the TTL collects the state
    assert!(h.coordination.has_state(&key).await);
}

#[tokio::test]
async fn test_restock_settlement_upserts_and_costs() {
    let h = Harness::new();
    h.stock("MILK-1", "dairy", 3).await;
    let key = OrderKey::restock("r-10");
    h.orchestrator
        .dispatch_restock_order(
            "r-10",
            vec![
                delivery("MILK-1", "dairy", 10, 1.5),
                delivery("CAKE-1", "party", 2, 4.0),
            ],
        )
        .await
        .unwrap();

    let mut reports = h.orchestrator.subscribe_settlements();
    h.report_fleet(&key).await;

    let report = next_report(&mut reports).await;
    assert_eq!(report.outcome, SettlementOutcome::Settled { amount: 23.0 });
    assert_eq!(h.ledger.quantity("MILK-1").await, Some(13));
    assert_eq!(h.ledger.quantity("CAKE-1").await, Some(2));
    assert_eq!(
        h.webhook.calls().await,
        vec![WebhookCall::RestockCompleted {
            order_id: "r-10".to_string(),
            total_cost: 23.0
        }]
    );
    assert!(!h.coordination.has_state(&key).await);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let pushes = h.pricing.metric_pushes().await;
    assert_eq!(pushes.len(), 1);
    let mut skus: Vec<&str> = pushes[0].iter().map(|m| m.sku.as_str()).collect();
    skus.sort();
    assert_eq!(skus, vec!["CAKE-1", "MILK-1"]);
}

#[tokio::test]
async fn test_restock_settlement_skips_lines_that_fail_to_stow() {
    let h = Harness::new();
    h.stock("MILK-1", "dairy", 3).await;
    h.ledger.reject_upserts_of("CAKE-1").await;
    let key = OrderKey::restock("r-11");
    h.orchestrator
        .dispatch_restock_order(
            "r-11",
            vec![
                delivery("MILK-1", "dairy", 10, 1.5),
                delivery("CAKE-1", "party", 2, 4.0),
            ],
        )
        .await
        .unwrap();

    let mut reports = h.orchestrator.subscribe_settlements();
    h.report_fleet(&key).await;

    let report = next_report(&mut reports).await;
    assert_eq!(report.outcome, SettlementOutcome::Settled { amount: 23.0 });
    assert_eq!(h.ledger.quantity("MILK-1").await, Some(13));
    assert_eq!(h.ledger.quantity("CAKE-1").await, None);
    assert_eq!(
        h.webhook.calls().await,
        vec![WebhookCall::RestockCompleted {
            order_id: "r-11".to_string(),
            total_cost: 23.0
        }]
    );
    assert!(!h.coordination.has_state(&key).await);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let pushes = h.pricing.metric_pushes().await;
    assert_eq!(pushes.len(), 1);
    let skus: Vec<&str> = pushes[0].iter().map(|m| m.sku.as_str()).collect();
    assert_eq!(skus, vec!["MILK-1"]);
}

#[tokio::test]
async fn test_restock_settlement_with_ledger_down_still_notifies() {
    let h = Harness::new();
    let key = OrderKey::restock("r-12");
    h.orchestrator
        .dispatch_restock_order("r-12", vec![delivery("MILK-1", "dairy", 10, 1.0)])
        .await
        .unwrap();
    h.ledger.set_unavailable(true);

    let mut reports = h.orchestrator.subscribe_settlements();
    h.report_fleet(&key).await;

    let report = next_report(&mut reports).await;
    assert_eq!(report.outcome, SettlementOutcome::Settled { amount: 10.0 });
    assert_eq!(
        h.webhook.calls().await,
        vec![WebhookCall::RestockCompleted {
            order_id: "r-12".to_string(),
            total_cost: 10.0
        }]
    );
    assert!(!h.coordination.has_state(&key).await);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.pricing.metric_pushes().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_metrics_push_is_abandoned_at_deadline() {
    let h = Harness::with_config(FulfillmentConfig {
        fleet_size: 1,
        settle_timeout_secs: 10,
    });
    let key = OrderKey::restock("r-13");
    h.orchestrator
        .dispatch_restock_order("r-13", vec![delivery("MILK-1", "dairy", 4, 1.0)])
        .await
        .unwrap();
    h.pricing.set_metrics_delay(Some(Duration::from_secs(600))).await;

    let mut reports = h.orchestrator.subscribe_settlements();
    h.report(&key, "solo").await;
    let report = next_report(&mut reports).await;
    assert_eq!(report.outcome, SettlementOutcome::Settled { amount: 4.0 });

    tokio::time::sleep(Duration::from_secs(11)).await;

    // Only the harness and the orchestrator still hold the pricing client
    assert_eq!(Arc::strong_count(&h.pricing), 2);
    assert!(h.pricing.metric_pushes().await.is_empty());
}

#[tokio::test]
async fn test_client_and_restock_partitions_are_independent() {
    let h = Harness::with_config(FulfillmentConfig {
        fleet_size: 2,
        ..Default::default()
    });
    h.orchestrator
        .dispatch_client_order("same-id", &items(&[("BREAD-1", 1)]))
        .await
        .unwrap();
    h.orchestrator
        .dispatch_restock_order("same-id", vec![delivery("BREAD-1", "bread", 1, 1.0)])
        .await
        .unwrap();

    let client = OrderKey::client("same-id");
    let restock = OrderKey::restock("same-id");
    assert_eq!(h.report(&client, "a").await.count, 1);
    assert_eq!(h.report(&restock, "a").await.count, 1);

    let mut reports = h.orchestrator.subscribe_settlements();
    assert!(h.report(&client, "b").await.settling);
    let report = next_report(&mut reports).await;
    assert_eq!(report.key, client);
    assert!(h.coordination.has_state(&restock).await);
}

#[tokio::test]
async fn test_inventory_metrics() {
    let h = Harness::new();
    h.stock("BREAD-1", "bread", 10).await;
    h.stock("MILK-1", "dairy", 0).await;

    let mut metrics = h.orchestrator.inventory_metrics().await.unwrap();
    metrics.sort_by(|a, b| a.sku.cmp(&b.sku));
    assert_eq!(metrics.len(), 2);
    assert_eq!(metrics[0].quantity, 10);
    assert_eq!(metrics[1].quantity, 0);
}

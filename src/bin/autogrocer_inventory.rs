//! autogrocer-inventory: inventory and fulfillment service
//!
//! Serves `grocery.InventoryService`: stock lookups and reservations, work
//! order dispatch to the robot fleet, completion reports and settlement.
//!
//! ## Architecture
//! ```text
//! [Ordering] -> [autogrocer-inventory] -> [Dispatch] -> [Robot fleet]
//!                  |        ^                               |
//!                  |        +------- ReportJobStatus -------+
//!                  v
//!        [Ledger] + [Coordination] -> [Pricing] + [Ordering webhook]
//! ```
//!
//! ## Configuration
//! - `config.yaml`, `--config <path>` or `AUTOGROCER_CONFIG`
//! - `AUTOGROCER__SECTION__KEY` overrides (e.g. `AUTOGROCER__LEDGER__TYPE=postgres`)
//! - `INTERNAL_SECRET`: shared secret for ordering webhooks
//! - `AUTOGROCER_LOG`: tracing filter
//!
//! With `fleet.simulate` set, a simulated worker per aisle runs in-process.

use std::net::SocketAddr;
use std::sync::Arc;

use tonic::transport::Server;
use tonic_health::server::health_reporter;
use tracing::{error, info};

use autogrocer::config::Config;
use autogrocer::coordination::init_coordination;
use autogrocer::dispatch::init_dispatch;
use autogrocer::fleet::spawn_fleet;
use autogrocer::fulfillment::FulfillmentOrchestrator;
use autogrocer::ledger::init_ledger;
use autogrocer::proto::inventory_service_server::InventoryServiceServer;
use autogrocer::services::{ExpirySweeper, InventoryService};
use autogrocer::settlement::init_settlement;
use autogrocer::transport::grpc_trace_layer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    autogrocer::utils::bootstrap::init_tracing();

    let config_path = autogrocer::utils::bootstrap::parse_config_path();
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!("Starting autogrocer-inventory");
    config.check_simulated_fleet().map_err(|e| {
        error!("Invalid fleet configuration: {}", e);
        e
    })?;

    let ledger = init_ledger(&config.ledger).await?;
    let coordination = init_coordination(&config.coordination).await?;
    let dispatch = init_dispatch(&config.dispatch).await?;
    let (pricing, webhook) = init_settlement(&config.settlement)?;

    let orchestrator = Arc::new(FulfillmentOrchestrator::new(
        Arc::clone(&ledger),
        coordination,
        Arc::clone(&dispatch),
        pricing,
        webhook,
        config.fulfillment.clone(),
    ));

    if config.fleet.simulate {
        let workers = spawn_fleet(&config.fleet, dispatch, orchestrator.clone()).await?;
        info!(
            workers = workers.len(),
            fleet_size = config.fulfillment.fleet_size,
            "Simulated fleet running in-process"
        );
    }

    if config.sweeper.enabled {
        ExpirySweeper::new(Arc::clone(&ledger))
            .with_interval(config.sweeper.interval())
            .spawn();
        info!(interval_secs = config.sweeper.interval_secs, "Expiry sweeper started");
    }

    let (mut health_reporter, health_service) = health_reporter();
    health_reporter
        .set_serving::<InventoryServiceServer<InventoryService>>()
        .await;

    let addr: SocketAddr = config.server.bind_address().parse()?;
    info!(address = %addr, "Inventory service listening");

    Server::builder()
        .layer(grpc_trace_layer())
        .add_service(health_service)
        .add_service(InventoryServiceServer::new(InventoryService::new(orchestrator)))
        .serve_with_shutdown(addr, async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}

//! autogrocer-robot: remote robot workers
//!
//! Consumes work orders from the AMQP dispatch exchange and reports each
//! order back to the inventory service over gRPC. Runs one worker per
//! configured aisle (`fleet.aisles`); deploy one process per aisle by
//! narrowing the list, e.g. `AUTOGROCER__FLEET__AISLES=dairy`.

use std::sync::Arc;

use tracing::{error, info};

use autogrocer::config::Config;
use autogrocer::dispatch::AmqpDispatch;
use autogrocer::fleet::{spawn_fleet, GrpcCompletionSink};
use autogrocer::transport::connect_to_address;
use autogrocer::utils::bootstrap::connect_with_retry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    autogrocer::utils::bootstrap::init_tracing();

    let config_path = autogrocer::utils::bootstrap::parse_config_path();
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(aisles = ?config.fleet.aisles, "Starting autogrocer-robot");

    let address = config.fleet.inventory_address.clone();
    let channel = connect_with_retry("inventory", &address, || async {
        connect_to_address(&address).await.map_err(|e| e.to_string())
    })
    .await?;
    let sink = Arc::new(GrpcCompletionSink::new(channel));

    let dispatch = Arc::new(
        AmqpDispatch::connect(&config.dispatch.amqp_url, &config.dispatch.exchange).await?,
    );
    let workers = spawn_fleet(&config.fleet, dispatch, sink).await?;

    tokio::select! {
        _ = futures::future::join_all(workers) => {
            error!("All robot workers stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    Ok(())
}

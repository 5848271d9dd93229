//! Robot fleet simulation.
//!
//! One `RobotWorker` per aisle subscribes to the dispatch channel, works the
//! items of each order that belong to its aisle, and reports back through a
//! `CompletionSink`. Every worker reports for every order, `NO_OP` included,
//! so the fleet size equals the number of aisles.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::info;

use crate::dispatch::{DispatchChannel, DispatchError};
use crate::order::CompletionReport;

pub mod sink;
pub mod worker;

pub use sink::GrpcCompletionSink;
pub use worker::RobotWorker;

/// Result type for fleet operations.
pub type Result<T> = std::result::Result<T, FleetError>;

/// Errors that can occur in a robot worker.
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Report rejected: {0}")]
    Rejected(String),

    #[error("Report failed, inventory unavailable: {0}")]
    Unavailable(String),
}

impl FleetError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FleetError::Unavailable(_))
    }
}

/// Where workers send completion reports.
#[async_trait]
pub trait CompletionSink: Send + Sync {
    async fn report(&self, report: CompletionReport) -> Result<()>;
}

// ============================================================================
// Configuration
// ============================================================================

/// Robot fleet configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Run simulated workers inside the inventory service.
    pub simulate: bool,
    /// One worker per aisle.
    pub aisles: Vec<String>,
    /// Simulated work per matching item line.
    pub work_millis_per_item: u64,
    /// Inventory service address for remote workers.
    pub inventory_address: String,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            simulate: true,
            aisles: ["bread", "dairy", "produce", "meat", "party"]
                .into_iter()
                .map(String::from)
                .collect(),
            work_millis_per_item: 200,
            inventory_address: "localhost:50051".to_string(),
        }
    }
}

impl FleetConfig {
    pub fn work_per_item(&self) -> Duration {
        Duration::from_millis(self.work_millis_per_item)
    }
}

/// Subscribe one worker per configured aisle and run them in the background.
///
/// Subscriptions are in place when this returns, so orders published
/// afterwards reach every worker.
pub async fn spawn_fleet(
    config: &FleetConfig,
    dispatch: Arc<dyn DispatchChannel>,
    sink: Arc<dyn CompletionSink>,
) -> Result<Vec<JoinHandle<()>>> {
    let mut handles = Vec::with_capacity(config.aisles.len());
    for aisle in &config.aisles {
        let worker = RobotWorker::new(aisle, config.work_per_item(), Arc::clone(&sink));
        let stream = dispatch.subscribe(worker.id()).await?;
        handles.push(tokio::spawn(worker.run(stream)));
    }
    info!(workers = handles.len(), "Robot fleet started");
    Ok(handles)
}

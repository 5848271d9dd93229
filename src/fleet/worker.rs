//! A single simulated robot.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use backon::Retryable;
use futures::StreamExt;
use tracing::{debug, error, info, warn};

use super::{CompletionSink, FleetError};
use crate::dispatch::DispatchStream;
use crate::order::{CompletionReport, DispatchMessage, OrderKey, WorkerStatus};
use crate::utils::retry::report_backoff;

/// Works one aisle of every order it receives.
pub struct RobotWorker {
    id: String,
    aisle: String,
    work_per_item: Duration,
    sink: Arc<dyn CompletionSink>,
}

impl RobotWorker {
    pub fn new(aisle: &str, work_per_item: Duration, sink: Arc<dyn CompletionSink>) -> Self {
        Self {
            id: format!("robot-{}", aisle.to_ascii_lowercase()),
            aisle: aisle.to_string(),
            work_per_item,
            sink,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Work the items in this worker's aisle and build the report.
    pub async fn work(&self, message: &DispatchMessage) -> CompletionReport {
        let mut processed = BTreeMap::new();
        for item in message
            .items
            .iter()
            .filter(|i| i.aisle.eq_ignore_ascii_case(&self.aisle))
        {
            tokio::time::sleep(self.work_per_item).await;
            *processed.entry(item.sku.clone()).or_insert(0) += item.quantity;
            debug!(
                worker_id = %self.id,
                order_id = %message.order_id,
                sku = %item.sku,
                quantity = item.quantity,
                "Item handled"
            );
        }

        let status = if processed.is_empty() {
            WorkerStatus::NoOp
        } else {
            WorkerStatus::Success
        };
        CompletionReport {
            key: OrderKey::new(message.class, message.order_id.clone()),
            worker_id: self.id.clone(),
            status: status.as_str().to_string(),
            processed,
        }
    }

    async fn report(&self, report: CompletionReport) -> Result<(), FleetError> {
        (|| async { self.sink.report(report.clone()).await })
            .retry(report_backoff())
            .when(FleetError::is_retryable)
            .notify(|e: &FleetError, delay: Duration| {
                warn!(worker_id = %self.id, error = %e, retry_in = ?delay, "Report failed, retrying");
            })
            .await
    }

    /// Handle orders until the stream ends.
    pub async fn run(self, mut orders: DispatchStream) {
        info!(worker_id = %self.id, aisle = %self.aisle, "Robot worker started");
        while let Some(message) = orders.next().await {
            let report = self.work(&message).await;
            let status = report.status.clone();
            match self.report(report).await {
                Ok(()) => info!(
                    worker_id = %self.id,
                    order_id = %message.order_id,
                    class = %message.class,
                    status = %status,
                    "Order reported"
                ),
                Err(e) => error!(
                    worker_id = %self.id,
                    order_id = %message.order_id,
                    class = %message.class,
                    error = %e,
                    "Could not report order"
                ),
            }
        }
        info!(worker_id = %self.id, "Dispatch stream closed, robot worker stopping");
    }
}

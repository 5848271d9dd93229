//! Fulfillment orchestration settings.

use std::time::Duration;

use serde::Deserialize;

/// Completion threshold and settlement deadline.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FulfillmentConfig {
    /// Number of completion reports that finishes an order.
    /// Every worker reports for every order, including `NO_OP` reports.
    pub fleet_size: u64,
    /// Deadline for a detached settlement task.
    pub settle_timeout_secs: u64,
}

impl Default for FulfillmentConfig {
    fn default() -> Self {
        Self {
            fleet_size: 5,
            settle_timeout_secs: 10,
        }
    }
}

impl FulfillmentConfig {
    pub fn settle_timeout(&self) -> Duration {
        Duration::from_secs(self.settle_timeout_secs)
    }
}

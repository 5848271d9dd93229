//! Periodic zeroing of expired stock.
//!
//! The `ExpirySweeper` runs as a background task in the inventory service,
//! asking the ledger to zero every record whose expiry date has passed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::ledger::{Result, StockLedger};

/// Expiry sweeper configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    /// Run the sweeper at all.
    pub enabled: bool,
    /// Seconds between sweeps.
    pub interval_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3600,
        }
    }
}

impl SweeperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Background task zeroing expired stock records.
pub struct ExpirySweeper {
    ledger: Arc<dyn StockLedger>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(ledger: Arc<dyn StockLedger>) -> Self {
        Self {
            ledger,
            interval: Duration::from_secs(3600),
        }
    }

    /// Set custom sweep interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Spawn the sweeper as a background task. The first sweep runs at once.
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                interval.tick().await;

                let today = Utc::now().date_naive();
                match self.run_once(today).await {
                    Ok(count) if count > 0 => {
                        info!(expired = count, as_of = %today, "Expired stock zeroed");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Expiry sweep failed");
                    }
                }
            }
        })
    }

    /// Sweep once for `as_of`.
    pub async fn run_once(&self, as_of: NaiveDate) -> Result<u64> {
        let count = self.ledger.sweep_expired(as_of).await?;
        #[cfg(feature = "otel")]
        crate::utils::metrics::EXPIRED_RECORDS_TOTAL.add(count, &[]);
        Ok(count)
    }
}

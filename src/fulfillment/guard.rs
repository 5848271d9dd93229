//! Compensation for requests cancelled mid-flight.
//!
//! A `CompensationGuard` is armed before the first side effect of a request
//! and disarmed once the request has produced its answer. If the request
//! future is dropped in between (client hung up, deadline hit), the guard's
//! `Drop` spawns a best-effort undo: reserved stock goes back to the ledger
//! and coordination state is removed.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::coordination::CoordinationStore;
use crate::ledger::StockLedger;
use crate::order::OrderKey;

struct Compensation {
    order_id: String,
    ledger: Arc<dyn StockLedger>,
    release: BTreeMap<String, u32>,
    cleanup: Option<(Arc<dyn CoordinationStore>, OrderKey)>,
}

impl Compensation {
    async fn run(self) {
        if !self.release.is_empty() {
            match self.ledger.release(&self.release).await {
                Ok(()) => info!(
                    order_id = %self.order_id,
                    skus = self.release.len(),
                    "Released stock for cancelled request"
                ),
                Err(e) => warn!(
                    order_id = %self.order_id,
                    error = %e,
                    "Compensating release failed"
                ),
            }
        }
        if let Some((coordination, key)) = self.cleanup {
            if let Err(e) = coordination.delete_all(&key).await {
                warn!(
                    order_id = %self.order_id,
                    class = %key.class,
                    error = %e,
                    "Compensating coordination cleanup failed"
                );
            }
        }
    }
}

/// Undo-on-drop for the side effects of one request.
pub(crate) struct CompensationGuard {
    armed: Option<Compensation>,
}

impl CompensationGuard {
    /// Guard that returns `release` to the ledger.
    pub fn release(
        order_id: &str,
        ledger: Arc<dyn StockLedger>,
        release: BTreeMap<String, u32>,
    ) -> Self {
        Self {
            armed: Some(Compensation {
                order_id: order_id.to_string(),
                ledger,
                release,
                cleanup: None,
            }),
        }
    }

    /// Also delete the order's coordination state.
    pub fn with_cleanup(mut self, coordination: Arc<dyn CoordinationStore>, key: OrderKey) -> Self {
        if let Some(c) = self.armed.as_mut() {
            c.cleanup = Some((coordination, key));
        }
        self
    }

    /// The request completed; keep its effects.
    pub fn disarm(mut self) {
        self.armed = None;
    }

    /// Undo now, in the caller's task.
    pub async fn compensate(mut self) {
        if let Some(c) = self.armed.take() {
            c.run().await;
        }
    }
}

impl Drop for CompensationGuard {
    fn drop(&mut self) {
        let Some(compensation) = self.armed.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(
                    order_id = %compensation.order_id,
                    "Request cancelled before completion, compensating"
                );
                handle.spawn(compensation.run());
            }
            Err(_) => {
                warn!(
                    order_id = %compensation.order_id,
                    "Request cancelled outside a runtime, compensation skipped"
                );
            }
        }
    }
}

//! Order lifecycle phases and settlement reports.

use std::fmt;

use crate::order::OrderKey;

/// Where an order is in its lifecycle. Used for logging only; the durable
/// state lives in the ledger and the coordination store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderPhase {
    Reserved,
    Dispatched,
    DispatchFailed,
    Settling,
    Done,
}

impl OrderPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderPhase::Reserved => "reserved",
            OrderPhase::Dispatched => "dispatched",
            OrderPhase::DispatchFailed => "dispatch_failed",
            OrderPhase::Settling => "settling",
            OrderPhase::Done => "done",
        }
    }
}

impl fmt::Display for OrderPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a settlement run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SettlementOutcome {
    /// Billed price (client) or delivery cost (restock) sent to ordering.
    Settled { amount: f64 },
    /// Aborted; coordination state is left for its TTL.
    Failed { reason: String },
    /// The deadline elapsed first.
    TimedOut,
}

impl SettlementOutcome {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            SettlementOutcome::Settled { .. } => "settled",
            SettlementOutcome::Failed { .. } => "failed",
            SettlementOutcome::TimedOut => "timed_out",
        }
    }
}

/// Published once per settlement run.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementReport {
    pub key: OrderKey,
    pub outcome: SettlementOutcome,
}

/// Result of publishing a work order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Dispatched { items: usize },
    /// Publish failed; the reservation stands.
    Failed { reason: String },
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DispatchOutcome::Dispatched { .. })
    }

    pub fn message(&self) -> String {
        match self {
            DispatchOutcome::Dispatched { items } => {
                format!("Order dispatched to fleet ({} items)", items)
            }
            DispatchOutcome::Failed { reason } => format!("Dispatch failed: {}", reason),
        }
    }
}

/// Result of recording one worker report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionProgress {
    /// Reports counted so far for the order.
    pub count: u64,
    /// This report won the right to settle.
    pub settling: bool,
}

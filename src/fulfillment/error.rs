//! Fulfillment error taxonomy and its gRPC mapping.

use std::collections::BTreeMap;

use tonic::Status;
use tracing::warn;

use crate::coordination::CoordinationError;
use crate::dispatch::DispatchError;
use crate::ledger::LedgerError;

/// Result type for fulfillment operations.
pub type Result<T> = std::result::Result<T, FulfillmentError>;

/// How far a reservation fell short for one SKU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shortfall {
    pub requested: u32,
    pub available: u32,
}

/// Errors that can occur while fulfilling an order.
#[derive(Debug, thiserror::Error)]
pub enum FulfillmentError {
    #[error("Invalid request: {0}")]
    InvalidArgument(String),

    #[error("Insufficient stock: {}", describe_shortfalls(.shortfalls))]
    InsufficientStock {
        shortfalls: BTreeMap<String, Shortfall>,
    },

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Coordination error: {0}")]
    Coordination(#[from] CoordinationError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

fn describe_shortfalls(shortfalls: &BTreeMap<String, Shortfall>) -> String {
    shortfalls
        .iter()
        .map(|(sku, s)| {
            format!(
                "{} (requested {}, available {})",
                sku, s.requested, s.available
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}

impl FulfillmentError {
    pub fn invalid(message: impl Into<String>) -> Self {
        FulfillmentError::InvalidArgument(message.into())
    }

    /// Business rejections are answered in-band rather than as RPC errors.
    pub fn is_business_rejection(&self) -> bool {
        matches!(self, FulfillmentError::InsufficientStock { .. })
    }
}

impl From<FulfillmentError> for Status {
    fn from(e: FulfillmentError) -> Self {
        match e {
            FulfillmentError::InvalidArgument(msg) => Status::invalid_argument(msg),
            e @ FulfillmentError::InsufficientStock { .. } => {
                Status::failed_precondition(e.to_string())
            }
            FulfillmentError::Ledger(LedgerError::Unavailable(msg)) => {
                warn!(error = %msg, "Ledger unavailable");
                Status::unavailable(format!("Ledger unavailable: {}", msg))
            }
            FulfillmentError::Ledger(e) => {
                warn!(error = %e, "Ledger failure");
                Status::internal(format!("Ledger failure: {}", e))
            }
            FulfillmentError::Coordination(CoordinationError::Unavailable(msg)) => {
                warn!(error = %msg, "Coordination store unavailable");
                Status::unavailable(format!("Coordination store unavailable: {}", msg))
            }
            #[cfg(feature = "redis")]
            FulfillmentError::Coordination(CoordinationError::Redis(e)) => {
                warn!(error = %e, "Coordination store failure");
                Status::unavailable(format!("Coordination store failure: {}", e))
            }
            FulfillmentError::Coordination(e) => {
                warn!(error = %e, "Coordination failure");
                Status::internal(format!("Coordination failure: {}", e))
            }
            FulfillmentError::Dispatch(e) => {
                warn!(error = %e, "Dispatch failure");
                Status::unavailable(format!("Dispatch failure: {}", e))
            }
        }
    }
}

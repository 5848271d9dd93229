//! Autogrocer - fulfillment orchestration core.
//!
//! Reserves stock against a ledger, dispatches work orders to a robot fleet,
//! counts fleet completions per order and settles each order exactly once.

pub mod config;
pub mod coordination;
pub mod dispatch;
pub mod fleet;
pub mod fulfillment;
pub mod ledger;
pub mod order;
pub mod services;
pub mod settlement;
pub mod transport;
pub mod utils;

pub mod proto {
    tonic::include_proto!("grocery");
}

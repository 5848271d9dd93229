//! gRPC service implementations and background services.

pub mod expiry_sweeper;
pub mod inventory;

pub use expiry_sweeper::{ExpirySweeper, SweeperConfig};
pub use inventory::InventoryService;

//! Stock ledger: the authoritative on-hand quantity per SKU.
//!
//! This module contains:
//! - `StockLedger` trait: partial-fill reservation, release, restock upsert,
//!   expiry sweep and read-side lookups
//! - Ledger configuration types
//! - Implementations: PostgreSQL, SQLite, in-memory

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tracing::info;

use crate::order::StockDelivery;

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(any(feature = "postgres", feature = "sqlite"))]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryLedger;
#[cfg(feature = "postgres")]
pub use postgres::PostgresLedger;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteLedger;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors that can occur during ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[cfg(any(feature = "postgres", feature = "sqlite"))]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Quantity {quantity} for sku '{sku}' exceeds the storable range")]
    QuantityOutOfRange { sku: String, quantity: u32 },

    #[error("Stored quantity {quantity} for sku '{sku}' is negative")]
    CorruptQuantity { sku: String, quantity: i64 },

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

/// A stock record as held by the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct StockRecord {
    pub sku: String,
    pub name: String,
    pub aisle: String,
    pub quantity: u32,
    pub unit_cost: f64,
    pub mfd_date: NaiveDate,
    pub expiry_date: NaiveDate,
    pub last_updated: DateTime<Utc>,
}

/// Quantity and cost of one SKU, as consumed by the pricing collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct StockMetric {
    pub sku: String,
    pub quantity: u32,
    pub unit_cost: f64,
}

/// Interface for the stock ledger.
///
/// Every write is a single statement or transaction. Errors are returned
/// to the caller and never retried here.
///
/// Implementations:
/// - `PostgresLedger`: row-level locks over the touched SKUs
/// - `SqliteLedger`: serialized write transactions
/// - `InMemoryLedger`: single mutex, for tests and local runs
#[async_trait]
pub trait StockLedger: Send + Sync {
    /// Create the schema if absent.
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    /// Fetch the records for `skus`. Unknown SKUs are absent from the result.
    async fn batch_lookup(&self, skus: &[String]) -> Result<HashMap<String, StockRecord>>;

    /// Take `min(on_hand, requested)` from every requested SKU that has stock.
    ///
    /// Returns only what was actually taken; SKUs where nothing was taken are
    /// absent. A partial result is committed as-is; undoing it is the
    /// caller's job.
    async fn reserve(&self, requests: &BTreeMap<String, u32>) -> Result<BTreeMap<String, u32>>;

    /// Add quantities back to existing records. Unknown SKUs are ignored.
    async fn release(&self, returns: &BTreeMap<String, u32>) -> Result<()>;

    /// Insert a record or merge a delivery into it: quantity accumulates,
    /// name and unit cost are overwritten. Not idempotent.
    async fn upsert(&self, delivery: &StockDelivery) -> Result<()>;

    /// Zero the quantity of every record that expired before `as_of` and
    /// still has stock. Returns the number of records changed.
    async fn sweep_expired(&self, as_of: NaiveDate) -> Result<u64>;

    /// Quantity and unit cost of every record.
    async fn all_metrics(&self) -> Result<Vec<StockMetric>>;
}

// ============================================================================
// Configuration
// ============================================================================

/// Ledger backend discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    #[default]
    Sqlite,
    Postgres,
    Memory,
}

/// Ledger configuration (discriminated union).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Backend discriminator.
    #[serde(rename = "type")]
    pub backend: LedgerBackend,
    /// SQLite-specific configuration.
    pub sqlite: SqliteLedgerConfig,
    /// PostgreSQL-specific configuration.
    pub postgres: PostgresLedgerConfig,
}

/// SQLite-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SqliteLedgerConfig {
    /// Database file path, or `:memory:`.
    pub path: String,
}

impl Default for SqliteLedgerConfig {
    fn default() -> Self {
        Self {
            path: "./data/inventory.db".to_string(),
        }
    }
}

/// PostgreSQL-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PostgresLedgerConfig {
    /// PostgreSQL connection URI.
    pub uri: String,
    /// Upper bound on pooled connections.
    pub max_connections: u32,
}

impl Default for PostgresLedgerConfig {
    fn default() -> Self {
        Self {
            uri: "postgres://localhost:5432/inventory".to_string(),
            max_connections: 10,
        }
    }
}

/// Initialize the ledger based on configuration.
pub async fn init_ledger(
    config: &LedgerConfig,
) -> std::result::Result<Arc<dyn StockLedger>, Box<dyn std::error::Error>> {
    match config.backend {
        LedgerBackend::Memory => {
            info!("Ledger: in-memory");
            Ok(Arc::new(InMemoryLedger::new()))
        }
        #[cfg(feature = "sqlite")]
        LedgerBackend::Sqlite => {
            info!(path = %config.sqlite.path, "Ledger: sqlite");
            let ledger = SqliteLedger::connect(&config.sqlite.path).await?;
            ledger.init().await?;
            Ok(Arc::new(ledger))
        }
        #[cfg(not(feature = "sqlite"))]
        LedgerBackend::Sqlite => {
            tracing::error!("SQLite ledger requested but 'sqlite' feature is not enabled");
            Err("sqlite feature not enabled".into())
        }
        #[cfg(feature = "postgres")]
        LedgerBackend::Postgres => {
            info!("Ledger: postgres");
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(config.postgres.max_connections)
                .connect(&config.postgres.uri)
                .await?;
            let ledger = PostgresLedger::new(pool);
            ledger.init().await?;
            Ok(Arc::new(ledger))
        }
        #[cfg(not(feature = "postgres"))]
        LedgerBackend::Postgres => {
            tracing::error!("PostgreSQL ledger requested but 'postgres' feature is not enabled");
            Err("postgres feature not enabled".into())
        }
    }
}

/// Convert a requested quantity to the signed column type.
#[cfg(any(feature = "postgres", feature = "sqlite"))]
pub(crate) fn to_column_quantity(sku: &str, quantity: u32) -> Result<i32> {
    i32::try_from(quantity).map_err(|_| LedgerError::QuantityOutOfRange {
        sku: sku.to_string(),
        quantity,
    })
}

/// Convert a stored quantity back, rejecting values the schema forbids.
#[cfg(any(feature = "postgres", feature = "sqlite"))]
pub(crate) fn from_column_quantity(sku: &str, quantity: i64) -> Result<u32> {
    u32::try_from(quantity).map_err(|_| LedgerError::CorruptQuantity {
        sku: sku.to_string(),
        quantity,
    })
}

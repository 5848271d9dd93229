//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Stock table schema.
#[derive(Iden)]
pub enum AvailableStock {
    #[iden = "available_stock"]
    Table,
    #[iden = "sku"]
    Sku,
    #[iden = "name"]
    Name,
    #[iden = "aisle_type"]
    AisleType,
    #[iden = "quantity"]
    Quantity,
    #[iden = "unit_cost"]
    UnitCost,
    #[iden = "mfd_date"]
    MfdDate,
    #[iden = "expiry_date"]
    ExpiryDate,
    #[iden = "last_updated"]
    LastUpdated,
}

/// Columns of a full stock record, in read order.
pub const RECORD_COLUMNS: [AvailableStock; 8] = [
    AvailableStock::Sku,
    AvailableStock::Name,
    AvailableStock::AisleType,
    AvailableStock::Quantity,
    AvailableStock::UnitCost,
    AvailableStock::MfdDate,
    AvailableStock::ExpiryDate,
    AvailableStock::LastUpdated,
];

/// SQL for creating the stock table (PostgreSQL).
pub const CREATE_STOCK_TABLE_POSTGRES: &str = r#"
CREATE TABLE IF NOT EXISTS available_stock (
    id BIGSERIAL PRIMARY KEY,
    sku TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    aisle_type TEXT NOT NULL,
    quantity INTEGER NOT NULL CHECK (quantity >= 0),
    unit_cost DOUBLE PRECISION NOT NULL,
    mfd_date DATE NOT NULL,
    expiry_date DATE NOT NULL,
    last_updated TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// SQL for creating the stock table (SQLite).
pub const CREATE_STOCK_TABLE_SQLITE: &str = r#"
CREATE TABLE IF NOT EXISTS available_stock (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sku TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    aisle_type TEXT NOT NULL,
    quantity INTEGER NOT NULL CHECK (quantity >= 0),
    unit_cost REAL NOT NULL,
    mfd_date TEXT NOT NULL,
    expiry_date TEXT NOT NULL,
    last_updated TEXT NOT NULL
)
"#;

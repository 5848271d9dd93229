//! SQLite StockLedger implementation.
//!
//! SQLite has no row-level locks, so every write goes through one async
//! mutex and reservation runs inside a transaction while holding it.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sea_query::{Expr, Order, Query, SqliteQueryBuilder};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;
use tracing::debug;

use super::schema::{AvailableStock, CREATE_STOCK_TABLE_SQLITE, RECORD_COLUMNS};
use super::{
    from_column_quantity, to_column_quantity, Result, StockLedger, StockMetric, StockRecord,
};
use crate::order::StockDelivery;

const IN_MEMORY_PATH: &str = ":memory:";

/// SQLite implementation of StockLedger.
pub struct SqliteLedger {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl SqliteLedger {
    /// Create a new SQLite ledger over an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Mutex::new(()),
        }
    }

    /// Open (creating if needed) the database at `path`.
    ///
    /// `:memory:` yields a private in-memory database on a single connection.
    pub async fn connect(path: &str) -> Result<Self> {
        if path == IN_MEMORY_PATH {
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .connect("sqlite::memory:")
                .await?;
            return Ok(Self::new(pool));
        }

        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    super::LedgerError::Unavailable(format!(
                        "cannot create directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Ok(Self::new(pool))
    }

    fn record_from_row(row: &SqliteRow) -> Result<StockRecord> {
        let sku: String = row.try_get("sku")?;
        let quantity: i64 = row.try_get("quantity")?;
        let quantity = from_column_quantity(&sku, quantity)?;
        Ok(StockRecord {
            name: row.try_get("name")?,
            aisle: row.try_get("aisle_type")?,
            quantity,
            unit_cost: row.try_get("unit_cost")?,
            mfd_date: row.try_get::<NaiveDate, _>("mfd_date")?,
            expiry_date: row.try_get::<NaiveDate, _>("expiry_date")?,
            last_updated: row.try_get::<DateTime<Utc>, _>("last_updated")?,
            sku,
        })
    }
}

#[async_trait]
impl StockLedger for SqliteLedger {
    async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_STOCK_TABLE_SQLITE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn batch_lookup(&self, skus: &[String]) -> Result<HashMap<String, StockRecord>> {
        if skus.is_empty() {
            return Ok(HashMap::new());
        }

        let query = Query::select()
            .columns(RECORD_COLUMNS)
            .from(AvailableStock::Table)
            .and_where(Expr::col(AvailableStock::Sku).is_in(skus.iter().map(String::as_str)))
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| Self::record_from_row(row).map(|record| (record.sku.clone(), record)))
            .collect()
    }

    async fn reserve(&self, requests: &BTreeMap<String, u32>) -> Result<BTreeMap<String, u32>> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;
        let mut taken = BTreeMap::new();

        for (sku, requested) in requests {
            if *requested == 0 {
                continue;
            }

            let row = sqlx::query(
                "SELECT quantity FROM available_stock WHERE sku = ?1 AND quantity > 0",
            )
            .bind(sku)
            .fetch_optional(&mut *tx)
            .await?;

            let Some(row) = row else { continue };
            let on_hand: i64 = row.try_get("quantity")?;
            let on_hand = from_column_quantity(sku, on_hand)?;
            let take = on_hand.min(*requested);

            sqlx::query(
                "UPDATE available_stock SET quantity = quantity - ?1, last_updated = ?2 WHERE sku = ?3",
            )
            .bind(i64::from(take))
            .bind(now)
            .bind(sku)
            .execute(&mut *tx)
            .await?;

            taken.insert(sku.clone(), take);
        }

        tx.commit().await?;

        debug!(requested = requests.len(), filled = taken.len(), "Reserved stock");
        Ok(taken)
    }

    async fn release(&self, returns: &BTreeMap<String, u32>) -> Result<()> {
        if returns.is_empty() {
            return Ok(());
        }

        let _guard = self.write_lock.lock().await;
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;
        for (sku, quantity) in returns {
            sqlx::query(
                "UPDATE available_stock SET quantity = quantity + ?1, last_updated = ?2 WHERE sku = ?3",
            )
            .bind(i64::from(*quantity))
            .bind(now)
            .bind(sku)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn upsert(&self, delivery: &StockDelivery) -> Result<()> {
        let quantity = to_column_quantity(&delivery.sku, delivery.quantity)?;
        let _guard = self.write_lock.lock().await;

        sqlx::query(
            r#"
            INSERT INTO available_stock
                (sku, name, aisle_type, quantity, unit_cost, mfd_date, expiry_date, last_updated)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT (sku) DO UPDATE SET
                quantity = available_stock.quantity + excluded.quantity,
                unit_cost = excluded.unit_cost,
                name = excluded.name,
                last_updated = excluded.last_updated
            "#,
        )
        .bind(&delivery.sku)
        .bind(&delivery.name)
        .bind(&delivery.aisle)
        .bind(quantity)
        .bind(delivery.unit_cost)
        .bind(delivery.mfd_date)
        .bind(delivery.expiry_date)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn sweep_expired(&self, as_of: NaiveDate) -> Result<u64> {
        let _guard = self.write_lock.lock().await;

        let result = sqlx::query(
            "UPDATE available_stock SET quantity = 0, last_updated = ?1 WHERE expiry_date < ?2 AND quantity > 0",
        )
        .bind(Utc::now())
        .bind(as_of)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn all_metrics(&self) -> Result<Vec<StockMetric>> {
        let query = Query::select()
            .columns([
                AvailableStock::Sku,
                AvailableStock::Quantity,
                AvailableStock::UnitCost,
            ])
            .from(AvailableStock::Table)
            .order_by(AvailableStock::Sku, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| {
                let sku: String = row.try_get("sku")?;
                let quantity: i64 = row.try_get("quantity")?;
                Ok(StockMetric {
                    quantity: from_column_quantity(&sku, quantity)?,
                    unit_cost: row.try_get("unit_cost")?,
                    sku,
                })
            })
            .collect()
    }
}

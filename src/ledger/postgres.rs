//! PostgreSQL StockLedger implementation.
//!
//! Reservation runs as one statement: the requested SKUs are locked in SKU
//! order (`FOR UPDATE OF s`), so concurrent reservations on overlapping SKUs
//! serialize on the rows they share and never deadlock.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sea_query::{Expr, Order, PostgresQueryBuilder, Query};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;

use super::schema::{AvailableStock, CREATE_STOCK_TABLE_POSTGRES, RECORD_COLUMNS};
use super::{
    from_column_quantity, to_column_quantity, Result, StockLedger, StockMetric, StockRecord,
};
use crate::order::StockDelivery;

const RESERVE_SQL: &str = r#"
WITH req AS (
    SELECT r.sku, r.requested
    FROM unnest($1::text[], $2::int[]) AS r(sku, requested)
),
locked AS (
    SELECT s.sku, s.quantity AS on_hand, req.requested
    FROM available_stock s
    JOIN req ON req.sku = s.sku
    WHERE s.quantity > 0
    ORDER BY s.sku
    FOR UPDATE OF s
)
UPDATE available_stock AS a
SET quantity = a.quantity - LEAST(locked.on_hand, locked.requested),
    last_updated = NOW()
FROM locked
WHERE a.sku = locked.sku
RETURNING a.sku, LEAST(locked.on_hand, locked.requested) AS taken
"#;

const RELEASE_SQL: &str = r#"
UPDATE available_stock AS a
SET quantity = a.quantity + r.qty,
    last_updated = NOW()
FROM unnest($1::text[], $2::int[]) AS r(sku, qty)
WHERE a.sku = r.sku
"#;

const UPSERT_SQL: &str = r#"
INSERT INTO available_stock
    (sku, name, aisle_type, quantity, unit_cost, mfd_date, expiry_date, last_updated)
VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
ON CONFLICT (sku) DO UPDATE SET
    quantity = available_stock.quantity + EXCLUDED.quantity,
    unit_cost = EXCLUDED.unit_cost,
    name = EXCLUDED.name,
    last_updated = NOW()
"#;

const SWEEP_SQL: &str = r#"
UPDATE available_stock
SET quantity = 0,
    last_updated = NOW()
WHERE expiry_date < $1 AND quantity > 0
"#;

/// PostgreSQL implementation of StockLedger.
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    /// Create a new PostgreSQL ledger.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn record_from_row(row: &PgRow) -> Result<StockRecord> {
        let sku: String = row.try_get("sku")?;
        let quantity: i32 = row.try_get("quantity")?;
        let quantity = from_column_quantity(&sku, i64::from(quantity))?;
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

    fn split_columns(items: &BTreeMap<String, u32>) -> Result<(Vec<String>, Vec<i32>)> {
        let mut skus = Vec::with_capacity(items.len());
        let mut quantities = Vec::with_capacity(items.len());
        for (sku, quantity) in items {
            quantities.push(to_column_quantity(sku, *quantity)?);
            skus.push(sku.clone());
        }
        Ok((skus, quantities))
    }
}

#[async_trait]
impl StockLedger for PostgresLedger {
    async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_STOCK_TABLE_POSTGRES)
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
            .to_string(PostgresQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| Self::record_from_row(row).map(|record| (record.sku.clone(), record)))
            .collect()
    }

    async fn reserve(&self, requests: &BTreeMap<String, u32>) -> Result<BTreeMap<String, u32>> {
        let requests: BTreeMap<String, u32> = requests
            .iter()
            .filter(|(_, qty)| **qty > 0)
            .map(|(sku, qty)| (sku.clone(), *qty))
            .collect();
        if requests.is_empty() {
            return Ok(BTreeMap::new());
        }

        let (skus, quantities) = Self::split_columns(&requests)?;

        let rows = sqlx::query(RESERVE_SQL)
            .bind(&skus)
            .bind(&quantities)
            .fetch_all(&self.pool)
            .await?;

        let mut taken = BTreeMap::new();
        for row in rows {
            let sku: String = row.try_get("sku")?;
            let qty: i32 = row.try_get("taken")?;
            let qty = from_column_quantity(&sku, i64::from(qty))?;
            if qty > 0 {
                taken.insert(sku, qty);
            }
        }

        debug!(requested = requests.len(), filled = taken.len(), "Reserved stock");
        Ok(taken)
    }

    async fn release(&self, returns: &BTreeMap<String, u32>) -> Result<()> {
        if returns.is_empty() {
            return Ok(());
        }

        let (skus, quantities) = Self::split_columns(returns)?;

        sqlx::query(RELEASE_SQL)
            .bind(&skus)
            .bind(&quantities)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn upsert(&self, delivery: &StockDelivery) -> Result<()> {
        let quantity = to_column_quantity(&delivery.sku, delivery.quantity)?;

        sqlx::query(UPSERT_SQL)
            .bind(&delivery.sku)
            .bind(&delivery.name)
            .bind(&delivery.aisle)
            .bind(quantity)
            .bind(delivery.unit_cost)
            .bind(delivery.mfd_date)
            .bind(delivery.expiry_date)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn sweep_expired(&self, as_of: NaiveDate) -> Result<u64> {
        let result = sqlx::query(SWEEP_SQL)
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
            .to_string(PostgresQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| {
                let sku: String = row.try_get("sku")?;
                let quantity: i32 = row.try_get("quantity")?;
                Ok(StockMetric {
                    quantity: from_column_quantity(&sku, i64::from(quantity))?,
                    unit_cost: row.try_get("unit_cost")?,
                    sku,
                })
            })
            .collect()
    }
}

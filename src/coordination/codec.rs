//! Manifest encoding for the coordination store.

use chrono::NaiveDate;
use prost::Message;

use super::{CoordinationError, Result};
use crate::order::{OrderManifest, StockDelivery};
use crate::proto::{stored_manifest, ClientLines, RestockLines, StoredDelivery, StoredManifest};

const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn encode_manifest(manifest: &OrderManifest) -> Result<Vec<u8>> {
    let lines = match manifest {
        OrderManifest::Client(items) => {
            let quantities = items
                .iter()
                .map(|(sku, qty)| Ok((sku.clone(), to_wire_quantity(sku, *qty)?)))
                .collect::<Result<_>>()?;
            stored_manifest::Lines::Client(ClientLines { quantities })
        }
        OrderManifest::Restock(deliveries) => {
            let lines = deliveries
                .iter()
                .map(|d| {
                    Ok(StoredDelivery {
                        sku: d.sku.clone(),
                        name: d.name.clone(),
                        aisle: d.aisle.clone(),
                        quantity: to_wire_quantity(&d.sku, d.quantity)?,
                        unit_cost: d.unit_cost,
                        mfd_date: d.mfd_date.format(DATE_FORMAT).to_string(),
                        expiry_date: d.expiry_date.format(DATE_FORMAT).to_string(),
                    })
                })
                .collect::<Result<_>>()?;
            stored_manifest::Lines::Restock(RestockLines { lines })
        }
    };

    Ok(StoredManifest { lines: Some(lines) }.encode_to_vec())
}

pub fn decode_manifest(bytes: &[u8]) -> Result<OrderManifest> {
    let stored = StoredManifest::decode(bytes)?;

    match stored.lines {
        Some(stored_manifest::Lines::Client(client)) => {
            let items = client
                .quantities
                .into_iter()
                .map(|(sku, qty)| {
                    let qty = from_wire_quantity(&sku, qty)?;
                    Ok((sku, qty))
                })
                .collect::<Result<_>>()?;
            Ok(OrderManifest::Client(items))
        }
        Some(stored_manifest::Lines::Restock(restock)) => {
            let lines = restock
                .lines
                .into_iter()
                .map(|line| {
                    Ok(StockDelivery {
                        quantity: from_wire_quantity(&line.sku, line.quantity)?,
                        mfd_date: parse_date(&line.sku, &line.mfd_date)?,
                        expiry_date: parse_date(&line.sku, &line.expiry_date)?,
                        sku: line.sku,
                        name: line.name,
                        aisle: line.aisle,
                        unit_cost: line.unit_cost,
                    })
                })
                .collect::<Result<_>>()?;
            Ok(OrderManifest::Restock(lines))
        }
        None => Err(CoordinationError::CorruptManifest(
            "manifest has no lines".to_string(),
        )),
    }
}

fn to_wire_quantity(sku: &str, qty: u32) -> Result<i32> {
    i32::try_from(qty)
        .map_err(|_| CoordinationError::CorruptManifest(format!("quantity {} for {}", qty, sku)))
}

fn from_wire_quantity(sku: &str, qty: i32) -> Result<u32> {
    u32::try_from(qty)
        .map_err(|_| CoordinationError::CorruptManifest(format!("quantity {} for {}", qty, sku)))
}

fn parse_date(sku: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|e| CoordinationError::CorruptManifest(format!("date '{}' for {}: {}", value, sku, e)))
}

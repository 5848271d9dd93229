//! Order vocabulary shared by the ledger, coordination, dispatch and fleet.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;

/// Which partition an order belongs to.
///
/// Client orders are picked from stock and billed; restock orders are
/// stowed into stock and costed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OrderClass {
    Client,
    Restock,
}

impl OrderClass {
    /// Wire tag used in broadcasts and completion reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderClass::Client => "CLIENT",
            OrderClass::Restock => "RESTOCK",
        }
    }

    /// Lowercase token used inside coordination keys.
    pub fn key_segment(&self) -> &'static str {
        match self {
            OrderClass::Client => "client",
            OrderClass::Restock => "restock",
        }
    }
}

impl fmt::Display for OrderClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown order class '{0}'")]
pub struct UnknownOrderClass(pub String);

impl FromStr for OrderClass {
    type Err = UnknownOrderClass;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("CLIENT") {
            Ok(OrderClass::Client)
        } else if s.eq_ignore_ascii_case("RESTOCK") {
            Ok(OrderClass::Restock)
        } else {
            Err(UnknownOrderClass(s.to_string()))
        }
    }
}

/// Identity of an in-flight order: its class plus the caller's opaque id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderKey {
    pub class: OrderClass,
    pub order_id: String,
}

impl OrderKey {
    pub fn new(class: OrderClass, order_id: impl Into<String>) -> Self {
        Self {
            class,
            order_id: order_id.into(),
        }
    }

    pub fn client(order_id: impl Into<String>) -> Self {
        Self::new(OrderClass::Client, order_id)
    }

    pub fn restock(order_id: impl Into<String>) -> Self {
        Self::new(OrderClass::Restock, order_id)
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.class, self.order_id)
    }
}

/// One supplier delivery line.
#[derive(Debug, Clone, PartialEq)]
pub struct StockDelivery {
    pub sku: String,
    pub name: String,
    pub aisle: String,
    pub quantity: u32,
    pub unit_cost: f64,
    pub mfd_date: NaiveDate,
    pub expiry_date: NaiveDate,
}

impl StockDelivery {
    /// Cost of the whole line.
    pub fn line_cost(&self) -> f64 {
        self.unit_cost * f64::from(self.quantity)
    }
}

/// Items captured at dispatch time, retrieved again at settlement.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderManifest {
    /// SKU to requested quantity.
    Client(BTreeMap<String, u32>),
    /// Full delivery lines.
    Restock(Vec<StockDelivery>),
}

impl OrderManifest {
    pub fn class(&self) -> OrderClass {
        match self {
            OrderManifest::Client(_) => OrderClass::Client,
            OrderManifest::Restock(_) => OrderClass::Restock,
        }
    }
}

/// A single unit of robot work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub sku: String,
    pub quantity: u32,
    pub aisle: String,
}

/// Work order broadcast to the fleet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchMessage {
    pub order_id: String,
    pub class: OrderClass,
    pub items: Vec<WorkItem>,
}

/// Outcome a worker reports for one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// The worker handled at least one item in its aisle.
    Success,
    /// Nothing in the order belonged to the worker's aisle.
    NoOp,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Success => "SUCCESS",
            WorkerStatus::NoOp => "NO_OP",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A worker's completion report for one order.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionReport {
    pub key: OrderKey,
    pub worker_id: String,
    /// Free-form status text as reported (`SUCCESS` / `NO_OP`).
    pub status: String,
    /// SKU to quantity handled by the worker. Informational only.
    pub processed: BTreeMap<String, u32>,
}

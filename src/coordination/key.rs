//! Typed coordination keys.
//!
//! Keys render as `{prefix}:{class}:{order_id}:{field}`. The prefix and class
//! are fixed tokens and the field is always the last segment, so order ids
//! containing `:` cannot collide with another order's keys.

use std::fmt;

use crate::order::OrderKey;

/// Which piece of per-order state a key addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyField {
    /// Manifest captured at dispatch.
    Items,
    /// Completion counter.
    Count,
    /// One-shot finalize marker.
    Finalize,
}

impl KeyField {
    pub const ALL: [KeyField; 3] = [KeyField::Items, KeyField::Count, KeyField::Finalize];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyField::Items => "items",
            KeyField::Count => "count",
            KeyField::Finalize => "finalize",
        }
    }
}

/// A fully-qualified coordination key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CoordinationKey {
    pub order: OrderKey,
    pub field: KeyField,
}

impl CoordinationKey {
    pub fn new(order: &OrderKey, field: KeyField) -> Self {
        Self {
            order: order.clone(),
            field,
        }
    }

    pub fn items(order: &OrderKey) -> Self {
        Self::new(order, KeyField::Items)
    }

    pub fn count(order: &OrderKey) -> Self {
        Self::new(order, KeyField::Count)
    }

    pub fn finalize(order: &OrderKey) -> Self {
        Self::new(order, KeyField::Finalize)
    }

    /// Render the storage key under `prefix`.
    pub fn render(&self, prefix: &str) -> String {
        format!("{}:{}", prefix, self)
    }
}

impl fmt::Display for CoordinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.order.class.key_segment(),
            self.order.order_id,
            self.field.as_str()
        )
    }
}

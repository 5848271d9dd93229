//! OTel-native metrics instruments.
//!
//! All instruments are lazily initialized and feature-gated behind `otel`.
//! Naming follows OTel semantic conventions (dot-separated).

use std::sync::LazyLock;

use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::{global, KeyValue};

static METER: LazyLock<Meter> = LazyLock::new(|| global::meter("autogrocer"));

/// Reservation attempts, by outcome (reserved, insufficient, error).
pub static RESERVATION_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("autogrocer.reservation.total")
        .with_description("Total reservation attempts")
        .build()
});

/// Work-order publishes, by class and outcome.
pub static DISPATCH_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("autogrocer.dispatch.total")
        .with_description("Total work orders dispatched to the fleet")
        .build()
});

/// Settlement runs, by class and outcome (settled, failed, timed_out).
pub static SETTLEMENT_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("autogrocer.settlement.total")
        .with_description("Total settlement runs")
        .build()
});

/// Stock records zeroed by the expiry sweeper.
pub static EXPIRED_RECORDS_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("autogrocer.sweeper.expired.total")
        .with_description("Stock records zeroed after expiry")
        .build()
});

/// Create an outcome label.
pub fn outcome_attr(outcome: &str) -> KeyValue {
    KeyValue::new("outcome", outcome.to_string())
}

/// Create an order class label.
pub fn class_attr(class: crate::order::OrderClass) -> KeyValue {
    KeyValue::new("class", class.as_str())
}

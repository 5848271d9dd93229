//! Ephemeral per-order coordination state.
//!
//! Tracks what each in-flight order contains, how many fleet workers have
//! reported, and whether settlement has been claimed. Client and restock
//! orders live in separate partitions.
//!
//! Implementations: Redis (one logical DB per partition), in-memory.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::order::{OrderKey, OrderManifest};

pub mod codec;
pub mod key;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use key::{CoordinationKey, KeyField};
pub use memory::InMemoryCoordinationStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisCoordinationStore;

/// Result type for coordination operations.
pub type Result<T> = std::result::Result<T, CoordinationError>;

/// Errors that can occur during coordination operations.
#[derive(Debug, thiserror::Error)]
pub enum CoordinationError {
    #[error("No coordination state for {0} (never saved or expired)")]
    Missing(OrderKey),

    #[error("Manifest for {key} is a {actual} manifest")]
    ClassMismatch {
        key: OrderKey,
        actual: crate::order::OrderClass,
    },

    #[error("Corrupt manifest: {0}")]
    CorruptManifest(String),

    #[error("Protobuf decode error: {0}")]
    ProtobufDecode(#[from] prost::DecodeError),

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Coordination store unavailable: {0}")]
    Unavailable(String),
}

/// Interface for per-order coordination state.
///
/// Every key written carries the configured TTL.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Store the order manifest.
    async fn save_items(&self, key: &OrderKey, manifest: &OrderManifest) -> Result<()>;

    /// Load the order manifest. Missing or expired state is
    /// `CoordinationError::Missing`, never an empty manifest.
    async fn load_items(&self, key: &OrderKey) -> Result<OrderManifest>;

    /// Atomically add one to the completion counter and return the new value.
    /// The TTL is set when the counter is created.
    async fn increment_completion_count(&self, key: &OrderKey) -> Result<u64>;

    /// Atomically create the finalize marker. Returns `true` only for the
    /// caller that created it.
    async fn try_claim_finalize(&self, key: &OrderKey) -> Result<bool>;

    /// Remove manifest, counter and marker.
    async fn delete_all(&self, key: &OrderKey) -> Result<()>;
}

pub(crate) fn ensure_class(key: &OrderKey, manifest: &OrderManifest) -> Result<()> {
    if manifest.class() != key.class {
        return Err(CoordinationError::ClassMismatch {
            key: key.clone(),
            actual: manifest.class(),
        });
    }
    Ok(())
}

// ============================================================================
// Configuration
// ============================================================================

/// Coordination backend discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinationBackend {
    #[default]
    Memory,
    Redis,
}

/// Coordination store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// Backend discriminator.
    #[serde(rename = "type")]
    pub backend: CoordinationBackend,
    /// Lifetime of every coordination key.
    pub ttl_secs: u64,
    /// Leading key segment.
    pub key_prefix: String,
    /// Redis connection URL.
    pub redis_url: String,
    /// Redis password, overriding any in the URL.
    pub redis_password: Option<String>,
    /// Redis logical DB for client orders.
    pub client_db: i64,
    /// Redis logical DB for restock orders.
    pub restock_db: i64,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            backend: CoordinationBackend::Memory,
            ttl_secs: 3600,
            key_prefix: "order".to_string(),
            redis_url: "redis://localhost:6379".to_string(),
            redis_password: None,
            client_db: 0,
            restock_db: 1,
        }
    }
}

impl CoordinationConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Initialize the coordination store based on configuration.
pub async fn init_coordination(
    config: &CoordinationConfig,
) -> std::result::Result<Arc<dyn CoordinationStore>, Box<dyn std::error::Error>> {
    match config.backend {
        CoordinationBackend::Memory => {
            info!(ttl_secs = config.ttl_secs, "Coordination: in-memory");
            Ok(Arc::new(InMemoryCoordinationStore::new(
                config.ttl(),
                &config.key_prefix,
            )))
        }
        #[cfg(feature = "redis")]
        CoordinationBackend::Redis => {
            let store = RedisCoordinationStore::connect(config).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        CoordinationBackend::Redis => {
            tracing::error!("Redis coordination requested but 'redis' feature is not enabled");
            Err("redis feature not enabled".into())
        }
    }
}

//! In-memory CoordinationStore implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::{ensure_class, CoordinationError, CoordinationKey, CoordinationStore, KeyField, Result};
use crate::order::{OrderKey, OrderManifest};

#[derive(Debug, Clone)]
enum Slot {
    Items(OrderManifest),
    Count(u64),
    Marker,
}

#[derive(Debug)]
struct Entry {
    slot: Slot,
    expires_at: Instant,
}

/// Coordination store held in process memory.
///
/// Expiry follows tokio's clock, so paused-time tests can advance past the
/// TTL deterministically.
pub struct InMemoryCoordinationStore {
    entries: Mutex<HashMap<String, Entry>>,
    ttl: Duration,
    key_prefix: String,
    unavailable: AtomicBool,
}

impl InMemoryCoordinationStore {
    pub fn new(ttl: Duration, key_prefix: &str) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            key_prefix: key_prefix.to_string(),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every subsequent operation fail with `CoordinationError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Whether any live state remains for `key`.
    pub async fn has_state(&self, key: &OrderKey) -> bool {
        let entries = self.entries.lock().await;
        let now = Instant::now();
        KeyField::ALL.iter().any(|field| {
            entries
                .get(&self.render(&CoordinationKey::new(key, *field)))
                .is_some_and(|e| e.expires_at > now)
        })
    }

    /// Number of live keys across both partitions.
    pub async fn live_keys(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    fn render(&self, key: &CoordinationKey) -> String {
        key.render(&self.key_prefix)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CoordinationError::Unavailable(
                "in-memory coordination offline".to_string(),
            ));
        }
        Ok(())
    }

    /// Insert `entry`, dropping every expired entry first so orders that
    /// never settle do not accumulate.
    fn insert_live(entries: &mut HashMap<String, Entry>, key: String, entry: Entry) {
        let now = Instant::now();
        entries.retain(|_, e| e.expires_at > now);
        entries.insert(key, entry);
    }

    /// Drop `key` if its TTL has passed and return the live entry, if any.
    fn live<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
        let now = Instant::now();
        if entries.get(key).is_some_and(|e| e.expires_at <= now) {
            entries.remove(key);
        }
        entries.get_mut(key)
    }
}

impl Default for InMemoryCoordinationStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600), "order")
    }
}

#[async_trait]
impl CoordinationStore for InMemoryCoordinationStore {
    async fn save_items(&self, key: &OrderKey, manifest: &OrderManifest) -> Result<()> {
        self.check_available()?;
        ensure_class(key, manifest)?;

        let rendered = self.render(&CoordinationKey::items(key));
        let entry = Entry {
            slot: Slot::Items(manifest.clone()),
            expires_at: Instant::now() + self.ttl,
        };
        Self::insert_live(&mut *self.entries.lock().await, rendered, entry);

        debug!(order = %key, "Saved order manifest");
        Ok(())
    }

    async fn load_items(&self, key: &OrderKey) -> Result<OrderManifest> {
        self.check_available()?;

        let rendered = self.render(&CoordinationKey::items(key));
        let mut entries = self.entries.lock().await;
        match Self::live(&mut entries, &rendered) {
            Some(Entry {
                slot: Slot::Items(manifest),
                ..
            }) => Ok(manifest.clone()),
            _ => Err(CoordinationError::Missing(key.clone())),
        }
    }

    async fn increment_completion_count(&self, key: &OrderKey) -> Result<u64> {
        self.check_available()?;

        let rendered = self.render(&CoordinationKey::count(key));
        let mut entries = self.entries.lock().await;
        if let Some(Entry {
            slot: Slot::Count(count),
            ..
        }) = Self::live(&mut entries, &rendered)
        {
            *count += 1;
            return Ok(*count);
        }

        Self::insert_live(
            &mut entries,
            rendered,
            Entry {
                slot: Slot::Count(1),
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(1)
    }

    async fn try_claim_finalize(&self, key: &OrderKey) -> Result<bool> {
        self.check_available()?;

        let rendered = self.render(&CoordinationKey::finalize(key));
        let mut entries = self.entries.lock().await;
        if Self::live(&mut entries, &rendered).is_some() {
            return Ok(false);
        }

        Self::insert_live(
            &mut entries,
            rendered,
            Entry {
                slot: Slot::Marker,
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(true)
    }

    async fn delete_all(&self, key: &OrderKey) -> Result<()> {
        self.check_available()?;

        let mut entries = self.entries.lock().await;
        for field in KeyField::ALL {
            entries.remove(&self.render(&CoordinationKey::new(key, field)));
        }
        Ok(())
    }
}

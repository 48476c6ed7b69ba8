//! Three-tier element existence cache.
//!
//! Lookups go memory tier (bounded LRU) → transient tier (short-lived
//! entries for menus and other passing surfaces) → durable store. A durable
//! hit is promoted into the memory tier.

use crate::errors::StorageError;
use crate::fingerprint::ElementHash;
use crate::models::ElementRecord;
use crate::store::{NavigationGraphStore, WriteOutcome};
use chrono::Utc;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries kept in the in-memory tier before LRU eviction
    pub memory_capacity: usize,
    /// Lifetime of entries registered from transient surfaces
    pub transient_ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_capacity: 1000,
            transient_ttl_ms: 30_000,
        }
    }
}

/// Where an element is expected to live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    /// Part of a screen; cached in the memory tier
    Screen,
    /// Part of a menu, popup or dialog; cached in the transient tier
    Transient,
}

/// Counter snapshot of an [`ElementDeduplicationCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub transient_hits: u64,
    pub durable_hits: u64,
    pub misses: u64,
    pub registrations: u64,
    pub memory_entries: usize,
    pub transient_entries: usize,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.memory_hits + self.transient_hits + self.durable_hits
    }

    pub fn lookups(&self) -> u64 {
        self.hits() + self.misses
    }

    /// Fraction of lookups answered without a miss; 0 with no lookups.
    pub fn hit_rate(&self) -> f64 {
        match self.lookups() {
            0 => 0.0,
            n => self.hits() as f64 / n as f64,
        }
    }
}

/// Implemented by components that expose cache counters to observers.
pub trait CacheStatsSource: Send + Sync {
    fn cache_stats(&self) -> CacheStats;
}

#[derive(Default)]
struct Counters {
    memory_hits: AtomicU64,
    transient_hits: AtomicU64,
    durable_hits: AtomicU64,
    misses: AtomicU64,
    registrations: AtomicU64,
}

pub struct ElementDeduplicationCache {
    store: Arc<NavigationGraphStore>,
    memory: Mutex<LruCache<ElementHash, ()>>,
    transient: Mutex<HashMap<ElementHash, Instant>>,
    transient_ttl: Duration,
    counters: Counters,
}

impl ElementDeduplicationCache {
    pub fn new(store: Arc<NavigationGraphStore>, config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.memory_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            memory: Mutex::new(LruCache::new(capacity)),
            transient: Mutex::new(HashMap::new()),
            transient_ttl: Duration::from_millis(config.transient_ttl_ms),
            counters: Counters::default(),
        }
    }

    /// Whether the element is known in any tier.
    pub async fn exists(&self, hash: &ElementHash) -> Result<bool, StorageError> {
        if self.lock_memory().get(hash).is_some() {
            self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
            trace!(element_hash = %hash, "memory tier hit");
            return Ok(true);
        }

        if self.transient_contains(hash) {
            self.counters.transient_hits.fetch_add(1, Ordering::Relaxed);
            trace!(element_hash = %hash, "transient tier hit");
            return Ok(true);
        }

        if self.store.get_element(hash).await?.is_some() {
            self.counters.durable_hits.fetch_add(1, Ordering::Relaxed);
            self.lock_memory().put(hash.clone(), ());
            trace!(element_hash = %hash, "durable tier hit");
            return Ok(true);
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        Ok(false)
    }

    /// Persist `record` unless its hash is already known. Returns `true`
    /// exactly once per distinct hash.
    pub async fn register_if_new(&self, record: ElementRecord) -> Result<bool, StorageError> {
        self.register_with(record, Residency::Screen).await
    }

    pub async fn register_with(
        &self,
        record: ElementRecord,
        residency: Residency,
    ) -> Result<bool, StorageError> {
        if self.exists(&record.hash).await? {
            return Ok(false);
        }
        self.insert(record, residency).await
    }

    /// Like [`register_with`](Self::register_with), but a known element has
    /// its seen count and last-seen time bumped instead.
    pub async fn register_or_touch(
        &self,
        record: ElementRecord,
        residency: Residency,
    ) -> Result<bool, StorageError> {
        if self.exists(&record.hash).await? {
            self.touch(&record.hash).await?;
            return Ok(false);
        }
        self.insert(record, residency).await
    }

    async fn insert(&self, record: ElementRecord, residency: Residency) -> Result<bool, StorageError> {
        match self.store.upsert_element(&record).await? {
            WriteOutcome::Inserted => {
                self.counters.registrations.fetch_add(1, Ordering::Relaxed);
                self.remember(&record.hash, residency);
                debug!(element_hash = %record.hash, ?residency, "Registered element");
                Ok(true)
            }
            // Someone else inserted it between lookup and write
            WriteOutcome::Updated => {
                self.remember(&record.hash, residency);
                Ok(false)
            }
            WriteOutcome::Rejected => Ok(false),
        }
    }

    /// Update last-seen and seen-count of a known element.
    pub async fn touch(&self, hash: &ElementHash) -> Result<bool, StorageError> {
        let touched = self.store.touch_element(hash, Utc::now()).await?;
        if touched {
            self.lock_memory().put(hash.clone(), ());
        }
        Ok(touched)
    }

    /// Drop the in-memory tier. The durable tier still answers afterwards.
    pub fn clear_memory_tier(&self) {
        self.lock_memory().clear();
    }

    pub fn clear_transient_tier(&self) {
        self.lock_transient().clear();
    }

    pub fn reset_stats(&self) {
        for counter in [
            &self.counters.memory_hits,
            &self.counters.transient_hits,
            &self.counters.durable_hits,
            &self.counters.misses,
            &self.counters.registrations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn remember(&self, hash: &ElementHash, residency: Residency) {
        match residency {
            Residency::Screen => {
                self.lock_memory().put(hash.clone(), ());
            }
            Residency::Transient => {
                self.lock_transient()
                    .insert(hash.clone(), Instant::now() + self.transient_ttl);
            }
        }
    }

    fn transient_contains(&self, hash: &ElementHash) -> bool {
        let mut transient = self.lock_transient();
        let now = Instant::now();
        transient.retain(|_, expires| *expires > now);
        transient.contains_key(hash)
    }

    fn lock_memory(&self) -> MutexGuard<'_, LruCache<ElementHash, ()>> {
        match self.memory.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_transient(&self) -> MutexGuard<'_, HashMap<ElementHash, Instant>> {
        match self.transient.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl CacheStatsSource for ElementDeduplicationCache {
    fn cache_stats(&self) -> CacheStats {
        CacheStats {
            memory_hits: self.counters.memory_hits.load(Ordering::Relaxed),
            transient_hits: self.counters.transient_hits.load(Ordering::Relaxed),
            durable_hits: self.counters.durable_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            registrations: self.counters.registrations.load(Ordering::Relaxed),
            memory_entries: self.lock_memory().len(),
            transient_entries: self.lock_transient().len(),
        }
    }
}

//! In-memory tier backend
//!
//! Uses DashMap for lock-free concurrent access: one outer map of tiers,
//! each holding its own map of entries.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::cache::entry::{CachedEntry, ResourceKey};
use crate::domain::ports::{BackendStats, TierBackend};
use crate::error::{Error, Result};

/// In-memory backend, optionally bounded by a byte quota
pub struct InMemoryTierBackend {
    /// Storage (tier -> key -> entry)
    storage: DashMap<String, DashMap<ResourceKey, CachedEntry>>,
    /// Maximum total body bytes (None = unbounded)
    quota_bytes: Option<u64>,
    /// Statistics
    entry_count: AtomicU64,
    total_bytes: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
    tier_deletes: AtomicU64,
}

impl Default for InMemoryTierBackend {
    fn default() -> Self {
        Self {
            storage: DashMap::new(),
            quota_bytes: None,
            entry_count: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            tier_deletes: AtomicU64::new(0),
        }
    }
}

impl InMemoryTierBackend {
    /// Create a new unbounded in-memory backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend that rejects writes beyond `quota_bytes` of body data
    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            quota_bytes: Some(quota_bytes),
            ..Self::default()
        }
    }
}

#[async_trait]
impl TierBackend for InMemoryTierBackend {
    async fn get(&self, tier: &str, key: &ResourceKey) -> Result<Option<CachedEntry>> {
        self.reads.fetch_add(1, Ordering::Relaxed);

        if let Some(tier_data) = self.storage.get(tier) {
            if let Some(entry) = tier_data.get(key) {
                return Ok(Some(entry.clone()));
            }
        }
        Ok(None)
    }

    async fn put(&self, tier: &str, entry: CachedEntry) -> Result<()> {
        let size = entry.size();

        if let Some(quota) = self.quota_bytes {
            let replaced = self
                .storage
                .get(tier)
                .and_then(|t| t.get(&entry.key).map(|e| e.size()))
                .unwrap_or(0);
            let projected = self
                .total_bytes
                .load(Ordering::Relaxed)
                .saturating_sub(replaced)
                + size;
            if projected > quota {
                return Err(Error::QuotaExceeded(format!(
                    "storing {} bytes for {} would exceed quota of {} bytes",
                    size, entry.key, quota
                )));
            }
        }

        self.writes.fetch_add(1, Ordering::Relaxed);

        let tier_data = self
            .storage
            .entry(tier.to_string())
            .or_insert_with(DashMap::new);

        let old = tier_data.insert(entry.key.clone(), entry);

        if let Some(old_entry) = old {
            let old_size = old_entry.size();
            if size > old_size {
                self.total_bytes
                    .fetch_add(size - old_size, Ordering::Relaxed);
            } else {
                self.total_bytes
                    .fetch_sub(old_size - size, Ordering::Relaxed);
            }
        } else {
            self.entry_count.fetch_add(1, Ordering::Relaxed);
            self.total_bytes.fetch_add(size, Ordering::Relaxed);
        }

        Ok(())
    }

    async fn keys(&self, tier: &str) -> Result<Vec<ResourceKey>> {
        self.reads.fetch_add(1, Ordering::Relaxed);

        Ok(self
            .storage
            .get(tier)
            .map(|t| t.iter().map(|e| e.key().clone()).collect())
            .unwrap_or_default())
    }

    async fn tier_names(&self) -> Result<Vec<String>> {
        Ok(self.storage.iter().map(|t| t.key().clone()).collect())
    }

    async fn delete_tier(&self, tier: &str) -> Result<bool> {
        match self.storage.remove(tier) {
            Some((_, tier_data)) => {
                self.tier_deletes.fetch_add(1, Ordering::Relaxed);
                let bytes: u64 = tier_data.iter().map(|e| e.size()).sum();
                self.entry_count
                    .fetch_sub(tier_data.len() as u64, Ordering::Relaxed);
                self.total_bytes.fetch_sub(bytes, Ordering::Relaxed);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn stats(&self) -> BackendStats {
        BackendStats {
            entry_count: self.entry_count.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            tier_deletes: self.tier_deletes.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

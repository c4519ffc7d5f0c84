//! Tiered Store
//!
//! Named tiers over a [`TierBackend`]. The store is the only writer of
//! entries and enforces that only success responses are persisted.
//!
//! # Search order
//!
//! ```text
//! match_any(key)
//!   │
//!   ├─▶ declared tiers, in declaration order
//!   │     static ─▶ runtime ─▶ api ─▶ images
//!   │
//!   └─▶ undeclared tiers present in the backend, sorted by name
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::entry::{CachedEntry, CachedResponse, ResourceKey};
use super::metrics::CacheMetrics;
use super::tier::{Retention, TierSet};
use crate::domain::ports::{Clock, TierBackend};
use crate::error::Result;

/// Per-tier summary reported by [`TieredStore::status`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierStatus {
    /// Number of entries
    pub size: usize,
    /// Entry URLs, sorted
    pub urls: Vec<String>,
}

/// Outcome of pruning undeclared tiers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Tiers deleted
    pub pruned: Vec<String>,
    /// Tiers that could not be deleted (name, reason)
    pub failed: Vec<(String, String)>,
}

/// Named-tier view over a backend
#[derive(Clone)]
pub struct TieredStore {
    backend: Arc<dyn TierBackend>,
    tiers: TierSet,
    clock: Arc<dyn Clock>,
    metrics: Arc<CacheMetrics>,
}

impl TieredStore {
    pub fn new(
        backend: Arc<dyn TierBackend>,
        tiers: TierSet,
        clock: Arc<dyn Clock>,
        metrics: Arc<CacheMetrics>,
    ) -> Self {
        Self {
            backend,
            tiers,
            clock,
            metrics,
        }
    }

    /// Declared tiers
    pub fn tiers(&self) -> &TierSet {
        &self.tiers
    }

    pub fn backend(&self) -> &Arc<dyn TierBackend> {
        &self.backend
    }

    /// Look up `key` in `tier`.
    ///
    /// Backend errors are logged and reported as a miss.
    pub async fn lookup(&self, tier: &str, key: &ResourceKey) -> Option<CachedEntry> {
        match self.backend.get(tier, key).await {
            Ok(Some(entry)) => {
                self.metrics.record_hit();
                debug!("Cache hit in {} for {}", tier, key);
                Some(entry)
            }
            Ok(None) => {
                self.metrics.record_miss();
                debug!("Cache miss in {} for {}", tier, key);
                None
            }
            Err(e) => {
                self.metrics.record_miss();
                warn!("Lookup in tier {} failed for {}: {}", tier, key, e);
                None
            }
        }
    }

    /// Persist `response` under `key` in `tier`, stamped with the current time.
    ///
    /// Returns false without touching the backend for non-success responses,
    /// and false when the backend refuses the write.
    pub async fn store(&self, tier: &str, key: &ResourceKey, response: &CachedResponse) -> bool {
        if !response.is_success() {
            debug!(
                "Not storing {} response for {} in {}",
                response.status, key, tier
            );
            return false;
        }

        let entry = CachedEntry::new(key.clone(), response.clone(), self.clock.now());
        match self.backend.put(tier, entry).await {
            Ok(()) => {
                debug!("Stored {} in {} ({} bytes)", key, tier, response.size());
                true
            }
            Err(e) => {
                self.metrics.record_write_rejection();
                warn!("Write to tier {} rejected for {}: {}", tier, key, e);
                false
            }
        }
    }

    /// Search every tier for `key`; first match wins
    pub async fn match_any(&self, key: &ResourceKey) -> Option<(String, CachedEntry)> {
        for tier in self.search_order().await {
            match self.backend.get(&tier, key).await {
                Ok(Some(entry)) => return Some((tier, entry)),
                Ok(None) => {}
                Err(e) => warn!("Fallback lookup in tier {} failed for {}: {}", tier, key, e),
            }
        }
        None
    }

    /// Declared tiers first, then any other backend tier by name
    async fn search_order(&self) -> Vec<String> {
        let mut order = self.tiers.names();
        let mut others: Vec<String> = match self.backend.tier_names().await {
            Ok(names) => names
                .into_iter()
                .filter(|name| self.tiers.get(name).is_none())
                .collect(),
            Err(e) => {
                warn!("Failed to list tiers: {}", e);
                Vec::new()
            }
        };
        others.sort();
        order.extend(others);
        order
    }

    /// Delete one tier, or every tier present when `tier` is None.
    ///
    /// Returns the tiers that were actually deleted.
    pub async fn clear(&self, tier: Option<&str>) -> Result<Vec<String>> {
        let targets = match tier {
            Some(name) => vec![name.to_string()],
            None => {
                let mut names = self.backend.tier_names().await?;
                names.sort();
                names
            }
        };

        let mut cleared = Vec::with_capacity(targets.len());
        for name in targets {
            if self.backend.delete_tier(&name).await? {
                debug!("Cleared tier {}", name);
                cleared.push(name);
            }
        }
        Ok(cleared)
    }

    /// Delete every backend tier that the declared set does not keep.
    ///
    /// Per-tier failures are recorded and skipped.
    pub async fn prune(&self) -> Result<PruneReport> {
        let mut names = self.backend.tier_names().await?;
        names.sort();

        let mut report = PruneReport::default();
        for name in names {
            if self.tiers.retention_of(&name) == Retention::Keep {
                continue;
            }
            match self.backend.delete_tier(&name).await {
                Ok(_) => report.pruned.push(name),
                Err(e) => {
                    warn!("Failed to prune tier {}: {}", name, e);
                    report.failed.push((name, e.to_string()));
                }
            }
        }
        Ok(report)
    }

    /// Size and URLs of every tier present in the backend
    pub async fn status(&self) -> Result<BTreeMap<String, TierStatus>> {
        let mut status = BTreeMap::new();
        for name in self.backend.tier_names().await? {
            let mut urls: Vec<String> = self
                .backend
                .keys(&name)
                .await?
                .into_iter()
                .map(|k| k.as_str().to_string())
                .collect();
            urls.sort();
            status.insert(
                name,
                TierStatus {
                    size: urls.len(),
                    urls,
                },
            );
        }
        Ok(status)
    }
}

// =============================================================================
// Tests
// =============================================================================

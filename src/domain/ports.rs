//! Domain Ports (Port/Adapter Pattern)
//!
//! Abstractions the cache layer depends on. Adapters in [`crate::adapters`]
//! provide the concrete network client, stores, clocks and event sinks.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Cache Layer                             │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │  Fetcher │ TierBackend │ Clock │ EventPublisher      │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │  HttpFetcher │ InMemory/Fs backends │ SystemClock   │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::events::CacheEvent;
use crate::cache::control::{ControlCommand, ControlReply};
use crate::cache::entry::{CachedEntry, CachedResponse, InterceptedRequest, ResourceKey};
use crate::cache::strategy::Intercepted;
use crate::error::Result;

// =============================================================================
// Network
// =============================================================================

/// The network fetch primitive.
///
/// Resolves with whatever the origin answered (any status). Transport-level
/// failures are reported as [`crate::Error::Network`]. Implementations must
/// not impose their own caching.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &InterceptedRequest) -> Result<CachedResponse>;
}

// =============================================================================
// Storage
// =============================================================================

/// Per-tier persistent keyed map.
///
/// Writes replace entries wholesale (last writer wins). Tiers spring into
/// existence on first write and disappear only through `delete_tier`.
#[async_trait]
pub trait TierBackend: Send + Sync {
    /// Read an entry
    async fn get(&self, tier: &str, key: &ResourceKey) -> Result<Option<CachedEntry>>;

    /// Insert or replace an entry
    async fn put(&self, tier: &str, entry: CachedEntry) -> Result<()>;

    /// Keys held by a tier (empty if the tier does not exist)
    async fn keys(&self, tier: &str) -> Result<Vec<ResourceKey>>;

    /// Names of every tier present in the store
    async fn tier_names(&self) -> Result<Vec<String>>;

    /// Delete a whole tier; false if it did not exist
    async fn delete_tier(&self, tier: &str) -> Result<bool>;

    /// Get storage statistics
    fn stats(&self) -> BackendStats;
}

/// Backend statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendStats {
    /// Total entries stored
    pub entry_count: u64,
    /// Total body bytes stored
    pub total_bytes: u64,
    /// Read operations
    pub reads: u64,
    /// Write operations
    pub writes: u64,
    /// Tier deletions
    pub tier_deletes: u64,
}

// =============================================================================
// Time
// =============================================================================

/// Wall-clock source for freshness stamps
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

// =============================================================================
// Events
// =============================================================================

/// Sink for domain events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: CacheEvent) -> Result<()>;
}

// =============================================================================
// Embedding interface
// =============================================================================

/// What an embedding runtime (edge worker, local proxy, app shell) drives.
#[async_trait]
pub trait InterceptionLayer: Send + Sync {
    /// Pre-warm the static tier; fatal on any seed failure
    async fn install(&self) -> Result<()>;

    /// Prune foreign tiers and take over interception
    async fn activate(&self) -> Result<()>;

    /// Serve one outbound request
    async fn intercept(&self, request: InterceptedRequest) -> Result<Intercepted>;

    /// Execute one parsed control command
    async fn handle_control(&self, command: ControlCommand) -> Result<ControlReply>;
}

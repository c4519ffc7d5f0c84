//! Domain Events
//!
//! Immutable records of lifecycle transitions, management commands and
//! background failures, used for audit logging and for tests that observe
//! what the layer did without reaching into its internals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A significant occurrence in the cache layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CacheEvent {
    // =========================================================================
    // Lifecycle Events
    // =========================================================================
    /// Seeding finished and the version is waiting to activate.
    Installed {
        seeded: usize,
        timestamp: DateTime<Utc>,
    },

    /// A seed fetch failed; the version stays in `installing`.
    InstallFailed {
        url: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The version took over interception.
    Activated {
        pruned: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// A foreign tier could not be deleted during activation.
    TierPruneFailed {
        tier: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Control Events
    // =========================================================================
    /// Tiers were deleted by a clear command.
    TiersCleared {
        tiers: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// A bulk seed command finished.
    CacheUpdated {
        stored: usize,
        failed: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Background Events
    // =========================================================================
    /// A background revalidation could not refresh an entry.
    RevalidationFailed {
        url: String,
        tier: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl CacheEvent {
    /// Event type name for logging.
    pub fn event_type(&self) -> &'static str {
        match self {
            CacheEvent::Installed { .. } => "Installed",
            CacheEvent::InstallFailed { .. } => "InstallFailed",
            CacheEvent::Activated { .. } => "Activated",
            CacheEvent::TierPruneFailed { .. } => "TierPruneFailed",
            CacheEvent::TiersCleared { .. } => "TiersCleared",
            CacheEvent::CacheUpdated { .. } => "CacheUpdated",
            CacheEvent::RevalidationFailed { .. } => "RevalidationFailed",
        }
    }

    /// When the event happened.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            CacheEvent::Installed { timestamp, .. }
            | CacheEvent::InstallFailed { timestamp, .. }
            | CacheEvent::Activated { timestamp, .. }
            | CacheEvent::TierPruneFailed { timestamp, .. }
            | CacheEvent::TiersCleared { timestamp, .. }
            | CacheEvent::CacheUpdated { timestamp, .. }
            | CacheEvent::RevalidationFailed { timestamp, .. } => *timestamp,
        }
    }

    /// True for events that indicate something went wrong.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            CacheEvent::InstallFailed { .. }
                | CacheEvent::TierPruneFailed { .. }
                | CacheEvent::RevalidationFailed { .. }
        )
    }
}

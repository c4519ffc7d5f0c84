//! Freshness Tracker
//!
//! Decides whether a stored entry is young enough for its tier.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::entry::CachedEntry;
use super::tier::{MaxAge, TierSpec};
use crate::domain::ports::Clock;

/// Entry age checks against the tier max-age
#[derive(Clone)]
pub struct FreshnessTracker {
    clock: Arc<dyn Clock>,
}

impl FreshnessTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Age of `entry` at `now`; zero if the entry claims to be from the future
    pub fn age_at(entry: &CachedEntry, now: DateTime<Utc>) -> Duration {
        (now - entry.stored_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Age of `entry` right now
    pub fn age(&self, entry: &CachedEntry) -> Duration {
        Self::age_at(entry, self.clock.now())
    }

    /// Unbounded tiers are always fresh, bounded tiers while `age < max_age`
    pub fn is_fresh(&self, entry: &CachedEntry, tier: &TierSpec) -> bool {
        match tier.max_age {
            MaxAge::Unbounded => true,
            MaxAge::Within(max_age) => self.age(entry) < max_age,
        }
    }
}

//! Event Publisher Adapters
//!
//! `LoggingEventPublisher` turns cache events into structured `tracing`
//! records, one field per event attribute. `InMemoryEventCollector` keeps
//! them for assertions.

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn, Level};

use crate::domain::events::CacheEvent;
use crate::domain::ports::EventPublisher;
use crate::error::Result;

/// Writes cache events to the log.
///
/// Failures always go out at warn; everything else at the configured level.
#[derive(Debug, Clone)]
pub struct LoggingEventPublisher {
    level: Level,
}

impl Default for LoggingEventPublisher {
    fn default() -> Self {
        Self::debug_level()
    }
}

impl LoggingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lifecycle and control events at info
    pub fn info_level() -> Self {
        Self { level: Level::INFO }
    }

    pub fn debug_level() -> Self {
        Self { level: Level::DEBUG }
    }
}

/// Emit at info or debug according to `$level`
macro_rules! emit {
    ($level:expr, $($arg:tt)+) => {
        if $level == Level::INFO {
            info!($($arg)+)
        } else {
            debug!($($arg)+)
        }
    };
}

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(&self, event: CacheEvent) -> Result<()> {
        match &event {
            CacheEvent::Installed { seeded, .. } => {
                emit!(self.level, seeded, "Version installed, waiting to activate")
            }
            CacheEvent::Activated { pruned, .. } => {
                emit!(self.level, pruned = ?pruned, "Version activated")
            }
            CacheEvent::TiersCleared { tiers, .. } => {
                emit!(self.level, tiers = ?tiers, "Tiers cleared")
            }
            CacheEvent::CacheUpdated { stored, failed, .. } => {
                emit!(self.level, stored, failed = ?failed, "Bulk seed finished")
            }
            CacheEvent::InstallFailed { url, reason, .. } => {
                warn!(url = %url, reason = %reason, "Seed fetch failed, install aborted")
            }
            CacheEvent::TierPruneFailed { tier, reason, .. } => {
                warn!(tier = %tier, reason = %reason, "Could not prune tier")
            }
            CacheEvent::RevalidationFailed { url, tier, reason, .. } => {
                warn!(url = %url, tier = %tier, reason = %reason, "Background refresh failed")
            }
        }
        Ok(())
    }
}

/// Collects events for later inspection in tests
#[derive(Debug, Default)]
pub struct InMemoryEventCollector {
    events: RwLock<Vec<CacheEvent>>,
}

impl InMemoryEventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CacheEvent> {
        self.events.read().clone()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Events whose `event_type()` is `event_type`
    pub fn events_of_type(&self, event_type: &str) -> Vec<CacheEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }

    /// Events that report something going wrong
    pub fn failures(&self) -> Vec<CacheEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.is_failure())
            .cloned()
            .collect()
    }

    /// URLs whose background refresh failed, oldest first
    pub fn failed_refreshes(&self) -> Vec<String> {
        self.events
            .read()
            .iter()
            .filter_map(|e| match e {
                CacheEvent::RevalidationFailed { url, .. } => Some(url.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventCollector {
    async fn publish(&self, event: CacheEvent) -> Result<()> {
        self.events.write().push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn cleared(tiers: &[&str]) -> CacheEvent {
        CacheEvent::TiersCleared {
            tiers: tiers.iter().map(|t| t.to_string()).collect(),
            timestamp: Utc::now(),
        }
    }

    fn refresh_failed(url: &str) -> CacheEvent {
        CacheEvent::RevalidationFailed {
            url: url.into(),
            tier: "runtime".into(),
            reason: "offline".into(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_logging_publisher_accepts_every_event() {
        let now = Utc::now();
        let events = vec![
            CacheEvent::Installed { seeded: 3, timestamp: now },
            CacheEvent::Activated { pruned: vec!["static-v1".into()], timestamp: now },
            cleared(&["api"]),
            CacheEvent::CacheUpdated { stored: 1, failed: vec!["/x".into()], timestamp: now },
            CacheEvent::InstallFailed { url: "/".into(), reason: "503".into(), timestamp: now },
            CacheEvent::TierPruneFailed { tier: "old".into(), reason: "busy".into(), timestamp: now },
            refresh_failed("https://example.com/"),
        ];

        for publisher in [LoggingEventPublisher::info_level(), LoggingEventPublisher::new()] {
            for event in events.clone() {
                publisher.publish(event).await.unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_in_memory_collector() {
        let collector = InMemoryEventCollector::new();
        assert!(collector.is_empty());

        collector.publish(cleared(&["api"])).await.unwrap();
        collector.publish(refresh_failed("https://example.com/a")).await.unwrap();
        collector.publish(cleared(&["static", "runtime"])).await.unwrap();
        collector.publish(refresh_failed("https://example.com/b")).await.unwrap();

        assert_eq!(collector.len(), 4);
        assert_eq!(collector.events_of_type("TiersCleared").len(), 2);
        assert_eq!(collector.failures().len(), 2);
        assert_eq!(
            collector.failed_refreshes(),
            vec!["https://example.com/a", "https://example.com/b"]
        );

        collector.clear();
        assert!(collector.is_empty());
    }
}

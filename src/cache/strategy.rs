//! Strategy Handlers
//!
//! One handler per caching strategy. Every handler that may touch the
//! network spawns exactly one fetch task per invocation. The task writes
//! successful responses back to the tier on its own, so a caller that stops
//! waiting (or is dropped) never prevents the cache from being populated.
//!
//! ```text
//!                 ┌──────────────┐
//!   request ────▶ │   handler    │───────────────▶ Intercepted
//!                 └──────┬───────┘  (cache hit / fresh entry)
//!                        │ tokio::spawn
//!                        ▼
//!                 ┌──────────────┐  2xx   ┌──────────────┐
//!                 │  fetch task  │──────▶ │ TieredStore  │
//!                 └──────┬───────┘        └──────────────┘
//!                        │ transport failure
//!                        ▼
//!        background: FailureLog + RevalidationFailed event
//!        awaited:    network failure, answered by the caller
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::classify::ResourceClass;
use super::entry::{CachedEntry, CachedResponse, InterceptedRequest};
use super::freshness::FreshnessTracker;
use super::metrics::CacheMetrics;
use super::offline::{OfflineAnswer, OfflineResolver};
use super::store::TieredStore;
use super::tier::TierSpec;
use crate::domain::events::CacheEvent;
use crate::domain::ports::{Clock, EventPublisher, Fetcher};
use crate::error::Result;

/// Default number of background failures retained
pub const DEFAULT_FAILURE_LOG_CAPACITY: usize = 64;

/// Whether a caller waits on a fetch task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchMode {
    /// The caller awaits the outcome and handles a failure itself
    Awaited,
    /// The caller already answered from the tier; the task reports its own failure
    Background,
}

// =============================================================================
// Results
// =============================================================================

/// Where a response came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseSource {
    /// Stored entry served by the strategy's own tier
    Cache { tier: String },
    /// Live network response
    Network,
    /// Expired entry served because the network could not answer well
    StaleFallback { tier: String },
    /// Synthesized 503
    Offline,
    /// Entry found in some tier by the offline resolver
    Fallback { tier: String },
}

impl fmt::Display for ResponseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseSource::Cache { tier } => write!(f, "cache:{}", tier),
            ResponseSource::Network => write!(f, "network"),
            ResponseSource::StaleFallback { tier } => write!(f, "stale:{}", tier),
            ResponseSource::Offline => write!(f, "offline"),
            ResponseSource::Fallback { tier } => write!(f, "fallback:{}", tier),
        }
    }
}

/// A served request
#[derive(Debug, Clone)]
pub struct Intercepted {
    pub response: CachedResponse,
    pub source: ResponseSource,
    pub class: ResourceClass,
}

impl Intercepted {
    fn new(response: CachedResponse, source: ResponseSource, class: ResourceClass) -> Self {
        Self {
            response,
            source,
            class,
        }
    }
}

// =============================================================================
// Failure log
// =============================================================================

/// A background fetch that did not complete
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackgroundFailure {
    pub url: String,
    pub tier: String,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Bounded record of background failures; the oldest entry is dropped first
#[derive(Debug)]
pub struct FailureLog {
    entries: Mutex<VecDeque<BackgroundFailure>>,
    capacity: usize,
}

impl FailureLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn record(&self, failure: BackgroundFailure) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(failure);
    }

    /// Retained failures, oldest first
    pub fn entries(&self) -> Vec<BackgroundFailure> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for FailureLog {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_LOG_CAPACITY)
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Shared state of the strategy handlers
#[derive(Clone)]
pub struct Strategies {
    store: TieredStore,
    freshness: FreshnessTracker,
    fetcher: Arc<dyn Fetcher>,
    offline: OfflineResolver,
    clock: Arc<dyn Clock>,
    metrics: Arc<CacheMetrics>,
    events: Arc<dyn EventPublisher>,
    failures: Arc<FailureLog>,
}

impl Strategies {
    pub fn new(
        store: TieredStore,
        fetcher: Arc<dyn Fetcher>,
        clock: Arc<dyn Clock>,
        metrics: Arc<CacheMetrics>,
        events: Arc<dyn EventPublisher>,
        failures: Arc<FailureLog>,
    ) -> Self {
        Self {
            freshness: FreshnessTracker::new(clock.clone()),
            offline: OfflineResolver::new(store.clone()),
            store,
            fetcher,
            clock,
            metrics,
            events,
            failures,
        }
    }

    /// Pass straight to the network; never reads or writes a tier.
    ///
    /// Transport failures are returned unchanged.
    pub async fn network_only(
        &self,
        request: &InterceptedRequest,
        class: ResourceClass,
    ) -> Result<Intercepted> {
        self.metrics.record_bypass();
        self.metrics.record_network_fetch();
        match self.fetcher.fetch(request).await {
            Ok(response) => Ok(Intercepted::new(response, ResponseSource::Network, class)),
            Err(e) => {
                self.metrics.record_network_failure();
                Err(e)
            }
        }
    }

    /// Serve from the tier whenever possible; go to the network only on a miss
    pub async fn cache_first(
        &self,
        request: &InterceptedRequest,
        tier: &TierSpec,
        class: ResourceClass,
    ) -> Intercepted {
        if let Some(key) = request.key() {
            if let Some(entry) = self.store.lookup(&tier.name, &key).await {
                return self.from_cache(entry, tier, class);
            }
        }

        let task = self.spawn_fetch(request, tier, FetchMode::Awaited);
        match self.join(task).await {
            Some(response) => Intercepted::new(response, ResponseSource::Network, class),
            None => self.offline(request, class).await,
        }
    }

    /// Fresh entries are served at once; otherwise wait on the network and
    /// fall back to the stale entry, then to the offline resolver.
    ///
    /// A non-2xx answer counts as a failure only when there is an entry to
    /// fall back to. Without one the origin's response is passed through
    /// unstored, so the application sees the real status instead of a 503.
    pub async fn network_first(
        &self,
        request: &InterceptedRequest,
        tier: &TierSpec,
        class: ResourceClass,
    ) -> Intercepted {
        let cached = self.lookup(request, tier).await;

        if let Some(entry) = &cached {
            if self.freshness.is_fresh(entry, tier) {
                self.spawn_fetch(request, tier, FetchMode::Background);
                self.metrics.record_background_refresh();
                debug!("Fresh entry for {} in {}, refreshing in background", request.url, tier.name);
                return self.from_cache(entry.clone(), tier, class);
            }
        }

        let task = self.spawn_fetch(request, tier, FetchMode::Awaited);
        let outcome = self.join(task).await;
        self.settle(request, tier, class, outcome, cached).await
    }

    /// Serve any stored entry immediately and refresh it in the background
    pub async fn stale_while_revalidate(
        &self,
        request: &InterceptedRequest,
        tier: &TierSpec,
        class: ResourceClass,
    ) -> Intercepted {
        if let Some(entry) = self.lookup(request, tier).await {
            self.spawn_fetch(request, tier, FetchMode::Background);
            self.metrics.record_background_refresh();
            return self.from_cache(entry, tier, class);
        }

        let task = self.spawn_fetch(request, tier, FetchMode::Awaited);
        match self.join(task).await {
            Some(response) => Intercepted::new(response, ResponseSource::Network, class),
            None => self.offline(request, class).await,
        }
    }

    /// Like stale-while-revalidate while the entry is within max-age,
    /// like network-first once it has aged out
    pub async fn image_swr(
        &self,
        request: &InterceptedRequest,
        tier: &TierSpec,
        class: ResourceClass,
    ) -> Intercepted {
        // Same decision table as network-first; only the tier differs
        self.network_first(request, tier, class).await
    }

    /// Resolve a waited-on fetch against an optional stale entry
    async fn settle(
        &self,
        request: &InterceptedRequest,
        tier: &TierSpec,
        class: ResourceClass,
        outcome: Option<CachedResponse>,
        cached: Option<CachedEntry>,
    ) -> Intercepted {
        match (outcome, cached) {
            (Some(response), _) if response.is_success() => {
                Intercepted::new(response, ResponseSource::Network, class)
            }
            (Some(response), Some(entry)) => {
                debug!(
                    "Origin answered {} for {}, serving stale entry",
                    response.status, request.url
                );
                self.stale(entry, tier, class)
            }
            (Some(response), None) => Intercepted::new(response, ResponseSource::Network, class),
            (None, Some(entry)) => self.stale(entry, tier, class),
            (None, None) => self.offline(request, class).await,
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn lookup(&self, request: &InterceptedRequest, tier: &TierSpec) -> Option<CachedEntry> {
        let key = request.key()?;
        self.store.lookup(&tier.name, &key).await
    }

    fn from_cache(&self, entry: CachedEntry, tier: &TierSpec, class: ResourceClass) -> Intercepted {
        Intercepted::new(
            entry.response,
            ResponseSource::Cache {
                tier: tier.name.clone(),
            },
            class,
        )
    }

    fn stale(&self, entry: CachedEntry, tier: &TierSpec, class: ResourceClass) -> Intercepted {
        self.metrics.record_fallback_response();
        Intercepted::new(
            entry.response,
            ResponseSource::StaleFallback {
                tier: tier.name.clone(),
            },
            class,
        )
    }

    async fn offline(&self, request: &InterceptedRequest, class: ResourceClass) -> Intercepted {
        match self.offline.resolve(request).await {
            OfflineAnswer::Fallback { tier, response } => {
                self.metrics.record_fallback_response();
                Intercepted::new(response, ResponseSource::Fallback { tier }, class)
            }
            OfflineAnswer::Unavailable(response) => {
                self.metrics.record_offline_response();
                Intercepted::new(response, ResponseSource::Offline, class)
            }
        }
    }

    /// Wait for a fetch task; a panicked task counts as a transport failure
    async fn join(&self, task: JoinHandle<Option<CachedResponse>>) -> Option<CachedResponse> {
        match task.await {
            Ok(outcome) => {
                if outcome.is_none() {
                    self.metrics.record_network_failure();
                }
                outcome
            }
            Err(e) => {
                warn!("Fetch task failed: {}", e);
                self.metrics.record_network_failure();
                None
            }
        }
    }

    /// Fetch `request` on its own task, writing 2xx responses to `tier`.
    ///
    /// Resolves to None on transport failure. Background tasks record the
    /// failure themselves; awaited ones leave it to [`Self::join`].
    fn spawn_fetch(
        &self,
        request: &InterceptedRequest,
        tier: &TierSpec,
        mode: FetchMode,
    ) -> JoinHandle<Option<CachedResponse>> {
        let this = self.clone();
        let request = request.clone();
        let tier = tier.name.clone();
        self.metrics.record_network_fetch();

        tokio::spawn(async move {
            match this.fetcher.fetch(&request).await {
                Ok(response) => {
                    if let Some(key) = request.key() {
                        this.store.store(&tier, &key, &response).await;
                    }
                    Some(response)
                }
                Err(e) if mode == FetchMode::Background => {
                    this.record_failure(&request, &tier, e.to_string()).await;
                    None
                }
                Err(e) => {
                    debug!("Fetch of {} for tier {} failed: {}", request.url, tier, e);
                    None
                }
            }
        })
    }

    async fn record_failure(&self, request: &InterceptedRequest, tier: &str, reason: String) {
        warn!("Background refresh of {} for tier {} failed: {}", request.url, tier, reason);
        self.metrics.record_background_failure();

        let at = self.clock.now();
        self.failures.record(BackgroundFailure {
            url: request.url.to_string(),
            tier: tier.to_string(),
            reason: reason.clone(),
            at,
        });

        let event = CacheEvent::RevalidationFailed {
            url: request.url.to_string(),
            tier: tier.to_string(),
            reason,
            timestamp: at,
        };
        if let Err(e) = self.events.publish(event).await {
            warn!("Failed to publish event: {}", e);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryEventCollector, InMemoryTierBackend, ManualClock, StubFetcher};
    use crate::cache::entry::ResourceKey;
    use crate::cache::tier::{TierRole, TierSet};
    use assert_matches::assert_matches;
    use reqwest::StatusCode;
    use std::time::Duration;

    struct Harness {
        strategies: Strategies,
        store: TieredStore,
        fetcher: Arc<StubFetcher>,
        clock: Arc<ManualClock>,
        events: Arc<InMemoryEventCollector>,
        failures: Arc<FailureLog>,
        metrics: Arc<CacheMetrics>,
        tiers: TierSet,
    }

    impl Harness {
        fn new() -> Self {
            let clock = Arc::new(ManualClock::new());
            let metrics = Arc::new(CacheMetrics::new());
            let store = TieredStore::new(
                Arc::new(InMemoryTierBackend::new()),
                TierSet::default(),
                clock.clone(),
                metrics.clone(),
            );
            let fetcher = Arc::new(StubFetcher::new());
            let events = Arc::new(InMemoryEventCollector::new());
            let failures = Arc::new(FailureLog::new(2));
            let strategies = Strategies::new(
                store.clone(),
                fetcher.clone(),
                clock.clone(),
                metrics.clone(),
                events.clone(),
                failures.clone(),
            );
            Self {
                strategies,
                store,
                fetcher,
                clock,
                events,
                failures,
                metrics,
                tiers: TierSet::default(),
            }
        }

        fn tier(&self, role: TierRole) -> TierSpec {
            self.tiers.for_role(role).unwrap().clone()
        }

        async fn seed(&self, tier: &str, url: &str, body: &str) {
            let key = ResourceKey::parse(url).unwrap();
            assert!(self.store.store(tier, &key, &CachedResponse::ok(body.to_string())).await);
        }

        async fn stored(&self, tier: &str, url: &str) -> Option<CachedEntry> {
            self.store.lookup(tier, &ResourceKey::parse(url).unwrap()).await
        }
    }

    fn get(url: &str) -> InterceptedRequest {
        InterceptedRequest::get(url).unwrap()
    }

    /// Let detached fetch tasks run to completion
    async fn settle_background() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    const BOATS: &str = "https://example.com/api/boats";
    const APP_JS: &str = "https://example.com/app.js";
    const HOME: &str = "https://example.com/";
    const HERO: &str = "https://example.com/img/hero.webp";

    #[tokio::test]
    async fn test_cache_first_hit_makes_no_network_call() {
        let h = Harness::new();
        h.seed("static", APP_JS, "v1").await;

        let out = h
            .strategies
            .cache_first(&get(APP_JS), &h.tier(TierRole::Static), ResourceClass::Static)
            .await;

        assert_eq!(out.response.body.as_ref(), b"v1");
        assert_matches!(out.source, ResponseSource::Cache { tier } if tier == "static");
        assert_eq!(h.fetcher.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_cache_first_miss_fetches_and_stores() {
        let h = Harness::new();
        h.fetcher.ok(APP_JS, "v2");
        let tier = h.tier(TierRole::Static);

        let out = h.strategies.cache_first(&get(APP_JS), &tier, ResourceClass::Static).await;
        assert_eq!(out.source, ResponseSource::Network);
        assert_eq!(h.stored("static", APP_JS).await.unwrap().response.body.as_ref(), b"v2");

        // Second request is served from the tier
        let out = h.strategies.cache_first(&get(APP_JS), &tier, ResourceClass::Static).await;
        assert_matches!(out.source, ResponseSource::Cache { .. });
        assert_eq!(h.fetcher.calls(APP_JS), 1);
    }

    #[tokio::test]
    async fn test_cache_first_error_status_not_stored() {
        let h = Harness::new();
        h.fetcher.status(APP_JS, StatusCode::NOT_FOUND, "missing");

        let out = h
            .strategies
            .cache_first(&get(APP_JS), &h.tier(TierRole::Static), ResourceClass::Static)
            .await;

        assert_eq!(out.response.status, StatusCode::NOT_FOUND);
        assert!(h.stored("static", APP_JS).await.is_none());
    }

    #[tokio::test]
    async fn test_network_first_fresh_entry_returned_without_waiting() {
        let h = Harness::new();
        h.seed("api", BOATS, r#"{"id":1}"#).await;
        let gate = h.fetcher.hold(BOATS, CachedResponse::ok(r#"{"id":2}"#));

        let out = tokio::time::timeout(
            Duration::from_secs(1),
            h.strategies
                .network_first(&get(BOATS), &h.tier(TierRole::Api), ResourceClass::Api),
        )
        .await
        .expect("fresh entry must not wait on the network");

        assert_eq!(out.response.body.as_ref(), br#"{"id":1}"#);

        gate.open();
        settle_background().await;
        assert_eq!(
            h.stored("api", BOATS).await.unwrap().response.body.as_ref(),
            br#"{"id":2}"#
        );
    }

    #[tokio::test]
    async fn test_network_first_stale_entry_waits_for_network() {
        let h = Harness::new();
        h.seed("api", BOATS, r#"{"id":1}"#).await;
        h.clock.advance(Duration::from_secs(301));
        h.fetcher.ok(BOATS, r#"{"id":2}"#);

        let out = h
            .strategies
            .network_first(&get(BOATS), &h.tier(TierRole::Api), ResourceClass::Api)
            .await;

        assert_eq!(out.source, ResponseSource::Network);
        assert_eq!(out.response.body.as_ref(), br#"{"id":2}"#);
    }

    #[tokio::test]
    async fn test_network_first_server_error_serves_stale() {
        let h = Harness::new();
        h.seed("api", BOATS, r#"{"id":1}"#).await;
        h.clock.advance(Duration::from_secs(600));
        h.fetcher.status(BOATS, StatusCode::INTERNAL_SERVER_ERROR, "boom");

        let out = h
            .strategies
            .network_first(&get(BOATS), &h.tier(TierRole::Api), ResourceClass::Api)
            .await;

        assert_matches!(out.source, ResponseSource::StaleFallback { tier } if tier == "api");
        assert_eq!(out.response.body.as_ref(), br#"{"id":1}"#);
        // Entry untouched
        let entry = h.stored("api", BOATS).await.unwrap();
        assert_eq!(entry.response.body.as_ref(), br#"{"id":1}"#);
    }

    #[tokio::test]
    async fn test_network_first_server_error_without_entry_passes_through() {
        let h = Harness::new();
        h.fetcher.status(BOATS, StatusCode::INTERNAL_SERVER_ERROR, "boom");

        let out = h
            .strategies
            .network_first(&get(BOATS), &h.tier(TierRole::Api), ResourceClass::Api)
            .await;

        assert_eq!(out.source, ResponseSource::Network);
        assert_eq!(out.response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(h.stored("api", BOATS).await.is_none());
    }

    #[tokio::test]
    async fn test_network_first_offline_without_entry() {
        let h = Harness::new();
        let reviews = "https://example.com/api/reviews";
        h.fetcher.fail(reviews);

        let out = h
            .strategies
            .network_first(&get(reviews), &h.tier(TierRole::Api), ResourceClass::Api)
            .await;

        assert_eq!(out.source, ResponseSource::Offline);
        assert_eq!(out.response.status, StatusCode::SERVICE_UNAVAILABLE);

        // The caller waited on this fetch, so it is not a failed revalidation
        let snapshot = h.metrics.snapshot();
        assert_eq!(snapshot.network_failures, 1);
        assert_eq!(snapshot.background_failures, 0);
        assert!(h.failures.is_empty());
        assert!(h.events.events_of_type("RevalidationFailed").is_empty());
    }

    #[tokio::test]
    async fn test_failed_refresh_behind_fresh_entry_is_recorded_once() {
        let h = Harness::new();
        h.seed("api", BOATS, r#"{"id":1}"#).await;
        h.fetcher.fail(BOATS);

        let out = h
            .strategies
            .network_first(&get(BOATS), &h.tier(TierRole::Api), ResourceClass::Api)
            .await;
        assert_matches!(out.source, ResponseSource::Cache { .. });
        settle_background().await;

        let snapshot = h.metrics.snapshot();
        assert_eq!(snapshot.background_failures, 1);
        assert_eq!(snapshot.network_failures, 0);
        assert_eq!(h.failures.len(), 1);
        assert_eq!(h.events.events_of_type("RevalidationFailed").len(), 1);
        assert_eq!(h.fetcher.calls(BOATS), 1);
    }

    #[tokio::test]
    async fn test_swr_serves_old_entry_immediately() {
        let h = Harness::new();
        h.seed("runtime", HOME, "<p>old</p>").await;
        h.clock.advance(Duration::from_secs(90 * 24 * 60 * 60));
        let gate = h.fetcher.hold(HOME, CachedResponse::ok("<p>new</p>"));

        let request = InterceptedRequest::navigate(HOME).unwrap();
        let out = tokio::time::timeout(
            Duration::from_secs(1),
            h.strategies.stale_while_revalidate(
                &request,
                &h.tier(TierRole::Runtime),
                ResourceClass::Navigation,
            ),
        )
        .await
        .expect("SWR must not wait when an entry exists");

        assert_eq!(out.response.body.as_ref(), b"<p>old</p>");

        gate.open();
        settle_background().await;
        assert_eq!(
            h.stored("runtime", HOME).await.unwrap().response.body.as_ref(),
            b"<p>new</p>"
        );
    }

    #[tokio::test]
    async fn test_swr_miss_offline_gets_html_page() {
        let h = Harness::new();
        h.fetcher.fail(HOME);

        let request = InterceptedRequest::navigate(HOME).unwrap();
        let out = h
            .strategies
            .stale_while_revalidate(&request, &h.tier(TierRole::Runtime), ResourceClass::Navigation)
            .await;

        assert_eq!(out.source, ResponseSource::Offline);
        assert!(out.response.content_type().unwrap().starts_with("text/html"));
    }

    #[tokio::test]
    async fn test_image_swr_fresh_and_stale() {
        let h = Harness::new();
        let images = h.tier(TierRole::Images);
        h.seed("images", HERO, "old-pixels").await;
        h.fetcher.fail(HERO);

        let out = h.strategies.image_swr(&get(HERO), &images, ResourceClass::Image).await;
        assert_matches!(out.source, ResponseSource::Cache { .. });

        h.clock.advance(Duration::from_secs(31 * 24 * 60 * 60));
        let out = h.strategies.image_swr(&get(HERO), &images, ResourceClass::Image).await;
        assert_matches!(out.source, ResponseSource::StaleFallback { .. });
        assert_eq!(out.response.body.as_ref(), b"old-pixels");
    }

    #[tokio::test]
    async fn test_network_only_error_propagates() {
        let h = Harness::new();
        let url = "https://example.com/manifest.json";
        h.fetcher.fail(url);
        h.seed("static", url, "{}").await;

        let result = h.strategies.network_only(&get(url), ResourceClass::Other).await;
        assert!(result.unwrap_err().is_network());
    }

    #[tokio::test]
    async fn test_failure_log_is_bounded() {
        let log = FailureLog::new(2);
        for i in 0..3 {
            log.record(BackgroundFailure {
                url: format!("https://example.com/{i}"),
                tier: "api".into(),
                reason: "offline".into(),
                at: Utc::now(),
            });
        }
        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].url, "https://example.com/1");
        assert_eq!(entries[1].url, "https://example.com/2");
    }
}

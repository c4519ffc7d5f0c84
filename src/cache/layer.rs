//! Cache Layer
//!
//! The object an embedding runtime drives. Wires the classifier, the tiered
//! store, the strategy handlers and the lifecycle manager together behind
//! the [`InterceptionLayer`] port.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info, instrument, warn};

use super::classify::{Classifier, ResourceClass};
use super::control::{ControlCommand, ControlReply};
use super::entry::InterceptedRequest;
use super::lifecycle::{LifecycleManager, LifecycleState};
use super::metrics::CacheMetrics;
use super::store::TieredStore;
use super::strategy::{FailureLog, Intercepted, Strategies};
use super::tier::TierRole;
use crate::adapters::{HttpFetcher, InMemoryTierBackend, LoggingEventPublisher, SystemClock};
use crate::config::CacheConfig;
use crate::domain::events::CacheEvent;
use crate::domain::ports::{Clock, EventPublisher, Fetcher, InterceptionLayer, TierBackend};
use crate::error::{Error, Result};

/// Builder for [`CacheLayer`]; unset ports get production adapters
pub struct CacheLayerBuilder {
    config: CacheConfig,
    backend: Option<Arc<dyn TierBackend>>,
    fetcher: Option<Arc<dyn Fetcher>>,
    clock: Option<Arc<dyn Clock>>,
    events: Option<Arc<dyn EventPublisher>>,
}

impl CacheLayerBuilder {
    pub fn backend(mut self, backend: Arc<dyn TierBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Validate the configuration and assemble the layer
    pub fn build(self) -> Result<CacheLayer> {
        let config = self.config;
        config.validate()?;

        let backend = match self.backend {
            Some(backend) => backend,
            None => match config.quota_bytes {
                Some(quota) => Arc::new(InMemoryTierBackend::with_quota(quota)),
                None => Arc::new(InMemoryTierBackend::new()),
            },
        };
        let fetcher = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpFetcher::with_timeout(config.fetch_timeout())?),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(LoggingEventPublisher::new()));

        let metrics = Arc::new(CacheMetrics::new());
        let failures = Arc::new(FailureLog::new(config.failure_log_capacity));
        let classifier = Classifier::new(&config.routing)?;
        let store = TieredStore::new(backend, config.tiers.clone(), clock.clone(), metrics.clone());
        let strategies = Strategies::new(
            store.clone(),
            fetcher.clone(),
            clock.clone(),
            metrics.clone(),
            events.clone(),
            failures.clone(),
        );
        let lifecycle = LifecycleManager::new(
            config.seed_urls()?,
            config.skip_waiting,
            store.clone(),
            fetcher.clone(),
            clock.clone(),
            events.clone(),
        );

        Ok(CacheLayer {
            config,
            classifier,
            store,
            strategies,
            lifecycle,
            fetcher,
            clock,
            events,
            metrics,
            failures,
        })
    }
}

/// Client-resident response cache
pub struct CacheLayer {
    config: CacheConfig,
    classifier: Classifier,
    store: TieredStore,
    strategies: Strategies,
    lifecycle: LifecycleManager,
    fetcher: Arc<dyn Fetcher>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventPublisher>,
    metrics: Arc<CacheMetrics>,
    failures: Arc<FailureLog>,
}

impl CacheLayer {
    pub fn builder(config: CacheConfig) -> CacheLayerBuilder {
        CacheLayerBuilder {
            config,
            backend: None,
            fetcher: None,
            clock: None,
            events: None,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn clients_claimed(&self) -> bool {
        self.lifecycle.clients_claimed()
    }

    pub fn store(&self) -> &TieredStore {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    pub fn failures(&self) -> &Arc<FailureLog> {
        &self.failures
    }

    /// Class a request would be served as
    pub fn classify(&self, request: &InterceptedRequest) -> ResourceClass {
        self.classifier.classify(request)
    }

    /// Fetch every URL into the static tier; failures do not stop the rest
    async fn bulk_seed(&self, urls: Vec<String>) -> Result<(usize, Vec<String>)> {
        let tier = self
            .config
            .tiers
            .for_role(TierRole::Static)
            .map(|t| t.name.clone())
            .ok_or_else(|| Error::Config("no static tier configured".to_string()))?;

        let fetches = urls.into_iter().map(|raw| {
            let tier = tier.clone();
            async move {
                let url = match self.config.resolve(&raw) {
                    Ok(url) => url,
                    Err(e) => {
                        debug!("Skipping {}: {}", raw, e);
                        return Err(raw);
                    }
                };
                let request = InterceptedRequest::new(reqwest::Method::GET, url);
                let stored = match self.fetcher.fetch(&request).await {
                    Ok(response) => match request.key() {
                        Some(key) => self.store.store(&tier, &key, &response).await,
                        None => false,
                    },
                    Err(e) => {
                        debug!("Bulk seed fetch failed: {}", e);
                        false
                    }
                };
                if stored {
                    Ok(())
                } else {
                    Err(raw)
                }
            }
        });

        let mut stored = 0;
        let mut failed = Vec::new();
        for result in join_all(fetches).await {
            match result {
                Ok(()) => stored += 1,
                Err(url) => failed.push(url),
            }
        }
        Ok((stored, failed))
    }

    async fn publish(&self, event: CacheEvent) {
        if let Err(e) = self.events.publish(event).await {
            warn!("Failed to publish event: {}", e);
        }
    }
}

#[async_trait]
impl InterceptionLayer for CacheLayer {
    async fn install(&self) -> Result<()> {
        self.lifecycle.install().await
    }

    async fn activate(&self) -> Result<()> {
        self.lifecycle.activate().await
    }

    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn intercept(&self, request: InterceptedRequest) -> Result<Intercepted> {
        let class = self.classifier.classify(&request);

        if !self.lifecycle.is_active() {
            debug!("Not active yet, passing {} through", request.url);
            return self.strategies.network_only(&request, class).await;
        }

        let Some(role) = class.tier_role() else {
            return self.strategies.network_only(&request, class).await;
        };
        let Some(tier) = self.config.tiers.for_role(role) else {
            return self.strategies.network_only(&request, class).await;
        };

        let served = match role {
            TierRole::Static => self.strategies.cache_first(&request, tier, class).await,
            TierRole::Api => self.strategies.network_first(&request, tier, class).await,
            TierRole::Images => self.strategies.image_swr(&request, tier, class).await,
            TierRole::Runtime => {
                self.strategies
                    .stale_while_revalidate(&request, tier, class)
                    .await
            }
        };
        debug!("Served {} {} from {}", class, request.url, served.source);
        Ok(served)
    }

    #[instrument(skip(self, command), fields(command = command.name()))]
    async fn handle_control(&self, command: ControlCommand) -> Result<ControlReply> {
        match command {
            ControlCommand::SkipWaiting => {
                self.lifecycle.activate().await?;
                Ok(ControlReply::Activated)
            }
            ControlCommand::ClearCache { cache_name } => {
                let tiers = self.store.clear(cache_name.as_deref()).await?;
                info!("Cleared tiers: {:?}", tiers);
                self.publish(CacheEvent::TiersCleared {
                    tiers: tiers.clone(),
                    timestamp: self.clock.now(),
                })
                .await;
                Ok(ControlReply::Cleared { tiers })
            }
            ControlCommand::UpdateCache { urls } => {
                let (stored, failed) = self.bulk_seed(urls).await?;
                info!("Bulk seed stored {} URLs, {} failed", stored, failed.len());
                self.publish(CacheEvent::CacheUpdated {
                    stored,
                    failed: failed.clone(),
                    timestamp: self.clock.now(),
                })
                .await;
                Ok(ControlReply::Updated { stored, failed })
            }
            ControlCommand::GetCacheStatus => Ok(ControlReply::Status {
                tiers: self.store.status().await?,
            }),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryEventCollector, ManualClock, StubFetcher};
    use crate::cache::entry::ResourceKey;
    use crate::cache::strategy::ResponseSource;
    use assert_matches::assert_matches;
    use reqwest::Method;

    const ORIGIN: &str = "https://app.example.com/";

    struct Harness {
        layer: CacheLayer,
        fetcher: Arc<StubFetcher>,
        events: Arc<InMemoryEventCollector>,
    }

    fn harness() -> Harness {
        let config = CacheConfig {
            origin: url::Url::parse(ORIGIN).unwrap(),
            seeds: vec!["/".into()],
            ..CacheConfig::default()
        };
        let fetcher = Arc::new(StubFetcher::new());
        let events = Arc::new(InMemoryEventCollector::new());
        let layer = CacheLayer::builder(config)
            .fetcher(fetcher.clone())
            .clock(Arc::new(ManualClock::new()))
            .events(events.clone())
            .build()
            .unwrap();
        fetcher.ok(ORIGIN, "<html>home</html>");
        Harness {
            layer,
            fetcher,
            events,
        }
    }

    async fn active_harness() -> Harness {
        let h = harness();
        h.layer.install().await.unwrap();
        h.layer.activate().await.unwrap();
        h
    }

    #[tokio::test]
    async fn test_network_only_before_activation() {
        let h = harness();
        let url = "https://app.example.com/app.js";
        h.fetcher.ok(url, "v1");

        let out = h
            .layer
            .intercept(InterceptedRequest::get(url).unwrap())
            .await
            .unwrap();
        assert_eq!(out.source, ResponseSource::Network);
        assert_eq!(out.class, ResourceClass::Static);

        // Nothing was written
        let key = ResourceKey::parse(url).unwrap();
        assert!(h.layer.store().lookup("static", &key).await.is_none());
    }

    #[tokio::test]
    async fn test_dispatch_after_activation() {
        let h = active_harness().await;
        let url = "https://app.example.com/app.js";
        h.fetcher.ok(url, "v1");

        let first = h.layer.intercept(InterceptedRequest::get(url).unwrap()).await.unwrap();
        assert_eq!(first.source, ResponseSource::Network);
        let second = h.layer.intercept(InterceptedRequest::get(url).unwrap()).await.unwrap();
        assert_matches!(second.source, ResponseSource::Cache { .. });
        assert_eq!(h.fetcher.calls(url), 1);
    }

    #[tokio::test]
    async fn test_post_bypasses_cache() {
        let h = active_harness().await;
        let url = "https://app.example.com/api/bookings";
        h.fetcher.fail(url);

        let request = InterceptedRequest::get(url).unwrap();
        let post = InterceptedRequest::new(Method::POST, request.url.clone()).with_body("{}");
        let result = h.layer.intercept(post).await;
        assert!(result.unwrap_err().is_network());
    }

    #[tokio::test]
    async fn test_control_skip_waiting() {
        let h = harness();
        assert_matches!(
            h.layer.handle_control(ControlCommand::SkipWaiting).await,
            Err(Error::InvalidTransition { .. })
        );

        h.layer.install().await.unwrap();
        assert_eq!(
            h.layer.handle_control(ControlCommand::SkipWaiting).await.unwrap(),
            ControlReply::Activated
        );
        assert_eq!(h.layer.state(), LifecycleState::Active);

        // Idempotent
        assert_eq!(
            h.layer.handle_control(ControlCommand::SkipWaiting).await.unwrap(),
            ControlReply::Activated
        );
    }

    #[tokio::test]
    async fn test_control_update_clear_status() {
        let h = active_harness().await;
        h.fetcher.ok("https://app.example.com/a.js", "a");
        h.fetcher.fail("https://app.example.com/b.js");

        let reply = h
            .layer
            .handle_control(ControlCommand::UpdateCache {
                urls: vec!["/a.js".into(), "/b.js".into()],
            })
            .await
            .unwrap();
        assert_eq!(
            reply,
            ControlReply::Updated {
                stored: 1,
                failed: vec!["/b.js".into()]
            }
        );

        let ControlReply::Status { tiers } = h
            .layer
            .handle_control(ControlCommand::GetCacheStatus)
            .await
            .unwrap()
        else {
            panic!("expected a status reply");
        };
        assert_eq!(tiers["static"].size, 2);
        assert!(tiers["static"]
            .urls
            .contains(&"https://app.example.com/a.js".to_string()));

        let reply = h
            .layer
            .handle_control(ControlCommand::ClearCache { cache_name: None })
            .await
            .unwrap();
        assert_eq!(reply, ControlReply::Cleared { tiers: vec!["static".into()] });
        assert_eq!(h.events.events_of_type("TiersCleared").len(), 1);
        assert_eq!(h.events.events_of_type("CacheUpdated").len(), 1);
    }
}

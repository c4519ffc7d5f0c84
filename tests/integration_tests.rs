//! HarborCache Integration Tests
//!
//! End-to-end behavior of the layer through its public interface:
//! - Scenario 1: API freshness and server errors
//! - Scenario 2: Offline behavior
//! - Scenario 3: Navigation stale-while-revalidate
//! - Lifecycle, control channel and persistence

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use harborcache::adapters::{
    FsTierBackend, InMemoryEventCollector, InMemoryTierBackend, ManualClock, StubFetcher,
};
use harborcache::cache::{
    CacheLayer, CachedResponse, ControlChannel, ControlCommand, ControlReply, InterceptedRequest,
    LifecycleState, ResourceKey, ResponseSource,
};
use harborcache::domain::ports::{Clock, InterceptionLayer, TierBackend};
use harborcache::{CacheConfig, Error};
use reqwest::StatusCode;

const ORIGIN: &str = "https://tours.example.com/";

fn url(path: &str) -> String {
    format!("https://tours.example.com{}", path)
}

struct Harness {
    layer: Arc<CacheLayer>,
    fetcher: Arc<StubFetcher>,
    clock: Arc<ManualClock>,
    backend: Arc<dyn TierBackend>,
    events: Arc<InMemoryEventCollector>,
}

fn config() -> CacheConfig {
    CacheConfig {
        origin: ORIGIN.parse().unwrap(),
        ..CacheConfig::default()
    }
}

fn harness_with(config: CacheConfig, backend: Arc<dyn TierBackend>) -> Harness {
    let fetcher = Arc::new(StubFetcher::new());
    fetcher
        .ok(&url("/"), "<html>shell</html>")
        .ok(&url("/manifest.json"), "{}")
        .ok(&url("/favicon.ico"), "icon");
    let clock = Arc::new(ManualClock::new());
    let events = Arc::new(InMemoryEventCollector::new());
    let layer = CacheLayer::builder(config)
        .backend(backend.clone())
        .fetcher(fetcher.clone())
        .clock(clock.clone())
        .events(events.clone())
        .build()
        .unwrap();
    Harness {
        layer: Arc::new(layer),
        fetcher,
        clock,
        backend,
        events,
    }
}

async fn active() -> Harness {
    let h = harness_with(config(), Arc::new(InMemoryTierBackend::new()));
    h.layer.install().await.unwrap();
    h.layer.activate().await.unwrap();
    h
}

async fn get(h: &Harness, path: &str) -> harborcache::Intercepted {
    h.layer
        .intercept(InterceptedRequest::get(&url(path)).unwrap())
        .await
        .unwrap()
}

/// Let detached fetch tasks run to completion
async fn settle_background() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

// =============================================================================
// Scenario 1: API freshness
// =============================================================================

mod api_tests {
    use super::*;

    #[tokio::test]
    async fn test_api_response_stored_fresh() {
        let h = active().await;
        h.fetcher.ok(&url("/api/boats"), r#"{"id":1}"#);

        let out = get(&h, "/api/boats").await;
        assert_eq!(out.response.body.as_ref(), br#"{"id":1}"#);

        let key = ResourceKey::parse(&url("/api/boats")).unwrap();
        let entry = h.backend.get("api", &key).await.unwrap().unwrap();
        assert_eq!(entry.response.body.as_ref(), br#"{"id":1}"#);
        assert_eq!(entry.stored_at, h.clock.now());
    }

    #[tokio::test]
    async fn test_server_error_within_ttl_keeps_cached_value() {
        let h = active().await;
        h.fetcher.ok(&url("/api/boats"), r#"{"id":1}"#);
        get(&h, "/api/boats").await;

        h.clock.advance(Duration::from_secs(120));
        h.fetcher
            .status(&url("/api/boats"), StatusCode::INTERNAL_SERVER_ERROR, "boom");

        let out = get(&h, "/api/boats").await;
        assert_eq!(out.response.body.as_ref(), br#"{"id":1}"#);

        settle_background().await;
        let key = ResourceKey::parse(&url("/api/boats")).unwrap();
        let entry = h.backend.get("api", &key).await.unwrap().unwrap();
        assert_eq!(entry.response.body.as_ref(), br#"{"id":1}"#, "entry unchanged");
    }

    #[tokio::test]
    async fn test_expired_api_entry_waits_for_network() {
        let h = active().await;
        h.fetcher.ok(&url("/api/boats"), r#"{"id":1}"#);
        get(&h, "/api/boats").await;

        h.clock.advance(Duration::from_secs(5 * 60));
        h.fetcher.ok(&url("/api/boats"), r#"{"id":2}"#);

        let out = get(&h, "/api/boats").await;
        assert_eq!(out.source, ResponseSource::Network);
        assert_eq!(out.response.body.as_ref(), br#"{"id":2}"#);
    }

    #[tokio::test]
    async fn test_query_strings_are_distinct_keys() {
        let h = active().await;
        h.fetcher
            .ok(&url("/api/boats?page=1"), "p1")
            .ok(&url("/api/boats?page=2"), "p2");

        assert_eq!(get(&h, "/api/boats?page=1").await.response.body.as_ref(), b"p1");
        assert_eq!(get(&h, "/api/boats?page=2").await.response.body.as_ref(), b"p2");
    }
}

// =============================================================================
// Scenario 2: Offline
// =============================================================================

mod offline_tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_without_entry_is_503() {
        let h = active().await;
        h.fetcher.fail(&url("/api/reviews"));

        let out = get(&h, "/api/reviews").await;
        assert_eq!(out.source, ResponseSource::Offline);
        assert_eq!(out.response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(out.response.body.as_ref(), b"Service Unavailable");
        assert_eq!(h.layer.metrics().snapshot().network_failures, 1);
        assert!(h.events.events_of_type("RevalidationFailed").is_empty());
        assert!(h.layer.failures().is_empty());
    }

    #[tokio::test]
    async fn test_offline_resolver_searches_other_tiers() {
        let h = active().await;
        // Shell page was seeded into the static tier at install
        h.fetcher.fail(&url("/"));

        let request = InterceptedRequest::navigate(&url("/")).unwrap();
        let out = h.layer.intercept(request).await.unwrap();
        assert_matches!(out.source, ResponseSource::Fallback { tier } if tier == "static");
        assert_eq!(out.response.body.as_ref(), b"<html>shell</html>");
    }

    #[tokio::test]
    async fn test_cached_static_assets_need_no_network() {
        let h = active().await;
        h.fetcher.ok(&url("/app.js"), "bundle");
        get(&h, "/app.js").await;

        h.fetcher.fail(&url("/app.js"));
        for _ in 0..5 {
            let out = get(&h, "/app.js").await;
            assert_eq!(out.response.body.as_ref(), b"bundle");
        }
        assert_eq!(h.fetcher.calls(&url("/app.js")), 1);
    }
}

// =============================================================================
// Scenario 3: Navigation stale-while-revalidate
// =============================================================================

mod navigation_tests {
    use super::*;

    #[tokio::test]
    async fn test_snapshot_served_while_network_hangs() {
        let h = active().await;
        let home = url("/tours");
        h.fetcher.ok(&home, "<p>v1</p>");
        h.layer
            .intercept(InterceptedRequest::navigate(&home).unwrap())
            .await
            .unwrap();

        let gate = h.fetcher.hold(&home, CachedResponse::ok("<p>v2</p>"));
        let out = tokio::time::timeout(
            Duration::from_secs(1),
            h.layer.intercept(InterceptedRequest::navigate(&home).unwrap()),
        )
        .await
        .expect("snapshot must be served without waiting")
        .unwrap();
        assert_eq!(out.response.body.as_ref(), b"<p>v1</p>");

        gate.open();
        settle_background().await;

        let out = h
            .layer
            .intercept(InterceptedRequest::navigate(&home).unwrap())
            .await
            .unwrap();
        assert_eq!(out.response.body.as_ref(), b"<p>v2</p>");
    }

    #[tokio::test]
    async fn test_dropped_caller_still_populates_cache() {
        let h = active().await;
        let page = url("/tours/lagos");
        let gate = h.fetcher.hold(&page, CachedResponse::ok("<p>lagos</p>"));

        let pending = h.layer.intercept(InterceptedRequest::navigate(&page).unwrap());
        let timed_out = tokio::time::timeout(Duration::from_millis(20), pending).await;
        assert!(timed_out.is_err(), "fetch is still pending");

        gate.open();
        settle_background().await;

        let key = ResourceKey::parse(&page).unwrap();
        let entry = h.backend.get("runtime", &key).await.unwrap().unwrap();
        assert_eq!(entry.response.body.as_ref(), b"<p>lagos</p>");
    }
}

// =============================================================================
// Lifecycle and control
// =============================================================================

mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_seed_blocks_activation() {
        let h = harness_with(config(), Arc::new(InMemoryTierBackend::new()));
        h.fetcher.fail(&url("/favicon.ico"));

        let err = h.layer.install().await.unwrap_err();
        assert_matches!(err, Error::InstallFailed { url: failed, .. } if failed == url("/favicon.ico"));
        assert_eq!(h.layer.state(), LifecycleState::Installing);

        // Requests still work, straight from the network
        h.fetcher.ok(&url("/app.js"), "bundle");
        let out = get(&h, "/app.js").await;
        assert_eq!(out.source, ResponseSource::Network);
    }

    #[tokio::test]
    async fn test_activation_prunes_previous_version() {
        let backend: Arc<dyn TierBackend> = Arc::new(InMemoryTierBackend::new());

        // Version 1 populates its tiers
        let v1 = harness_with(config(), backend.clone());
        v1.layer.install().await.unwrap();
        v1.layer.activate().await.unwrap();

        // Version 2 renames the static tier
        let mut v2_config = config();
        v2_config.tiers = serde_yaml::from_str(
            "- { name: static-v2, role: static }\n\
             - { name: runtime, role: runtime }\n\
             - { name: api, role: api, max_age_secs: 300 }\n\
             - { name: images, role: images, max_age_secs: 2592000 }\n",
        )
        .unwrap();
        let v2 = harness_with(v2_config, backend.clone());
        v2.layer.install().await.unwrap();
        v2.layer.activate().await.unwrap();

        let mut names = backend.tier_names().await.unwrap();
        names.sort();
        assert_eq!(names, vec!["static-v2"]);
        assert_eq!(v2.events.events_of_type("Activated").len(), 1);
    }

    #[tokio::test]
    async fn test_control_channel_commands() {
        let h = active().await;
        h.fetcher.ok(&url("/api/boats"), "[]");
        get(&h, "/api/boats").await;

        let channel = Arc::new(ControlChannel::new(h.layer.clone(), 8));
        let sender = channel.sender();
        let task = tokio::spawn(channel.clone().run());

        let reply = sender.request(ControlCommand::GetCacheStatus).await.unwrap();
        let ControlReply::Status { tiers } = reply else {
            panic!("expected status");
        };
        assert_eq!(tiers["static"].size, 3);
        assert_eq!(tiers["api"].urls, vec![url("/api/boats")]);

        let reply = sender
            .request(ControlCommand::ClearCache {
                cache_name: Some("api".into()),
            })
            .await
            .unwrap();
        assert_eq!(reply, ControlReply::Cleared { tiers: vec!["api".into()] });

        let parsed = ControlCommand::parse_str(r#"{"type":"CLEAR_CACHE"}"#).unwrap().unwrap();
        sender.request(parsed).await.unwrap();
        let ControlReply::Status { tiers } =
            sender.request(ControlCommand::GetCacheStatus).await.unwrap()
        else {
            panic!("expected status");
        };
        assert!(tiers.is_empty());

        channel.shutdown();
        task.await.unwrap();
    }
}

// =============================================================================
// Persistence
// =============================================================================

mod persistence_tests {
    use super::*;

    #[tokio::test]
    async fn test_disk_quota_rejects_write_but_serves_response() {
        let dir = tempfile::tempdir().unwrap();
        // Seeds take 24 bytes
        let backend = Arc::new(FsTierBackend::open_with_quota(dir.path(), Some(30)).await.unwrap());
        let h = harness_with(config(), backend);
        h.layer.install().await.unwrap();
        h.layer.activate().await.unwrap();

        h.fetcher.ok(&url("/app.js"), "a twenty byte bundle");
        let out = get(&h, "/app.js").await;
        assert_eq!(out.source, ResponseSource::Network);
        assert_eq!(out.response.body.as_ref(), b"a twenty byte bundle");
        assert_eq!(h.layer.metrics().write_rejections(), 1);

        let key = ResourceKey::parse(&url("/app.js")).unwrap();
        assert!(h.backend.get("static", &key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fs_backend_survives_restart() {
        let dir = tempfile::tempdir().unwrap();

        {
            let backend = Arc::new(FsTierBackend::open(dir.path()).await.unwrap());
            let h = harness_with(config(), backend);
            h.layer.install().await.unwrap();
            h.layer.activate().await.unwrap();
            h.fetcher.ok(&url("/app.js"), "bundle");
            get(&h, "/app.js").await;
        }

        let backend = Arc::new(FsTierBackend::open(dir.path()).await.unwrap());
        let h = harness_with(config(), backend);
        h.layer.install().await.unwrap();
        h.layer.activate().await.unwrap();
        h.fetcher.fail(&url("/app.js"));

        // Served from the static tier written by the previous process
        let out = get(&h, "/app.js").await;
        assert_eq!(out.source, ResponseSource::Cache { tier: "static".into() });
        assert_eq!(out.response.body.as_ref(), b"bundle");
        assert_eq!(h.fetcher.calls(&url("/app.js")), 0);
    }
}

// =============================================================================
// Properties
// =============================================================================

mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_non_success_is_never_stored(code in 300u16..600) {
            let status = StatusCode::from_u16(code).unwrap();
            let stored = tokio_test::block_on(async {
                let h = active().await;
                h.fetcher.status(&url("/api/tours"), status, "nope");
                let out = get(&h, "/api/tours").await;
                assert_eq!(out.response.status, status);

                let key = ResourceKey::parse(&url("/api/tours")).unwrap();
                h.backend.get("api", &key).await.unwrap()
            });
            prop_assert!(stored.is_none());
        }
    }
}

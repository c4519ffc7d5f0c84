//! Scripted fetcher for tests
//!
//! Routes are keyed by absolute URL. Unrouted URLs fail like an unreachable
//! origin. Every call is counted so tests can assert that no network access
//! happened.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::StatusCode;
use tokio::sync::Notify;

use crate::cache::entry::{CachedResponse, InterceptedRequest};
use crate::domain::ports::Fetcher;
use crate::error::{Error, Result};

#[derive(Clone)]
enum Route {
    Respond(CachedResponse),
    Fail(String),
    /// Answer only once the gate is opened
    Hold(Arc<Notify>, CachedResponse),
}

/// Releases a held route
#[derive(Clone)]
pub struct Gate(Arc<Notify>);

impl Gate {
    /// Let every pending and future request on the route complete
    pub fn open(&self) {
        self.0.notify_waiters();
        self.0.notify_one();
    }
}

/// Fetcher whose answers are scripted per URL
#[derive(Default)]
pub struct StubFetcher {
    routes: DashMap<String, Route>,
    calls: DashMap<String, u64>,
    total_calls: AtomicU64,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `url` with `response`
    pub fn respond(&self, url: &str, response: CachedResponse) -> &Self {
        self.routes.insert(url.to_string(), Route::Respond(response));
        self
    }

    /// Answer `url` with 200 and `body`
    pub fn ok(&self, url: &str, body: &str) -> &Self {
        self.respond(url, CachedResponse::ok(body.to_string()))
    }

    /// Answer `url` with `status` and `body`
    pub fn status(&self, url: &str, status: StatusCode, body: &str) -> &Self {
        self.respond(url, CachedResponse::new(status, body.to_string()))
    }

    /// Fail `url` with a transport error
    pub fn fail(&self, url: &str) -> &Self {
        self.routes
            .insert(url.to_string(), Route::Fail("connection refused".to_string()));
        self
    }

    /// Hold requests to `url` until the returned gate opens
    pub fn hold(&self, url: &str, response: CachedResponse) -> Gate {
        let notify = Arc::new(Notify::new());
        self.routes
            .insert(url.to_string(), Route::Hold(notify.clone(), response));
        Gate(notify)
    }

    /// Number of fetches issued for `url`
    pub fn calls(&self, url: &str) -> u64 {
        self.calls.get(url).map(|c| *c).unwrap_or(0)
    }

    /// Number of fetches issued overall
    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, request: &InterceptedRequest) -> Result<CachedResponse> {
        let url = request.url.as_str();
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        *self.calls.entry(url.to_string()).or_insert(0) += 1;

        // Clone out of the map so no shard lock is held across the await
        let route = self.routes.get(url).map(|r| r.clone());
        match route {
            Some(Route::Respond(response)) => Ok(response),
            Some(Route::Fail(reason)) => Err(Error::network(url, reason)),
            Some(Route::Hold(notify, response)) => {
                notify.notified().await;
                // Pass the wakeup on to any other held caller
                notify.notify_one();
                Ok(response)
            }
            None => Err(Error::network(url, "no route to host")),
        }
    }
}

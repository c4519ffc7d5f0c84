//! Offline Resolver
//!
//! Last step of every failure path. Always produces a response.

use reqwest::header::{HeaderValue, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::StatusCode;
use tracing::debug;

use super::entry::{CachedResponse, InterceptedRequest};
use super::store::TieredStore;

/// Body of the plain-text unavailable response
pub const UNAVAILABLE_TEXT: &str = "Service Unavailable";

const OFFLINE_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Offline</title>
</head>
<body>
<main>
<h1>You are offline</h1>
<p>This page is not available right now. Check your connection and try again.</p>
<button type="button" onclick="window.location.reload()">Try again</button>
</main>
</body>
</html>
"#;

/// Where an offline answer came from
#[derive(Debug, Clone, PartialEq)]
pub enum OfflineAnswer {
    /// Entry found in some tier
    Fallback { tier: String, response: CachedResponse },
    /// Synthesized 503
    Unavailable(CachedResponse),
}

/// Resolves a request when neither the strategy nor the network could answer
#[derive(Clone)]
pub struct OfflineResolver {
    store: TieredStore,
}

impl OfflineResolver {
    pub fn new(store: TieredStore) -> Self {
        Self { store }
    }

    /// Any stored entry for the request, else a 503 shaped for the caller
    pub async fn resolve(&self, request: &InterceptedRequest) -> OfflineAnswer {
        if let Some(key) = request.key() {
            if let Some((tier, entry)) = self.store.match_any(&key).await {
                debug!("Offline fallback for {} from tier {}", key, tier);
                return OfflineAnswer::Fallback {
                    tier,
                    response: entry.response,
                };
            }
        }

        debug!("No stored entry for {}, answering 503", request.url);
        OfflineAnswer::Unavailable(unavailable(request.accepts_html()))
    }
}

/// Synthesized 503: an HTML page with a reload button, or plain text
pub fn unavailable(html: bool) -> CachedResponse {
    let (content_type, body) = if html {
        ("text/html; charset=utf-8", OFFLINE_PAGE)
    } else {
        ("text/plain; charset=utf-8", UNAVAILABLE_TEXT)
    };
    CachedResponse::new(StatusCode::SERVICE_UNAVAILABLE, body)
        .with_header(CONTENT_TYPE, HeaderValue::from_static(content_type))
        .with_header(CACHE_CONTROL, HeaderValue::from_static("no-store"))
}

//! Cache Entry Types
//!
//! Request identity, stored responses and the entry record that pairs them
//! with the time they were last refreshed.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Method, StatusCode, Url};

use crate::error::{Error, Result};

/// Canonical request identity: method + absolute URL.
///
/// Query strings are significant. Only GET keys are ever stored.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    method: Method,
    url: Url,
}

impl ResourceKey {
    /// Key for a GET of `url`
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
        }
    }

    /// Parse an absolute URL into a GET key
    pub fn parse(url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| Error::Config(format!("invalid URL {url}: {e}")))?;
        Ok(Self::get(url))
    }

    #[inline]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[inline]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The URL as a string
    #[inline]
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// Stable 64-bit fingerprint of the key (FxHash over method and URL).
    ///
    /// Used for on-disk file names, never for equality.
    pub fn fingerprint(&self) -> u64 {
        const SEED: u64 = 0x517cc1b727220a95;
        let mut hash = SEED;
        for &byte in self
            .method
            .as_str()
            .as_bytes()
            .iter()
            .chain(b" ")
            .chain(self.url.as_str().as_bytes())
        {
            hash = hash.rotate_left(5) ^ (byte as u64);
            hash = hash.wrapping_mul(SEED);
        }
        hash
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// An outbound request as seen by the interception point
#[derive(Clone, Debug)]
pub struct InterceptedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl InterceptedRequest {
    /// Create a request with no headers and an empty body
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Parse `url` into a plain GET request
    pub fn get(url: &str) -> Result<Self> {
        let parsed =
            Url::parse(url).map_err(|e| Error::Config(format!("invalid URL {url}: {e}")))?;
        Ok(Self::new(Method::GET, parsed))
    }

    /// A GET that negotiates for an HTML document (a page navigation)
    pub fn navigate(url: &str) -> Result<Self> {
        Ok(Self::get(url)?.with_header(ACCEPT, HeaderValue::from_static("text/html,*/*;q=0.8")))
    }

    /// Add a header
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Replace the body
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Whether content negotiation admits an HTML document
    pub fn accepts_html(&self) -> bool {
        self.headers
            .get_all(ACCEPT)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.contains("text/html"))
    }

    /// Cache identity, only defined for GET requests
    pub fn key(&self) -> Option<ResourceKey> {
        (self.method == Method::GET).then(|| ResourceKey::get(self.url.clone()))
    }
}

/// A response that can be served to the caller and possibly stored
#[derive(Clone, Debug, PartialEq)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CachedResponse {
    /// Create a response with no headers
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// 200 OK with `body`
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(StatusCode::OK, body)
    }

    /// Add a header
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Only 2xx responses may ever be persisted
    #[inline]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Content-Type header, if present and valid UTF-8
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    /// Body size in bytes
    #[inline]
    pub fn size(&self) -> u64 {
        self.body.len() as u64
    }
}

/// A stored response plus the time it was last refreshed from the network
#[derive(Clone, Debug, PartialEq)]
pub struct CachedEntry {
    pub key: ResourceKey,
    pub response: CachedResponse,
    pub stored_at: DateTime<Utc>,
}

impl CachedEntry {
    pub fn new(key: ResourceKey, response: CachedResponse, stored_at: DateTime<Utc>) -> Self {
        Self {
            key,
            response,
            stored_at,
        }
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.response.size()
    }
}

// =============================================================================
// Tests
// =============================================================================

//! Request Classifier
//!
//! Maps every outbound request onto exactly one resource class, which in turn
//! selects the strategy and tier that serve it.
//!
//! ```text
//!  method != GET ───────────────▶ Bypass
//!  scheme not http(s) ──────────▶ Bypass
//!  path ~ API pattern ──────────▶ Api        ─▶ network-first (api)
//!  *.js|css|woff.. ─────────────▶ Static     ─▶ cache-first   (static)
//!  *.png|jpg|svg.. ─────────────▶ Image      ─▶ image SWR     (images)
//!  Accept: text/html ───────────▶ Navigation ─▶ SWR           (runtime)
//!  anything else ───────────────▶ Other      ─▶ network-only
//! ```

use std::collections::HashSet;
use std::fmt;

use regex::Regex;
use reqwest::Method;
use serde::{Deserialize, Serialize};

use super::entry::InterceptedRequest;
use super::tier::TierRole;
use crate::error::{Error, Result};

/// Resource class of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceClass {
    /// Non-GET or non-HTTP; never touches the store
    Bypass,
    Api,
    Static,
    Image,
    Navigation,
    /// GET that fits no cached class
    Other,
}

impl ResourceClass {
    /// Role of the tier that serves this class, if any
    pub fn tier_role(self) -> Option<TierRole> {
        match self {
            ResourceClass::Static => Some(TierRole::Static),
            ResourceClass::Api => Some(TierRole::Api),
            ResourceClass::Image => Some(TierRole::Images),
            ResourceClass::Navigation => Some(TierRole::Runtime),
            ResourceClass::Bypass | ResourceClass::Other => None,
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceClass::Bypass => write!(f, "bypass"),
            ResourceClass::Api => write!(f, "api"),
            ResourceClass::Static => write!(f, "static"),
            ResourceClass::Image => write!(f, "image"),
            ResourceClass::Navigation => write!(f, "navigation"),
            ResourceClass::Other => write!(f, "other"),
        }
    }
}

/// URL routing rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Regexes over the URL path; any match classifies as API
    pub api_patterns: Vec<String>,
    /// Script, style and font extensions
    pub static_extensions: Vec<String>,
    /// Image extensions
    pub image_extensions: Vec<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        fn owned(items: &[&str]) -> Vec<String> {
            items.iter().map(|s| s.to_string()).collect()
        }
        Self {
            api_patterns: owned(&["^/api/", "^/catalog", "^/listings", "^/reviews", "^/locations"]),
            static_extensions: owned(&["js", "mjs", "css", "woff", "woff2", "ttf", "otf", "eot"]),
            image_extensions: owned(&["png", "jpg", "jpeg", "gif", "webp", "svg", "ico", "avif", "bmp"]),
        }
    }
}

/// Compiled routing rules
#[derive(Debug, Clone)]
pub struct Classifier {
    api_patterns: Vec<Regex>,
    static_extensions: HashSet<String>,
    image_extensions: HashSet<String>,
}

impl Classifier {
    /// Compile `routing`; fails on an invalid API pattern
    pub fn new(routing: &RoutingConfig) -> Result<Self> {
        let api_patterns = routing
            .api_patterns
            .iter()
            .map(|p| {
                Regex::new(p)
                    .map_err(|e| Error::Config(format!("invalid API pattern {:?}: {}", p, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        let normalize = |exts: &[String]| {
            exts.iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect::<HashSet<_>>()
        };

        Ok(Self {
            api_patterns,
            static_extensions: normalize(&routing.static_extensions),
            image_extensions: normalize(&routing.image_extensions),
        })
    }

    /// Classify one request. Total: every request yields exactly one class.
    pub fn classify(&self, request: &InterceptedRequest) -> ResourceClass {
        if request.method != Method::GET {
            return ResourceClass::Bypass;
        }
        if !matches!(request.url.scheme(), "http" | "https") {
            return ResourceClass::Bypass;
        }

        let path = request.url.path();
        if self.api_patterns.iter().any(|re| re.is_match(path)) {
            return ResourceClass::Api;
        }

        if let Some(ext) = extension(path) {
            if self.static_extensions.contains(&ext) {
                return ResourceClass::Static;
            }
            if self.image_extensions.contains(&ext) {
                return ResourceClass::Image;
            }
        }

        if request.accepts_html() {
            return ResourceClass::Navigation;
        }
        ResourceClass::Other
    }
}

/// Lower-cased extension of the last path segment
fn extension(path: &str) -> Option<String> {
    let segment = path.rsplit('/').next()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() && ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

// =============================================================================
// Tests
// =============================================================================

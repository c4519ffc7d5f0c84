//! Layer configuration
//!
//! Loaded from YAML. Every field has a default, so an empty file (or no file)
//! yields a working layer pointed at a local origin.
//!
//! ```yaml
//! origin: https://app.example.com/
//! seeds: ["/", "/manifest.json", "/favicon.ico"]
//! skip_waiting: false
//! fetch_timeout_secs: 30
//! tiers:
//!   - { name: static-v3, role: static }
//!   - { name: runtime-v3, role: runtime }
//!   - { name: api-v3, role: api, max_age_secs: 300 }
//!   - { name: images-v3, role: images, max_age_secs: 2592000 }
//! routing:
//!   api_patterns: ["^/api/", "^/catalog"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::cache::classify::{Classifier, RoutingConfig};
use crate::cache::strategy::DEFAULT_FAILURE_LOG_CAPACITY;
use crate::cache::tier::TierSet;
use crate::error::{Error, Result};

/// Default origin the layer fronts
pub const DEFAULT_ORIGIN: &str = "http://127.0.0.1:3000/";

/// Configuration of one layer version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Origin that relative URLs (seeds, bulk-seed paths) resolve against
    pub origin: Url,
    /// Paths pre-warmed into the static tier on install
    pub seeds: Vec<String>,
    /// Tiers in declaration order
    pub tiers: TierSet,
    /// Classification rules
    pub routing: RoutingConfig,
    /// Background failures retained for inspection
    pub failure_log_capacity: usize,
    /// Activate immediately after a successful install
    pub skip_waiting: bool,
    /// Transport timeout for network fetches (None = wait indefinitely)
    pub fetch_timeout_secs: Option<u64>,
    /// Directory for the persistent store (None = in memory)
    pub cache_dir: Option<PathBuf>,
    /// Byte quota of the store, in memory or on disk (None = unbounded)
    pub quota_bytes: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            seeds: vec![
                "/".to_string(),
                "/manifest.json".to_string(),
                "/favicon.ico".to_string(),
            ],
            tiers: TierSet::default(),
            routing: RoutingConfig::default(),
            failure_log_capacity: DEFAULT_FAILURE_LOG_CAPACITY,
            skip_waiting: false,
            fetch_timeout_secs: None,
            cache_dir: None,
            quota_bytes: None,
        }
    }
}

fn default_origin() -> Url {
    match Url::parse(DEFAULT_ORIGIN) {
        Ok(url) => url,
        Err(_) => unreachable!("default origin is a valid URL"),
    }
}

impl CacheConfig {
    /// Read and validate a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&text)
    }

    /// Parse and validate YAML text
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Self = if text.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(text)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !matches!(self.origin.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "origin must be http or https, got {}",
                self.origin
            )));
        }
        self.tiers.validate()?;
        Classifier::new(&self.routing)?;
        self.seed_urls()?;
        Ok(())
    }

    /// Resolve a path or absolute URL against the origin.
    ///
    /// Anything that lands on another scheme, host or port is rejected,
    /// including scheme-relative `//host/...` targets.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        let url = self
            .origin
            .join(path)
            .map_err(|e| Error::Config(format!("cannot resolve {:?} against origin: {}", path, e)))?;
        if url.origin() != self.origin.origin() {
            return Err(Error::Config(format!(
                "{:?} resolves outside origin {}",
                path, self.origin
            )));
        }
        Ok(url)
    }

    /// Seed paths resolved against the origin
    pub fn seed_urls(&self) -> Result<Vec<Url>> {
        self.seeds.iter().map(|s| self.resolve(s)).collect()
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_secs.map(Duration::from_secs)
    }
}

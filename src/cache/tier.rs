//! Tier definitions
//!
//! A tier is a named partition of the store with a retention rule and a
//! max-age used by the freshness tracker.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default max-age of the API tier (5 minutes)
pub const DEFAULT_API_MAX_AGE: Duration = Duration::from_secs(5 * 60);

/// Default max-age of the image tier (30 days)
pub const DEFAULT_IMAGE_MAX_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Which strategy a tier serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierRole {
    /// Cache-first static assets and install-time seeds
    Static,
    /// Stale-while-revalidate navigations
    Runtime,
    /// Network-first API responses
    Api,
    /// Images (SWR within max-age)
    Images,
}

impl TierRole {
    pub const ALL: [TierRole; 4] = [
        TierRole::Static,
        TierRole::Runtime,
        TierRole::Api,
        TierRole::Images,
    ];
}

impl fmt::Display for TierRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TierRole::Static => write!(f, "static"),
            TierRole::Runtime => write!(f, "runtime"),
            TierRole::Api => write!(f, "api"),
            TierRole::Images => write!(f, "images"),
        }
    }
}

/// What activation does with a tier found in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Declared by the running version, kept across activations
    Keep,
    /// Left over from another version, deleted on activation
    PruneOnMismatch,
}

/// Maximum age before an entry is considered stale.
///
/// Serialized as an optional number of seconds (`null` = unbounded).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<u64>", into = "Option<u64>")]
pub enum MaxAge {
    #[default]
    Unbounded,
    Within(Duration),
}

impl From<Option<u64>> for MaxAge {
    fn from(secs: Option<u64>) -> Self {
        match secs {
            Some(secs) => MaxAge::Within(Duration::from_secs(secs)),
            None => MaxAge::Unbounded,
        }
    }
}

impl From<MaxAge> for Option<u64> {
    fn from(max_age: MaxAge) -> Self {
        match max_age {
            MaxAge::Unbounded => None,
            MaxAge::Within(d) => Some(d.as_secs()),
        }
    }
}

/// Named tier configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierSpec {
    pub name: String,
    pub role: TierRole,
    #[serde(default, rename = "max_age_secs")]
    pub max_age: MaxAge,
}

impl TierSpec {
    pub fn new(name: impl Into<String>, role: TierRole, max_age: MaxAge) -> Self {
        Self {
            name: name.into(),
            role,
            max_age,
        }
    }
}

/// The ordered set of tiers owned by one version of the layer.
///
/// Declaration order is the search order of the offline fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TierSet {
    tiers: Vec<TierSpec>,
}

impl Default for TierSet {
    fn default() -> Self {
        Self {
            tiers: vec![
                TierSpec::new("static", TierRole::Static, MaxAge::Unbounded),
                TierSpec::new("runtime", TierRole::Runtime, MaxAge::Unbounded),
                TierSpec::new("api", TierRole::Api, MaxAge::Within(DEFAULT_API_MAX_AGE)),
                TierSpec::new(
                    "images",
                    TierRole::Images,
                    MaxAge::Within(DEFAULT_IMAGE_MAX_AGE),
                ),
            ],
        }
    }
}

impl TierSet {
    /// Build a tier set, checking that names are unique and every role is covered once
    pub fn new(tiers: Vec<TierSpec>) -> Result<Self> {
        let set = Self { tiers };
        set.validate()?;
        Ok(set)
    }

    pub fn validate(&self) -> Result<()> {
        for (i, tier) in self.tiers.iter().enumerate() {
            if tier.name.trim().is_empty() {
                return Err(Error::Config(format!("tier #{i} has an empty name")));
            }
            if self.tiers[..i].iter().any(|t| t.name == tier.name) {
                return Err(Error::Config(format!("duplicate tier name: {}", tier.name)));
            }
        }
        for role in TierRole::ALL {
            match self.tiers.iter().filter(|t| t.role == role).count() {
                1 => {}
                0 => return Err(Error::Config(format!("no tier configured for role {role}"))),
                n => {
                    return Err(Error::Config(format!(
                        "{n} tiers configured for role {role}, expected one"
                    )))
                }
            }
        }
        Ok(())
    }

    /// The tier serving `role` (always present in a validated set)
    pub fn for_role(&self, role: TierRole) -> Option<&TierSpec> {
        self.tiers.iter().find(|t| t.role == role)
    }

    /// Declared tiers are kept; anything else in the store is pruned on activation
    pub fn retention_of(&self, name: &str) -> Retention {
        if self.get(name).is_some() {
            Retention::Keep
        } else {
            Retention::PruneOnMismatch
        }
    }

    pub fn get(&self, name: &str) -> Option<&TierSpec> {
        self.tiers.iter().find(|t| t.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TierSpec> {
        self.tiers.iter()
    }

    /// Names of all tiers in declaration order (the activation allow-list)
    pub fn names(&self) -> Vec<String> {
        self.tiers.iter().map(|t| t.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

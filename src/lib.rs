//! HarborCache - Client-Resident HTTP Response Cache
//!
//! Sits between an application and the network, intercepts outbound
//! requests and serves each one from a tiered local store, from the network,
//! or both, according to the class of resource requested. Keeps the
//! application usable when the network is slow, absent or failing, without
//! serving API data older than its tier allows while the network can answer.
//!
//! # Architecture
//!
//! ```text
//! request ─▶ Classifier ─▶ Strategy ─▶ TieredStore / FreshnessTracker
//!                             │                ▲
//!                             ▼                │ write-back on 2xx
//!                          Fetcher ────────────┘
//!                             │ total failure
//!                             ▼
//!                       OfflineResolver
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Network, storage, clock and event adapters
//! - [`cache`] - Classification, strategies, store, lifecycle and control
//! - [`config`] - YAML configuration
//! - [`domain`] - Ports and domain events
//! - [`error`] - Error types
//! - [`proxy`] - Local proxy host

pub mod adapters;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod proxy;

// Re-export commonly used types
pub use cache::{
    CacheLayer, CachedResponse, ControlCommand, ControlReply, Intercepted, InterceptedRequest,
    LifecycleState, ResourceClass, ResponseSource,
};
pub use config::CacheConfig;
pub use domain::ports::InterceptionLayer;
pub use error::{Error, Result};

//! Response Cache
//!
//! Intercepts outbound requests and serves them from a tiered local store,
//! the network, or both, according to the class of the requested resource.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           CacheLayer                             │
//! │                                                                  │
//! │  request ─▶ Classifier ─▶ Strategies ─▶ TieredStore ◀─┐          │
//! │                               │          (tiers)      │ 2xx only │
//! │                               ▼                       │          │
//! │                            Fetcher ───────────────────┘          │
//! │                               │ failure                          │
//! │                               ▼                                  │
//! │                        OfflineResolver                           │
//! │                                                                  │
//! │  LifecycleManager (install / activate)   ControlChannel          │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Tiers
//!
//! | Tier      | Strategy                | Max age   |
//! |-----------|-------------------------|-----------|
//! | `static`  | cache-first             | unbounded |
//! | `runtime` | stale-while-revalidate  | unbounded |
//! | `api`     | network-first           | 5 minutes |
//! | `images`  | SWR within max-age      | 30 days   |

pub mod classify;
pub mod control;
pub mod entry;
pub mod freshness;
pub mod layer;
pub mod lifecycle;
pub mod metrics;
pub mod offline;
pub mod store;
pub mod strategy;
pub mod tier;

pub use classify::{Classifier, ResourceClass, RoutingConfig};
pub use control::{ControlChannel, ControlCommand, ControlMessage, ControlReply, ControlSender};
pub use entry::{CachedEntry, CachedResponse, InterceptedRequest, ResourceKey};
pub use freshness::FreshnessTracker;
pub use layer::{CacheLayer, CacheLayerBuilder};
pub use lifecycle::{LifecycleManager, LifecycleState};
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use offline::{OfflineAnswer, OfflineResolver};
pub use store::{PruneReport, TierStatus, TieredStore};
pub use strategy::{BackgroundFailure, FailureLog, Intercepted, ResponseSource, Strategies};
pub use tier::{MaxAge, Retention, TierRole, TierSet, TierSpec};

//! Lifecycle Manager
//!
//! Owns the install/activate state machine of one layer instance.
//!
//! ```text
//!   ┌────────────┐ install ok ┌─────────┐ activate ┌────────┐
//!   │ Installing │───────────▶│ Waiting │─────────▶│ Active │
//!   └────────────┘            └─────────┘          └────────┘
//!        ▲  │                       skip_waiting ─────▲
//!        └──┘ seed failure (retry allowed)
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use reqwest::Url;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use super::entry::InterceptedRequest;
use super::store::TieredStore;
use super::tier::TierRole;
use crate::domain::events::CacheEvent;
use crate::domain::ports::{Clock, EventPublisher, Fetcher};
use crate::error::{Error, Result};

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Installing,
    Waiting,
    Active,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Installing => write!(f, "installing"),
            LifecycleState::Waiting => write!(f, "waiting"),
            LifecycleState::Active => write!(f, "active"),
        }
    }
}

/// Drives seeding, pruning and activation
pub struct LifecycleManager {
    state: RwLock<LifecycleState>,
    clients_claimed: AtomicBool,
    /// Serializes transitions
    transition: Mutex<()>,
    seeds: Vec<Url>,
    skip_waiting: bool,
    store: TieredStore,
    fetcher: Arc<dyn Fetcher>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventPublisher>,
}

impl LifecycleManager {
    pub fn new(
        seeds: Vec<Url>,
        skip_waiting: bool,
        store: TieredStore,
        fetcher: Arc<dyn Fetcher>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            state: RwLock::new(LifecycleState::Installing),
            clients_claimed: AtomicBool::new(false),
            transition: Mutex::new(()),
            seeds,
            skip_waiting,
            store,
            fetcher,
            clock,
            events,
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    pub fn is_active(&self) -> bool {
        self.state() == LifecycleState::Active
    }

    /// Whether this instance has taken over already-open clients
    pub fn clients_claimed(&self) -> bool {
        self.clients_claimed.load(Ordering::Acquire)
    }

    /// Seed the static tier.
    ///
    /// Any failed seed aborts and leaves the state at `Installing`. A no-op
    /// once installed.
    #[instrument(skip(self), fields(seeds = self.seeds.len()))]
    pub async fn install(&self) -> Result<()> {
        {
            let _guard = self.transition.lock().await;
            if self.state() != LifecycleState::Installing {
                return Ok(());
            }

            if let Err(e) = self.seed_static_tier().await {
                if let Error::InstallFailed { url, reason } = &e {
                    self.publish(CacheEvent::InstallFailed {
                        url: url.clone(),
                        reason: reason.clone(),
                        timestamp: self.clock.now(),
                    })
                    .await;
                }
                return Err(e);
            }

            *self.state.write() = LifecycleState::Waiting;
            info!("Installed {} seed resources, waiting to activate", self.seeds.len());
            self.publish(CacheEvent::Installed {
                seeded: self.seeds.len(),
                timestamp: self.clock.now(),
            })
            .await;
        }

        if self.skip_waiting {
            self.activate().await?;
        }
        Ok(())
    }

    async fn seed_static_tier(&self) -> Result<()> {
        let tier = self
            .store
            .tiers()
            .for_role(TierRole::Static)
            .map(|t| t.name.clone())
            .ok_or_else(|| Error::Config("no static tier configured".to_string()))?;

        let fetches = self.seeds.iter().map(|url| {
            let tier = tier.clone();
            async move {
                let request = InterceptedRequest::new(reqwest::Method::GET, url.clone());
                let response = self.fetcher.fetch(&request).await.map_err(|e| {
                    Error::InstallFailed {
                        url: url.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                if !response.is_success() {
                    return Err(Error::InstallFailed {
                        url: url.to_string(),
                        reason: format!("origin answered {}", response.status),
                    });
                }
                if let Some(key) = request.key() {
                    if !self.store.store(&tier, &key, &response).await {
                        return Err(Error::InstallFailed {
                            url: url.to_string(),
                            reason: format!("tier {} refused the write", tier),
                        });
                    }
                }
                Ok(())
            }
        });

        // First failure in seed order
        for result in join_all(fetches).await {
            if let Err(e) = result {
                warn!("Install failed: {}", e);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Prune foreign tiers and take over interception.
    ///
    /// Idempotent once active; rejected while still installing.
    #[instrument(skip(self))]
    pub async fn activate(&self) -> Result<()> {
        let _guard = self.transition.lock().await;
        match self.state() {
            LifecycleState::Active => return Ok(()),
            LifecycleState::Installing => {
                return Err(Error::InvalidTransition {
                    from: LifecycleState::Installing.to_string(),
                    to: LifecycleState::Active.to_string(),
                })
            }
            LifecycleState::Waiting => {}
        }

        let report = match self.store.prune().await {
            Ok(report) => report,
            Err(e) => {
                warn!("Could not list tiers for pruning: {}", e);
                Default::default()
            }
        };
        for (tier, reason) in &report.failed {
            self.publish(CacheEvent::TierPruneFailed {
                tier: tier.clone(),
                reason: reason.clone(),
                timestamp: self.clock.now(),
            })
            .await;
        }

        *self.state.write() = LifecycleState::Active;
        self.clients_claimed.store(true, Ordering::Release);
        info!("Activated, pruned tiers: {:?}", report.pruned);

        self.publish(CacheEvent::Activated {
            pruned: report.pruned,
            timestamp: self.clock.now(),
        })
        .await;
        Ok(())
    }

    async fn publish(&self, event: CacheEvent) {
        if let Err(e) = self.events.publish(event).await {
            warn!("Failed to publish event: {}", e);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

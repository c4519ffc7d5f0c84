//! Infrastructure Adapters
//!
//! This module contains adapter implementations for the domain ports,
//! following the Port/Adapter (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │  Fetcher │ TierBackend │ Clock │ EventPublisher            │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │ HttpFetcher │ InMemoryTierBackend │ FsTierBackend          │ │
//! │  │ SystemClock │ LoggingEventPublisher                        │ │
//! │  │ test doubles: StubFetcher │ ManualClock │ InMemoryEvent... │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use harborcache::adapters::{FsTierBackend, HttpFetcher};
//! use harborcache::cache::CacheLayer;
//!
//! let backend = FsTierBackend::open("/var/cache/harborcache").await?;
//! let layer = CacheLayer::builder(config)
//!     .backend(Arc::new(backend))
//!     .fetcher(Arc::new(HttpFetcher::new()?))
//!     .build()?;
//! ```

mod clock;
mod event_publisher;
mod fs_backend;
mod http_fetcher;
mod memory_backend;
mod stub_fetcher;

pub use clock::{ManualClock, SystemClock};
pub use event_publisher::{InMemoryEventCollector, LoggingEventPublisher};
pub use fs_backend::FsTierBackend;
pub use http_fetcher::HttpFetcher;
pub use memory_backend::InMemoryTierBackend;
pub use stub_fetcher::{Gate, StubFetcher};

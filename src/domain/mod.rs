//! Domain Layer
//!
//! Ports the cache layer depends on and the events it emits.

pub mod events;
pub mod ports;

pub use events::CacheEvent;
pub use ports::{
    BackendStats, Clock, EventPublisher, Fetcher, InterceptionLayer, TierBackend,
};

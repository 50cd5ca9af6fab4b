//! Refresh Orchestrator
//!
//! Keeps a banner slot filled on a fixed cadence:
//! - [`CadenceClock`]: tick coalescing and visibility suspension
//! - [`RefreshContext`]: per-slot loop index and counters
//! - [`BannerRefresher`]: the slot task and its handle

pub mod clock;
pub mod context;
pub mod orchestrator;

pub use clock::CadenceClock;
pub use context::{RefreshContext, RefreshStats, RefreshStatsSnapshot};
pub use orchestrator::{BannerRefresher, BannerRefresherBuilder};

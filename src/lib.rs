//! Ad Slot Backend Library
//!
//! Waterfall loading, second-price settlement and visibility-aware refresh
//! for ad placements. Network adapters, bid sources and platform signals
//! plug in through the traits in [`candidate`], [`auction`] and [`platform`].

pub mod auction;
pub mod candidate;
pub mod config;
pub mod events;
pub mod models;
pub mod platform;
pub mod refresh;
pub mod settlement;
pub mod sim;
pub mod telemetry;
pub mod waterfall;

pub use config::AdSlotConfig;
pub use events::{AdEvent, AdInfo, AdObserver};
pub use refresh::BannerRefresher;
pub use waterfall::{LoadError, WaterfallLoader, Winner};

//! Waterfall Loader
//!
//! Races a ranked auction batch against time: candidates are materialized
//! and loaded one at a time, in rank order, until one succeeds. Every bid in
//! the batch is settled once the round completes.

pub mod loader;

pub use loader::*;

//! Settlement
//!
//! Win/loss decisions leave the core through [`SettlementReporter`], a
//! fire-and-forget sink. Delivery, persistence and retry are the transport's
//! business; the core never waits on or retries a report.

pub mod notifier;
pub mod reporter;

pub use notifier::*;
pub use reporter::*;

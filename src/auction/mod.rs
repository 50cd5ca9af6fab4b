//! Auction
//!
//! The bid source seam (one server round-trip per refresh round) and the
//! second-price economics applied once a round has a winner.

pub mod economics;
pub mod source;

pub use economics::*;
pub use source::*;

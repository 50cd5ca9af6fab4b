//! Candidates
//!
//! A candidate is one ranked bid materialized into a loadable, destroyable
//! handle around a network adapter. The adapter seam is [`AdAdapter`]; the
//! lifecycle (Created → Loading → Loaded|Failed → Destroyed) is enforced by
//! [`Candidate`].

pub mod adapter;
pub mod handle;

pub use adapter::*;
pub use handle::*;

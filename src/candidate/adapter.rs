//! Network adapter seam
//!
//! Every ad network integration implements [`AdAdapter`]. Adapters own the
//! actual creative resource; the rest of the crate only sees this trait.

use tokio::sync::{broadcast, watch};

/// Interaction signals emitted by a displayed creative
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterEvent {
    Impression,
    Click,
}

/// Error reported by an adapter, either from `load` or later via `last_error`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterError {
    pub message: String,
}

impl AdapterError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for AdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "adapter error: {}", self.message)
    }
}

impl std::error::Error for AdapterError {}

/// Interface a network adapter must satisfy to take part in a waterfall.
///
/// `load` is time-boxed by the caller. The future may be dropped mid-flight,
/// in which case `on_timeout` and then `destroy` are called.
#[async_trait::async_trait]
pub trait AdAdapter: Send {
    /// Network identity reported with every event
    fn network(&self) -> &str;

    /// Revenue attributed to this creative, if known
    fn revenue(&self) -> Option<f64>;

    async fn load(&mut self) -> Result<(), AdapterError>;

    /// Called after `load` was abandoned for taking too long
    fn on_timeout(&mut self) {}

    /// Release the underlying network resource. Called at most once.
    fn destroy(&mut self);

    /// Click/impression stream
    fn events(&self) -> broadcast::Receiver<AdapterEvent>;

    /// Last error reported after a successful load (render failure, expiry)
    fn last_error(&self) -> watch::Receiver<Option<AdapterError>>;
}

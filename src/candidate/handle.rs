use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::{broadcast, watch};
use tracing::debug;

use super::adapter::{AdAdapter, AdapterError, AdapterEvent};
use crate::models::Bid;

/// Candidate lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateState {
    Created,
    Loading,
    Loaded,
    Failed,
    Destroyed,
}

impl std::fmt::Display for CandidateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Failed => "failed",
            Self::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

/// Why a candidate could not be materialized or loaded
#[derive(Debug, Clone)]
pub enum CandidateError {
    /// The lazy factory failed
    Construction(String),
    /// `attempt_load` called outside the Created state
    InvalidState(CandidateState),
    Adapter(AdapterError),
    Timeout(Duration),
    /// Adapter code panicked during construction or load
    Panicked(String),
}

impl std::fmt::Display for CandidateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Construction(msg) => write!(f, "construction failed: {}", msg),
            Self::InvalidState(s) => write!(f, "cannot load a candidate in state {}", s),
            Self::Adapter(e) => write!(f, "{}", e),
            Self::Timeout(t) => write!(f, "load timed out after {}ms", t.as_millis()),
            Self::Panicked(msg) => write!(f, "adapter panicked: {}", msg),
        }
    }
}

impl std::error::Error for CandidateError {}

/// Live subscription to a displayed candidate's signals
pub struct CandidateSubscription {
    pub events: broadcast::Receiver<AdapterEvent>,
    pub errors: watch::Receiver<Option<AdapterError>>,
}

/// Exclusive handle to one materialized bid.
///
/// Ownership moves from the waterfall loader to the refresh slot; it is never
/// shared. Dropping an undestroyed handle destroys the adapter, so a round
/// future cancelled mid-load still releases its resource.
pub struct Candidate {
    bid: Bid,
    adapter: Box<dyn AdAdapter>,
    state: CandidateState,
}

impl Candidate {
    pub fn new(bid: Bid, adapter: Box<dyn AdAdapter>) -> Self {
        Self {
            bid,
            adapter,
            state: CandidateState::Created,
        }
    }

    pub fn bid(&self) -> &Bid {
        &self.bid
    }

    pub fn state(&self) -> CandidateState {
        self.state
    }

    pub fn network(&self) -> &str {
        self.adapter.network()
    }

    /// Adapter-reported revenue, falling back to the bid price
    pub fn revenue(&self) -> Option<f64> {
        self.adapter.revenue().or(self.bid.price)
    }

    /// Run the adapter's load exactly once. Panics inside the adapter are
    /// captured and reported as a failure.
    pub async fn attempt_load(&mut self) -> Result<(), CandidateError> {
        if self.state != CandidateState::Created {
            return Err(CandidateError::InvalidState(self.state));
        }
        self.state = CandidateState::Loading;

        let result = AssertUnwindSafe(self.adapter.load()).catch_unwind().await;
        match result {
            Ok(Ok(())) => {
                self.state = CandidateState::Loaded;
                Ok(())
            }
            Ok(Err(e)) => {
                self.state = CandidateState::Failed;
                Err(CandidateError::Adapter(e))
            }
            Err(payload) => {
                self.state = CandidateState::Failed;
                Err(CandidateError::Panicked(panic_message(payload)))
            }
        }
    }

    /// Tell the adapter its load was abandoned. Only meaningful mid-load.
    pub fn notify_timeout(&mut self) {
        if self.state == CandidateState::Loading {
            self.state = CandidateState::Failed;
            self.adapter.on_timeout();
        }
    }

    pub fn subscribe(&self) -> CandidateSubscription {
        CandidateSubscription {
            events: self.adapter.events(),
            errors: self.adapter.last_error(),
        }
    }

    /// Idempotent
    pub fn destroy(&mut self) {
        if self.state == CandidateState::Destroyed {
            return;
        }
        debug!(
            auction_id = %self.bid.auction_id,
            bid_id = %self.bid.bid_id,
            network = %self.bid.network,
            from = %self.state,
            "Destroying candidate"
        );
        self.adapter.destroy();
        self.state = CandidateState::Destroyed;
    }
}

impl Drop for Candidate {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Candidate")
            .field("bid_id", &self.bid.bid_id)
            .field("network", &self.bid.network)
            .field("rank", &self.bid.rank)
            .field("state", &self.state)
            .finish()
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimulatedAdapter, SimulatedBehavior};

    fn bid() -> Bid {
        Bid::new("auction-1", "bid-1", 1, "testbidder").with_price(1.25)
    }

    #[tokio::test]
    async fn test_load_once_then_reject() {
        let (adapter, probe) = SimulatedAdapter::new("testbidder", SimulatedBehavior::loads());
        let mut candidate = Candidate::new(bid(), Box::new(adapter));

        assert!(candidate.attempt_load().await.is_ok());
        assert_eq!(candidate.state(), CandidateState::Loaded);

        let err = candidate.attempt_load().await.unwrap_err();
        assert!(matches!(err, CandidateError::InvalidState(CandidateState::Loaded)));
        assert_eq!(probe.load_calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_load_moves_to_failed() {
        let (adapter, _probe) = SimulatedAdapter::new("testbidder", SimulatedBehavior::fails());
        let mut candidate = Candidate::new(bid(), Box::new(adapter));

        let err = candidate.attempt_load().await.unwrap_err();
        assert!(matches!(err, CandidateError::Adapter(_)));
        assert_eq!(candidate.state(), CandidateState::Failed);
    }

    #[tokio::test]
    async fn test_panicking_adapter_is_contained() {
        let (adapter, _probe) = SimulatedAdapter::new("testbidder", SimulatedBehavior::panics());
        let mut candidate = Candidate::new(bid(), Box::new(adapter));

        let err = candidate.attempt_load().await.unwrap_err();
        assert!(matches!(err, CandidateError::Panicked(_)));
        assert_eq!(candidate.state(), CandidateState::Failed);
    }

    #[test]
    fn test_destroy_is_idempotent_and_runs_on_drop() {
        let (adapter, probe) = SimulatedAdapter::new("testbidder", SimulatedBehavior::loads());
        let mut candidate = Candidate::new(bid(), Box::new(adapter));
        candidate.destroy();
        candidate.destroy();
        drop(candidate);
        assert_eq!(probe.destroy_calls(), 1);

        let (adapter, probe) = SimulatedAdapter::new("testbidder", SimulatedBehavior::loads());
        drop(Candidate::new(bid(), Box::new(adapter)));
        assert_eq!(probe.destroy_calls(), 1);
    }

    #[test]
    fn test_timeout_hook_only_fires_while_loading() {
        let (adapter, probe) = SimulatedAdapter::new("testbidder", SimulatedBehavior::loads());
        let mut candidate = Candidate::new(bid(), Box::new(adapter));
        candidate.notify_timeout();
        assert_eq!(probe.timeout_calls(), 0);
        assert_eq!(candidate.state(), CandidateState::Created);
    }
}

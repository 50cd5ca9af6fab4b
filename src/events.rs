//! Ad slot event surface
//!
//! Events are delivered to an ordered list of observers, in registration
//! order. Logging is just another observer ([`TracingObserver`]) attached
//! alongside application observers.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::auction::AuctionError;
use crate::candidate::Candidate;

/// Identity and revenue of the creative an event refers to
#[derive(Debug, Clone, PartialEq)]
pub struct AdInfo {
    pub placement_id: String,
    pub network: String,
    pub auction_id: String,
    pub bid_id: String,
    pub revenue: Option<f64>,
}

impl AdInfo {
    pub fn from_candidate(placement_id: &str, candidate: &Candidate) -> Self {
        let bid = candidate.bid();
        Self {
            placement_id: placement_id.to_string(),
            network: candidate.network().to_string(),
            auction_id: bid.auction_id.clone(),
            bid_id: bid.bid_id.clone(),
            revenue: candidate.revenue(),
        }
    }
}

/// Why a refresh round produced nothing to show
#[derive(Debug, Clone, PartialEq)]
pub enum LoadFailureReason {
    /// Empty batch or every candidate failed
    NoFill,
    Transport(AuctionError),
}

impl std::fmt::Display for LoadFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoFill => write!(f, "no fill"),
            Self::Transport(e) => write!(f, "{}", e),
        }
    }
}

/// Notifications delivered to the application layer
#[derive(Debug, Clone, PartialEq)]
pub enum AdEvent {
    /// A round produced a winner (shown now or cached for later)
    Loaded(AdInfo),
    Displayed(AdInfo),
    Hidden(AdInfo),
    Clicked(AdInfo),
    LoadFailed {
        placement_id: String,
        reason: LoadFailureReason,
    },
    /// A displayed creative reported an error and was torn down
    DisplayFailed { info: AdInfo, message: String },
}

impl AdEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Loaded(_) => "loaded",
            Self::Displayed(_) => "displayed",
            Self::Hidden(_) => "hidden",
            Self::Clicked(_) => "clicked",
            Self::LoadFailed { .. } => "load_failed",
            Self::DisplayFailed { .. } => "display_failed",
        }
    }

    pub fn info(&self) -> Option<&AdInfo> {
        match self {
            Self::Loaded(info)
            | Self::Displayed(info)
            | Self::Hidden(info)
            | Self::Clicked(info)
            | Self::DisplayFailed { info, .. } => Some(info),
            Self::LoadFailed { .. } => None,
        }
    }
}

/// Receives slot events. Called on the orchestrator's task; keep it cheap.
pub trait AdObserver: Send + Sync {
    fn on_event(&self, event: &AdEvent);
}

/// Ordered observer list
#[derive(Clone, Default)]
pub struct ObserverList {
    observers: Arc<RwLock<Vec<Arc<dyn AdObserver>>>>,
}

impl ObserverList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Arc<dyn AdObserver>) {
        self.observers.write().push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    pub fn clear(&self) {
        self.observers.write().clear();
    }

    pub fn emit(&self, event: &AdEvent) {
        // Snapshot so an observer may register another without deadlocking
        let observers: Vec<_> = self.observers.read().clone();
        for observer in observers {
            observer.on_event(event);
        }
    }
}

impl std::fmt::Debug for ObserverList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverList")
            .field("observers", &self.len())
            .finish()
    }
}

/// Forwards events into a channel (tests, CLI, bridging to other runtimes)
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<AdEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AdEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AdObserver for ChannelObserver {
    fn on_event(&self, event: &AdEvent) {
        let _ = self.tx.send(event.clone());
    }
}

/// Logs every event
#[derive(Debug, Default)]
pub struct TracingObserver;

impl AdObserver for TracingObserver {
    fn on_event(&self, event: &AdEvent) {
        match event {
            AdEvent::LoadFailed {
                placement_id,
                reason,
            } => {
                warn!(placement = %placement_id, reason = %reason, "Ad load failed");
            }
            AdEvent::DisplayFailed { info, message } => {
                warn!(
                    placement = %info.placement_id,
                    network = %info.network,
                    bid_id = %info.bid_id,
                    message = %message,
                    "Ad display failed"
                );
            }
            other => {
                if let Some(info) = other.info() {
                    info!(
                        placement = %info.placement_id,
                        network = %info.network,
                        auction_id = %info.auction_id,
                        bid_id = %info.bid_id,
                        revenue = ?info.revenue,
                        event = other.kind(),
                        "Ad event"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        tag: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl AdObserver for Recorder {
        fn on_event(&self, event: &AdEvent) {
            self.log.lock().push(format!("{}:{}", self.tag, event.kind()));
        }
    }

    fn no_fill() -> AdEvent {
        AdEvent::LoadFailed {
            placement_id: "p".into(),
            reason: LoadFailureReason::NoFill,
        }
    }

    #[test]
    fn test_observers_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let list = ObserverList::new();
        list.register(Arc::new(Recorder { tag: "app", log: log.clone() }));
        list.register(Arc::new(TracingObserver));
        list.register(Arc::new(Recorder { tag: "metrics", log: log.clone() }));

        list.emit(&no_fill());

        assert_eq!(*log.lock(), vec!["app:load_failed", "metrics:load_failed"]);
    }

    #[test]
    fn test_channel_observer_forwards() {
        let (observer, mut rx) = ChannelObserver::new();
        observer.on_event(&no_fill());
        assert_eq!(rx.try_recv().unwrap(), no_fill());
    }
}

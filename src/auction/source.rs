use crate::models::AuctionBatch;

/// Per-round parameters handed to the bid source.
///
/// Built by the orchestrator from its own context; nothing here is global.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundContext {
    pub placement_id: String,
    pub placement_name: String,
    /// Rounds started by this orchestrator before this one
    pub loop_index: u64,
}

impl RoundContext {
    pub fn new(placement_id: impl Into<String>, placement_name: impl Into<String>) -> Self {
        Self {
            placement_id: placement_id.into(),
            placement_name: placement_name.into(),
            loop_index: 0,
        }
    }

    pub fn with_loop_index(mut self, loop_index: u64) -> Self {
        self.loop_index = loop_index;
        self
    }
}

/// Why an auction round-trip produced no batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuctionError {
    /// Network failure or 5xx; worth trying again next round
    Transient(String),
    /// Server switched ads off for this client
    TrafficControl(String),
    /// Request rejected (bad placement, bad key)
    Permanent(String),
}

impl AuctionError {
    pub fn message(&self) -> &str {
        match self {
            Self::Transient(m) | Self::TrafficControl(m) | Self::Permanent(m) => m,
        }
    }
}

impl std::fmt::Display for AuctionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient(m) => write!(f, "transient auction failure: {}", m),
            Self::TrafficControl(m) => write!(f, "ads disabled by traffic control: {}", m),
            Self::Permanent(m) => write!(f, "permanent auction failure: {}", m),
        }
    }
}

impl std::error::Error for AuctionError {}

/// Server-side auction. One call is one round-trip; retry and backoff, if
/// any, live behind this trait.
///
/// A server "no bid" is an empty batch, not an error.
#[async_trait::async_trait]
pub trait BidSource: Send + Sync {
    async fn request_auction(&self, ctx: &RoundContext) -> Result<AuctionBatch, AuctionError>;
}

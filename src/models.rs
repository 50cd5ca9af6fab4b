//! Auction data model shared by the loader, the refresh slot and the reporters.

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::candidate::AdAdapter;

/// One currency increment added to the runner-up price (second-price rule)
pub const MIN_BID_INCREMENT: f64 = 0.01;

/// Minimum-to-win for a solo bid when no positive floor was supplied
pub const FLOOR_MINIMUM: f64 = 0.01;

/// Lazy, effectful adapter construction for one bid
pub type CreateAdapter =
    Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<Box<dyn AdAdapter>>> + Send>;

/// Immutable description of one ranked bid
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bid {
    pub auction_id: String,
    pub bid_id: String,
    /// 1 = best
    pub rank: u32,
    /// Bidder / network name
    pub network: String,
    pub price: Option<f64>,
    /// Normalized: never holds a value <= 0
    floor_price: Option<f64>,
    /// Loss notice URL (LURL)
    pub loss_url: Option<String>,
    /// Win notice URL (NURL)
    pub win_url: Option<String>,
}

impl Bid {
    pub fn new(
        auction_id: impl Into<String>,
        bid_id: impl Into<String>,
        rank: u32,
        network: impl Into<String>,
    ) -> Self {
        Self {
            auction_id: auction_id.into(),
            bid_id: bid_id.into(),
            rank,
            network: network.into(),
            price: None,
            floor_price: None,
            loss_url: None,
            win_url: None,
        }
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    /// Floors <= 0 (or non-finite) are treated as absent
    pub fn with_floor(mut self, floor: Option<f64>) -> Self {
        self.floor_price = floor.filter(|f| f.is_finite() && *f > 0.0);
        self
    }

    pub fn with_loss_url(mut self, url: impl Into<String>) -> Self {
        self.loss_url = Some(url.into()).filter(|u: &String| !u.trim().is_empty());
        self
    }

    pub fn with_win_url(mut self, url: impl Into<String>) -> Self {
        self.win_url = Some(url.into()).filter(|u: &String| !u.trim().is_empty());
        self
    }

    pub fn floor_price(&self) -> Option<f64> {
        self.floor_price
    }

    /// Price with absent treated as zero
    pub fn price_or_zero(&self) -> f64 {
        self.price.unwrap_or(0.0)
    }
}

/// A ranked bid plus the factory that materializes it
pub struct RankedCandidate {
    pub bid: Bid,
    create: CreateAdapter,
}

impl RankedCandidate {
    pub fn new(bid: Bid, create: CreateAdapter) -> Self {
        Self { bid, create }
    }

    pub(crate) fn into_parts(self) -> (Bid, CreateAdapter) {
        (self.bid, self.create)
    }
}

impl std::fmt::Debug for RankedCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RankedCandidate")
            .field("bid", &self.bid)
            .finish_non_exhaustive()
    }
}

/// Result of one auction round-trip. Consumed exactly once by the loader.
#[derive(Debug)]
pub struct AuctionBatch {
    pub auction_id: String,
    candidates: Vec<RankedCandidate>,
}

impl AuctionBatch {
    /// Candidates are ordered by rank; equal ranks keep source order
    pub fn new(auction_id: impl Into<String>, mut candidates: Vec<RankedCandidate>) -> Self {
        candidates.sort_by_key(|c| c.bid.rank);
        Self {
            auction_id: auction_id.into(),
            candidates,
        }
    }

    pub fn empty(auction_id: impl Into<String>) -> Self {
        Self::new(auction_id, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn bids(&self) -> impl Iterator<Item = &Bid> {
        self.candidates.iter().map(|c| &c.bid)
    }

    pub(crate) fn into_candidates(self) -> Vec<RankedCandidate> {
        self.candidates
    }
}

/// Loss reason codes as understood by bidders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementOutcome {
    Won,
    LostToHigherBid,
    TechnicalError,
}

impl SettlementOutcome {
    pub fn code(self) -> u16 {
        match self {
            Self::Won => 0,
            Self::TechnicalError => 1,
            Self::LostToHigherBid => 102,
        }
    }

    pub fn is_win(self) -> bool {
        matches!(self, Self::Won)
    }
}

impl std::fmt::Display for SettlementOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Won => "won",
            Self::LostToHigherBid => "lost_to_higher_bid",
            Self::TechnicalError => "technical_error",
        };
        f.write_str(s)
    }
}

/// One win/loss decision. Sent once, never retried by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementRecord {
    pub auction_id: String,
    pub bid_id: String,
    pub network: String,
    pub outcome: SettlementOutcome,
    pub auction_min_to_win: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice_url: Option<String>,
    pub decided_at: DateTime<Utc>,
}

impl SettlementRecord {
    pub fn new(bid: &Bid, outcome: SettlementOutcome, auction_min_to_win: f64) -> Self {
        let notice_url = if outcome.is_win() {
            bid.win_url.clone()
        } else {
            bid.loss_url.clone()
        };
        Self {
            auction_id: bid.auction_id.clone(),
            bid_id: bid.bid_id.clone(),
            network: bid.network.clone(),
            outcome,
            auction_min_to_win,
            notice_url,
            decided_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;

    fn noop_factory() -> CreateAdapter {
        Box::new(|| async { Err::<Box<dyn AdAdapter>, _>(anyhow::anyhow!("unused")) }.boxed())
    }

    #[test]
    fn test_floor_normalization() {
        let b = Bid::new("a", "b", 1, "n");
        assert_eq!(b.clone().with_floor(Some(2.0)).floor_price(), Some(2.0));
        assert_eq!(b.clone().with_floor(Some(0.0)).floor_price(), None);
        assert_eq!(b.clone().with_floor(Some(-1.0)).floor_price(), None);
        assert_eq!(b.with_floor(None).floor_price(), None);
    }

    #[test]
    fn test_batch_sorted_by_rank_stable() {
        let batch = AuctionBatch::new(
            "a",
            vec![
                RankedCandidate::new(Bid::new("a", "third", 3, "n"), noop_factory()),
                RankedCandidate::new(Bid::new("a", "first", 1, "n"), noop_factory()),
                RankedCandidate::new(Bid::new("a", "tie-a", 2, "n"), noop_factory()),
                RankedCandidate::new(Bid::new("a", "tie-b", 2, "n"), noop_factory()),
            ],
        );
        let ids: Vec<_> = batch.bids().map(|b| b.bid_id.as_str()).collect();
        assert_eq!(ids, vec!["first", "tie-a", "tie-b", "third"]);
    }

    #[test]
    fn test_loss_codes() {
        assert_eq!(SettlementOutcome::Won.code(), 0);
        assert_eq!(SettlementOutcome::TechnicalError.code(), 1);
        assert_eq!(SettlementOutcome::LostToHigherBid.code(), 102);
    }

    #[test]
    fn test_record_picks_notice_url_by_outcome() {
        let bid = Bid::new("a", "b", 1, "n")
            .with_loss_url("https://l.example/${AUCTION_LOSS}")
            .with_win_url("https://w.example/${AUCTION_PRICE}");
        let won = SettlementRecord::new(&bid, SettlementOutcome::Won, 1.0);
        let lost = SettlementRecord::new(&bid, SettlementOutcome::LostToHigherBid, 1.0);
        assert!(won.notice_url.unwrap().starts_with("https://w."));
        assert!(lost.notice_url.unwrap().starts_with("https://l."));
    }
}

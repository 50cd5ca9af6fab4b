use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tracing::{debug, info, warn};

use crate::auction::{settle_round, AuctionError, BidSource, RoundContext};
use crate::candidate::handle::panic_message;
use crate::candidate::{Candidate, CandidateError};
use crate::config::WaterfallConfig;
use crate::models::{AuctionBatch, Bid, CreateAdapter, SettlementOutcome};
use crate::platform::LoadGates;
use crate::settlement::SettlementReporter;

/// Loaded winner of a round, handed to the caller undestroyed
#[derive(Debug)]
pub struct Winner {
    pub candidate: Candidate,
    pub auction_id: String,
    pub auction_min_to_win: f64,
    /// Candidates attempted, winner included
    pub attempts: usize,
}

/// Whole-round failure. Per-candidate failures never surface here.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadError {
    /// Empty batch, or every candidate failed
    NoFill { auction_id: String },
    /// The auction round-trip itself failed
    Transport(AuctionError),
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoFill { auction_id } => write!(f, "no fill for auction {}", auction_id),
            Self::Transport(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for LoadError {}

/// Ranked-fallback loader for one placement
pub struct WaterfallLoader {
    source: Arc<dyn BidSource>,
    reporter: Arc<dyn SettlementReporter>,
    gates: LoadGates,
    bid_load_timeout: Duration,
    foreground_bound: bool,
}

impl WaterfallLoader {
    pub fn new(
        source: Arc<dyn BidSource>,
        reporter: Arc<dyn SettlementReporter>,
        config: &WaterfallConfig,
    ) -> Self {
        Self {
            source,
            reporter,
            gates: LoadGates::always_ready(),
            bid_load_timeout: config.bid_load_timeout,
            foreground_bound: false,
        }
    }

    /// Gates awaited before each load attempt. The foreground gate is only
    /// consulted for foreground-bound placements.
    pub fn with_gates(mut self, gates: LoadGates, foreground_bound: bool) -> Self {
        self.gates = gates;
        self.foreground_bound = foreground_bound;
        self
    }

    pub fn bid_load_timeout(&self) -> Duration {
        self.bid_load_timeout
    }

    /// One auction round-trip followed by the waterfall over its batch
    pub async fn load(&self, ctx: &RoundContext) -> Result<Winner, LoadError> {
        let started = Instant::now();
        let batch = match self.source.request_auction(ctx).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(
                    placement = %ctx.placement_name,
                    loop_index = ctx.loop_index,
                    error = %e,
                    "Auction request failed"
                );
                return Err(LoadError::Transport(e));
            }
        };
        debug!(
            placement = %ctx.placement_name,
            auction_id = %batch.auction_id,
            bids = batch.len(),
            latency_ms = started.elapsed().as_millis() as u64,
            "Auction returned"
        );
        self.load_batch(ctx, batch).await
    }

    /// Attempt candidates strictly in rank order; stop at the first loaded
    /// one. Losers are destroyed here, settlement records are emitted once
    /// the round completes.
    pub async fn load_batch(&self, ctx: &RoundContext, batch: AuctionBatch) -> Result<Winner, LoadError> {
        let auction_id = batch.auction_id.clone();
        let candidates = batch.into_candidates();
        let ranked: Vec<Bid> = candidates.iter().map(|c| c.bid.clone()).collect();

        if candidates.is_empty() {
            info!(placement = %ctx.placement_name, auction_id = %auction_id, "Empty auction batch");
            return Err(LoadError::NoFill { auction_id });
        }

        let mut winner: Option<(usize, Candidate)> = None;
        for (index, ranked_candidate) in candidates.into_iter().enumerate() {
            let (bid, create) = ranked_candidate.into_parts();
            let rank = bid.rank;
            let network = bid.network.clone();

            match self.attempt(ctx, bid, create).await {
                Ok(candidate) => {
                    info!(
                        placement = %ctx.placement_name,
                        auction_id = %auction_id,
                        network = %network,
                        rank,
                        "Loaded"
                    );
                    winner = Some((index, candidate));
                    break;
                }
                Err(e) => {
                    warn!(
                        placement = %ctx.placement_name,
                        auction_id = %auction_id,
                        network = %network,
                        rank,
                        error = %e,
                        "Failed"
                    );
                }
            }
        }

        let records = settle_round(&ranked, winner.as_ref().map(|(index, _)| *index));
        let winner_min = records
            .iter()
            .find(|r| r.outcome == SettlementOutcome::Won)
            .map(|r| r.auction_min_to_win);
        for record in records {
            self.reporter.report(record);
        }

        match (winner, winner_min) {
            (Some((index, candidate)), Some(auction_min_to_win)) => Ok(Winner {
                candidate,
                auction_id,
                auction_min_to_win,
                attempts: index + 1,
            }),
            _ => {
                info!(
                    placement = %ctx.placement_name,
                    auction_id = %auction_id,
                    attempted = ranked.len(),
                    "No fill - all candidates failed to load"
                );
                Err(LoadError::NoFill { auction_id })
            }
        }
    }

    /// Materialize one bid and load it under the time box. On any failure the
    /// candidate is destroyed before returning.
    async fn attempt(
        &self,
        ctx: &RoundContext,
        bid: Bid,
        create: CreateAdapter,
    ) -> Result<Candidate, CandidateError> {
        let construct = match std::panic::catch_unwind(AssertUnwindSafe(create)) {
            Ok(fut) => fut,
            Err(payload) => return Err(CandidateError::Panicked(panic_message(payload))),
        };
        let adapter = match AssertUnwindSafe(construct).catch_unwind().await {
            Ok(Ok(adapter)) => adapter,
            Ok(Err(e)) => return Err(CandidateError::Construction(format!("{:#}", e))),
            Err(payload) => return Err(CandidateError::Panicked(panic_message(payload))),
        };
        let mut candidate = Candidate::new(bid, adapter);

        debug!(placement = %ctx.placement_name, "Waiting for connectivity");
        self.gates.connectivity.ready().await;
        if self.foreground_bound {
            debug!(placement = %ctx.placement_name, "Waiting for foreground");
            self.gates.foreground.ready().await;
        }

        debug!(
            placement = %ctx.placement_name,
            bid_id = %candidate.bid().bid_id,
            timeout_ms = self.bid_load_timeout.as_millis() as u64,
            "Loading candidate"
        );
        match tokio::time::timeout(self.bid_load_timeout, candidate.attempt_load()).await {
            Ok(Ok(())) => Ok(candidate),
            Ok(Err(e)) => {
                candidate.destroy();
                Err(e)
            }
            Err(_) => {
                candidate.notify_timeout();
                candidate.destroy();
                Err(CandidateError::Timeout(self.bid_load_timeout))
            }
        }
    }
}

impl std::fmt::Debug for WaterfallLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaterfallLoader")
            .field("bid_load_timeout", &self.bid_load_timeout)
            .field("foreground_bound", &self.foreground_bound)
            .finish_non_exhaustive()
    }
}

//! Simulated ad networks and bid sources
//!
//! - [`SimulatedAdapter`]: in-memory adapter with scripted latency, outcome
//!   and an optional post-display error
//! - [`SimulatedProbe`]: test/CLI handle to count calls and inject signals
//! - [`ScriptedBidSource`]: replays scripted auction rounds, cycling
//! - [`Scenario`]: TOML description of scripted rounds for `adslot-sim`

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures_util::FutureExt;
use parking_lot::Mutex;
use rand::Rng;
use serde::Deserialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::auction::{AuctionError, BidSource, RoundContext};
use crate::candidate::{AdAdapter, AdapterError, AdapterEvent};
use crate::models::{AuctionBatch, Bid, CreateAdapter, RankedCandidate};

/// How a simulated load resolves
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Succeed,
    Fail(String),
    Panic,
}

/// Scripted behavior of one simulated creative
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedBehavior {
    pub latency: Duration,
    /// Uniform random extra latency, up to this much
    pub jitter: Duration,
    pub outcome: LoadOutcome,
    pub revenue: Option<f64>,
    /// Report an error this long after a successful load
    pub error_after: Option<Duration>,
}

impl SimulatedBehavior {
    pub fn loads() -> Self {
        Self {
            latency: Duration::ZERO,
            jitter: Duration::ZERO,
            outcome: LoadOutcome::Succeed,
            revenue: None,
            error_after: None,
        }
    }

    pub fn fails() -> Self {
        Self {
            outcome: LoadOutcome::Fail("no creative".to_string()),
            ..Self::loads()
        }
    }

    pub fn panics() -> Self {
        Self {
            outcome: LoadOutcome::Panic,
            ..Self::loads()
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Latency for one load, jitter included
    fn sample_latency(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.latency;
        }
        let extra = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
        self.latency + Duration::from_millis(extra)
    }

    pub fn with_revenue(mut self, revenue: f64) -> Self {
        self.revenue = Some(revenue);
        self
    }

    pub fn with_error_after(mut self, delay: Duration) -> Self {
        self.error_after = Some(delay);
        self
    }
}

impl Default for SimulatedBehavior {
    fn default() -> Self {
        Self::loads()
    }
}

struct ProbeInner {
    load_calls: AtomicUsize,
    timeout_calls: AtomicUsize,
    destroy_calls: AtomicUsize,
    events: broadcast::Sender<AdapterEvent>,
    /// Error channel of the most recently built adapter
    errors: Mutex<Arc<watch::Sender<Option<AdapterError>>>>,
}

/// Shared view into every adapter built from the same script entry.
/// Counters and clicks are shared; errors go to the latest adapter only.
#[derive(Clone)]
pub struct SimulatedProbe {
    inner: Arc<ProbeInner>,
}

impl SimulatedProbe {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(ProbeInner {
                load_calls: AtomicUsize::new(0),
                timeout_calls: AtomicUsize::new(0),
                destroy_calls: AtomicUsize::new(0),
                events,
                errors: Mutex::new(Arc::new(error_channel())),
            }),
        }
    }

    pub fn load_calls(&self) -> usize {
        self.inner.load_calls.load(Ordering::SeqCst)
    }

    pub fn timeout_calls(&self) -> usize {
        self.inner.timeout_calls.load(Ordering::SeqCst)
    }

    pub fn destroy_calls(&self) -> usize {
        self.inner.destroy_calls.load(Ordering::SeqCst)
    }

    /// Emit a click from the creative
    pub fn click(&self) {
        let _ = self.inner.events.send(AdapterEvent::Click);
    }

    pub fn impression(&self) {
        let _ = self.inner.events.send(AdapterEvent::Impression);
    }

    /// Report a post-display error on the latest adapter
    pub fn fail(&self, message: impl Into<String>) {
        self.inner.errors.lock().send_replace(Some(AdapterError::new(message)));
    }

    fn attach(&self, errors: Arc<watch::Sender<Option<AdapterError>>>) {
        *self.inner.errors.lock() = errors;
    }
}

fn error_channel() -> watch::Sender<Option<AdapterError>> {
    watch::channel(None).0
}

impl Default for SimulatedProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SimulatedProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedProbe")
            .field("load_calls", &self.load_calls())
            .field("timeout_calls", &self.timeout_calls())
            .field("destroy_calls", &self.destroy_calls())
            .finish()
    }
}

/// In-memory ad network adapter
pub struct SimulatedAdapter {
    network: String,
    behavior: SimulatedBehavior,
    probe: SimulatedProbe,
    errors: Arc<watch::Sender<Option<AdapterError>>>,
    error_task: Option<JoinHandle<()>>,
}

impl SimulatedAdapter {
    pub fn new(network: impl Into<String>, behavior: SimulatedBehavior) -> (Self, SimulatedProbe) {
        let probe = SimulatedProbe::new();
        (Self::with_probe(network, behavior, probe.clone()), probe)
    }

    pub fn with_probe(
        network: impl Into<String>,
        behavior: SimulatedBehavior,
        probe: SimulatedProbe,
    ) -> Self {
        let errors = Arc::new(error_channel());
        probe.attach(errors.clone());
        Self {
            network: network.into(),
            behavior,
            probe,
            errors,
            error_task: None,
        }
    }
}

#[async_trait::async_trait]
impl AdAdapter for SimulatedAdapter {
    fn network(&self) -> &str {
        &self.network
    }

    fn revenue(&self) -> Option<f64> {
        self.behavior.revenue
    }

    async fn load(&mut self) -> Result<(), AdapterError> {
        self.probe.inner.load_calls.fetch_add(1, Ordering::SeqCst);
        let latency = self.behavior.sample_latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match &self.behavior.outcome {
            LoadOutcome::Succeed => {
                if let Some(delay) = self.behavior.error_after {
                    let errors = self.errors.clone();
                    let network = self.network.clone();
                    self.error_task = Some(tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        debug!(network = %network, "Simulated creative error");
                        errors.send_replace(Some(AdapterError::new(format!(
                            "{} creative expired",
                            network
                        ))));
                    }));
                }
                Ok(())
            }
            LoadOutcome::Fail(message) => Err(AdapterError::new(message.clone())),
            LoadOutcome::Panic => panic!("simulated adapter panic in {}", self.network),
        }
    }

    fn on_timeout(&mut self) {
        self.probe.inner.timeout_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn destroy(&mut self) {
        if let Some(task) = self.error_task.take() {
            task.abort();
        }
        self.probe.inner.destroy_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn events(&self) -> broadcast::Receiver<AdapterEvent> {
        self.probe.inner.events.subscribe()
    }

    fn last_error(&self) -> watch::Receiver<Option<AdapterError>> {
        self.errors.subscribe()
    }
}

/// How the factory for a scripted bid behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Construction {
    Ok,
    Fail,
    Panic,
}

/// One scripted bid in a round
#[derive(Debug, Clone)]
pub struct ScriptedBid {
    network: String,
    price: Option<f64>,
    floor: Option<f64>,
    rank: Option<u32>,
    loss_url: Option<String>,
    win_url: Option<String>,
    behavior: SimulatedBehavior,
    construction: Construction,
    probe: SimulatedProbe,
}

impl ScriptedBid {
    pub fn new(network: impl Into<String>, price: f64) -> Self {
        Self {
            network: network.into(),
            price: Some(price),
            floor: None,
            rank: None,
            loss_url: None,
            win_url: None,
            behavior: SimulatedBehavior::loads(),
            construction: Construction::Ok,
            probe: SimulatedProbe::new(),
        }
    }

    pub fn without_price(mut self) -> Self {
        self.price = None;
        self
    }

    pub fn floor(mut self, floor: f64) -> Self {
        self.floor = Some(floor);
        self
    }

    /// Explicit rank; defaults to position in the round (1-based)
    pub fn rank(mut self, rank: u32) -> Self {
        self.rank = Some(rank);
        self
    }

    pub fn loss_url(mut self, url: impl Into<String>) -> Self {
        self.loss_url = Some(url.into());
        self
    }

    pub fn win_url(mut self, url: impl Into<String>) -> Self {
        self.win_url = Some(url.into());
        self
    }

    pub fn behavior(mut self, behavior: SimulatedBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Adapter factory returns an error
    pub fn fail_construction(mut self) -> Self {
        self.construction = Construction::Fail;
        self
    }

    /// Adapter factory panics
    pub fn panic_on_construction(mut self) -> Self {
        self.construction = Construction::Panic;
        self
    }

    pub fn probe(&self) -> SimulatedProbe {
        self.probe.clone()
    }

    fn to_candidate(&self, auction_id: &str, position: usize) -> RankedCandidate {
        let rank = self.rank.unwrap_or(position as u32 + 1);
        let mut bid = Bid::new(
            auction_id,
            format!("{}-{}", self.network, Uuid::new_v4()),
            rank,
            self.network.clone(),
        )
        .with_floor(self.floor);
        if let Some(price) = self.price {
            bid = bid.with_price(price);
        }
        if let Some(url) = &self.loss_url {
            bid = bid.with_loss_url(url.clone());
        }
        if let Some(url) = &self.win_url {
            bid = bid.with_win_url(url.clone());
        }

        let network = self.network.clone();
        let behavior = self.behavior.clone();
        let probe = self.probe.clone();
        let construction = self.construction;
        let create: CreateAdapter = Box::new(move || {
            if construction == Construction::Panic {
                panic!("simulated factory panic in {}", network);
            }
            async move {
                match construction {
                    Construction::Fail => Err(anyhow::anyhow!("{} SDK not initialized", network)),
                    _ => Ok(Box::new(SimulatedAdapter::with_probe(network, behavior, probe))
                        as Box<dyn AdAdapter>),
                }
            }
            .boxed()
        });
        RankedCandidate::new(bid, create)
    }
}

/// One scripted auction response
#[derive(Debug, Clone)]
pub enum ScriptedRound {
    Bids(Vec<ScriptedBid>),
    Error(AuctionError),
}

/// Bid source replaying scripted rounds, cycling once exhausted
pub struct ScriptedBidSource {
    rounds: Vec<ScriptedRound>,
    cursor: AtomicUsize,
    latency: Duration,
}

impl ScriptedBidSource {
    pub fn new(rounds: Vec<Vec<ScriptedBid>>) -> Self {
        Self::from_rounds(rounds.into_iter().map(ScriptedRound::Bids).collect())
    }

    pub fn from_rounds(rounds: Vec<ScriptedRound>) -> Self {
        Self {
            rounds,
            cursor: AtomicUsize::new(0),
            latency: Duration::ZERO,
        }
    }

    /// Every request fails with `error`
    pub fn failing(error: AuctionError) -> Self {
        Self::from_rounds(vec![ScriptedRound::Error(error)])
    }

    /// Simulated auction round-trip time
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Auction requests served so far
    pub fn requests(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl BidSource for ScriptedBidSource {
    async fn request_auction(&self, ctx: &RoundContext) -> Result<AuctionBatch, AuctionError> {
        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let auction_id = Uuid::new_v4().to_string();
        if self.rounds.is_empty() {
            return Ok(AuctionBatch::empty(auction_id));
        }

        match &self.rounds[index % self.rounds.len()] {
            ScriptedRound::Error(e) => Err(e.clone()),
            ScriptedRound::Bids(bids) => {
                debug!(
                    placement = %ctx.placement_name,
                    loop_index = ctx.loop_index,
                    auction_id = %auction_id,
                    bids = bids.len(),
                    "Scripted auction"
                );
                let candidates = bids
                    .iter()
                    .enumerate()
                    .map(|(position, bid)| bid.to_candidate(&auction_id, position))
                    .collect();
                Ok(AuctionBatch::new(auction_id, candidates))
            }
        }
    }
}

impl std::fmt::Debug for ScriptedBidSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedBidSource")
            .field("rounds", &self.rounds.len())
            .field("requests", &self.requests())
            .finish()
    }
}

/// Scripted load outcome in scenario files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioOutcome {
    #[default]
    Load,
    Fail,
    Panic,
    ConstructionError,
}

/// Auction failure in scenario files
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ScenarioError {
    Transient(String),
    TrafficControl(String),
    Permanent(String),
}

impl From<ScenarioError> for AuctionError {
    fn from(e: ScenarioError) -> Self {
        match e {
            ScenarioError::Transient(m) => AuctionError::Transient(m),
            ScenarioError::TrafficControl(m) => AuctionError::TrafficControl(m),
            ScenarioError::Permanent(m) => AuctionError::Permanent(m),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioBid {
    pub network: String,
    pub price: Option<f64>,
    pub floor: Option<f64>,
    pub rank: Option<u32>,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub jitter_ms: u64,
    #[serde(default)]
    pub outcome: ScenarioOutcome,
    pub revenue: Option<f64>,
    pub error_after_ms: Option<u64>,
    pub loss_url: Option<String>,
    pub win_url: Option<String>,
}

impl ScenarioBid {
    fn into_scripted(self) -> ScriptedBid {
        let mut behavior = match self.outcome {
            ScenarioOutcome::Fail => SimulatedBehavior::fails(),
            ScenarioOutcome::Panic => SimulatedBehavior::panics(),
            _ => SimulatedBehavior::loads(),
        }
        .with_latency(Duration::from_millis(self.latency_ms))
        .with_jitter(Duration::from_millis(self.jitter_ms));
        if let Some(revenue) = self.revenue {
            behavior = behavior.with_revenue(revenue);
        }
        if let Some(ms) = self.error_after_ms {
            behavior = behavior.with_error_after(Duration::from_millis(ms));
        }

        let mut bid = ScriptedBid::new(self.network, self.price.unwrap_or(0.0)).behavior(behavior);
        if self.price.is_none() {
            bid = bid.without_price();
        }
        if let Some(floor) = self.floor {
            bid = bid.floor(floor);
        }
        if let Some(rank) = self.rank {
            bid = bid.rank(rank);
        }
        if let Some(url) = self.loss_url {
            bid = bid.loss_url(url);
        }
        if let Some(url) = self.win_url {
            bid = bid.win_url(url);
        }
        if self.outcome == ScenarioOutcome::ConstructionError {
            bid = bid.fail_construction();
        }
        bid
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ScenarioRound {
    #[serde(default)]
    pub bids: Vec<ScenarioBid>,
    pub error: Option<ScenarioError>,
}

/// Scripted auction rounds, loaded from TOML
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Scenario {
    #[serde(default)]
    pub auction_latency_ms: u64,
    #[serde(default)]
    pub rounds: Vec<ScenarioRound>,
}

impl Scenario {
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).context("invalid scenario")
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Three networks with a slow top bidder, a no-fill round and a
    /// transport failure
    pub fn demo() -> Self {
        let bid = |network: &str, price: f64, latency_ms: u64, outcome: ScenarioOutcome| ScenarioBid {
            network: network.to_string(),
            price: Some(price),
            floor: None,
            rank: None,
            latency_ms,
            jitter_ms: latency_ms / 2,
            outcome,
            revenue: None,
            error_after_ms: None,
            loss_url: None,
            win_url: None,
        };
        Self {
            auction_latency_ms: 120,
            rounds: vec![
                ScenarioRound {
                    bids: vec![
                        bid("meta", 5.0, 300, ScenarioOutcome::Load),
                        bid("mintegral", 4.5, 200, ScenarioOutcome::Load),
                    ],
                    error: None,
                },
                ScenarioRound {
                    bids: vec![
                        bid("vungle", 3.2, 400, ScenarioOutcome::Fail),
                        bid("meta", 2.9, 250, ScenarioOutcome::Load),
                        bid("mintegral", 1.1, 100, ScenarioOutcome::Load),
                    ],
                    error: None,
                },
                ScenarioRound {
                    bids: vec![bid("vungle", 2.0, 150, ScenarioOutcome::Fail)],
                    error: None,
                },
                ScenarioRound {
                    bids: Vec::new(),
                    error: Some(ScenarioError::Transient("HTTP 503".to_string())),
                },
            ],
        }
    }

    pub fn into_source(self) -> ScriptedBidSource {
        let rounds = self
            .rounds
            .into_iter()
            .map(|round| match round.error {
                Some(e) => ScriptedRound::Error(e.into()),
                None => ScriptedRound::Bids(
                    round.bids.into_iter().map(ScenarioBid::into_scripted).collect(),
                ),
            })
            .collect();
        ScriptedBidSource::from_rounds(rounds)
            .with_latency(Duration::from_millis(self.auction_latency_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RoundContext {
        RoundContext::new("p", "banner")
    }

    #[tokio::test]
    async fn test_source_cycles_rounds() {
        let source = ScriptedBidSource::from_rounds(vec![
            ScriptedRound::Bids(vec![ScriptedBid::new("a", 1.0), ScriptedBid::new("b", 0.5)]),
            ScriptedRound::Error(AuctionError::TrafficControl("ads disabled".into())),
        ]);

        let batch = source.request_auction(&ctx()).await.unwrap();
        assert_eq!(batch.len(), 2);
        let ranks: Vec<_> = batch.bids().map(|b| b.rank).collect();
        assert_eq!(ranks, vec![1, 2]);
        assert!(batch.bids().all(|b| b.auction_id == batch.auction_id));

        assert!(matches!(
            source.request_auction(&ctx()).await,
            Err(AuctionError::TrafficControl(_))
        ));
        assert_eq!(source.request_auction(&ctx()).await.unwrap().len(), 2);
        assert_eq!(source.requests(), 3);
    }

    #[tokio::test]
    async fn test_probe_is_shared_across_materializations() {
        let scripted = ScriptedBid::new("meta", 2.0);
        let probe = scripted.probe();
        let source = ScriptedBidSource::new(vec![vec![scripted]]);

        for _ in 0..2 {
            let batch = source.request_auction(&ctx()).await.unwrap();
            for candidate in batch.into_candidates() {
                let (_, create) = candidate.into_parts();
                let mut adapter = create().await.unwrap();
                adapter.load().await.unwrap();
                adapter.destroy();
            }
        }
        assert_eq!(probe.load_calls(), 2);
        assert_eq!(probe.destroy_calls(), 2);
    }

    #[tokio::test]
    async fn test_error_does_not_leak_into_next_adapter() {
        let scripted = ScriptedBid::new("meta", 2.0);
        let probe = scripted.probe();
        let source = ScriptedBidSource::new(vec![vec![scripted]]);

        let mut adapters = Vec::new();
        for _ in 0..2 {
            let batch = source.request_auction(&ctx()).await.unwrap();
            let (_, create) = batch.into_candidates().remove(0).into_parts();
            adapters.push(create().await.unwrap());
            if adapters.len() == 1 {
                probe.fail("expired");
            }
        }
        assert!(adapters[0].last_error().borrow().is_some());
        assert!(adapters[1].last_error().borrow().is_none());

        probe.fail("render failed");
        assert_eq!(
            adapters[1].last_error().borrow().as_ref().map(|e| e.message.clone()),
            Some("render failed".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_after_load() {
        let behavior = SimulatedBehavior::loads().with_error_after(Duration::from_secs(3));
        let (mut adapter, _probe) = SimulatedAdapter::new("meta", behavior);
        let mut errors = adapter.last_error();

        adapter.load().await.unwrap();
        errors.changed().await.unwrap();
        assert!(errors.borrow().is_some());
    }

    #[test]
    fn test_scenario_parse() {
        let scenario = Scenario::from_toml_str(
            r#"
            auction_latency_ms = 50

            [[rounds]]
            [[rounds.bids]]
            network = "meta"
            price = 5.0
            latency_ms = 200

            [[rounds.bids]]
            network = "vungle"
            price = 4.5
            outcome = "construction_error"

            [[rounds]]
            error = { kind = "transient", message = "503" }
            "#,
        )
        .unwrap();

        assert_eq!(scenario.auction_latency_ms, 50);
        assert_eq!(scenario.rounds.len(), 2);
        assert_eq!(scenario.rounds[0].bids[1].outcome, ScenarioOutcome::ConstructionError);
        assert_eq!(
            scenario.rounds[1].error,
            Some(ScenarioError::Transient("503".to_string()))
        );
    }
}

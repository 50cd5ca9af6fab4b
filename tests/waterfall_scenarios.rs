//! Waterfall loading and settlement scenarios
//!
//! Drives `WaterfallLoader` through scripted bid sources and checks the
//! winner, the per-bid settlement records and which adapters were touched.

use std::sync::Arc;
use std::time::Duration;

use adslot_backend::auction::RoundContext;
use adslot_backend::config::WaterfallConfig;
use adslot_backend::models::{SettlementOutcome, SettlementRecord};
use adslot_backend::settlement::ChannelReporter;
use adslot_backend::sim::{ScriptedBid, ScriptedBidSource, SimulatedBehavior};
use adslot_backend::waterfall::{LoadError, WaterfallLoader};
use tokio::sync::mpsc::UnboundedReceiver;

fn loader_for(round: Vec<ScriptedBid>) -> (WaterfallLoader, UnboundedReceiver<SettlementRecord>) {
    let (reporter, rx) = ChannelReporter::new();
    let config = WaterfallConfig {
        bid_load_timeout: Duration::from_secs(2),
    };
    let loader = WaterfallLoader::new(
        Arc::new(ScriptedBidSource::new(vec![round])),
        Arc::new(reporter),
        &config,
    );
    (loader, rx)
}

fn drain(rx: &mut UnboundedReceiver<SettlementRecord>) -> Vec<SettlementRecord> {
    let mut records = Vec::new();
    while let Ok(record) = rx.try_recv() {
        records.push(record);
    }
    records
}

fn ctx() -> RoundContext {
    RoundContext::new("placement-int", "banner")
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[tokio::test]
async fn test_two_loaded_bids_second_price() {
    let first = ScriptedBid::new("meta", 5.0);
    let second = ScriptedBid::new("mintegral", 4.5);
    let second_probe = second.probe();
    let (loader, mut rx) = loader_for(vec![first, second]);

    let winner = loader.load(&ctx()).await.unwrap();
    assert_eq!(winner.candidate.network(), "meta");
    assert!(approx(winner.auction_min_to_win, 4.51));

    let records = drain(&mut rx);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].outcome, SettlementOutcome::Won);
    assert!(approx(records[0].auction_min_to_win, 4.51));
    assert_eq!(records[1].outcome, SettlementOutcome::LostToHigherBid);
    assert!(approx(records[1].auction_min_to_win, 5.0));

    // ranked below the winner, so never materialized
    assert_eq!(second_probe.load_calls(), 0);
    assert_eq!(second_probe.destroy_calls(), 0);
}

#[tokio::test]
async fn test_solo_bid_without_floor() {
    let (loader, mut rx) = loader_for(vec![ScriptedBid::new("meta", 5.0)]);

    let winner = loader.load(&ctx()).await.unwrap();
    assert!(approx(winner.auction_min_to_win, 0.01));

    let records = drain(&mut rx);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, SettlementOutcome::Won);
    assert!(approx(records[0].auction_min_to_win, 0.01));
}

#[tokio::test]
async fn test_solo_bid_with_floor() {
    let (loader, _rx) = loader_for(vec![ScriptedBid::new("meta", 5.0).floor(2.0)]);
    let winner = loader.load(&ctx()).await.unwrap();
    assert!(approx(winner.auction_min_to_win, 2.0));

    let (loader, _rx) = loader_for(vec![ScriptedBid::new("meta", 5.0).floor(-3.0)]);
    let winner = loader.load(&ctx()).await.unwrap();
    assert!(approx(winner.auction_min_to_win, 0.01));
}

#[tokio::test]
async fn test_all_candidates_fail_is_no_fill() {
    let first = ScriptedBid::new("meta", 5.0).behavior(SimulatedBehavior::fails());
    let second = ScriptedBid::new("vungle", 4.0).behavior(SimulatedBehavior::fails());
    let (first_probe, second_probe) = (first.probe(), second.probe());
    let (loader, mut rx) = loader_for(vec![first, second]);

    let err = loader.load(&ctx()).await.unwrap_err();
    assert!(matches!(err, LoadError::NoFill { .. }));

    let records = drain(&mut rx);
    assert_eq!(records.len(), 2);
    assert!(records
        .iter()
        .all(|r| r.outcome == SettlementOutcome::TechnicalError));

    assert_eq!(first_probe.destroy_calls(), 1);
    assert_eq!(second_probe.destroy_calls(), 1);
}

#[tokio::test]
async fn test_empty_batch_is_no_fill() {
    let (loader, mut rx) = loader_for(Vec::new());
    let err = loader.load(&ctx()).await.unwrap_err();
    assert!(matches!(err, LoadError::NoFill { .. }));
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_failures_before_winner_are_technical() {
    let bids = vec![
        ScriptedBid::new("a", 6.0).behavior(SimulatedBehavior::fails()),
        ScriptedBid::new("b", 5.5).behavior(SimulatedBehavior::panics()),
        ScriptedBid::new("c", 5.0),
        ScriptedBid::new("d", 4.0),
    ];
    let probes: Vec<_> = bids.iter().map(|b| b.probe()).collect();
    let (loader, mut rx) = loader_for(bids);

    let winner = loader.load(&ctx()).await.unwrap();
    assert_eq!(winner.candidate.network(), "c");
    assert_eq!(winner.attempts, 3);
    // runner-up of the full ranked batch is "b"
    assert!(approx(winner.auction_min_to_win, 5.51));

    let outcomes: Vec<_> = drain(&mut rx).into_iter().map(|r| (r.outcome, r.auction_min_to_win)).collect();
    assert_eq!(outcomes.len(), 4);
    assert_eq!(outcomes[0].0, SettlementOutcome::TechnicalError);
    assert_eq!(outcomes[1].0, SettlementOutcome::TechnicalError);
    assert_eq!(outcomes[2].0, SettlementOutcome::Won);
    assert_eq!(outcomes[3].0, SettlementOutcome::LostToHigherBid);
    assert!(approx(outcomes[3].1, 5.0));

    let loads: Vec<_> = probes.iter().map(|p| p.load_calls()).collect();
    assert_eq!(loads, vec![1, 1, 1, 0]);
}

#[tokio::test]
async fn test_explicit_ranks_drive_attempt_order() {
    let bids = vec![
        ScriptedBid::new("third", 1.0).rank(3),
        ScriptedBid::new("first", 3.0).rank(1).behavior(SimulatedBehavior::fails()),
        ScriptedBid::new("second", 2.0).rank(2),
    ];
    let third_probe = bids[0].probe();
    let (loader, mut rx) = loader_for(bids);

    let winner = loader.load(&ctx()).await.unwrap();
    assert_eq!(winner.candidate.network(), "second");
    assert_eq!(third_probe.load_calls(), 0);

    let networks: Vec<_> = drain(&mut rx).into_iter().map(|r| r.network).collect();
    assert_eq!(networks, vec!["first", "second", "third"]);
}

#[tokio::test(start_paused = true)]
async fn test_slow_candidate_times_out() {
    let slow = ScriptedBid::new("slow", 9.0)
        .behavior(SimulatedBehavior::loads().with_latency(Duration::from_secs(60)));
    let slow_probe = slow.probe();
    let (loader, mut rx) = loader_for(vec![slow, ScriptedBid::new("fast", 1.0)]);

    let started = tokio::time::Instant::now();
    let winner = loader.load(&ctx()).await.unwrap();
    assert_eq!(winner.candidate.network(), "fast");
    assert!(started.elapsed() < Duration::from_secs(3));

    assert_eq!(slow_probe.timeout_calls(), 1);
    assert_eq!(slow_probe.destroy_calls(), 1);
    assert_eq!(drain(&mut rx)[0].outcome, SettlementOutcome::TechnicalError);
}

#[tokio::test]
async fn test_loss_notice_urls_carry_macros() {
    let bids = vec![
        ScriptedBid::new("meta", 3.0).win_url("https://w.example/?p=${AUCTION_PRICE}"),
        ScriptedBid::new("vungle", 2.0).loss_url("https://l.example/?p=${AUCTION_PRICE}&r=${AUCTION_LOSS}"),
    ];
    let (loader, mut rx) = loader_for(bids);
    loader.load(&ctx()).await.unwrap();

    let records = drain(&mut rx);
    let expanded: Vec<_> = records
        .iter()
        .map(|r| {
            adslot_backend::settlement::expand_notice_url(r.notice_url.as_deref().unwrap_or(""), r)
        })
        .collect();
    assert_eq!(expanded[0], "https://w.example/?p=2.01");
    assert_eq!(expanded[1], "https://l.example/?p=3&r=102");
}

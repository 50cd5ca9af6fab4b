//! Ad Slot Simulator
//!
//! Runs one banner slot against a scripted auction and simulated networks,
//! printing every slot event, every settlement record and the final counters.
//!
//! Usage:
//!   adslot-sim --config slot.toml --scenario rounds.toml --run-secs 120 --hide-at 40 --show-at 70
//!
//! Environment Variables:
//!   ADSLOT_BID_TIMEOUT_MS - Per-candidate load time box
//!   ADSLOT_REFRESH_INTERVAL_MS - Refresh cadence
//!   ADSLOT_SETTLEMENT_ENDPOINT - Settlement POST endpoint
//!   RUST_LOG - Log filter (overrides --log-level)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use adslot_backend::config::AdSlotConfig;
use adslot_backend::events::{AdEvent, ChannelObserver, TracingObserver};
use adslot_backend::platform::StatusSignal;
use adslot_backend::refresh::BannerRefresher;
use adslot_backend::settlement::{ChannelReporter, FanoutReporter, HttpSettlementReporter};
use adslot_backend::sim::Scenario;
use adslot_backend::telemetry;

#[derive(Parser, Debug)]
#[command(name = "adslot-sim")]
#[command(about = "Simulate a refreshing banner slot against scripted auctions")]
struct Args {
    /// Path to TOML slot configuration
    #[arg(short, long, env = "ADSLOT_CONFIG_PATH")]
    config: Option<String>,

    /// Path to TOML scenario (scripted auction rounds); built-in demo if omitted
    #[arg(short, long)]
    scenario: Option<String>,

    /// Total simulated run time in seconds
    #[arg(long, default_value = "120")]
    run_secs: u64,

    /// Hide the slot after this many seconds
    #[arg(long)]
    hide_at: Option<u64>,

    /// Show the slot again after this many seconds
    #[arg(long)]
    show_at: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    telemetry::init_tracing(&args.log_level)?;

    let config = match &args.config {
        Some(path) => {
            info!("Loading config from {}", path);
            AdSlotConfig::load(path).with_context(|| format!("loading config {}", path))?
        }
        None => {
            info!("Using default configuration");
            let mut config = AdSlotConfig::default();
            config.apply_env_overrides();
            config.validate().context("invalid environment overrides")?;
            config
        }
    };

    let scenario = match &args.scenario {
        Some(path) => Scenario::load(path)?,
        None => Scenario::demo(),
    };
    info!(
        placement = %config.placement.name,
        rounds = scenario.rounds.len(),
        interval_ms = config.refresh.interval.as_millis() as u64,
        bid_load_timeout_ms = config.waterfall.bid_load_timeout.as_millis() as u64,
        "Starting simulation"
    );

    let (records, mut record_rx) = ChannelReporter::new();
    let http = HttpSettlementReporter::new(config.settlement.clone())
        .context("building settlement client")?;
    let reporter = FanoutReporter::new()
        .with(Arc::new(records))
        .with(Arc::new(http));

    let (events, mut event_rx) = ChannelObserver::new();
    let visibility = StatusSignal::new(true);

    let refresher = BannerRefresher::builder(config, Arc::new(scenario.into_source()))
        .reporter(Arc::new(reporter))
        .observer(Arc::new(TracingObserver))
        .observer(Arc::new(events))
        .visibility(visibility.clone())
        .spawn();

    let started = tokio::time::Instant::now();
    let run_until = tokio::time::sleep(Duration::from_secs(args.run_secs));
    tokio::pin!(run_until);
    let hide_at = optional_sleep(started, args.hide_at);
    tokio::pin!(hide_at);
    let show_at = optional_sleep(started, args.show_at);
    tokio::pin!(show_at);
    let (mut hide_fired, mut show_fired) = (false, false);

    loop {
        tokio::select! {
            _ = &mut run_until => break,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = &mut hide_at, if !hide_fired => {
                hide_fired = true;
                println!("[{:>6.1}s] slot hidden", started.elapsed().as_secs_f64());
                visibility.set(false);
            }
            _ = &mut show_at, if !show_fired => {
                show_fired = true;
                println!("[{:>6.1}s] slot visible", started.elapsed().as_secs_f64());
                visibility.set(true);
            }
            Some(event) = event_rx.recv() => {
                println!("[{:>6.1}s] {}", started.elapsed().as_secs_f64(), describe(&event));
            }
            Some(record) = record_rx.recv() => {
                println!(
                    "[{:>6.1}s] settlement {} {} {} min_to_win={:.2}",
                    started.elapsed().as_secs_f64(),
                    record.network,
                    record.bid_id,
                    record.outcome,
                    record.auction_min_to_win
                );
            }
        }
    }

    let stats = refresher.stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    refresher.destroy().await;
    info!("Simulation finished");
    Ok(())
}

/// Sleep until `at` seconds after `started`; never resolves for `None`
async fn optional_sleep(started: tokio::time::Instant, at: Option<u64>) {
    match at {
        Some(secs) => tokio::time::sleep_until(started + Duration::from_secs(secs)).await,
        None => std::future::pending().await,
    }
}

fn describe(event: &AdEvent) -> String {
    match event {
        AdEvent::LoadFailed { placement_id, reason } => {
            format!("load_failed placement={} reason={}", placement_id, reason)
        }
        AdEvent::DisplayFailed { info, message } => {
            format!("display_failed network={} bid={} {}", info.network, info.bid_id, message)
        }
        other => match other.info() {
            Some(info) => format!(
                "{} network={} bid={} revenue={}",
                other.kind(),
                info.network,
                info.bid_id,
                info.revenue.map(|r| format!("{:.2}", r)).unwrap_or_else(|| "-".into())
            ),
            None => other.kind().to_string(),
        },
    }
}

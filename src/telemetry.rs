//! Tracing setup for binaries. The library itself never installs a subscriber.

use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Map a CLI log level string to a tracing level (unknown values fall back to info)
pub fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Install a fmt subscriber. `RUST_LOG` wins over `level` when set.
pub fn init_tracing(level: &str) -> anyhow::Result<()> {
    let fallback = format!("adslot_backend={},adslot_sim={}", parse_level(level), parse_level(level));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()?;
    Ok(())
}

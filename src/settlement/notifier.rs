//! HTTP settlement transport
//!
//! For every record:
//! - hit the bid's own notice URL (LURL for losses, NURL for the winner)
//!   after macro substitution, if enabled
//! - POST a JSON payload to the configured settlement endpoint, if any
//!
//! Failures are logged and dropped.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use super::reporter::SettlementReporter;
use crate::config::SettlementConfig;
use crate::models::SettlementRecord;

pub const MACRO_AUCTION_PRICE: &str = "${AUCTION_PRICE}";
pub const MACRO_AUCTION_LOSS: &str = "${AUCTION_LOSS}";

/// Substitute `${AUCTION_PRICE}` with the record's minimum-to-win and, for
/// losses only, `${AUCTION_LOSS}` with the loss code.
pub fn expand_notice_url(url: &str, record: &SettlementRecord) -> String {
    let mut expanded = url.replace(MACRO_AUCTION_PRICE, &format_price(record.auction_min_to_win));
    if !record.outcome.is_win() {
        expanded = expanded.replace(MACRO_AUCTION_LOSS, &record.outcome.code().to_string());
    }
    expanded
}

fn format_price(price: f64) -> String {
    ((price * 1_000_000.0).round() / 1_000_000.0).to_string()
}

/// JSON body sent to the settlement endpoint
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SettlementPayload<'a> {
    auction_id: &'a str,
    bid_id: &'a str,
    network: &'a str,
    outcome: String,
    loss_reason: u16,
    auction_min_to_win: f64,
    reported_at: DateTime<Utc>,
}

impl<'a> SettlementPayload<'a> {
    fn from_record(record: &'a SettlementRecord) -> Self {
        Self {
            auction_id: &record.auction_id,
            bid_id: &record.bid_id,
            network: &record.network,
            outcome: record.outcome.to_string(),
            loss_reason: record.outcome.code(),
            auction_min_to_win: record.auction_min_to_win,
            reported_at: Utc::now(),
        }
    }
}

/// Reqwest-backed reporter. Each report runs on its own spawned task.
#[derive(Debug, Clone)]
pub struct HttpSettlementReporter {
    client: Client,
    config: SettlementConfig,
}

impl HttpSettlementReporter {
    pub fn new(config: SettlementConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { client, config })
    }

    async fn deliver(client: Client, config: SettlementConfig, record: SettlementRecord) {
        if config.fire_notice_urls {
            if let Some(url) = record.notice_url.as_deref() {
                let url = expand_notice_url(url, &record);
                debug!(bid_id = %record.bid_id, url = %url, "Firing notice URL");
                match client.get(&url).send().await {
                    Ok(resp) if !resp.status().is_success() => {
                        warn!(bid_id = %record.bid_id, status = %resp.status(), "Notice URL rejected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(bid_id = %record.bid_id, error = %e, "Notice URL failed");
                    }
                }
            }
        }

        if let Some(endpoint) = config.endpoint.as_deref() {
            let payload = SettlementPayload::from_record(&record);
            match client.post(endpoint).json(&payload).send().await {
                Ok(resp) if !resp.status().is_success() => {
                    warn!(
                        auction_id = %record.auction_id,
                        bid_id = %record.bid_id,
                        status = %resp.status(),
                        "Settlement endpoint rejected payload"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        auction_id = %record.auction_id,
                        bid_id = %record.bid_id,
                        error = %e,
                        "Settlement endpoint unreachable"
                    );
                }
            }
        }
    }
}

impl SettlementReporter for HttpSettlementReporter {
    fn report(&self, record: SettlementRecord) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(bid_id = %record.bid_id, "No runtime available, settlement record dropped");
                return;
            }
        };
        handle.spawn(Self::deliver(self.client.clone(), self.config.clone(), record));
    }
}

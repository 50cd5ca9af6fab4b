use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::models::SettlementRecord;

/// Fire-and-forget sink for settlement records
pub trait SettlementReporter: Send + Sync {
    fn report(&self, record: SettlementRecord);
}

/// Drops every record (settlement disabled)
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl SettlementReporter for NullReporter {
    fn report(&self, record: SettlementRecord) {
        debug!(
            auction_id = %record.auction_id,
            bid_id = %record.bid_id,
            outcome = %record.outcome,
            "Settlement disabled, dropping record"
        );
    }
}

/// Forwards records into a channel for in-process inspection
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<SettlementRecord>,
}

impl ChannelReporter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SettlementRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SettlementReporter for ChannelReporter {
    fn report(&self, record: SettlementRecord) {
        let _ = self.tx.send(record);
    }
}

/// Hands each record to several reporters, in order
#[derive(Default, Clone)]
pub struct FanoutReporter {
    sinks: Vec<Arc<dyn SettlementReporter>>,
}

impl FanoutReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn SettlementReporter>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl SettlementReporter for FanoutReporter {
    fn report(&self, record: SettlementRecord) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.report(record.clone());
            }
            last.report(record);
        }
    }
}

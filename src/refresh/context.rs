use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::auction::RoundContext;
use crate::config::PlacementConfig;

/// Per-slot counters, shared with the handle
#[derive(Debug, Default)]
pub struct RefreshStats {
    pub rounds_started: AtomicU64,
    pub fills: AtomicU64,
    pub no_fills: AtomicU64,
    pub transport_failures: AtomicU64,
    pub displays: AtomicU64,
    pub backups_cached: AtomicU64,
    pub display_failures: AtomicU64,
    pub clicks: AtomicU64,
}

impl RefreshStats {
    pub fn snapshot(&self) -> RefreshStatsSnapshot {
        RefreshStatsSnapshot {
            rounds_started: self.rounds_started.load(Ordering::Relaxed),
            fills: self.fills.load(Ordering::Relaxed),
            no_fills: self.no_fills.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
            displays: self.displays.load(Ordering::Relaxed),
            backups_cached: self.backups_cached.load(Ordering::Relaxed),
            display_failures: self.display_failures.load(Ordering::Relaxed),
            clicks: self.clicks.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        for counter in [
            &self.rounds_started,
            &self.fills,
            &self.no_fills,
            &self.transport_failures,
            &self.displays,
            &self.backups_cached,
            &self.display_failures,
            &self.clicks,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct RefreshStatsSnapshot {
    pub rounds_started: u64,
    pub fills: u64,
    pub no_fills: u64,
    pub transport_failures: u64,
    pub displays: u64,
    pub backups_cached: u64,
    pub display_failures: u64,
    pub clicks: u64,
}

/// Round bookkeeping owned by one orchestrator. Never shared across
/// placements; cleared on teardown.
#[derive(Debug)]
pub struct RefreshContext {
    placement: PlacementConfig,
    loop_index: u64,
    stats: Arc<RefreshStats>,
}

impl RefreshContext {
    pub fn new(placement: PlacementConfig) -> Self {
        Self {
            placement,
            loop_index: 0,
            stats: Arc::new(RefreshStats::default()),
        }
    }

    pub fn placement(&self) -> &PlacementConfig {
        &self.placement
    }

    pub fn loop_index(&self) -> u64 {
        self.loop_index
    }

    pub fn stats(&self) -> &Arc<RefreshStats> {
        &self.stats
    }

    /// Context for the next round; bumps the loop index
    pub fn next_round(&mut self) -> RoundContext {
        let ctx = RoundContext::new(self.placement.id.clone(), self.placement.name.clone())
            .with_loop_index(self.loop_index);
        self.loop_index += 1;
        self.stats.rounds_started.fetch_add(1, Ordering::Relaxed);
        ctx
    }

    pub fn reset(&mut self) {
        self.loop_index = 0;
        self.stats.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_index_and_reset() {
        let mut ctx = RefreshContext::new(PlacementConfig::default());
        assert_eq!(ctx.next_round().loop_index, 0);
        assert_eq!(ctx.next_round().loop_index, 1);
        ctx.stats().fills.fetch_add(1, Ordering::Relaxed);

        let snapshot = ctx.stats().snapshot();
        assert_eq!(snapshot.rounds_started, 2);
        assert_eq!(snapshot.fills, 1);

        ctx.reset();
        assert_eq!(ctx.loop_index(), 0);
        assert_eq!(ctx.stats().snapshot(), RefreshStatsSnapshot::default());
    }

    #[test]
    fn test_contexts_are_independent() {
        let mut a = RefreshContext::new(PlacementConfig::default());
        let b = RefreshContext::new(PlacementConfig::default());
        a.next_round();
        assert_eq!(b.loop_index(), 0);
        assert_eq!(b.stats().snapshot().rounds_started, 0);
    }
}

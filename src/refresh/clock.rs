//! Refresh cadence state machine
//!
//! Pure bookkeeping, no timers: the orchestrator feeds it instants and asks
//! when the next tick is due and whether a round should start now.
//!
//! - Ticks only count while the slot is effectively visible; the remaining
//!   time is frozen while hidden
//! - Every trigger (tick, start, manual load, error retry) collapses into a
//!   single pending flag
//! - A round starts only when pending, visible and nothing is in flight
//! - Each finished round restarts a full interval

use std::time::Duration;

use tokio::time::Instant;

use crate::config::MIN_REFRESH_INTERVAL;

#[derive(Debug, Clone)]
pub struct CadenceClock {
    interval: Duration,
    /// Time left until the next tick, frozen while not counting
    remaining: Duration,
    /// Set only while counting (running and visible)
    deadline: Option<Instant>,
    pending_tick: bool,
    in_flight: bool,
    visible: bool,
    running: bool,
}

impl CadenceClock {
    /// Intervals under one second are raised to one second
    pub fn new(interval: Duration) -> Self {
        let interval = interval.max(MIN_REFRESH_INTERVAL);
        Self {
            interval,
            remaining: interval,
            deadline: None,
            pending_tick: false,
            in_flight: false,
            visible: false,
            running: false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn has_pending_tick(&self) -> bool {
        self.pending_tick
    }

    /// Start the cadence with an immediate tick. No-op when already running.
    pub fn start(&mut self, now: Instant) {
        if self.running {
            return;
        }
        self.running = true;
        self.remaining = self.interval;
        self.pending_tick = true;
        if self.visible {
            self.deadline = Some(now + self.remaining);
        }
    }

    /// Stop counting and drop any pending tick
    pub fn stop(&mut self) {
        self.running = false;
        self.deadline = None;
        self.remaining = self.interval;
        self.pending_tick = false;
    }

    /// Request a round outside the cadence (manual load, error retry)
    pub fn request(&mut self) {
        self.pending_tick = true;
    }

    pub fn clear_pending(&mut self) {
        self.pending_tick = false;
    }

    /// When the next tick is due, if the clock is counting
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fire the tick if due. Returns true when a tick was recorded.
    pub fn on_deadline(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.pending_tick = true;
                self.remaining = self.interval;
                self.deadline = Some(now + self.interval);
                true
            }
            _ => false,
        }
    }

    /// Returns true when the visibility actually changed
    pub fn set_visible(&mut self, visible: bool, now: Instant) -> bool {
        if self.visible == visible {
            return false;
        }
        self.visible = visible;
        if visible {
            if self.running {
                self.deadline = Some(now + self.remaining);
            }
        } else if let Some(deadline) = self.deadline.take() {
            self.remaining = deadline.saturating_duration_since(now);
        }
        true
    }

    /// Whether a round should be started right now
    pub fn wants_round(&self) -> bool {
        self.pending_tick && self.visible && !self.in_flight
    }

    pub fn round_started(&mut self) {
        self.in_flight = true;
        self.pending_tick = false;
    }

    /// Restart a full interval from `now`
    pub fn round_finished(&mut self, now: Instant) {
        self.in_flight = false;
        self.restart(now);
    }

    /// Push the next tick a full interval out
    pub fn restart(&mut self, now: Instant) {
        self.remaining = self.interval;
        if self.running && self.visible {
            self.deadline = Some(now + self.interval);
        }
    }

    /// Drop everything, including the in-flight marker
    pub fn reset(&mut self) {
        self.stop();
        self.in_flight = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(30);

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn visible_clock(now: Instant) -> CadenceClock {
        let mut clock = CadenceClock::new(INTERVAL);
        clock.set_visible(true, now);
        clock
    }

    #[test]
    fn test_interval_floor() {
        assert_eq!(CadenceClock::new(Duration::from_millis(10)).interval(), secs(1));
    }

    #[test]
    fn test_start_ticks_immediately_when_visible() {
        let t0 = Instant::now();
        let mut clock = visible_clock(t0);
        clock.start(t0);
        assert!(clock.wants_round());
        assert_eq!(clock.next_deadline(), Some(t0 + INTERVAL));
    }

    #[test]
    fn test_start_while_hidden_queues_one() {
        let t0 = Instant::now();
        let mut clock = CadenceClock::new(INTERVAL);
        clock.start(t0);
        assert!(!clock.wants_round());
        assert!(clock.next_deadline().is_none());

        clock.set_visible(true, t0 + secs(100));
        assert!(clock.wants_round());
    }

    #[test]
    fn test_ticks_coalesce_while_in_flight() {
        let t0 = Instant::now();
        let mut clock = visible_clock(t0);
        clock.start(t0);
        clock.round_started();

        assert!(clock.on_deadline(t0 + INTERVAL));
        assert!(clock.on_deadline(t0 + INTERVAL * 2));
        assert!(clock.has_pending_tick());
        assert!(!clock.wants_round());

        clock.round_finished(t0 + INTERVAL * 2 + secs(1));
        assert!(clock.wants_round());
        clock.round_started();
        assert!(!clock.has_pending_tick());
    }

    #[test]
    fn test_hidden_freezes_remaining() {
        let t0 = Instant::now();
        let mut clock = visible_clock(t0);
        clock.start(t0);
        clock.round_started();
        clock.round_finished(t0);

        clock.set_visible(false, t0 + secs(10));
        assert!(clock.next_deadline().is_none());
        assert!(!clock.on_deadline(t0 + secs(500)));

        clock.set_visible(true, t0 + secs(600));
        assert_eq!(clock.next_deadline(), Some(t0 + secs(620)));
        assert!(!clock.wants_round());
    }

    #[test]
    fn test_request_while_hidden_waits_for_visibility() {
        let t0 = Instant::now();
        let mut clock = CadenceClock::new(INTERVAL);
        clock.request();
        assert!(!clock.wants_round());
        clock.set_visible(true, t0);
        assert!(clock.wants_round());
    }

    #[test]
    fn test_stop_clears_pending() {
        let t0 = Instant::now();
        let mut clock = visible_clock(t0);
        clock.start(t0);
        clock.stop();
        assert!(!clock.wants_round());
        assert!(clock.next_deadline().is_none());
        assert!(!clock.set_visible(true, t0));
    }

    #[test]
    fn test_round_finished_restarts_full_interval() {
        let t0 = Instant::now();
        let mut clock = visible_clock(t0);
        clock.start(t0);
        clock.round_started();
        clock.round_finished(t0 + secs(4));
        assert_eq!(clock.next_deadline(), Some(t0 + secs(4) + INTERVAL));
    }
}

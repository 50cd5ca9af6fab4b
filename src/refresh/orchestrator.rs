//! Banner refresh orchestrator
//!
//! One tokio task per placement owns the visible and backup slots, the
//! cadence clock and the in-flight round. Everything reaches it as a message
//! or a watch/broadcast update, so none of its state is locked.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::clock::CadenceClock;
use super::context::{RefreshContext, RefreshStats, RefreshStatsSnapshot};
use crate::auction::BidSource;
use crate::candidate::{AdapterError, AdapterEvent, Candidate};
use crate::config::AdSlotConfig;
use crate::events::{AdEvent, AdInfo, AdObserver, LoadFailureReason, ObserverList};
use crate::platform::{AlwaysReady, LoadGates, ReadinessGate, StatusSignal};
use crate::settlement::{NullReporter, SettlementReporter};
use crate::waterfall::{LoadError, WaterfallLoader, Winner};

type RoundFuture = BoxFuture<'static, Result<Winner, LoadError>>;

enum Command {
    Load,
    StartAutoRefresh,
    StopAutoRefresh,
    Destroy(oneshot::Sender<()>),
}

/// Builder for a [`BannerRefresher`]
pub struct BannerRefresherBuilder {
    config: AdSlotConfig,
    source: Arc<dyn BidSource>,
    reporter: Arc<dyn SettlementReporter>,
    observers: ObserverList,
    visibility: StatusSignal,
    foreground: StatusSignal,
    connectivity: Arc<dyn ReadinessGate>,
}

impl BannerRefresherBuilder {
    pub fn reporter(mut self, reporter: Arc<dyn SettlementReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Observers are notified in the order they were added
    pub fn observer(self, observer: Arc<dyn AdObserver>) -> Self {
        self.observers.register(observer);
        self
    }

    /// Slot visibility. Defaults to always visible.
    pub fn visibility(mut self, signal: StatusSignal) -> Self {
        self.visibility = signal;
        self
    }

    /// Host foreground state. Defaults to always foreground.
    pub fn foreground(mut self, signal: StatusSignal) -> Self {
        self.foreground = signal;
        self
    }

    pub fn connectivity(mut self, gate: Arc<dyn ReadinessGate>) -> Self {
        self.connectivity = gate;
        self
    }

    /// Spawn the orchestrator task. Must be called within a tokio runtime.
    pub fn spawn(self) -> BannerRefresher {
        let placement = self.config.placement.clone();
        let gates = LoadGates::new(self.connectivity, Arc::new(self.foreground.gate()));
        let loader = WaterfallLoader::new(self.source, self.reporter, &self.config.waterfall)
            .with_gates(gates, placement.foreground_bound);

        let context = RefreshContext::new(placement.clone());
        let stats = context.stats().clone();
        let (commands, rx) = mpsc::unbounded_channel();

        let actor = RefreshActor {
            loader: Arc::new(loader),
            observers: self.observers,
            clock: CadenceClock::new(self.config.refresh.interval),
            context,
            visibility: self.visibility,
            foreground: self.foreground,
            round: None,
            shown: None,
            backup: None,
            clicks: None,
            errors: None,
            destroyed: false,
        };
        tokio::spawn(actor.run(rx, self.config.refresh.auto_start));

        info!(
            placement = %placement.name,
            placement_id = %placement.id,
            interval_ms = self.config.refresh.interval.as_millis() as u64,
            "Banner refresher started"
        );

        BannerRefresher {
            placement_id: placement.id,
            commands,
            stats,
        }
    }
}

/// Handle to a running banner slot. Dropping it tears the slot down.
pub struct BannerRefresher {
    placement_id: String,
    commands: mpsc::UnboundedSender<Command>,
    stats: Arc<RefreshStats>,
}

impl BannerRefresher {
    pub fn builder(config: AdSlotConfig, source: Arc<dyn BidSource>) -> BannerRefresherBuilder {
        BannerRefresherBuilder {
            config,
            source,
            reporter: Arc::new(NullReporter),
            observers: ObserverList::new(),
            visibility: StatusSignal::new(true),
            foreground: StatusSignal::new(true),
            connectivity: Arc::new(AlwaysReady),
        }
    }

    pub fn placement_id(&self) -> &str {
        &self.placement_id
    }

    /// Request a round now. Coalesced with any round already in flight;
    /// deferred until the slot is visible.
    pub fn load(&self) {
        self.send(Command::Load);
    }

    pub fn start_auto_refresh(&self) {
        self.send(Command::StartAutoRefresh);
    }

    pub fn stop_auto_refresh(&self) {
        self.send(Command::StopAutoRefresh);
    }

    /// Cancel everything and destroy both slots. Idempotent; resolves once
    /// teardown has completed.
    pub async fn destroy(&self) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Destroy(ack)).is_err() {
            return;
        }
        let _ = done.await;
    }

    pub fn is_destroyed(&self) -> bool {
        self.commands.is_closed()
    }

    pub fn stats(&self) -> RefreshStatsSnapshot {
        self.stats.snapshot()
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!(placement_id = %self.placement_id, "Refresher already destroyed, command ignored");
        }
    }
}

impl std::fmt::Debug for BannerRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BannerRefresher")
            .field("placement_id", &self.placement_id)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

/// Candidate occupying the visible slot
struct Shown {
    candidate: Candidate,
    info: AdInfo,
}

struct RefreshActor {
    loader: Arc<WaterfallLoader>,
    observers: ObserverList,
    clock: CadenceClock,
    context: RefreshContext,
    visibility: StatusSignal,
    foreground: StatusSignal,
    round: Option<RoundFuture>,
    shown: Option<Shown>,
    backup: Option<Candidate>,
    clicks: Option<broadcast::Receiver<AdapterEvent>>,
    errors: Option<watch::Receiver<Option<AdapterError>>>,
    destroyed: bool,
}

impl RefreshActor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>, auto_start: bool) {
        let mut visibility = self.visibility.subscribe();
        let mut foreground = self.foreground.subscribe();

        let now = Instant::now();
        let effective = *visibility.borrow_and_update() && *foreground.borrow_and_update();
        self.clock.set_visible(effective, now);
        if auto_start {
            self.clock.start(now);
        }
        self.drive();

        loop {
            let deadline = self.clock.next_deadline();
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Load) => {
                        debug!(placement = %self.placement_name(), "Manual load requested");
                        self.clock.request();
                    }
                    Some(Command::StartAutoRefresh) => self.clock.start(Instant::now()),
                    Some(Command::StopAutoRefresh) => {
                        debug!(placement = %self.placement_name(), "Auto refresh stopped");
                        self.clock.stop();
                    }
                    Some(Command::Destroy(ack)) => {
                        self.teardown();
                        let _ = ack.send(());
                        return;
                    }
                    None => {
                        self.teardown();
                        return;
                    }
                },
                Ok(()) = visibility.changed() => {
                    let effective = *visibility.borrow_and_update() && *foreground.borrow();
                    self.on_visibility(effective);
                }
                Ok(()) = foreground.changed() => {
                    let effective = *visibility.borrow() && *foreground.borrow_and_update();
                    self.on_visibility(effective);
                }
                outcome = next_round(&mut self.round) => {
                    self.round = None;
                    self.finish_round(outcome);
                }
                _ = sleep_until(deadline) => {
                    if self.clock.on_deadline(Instant::now()) {
                        debug!(
                            placement = %self.placement_name(),
                            in_flight = self.clock.is_in_flight(),
                            "Refresh tick"
                        );
                    }
                }
                event = next_click(&mut self.clicks) => match event {
                    Some(event) => self.on_adapter_event(event),
                    None => self.clicks = None,
                },
                error = next_error(&mut self.errors) => match error {
                    Some(error) => self.on_display_error(error),
                    None => self.errors = None,
                },
            }
            self.drive();
        }
    }

    fn placement_name(&self) -> &str {
        &self.context.placement().name
    }

    fn placement_id(&self) -> &str {
        &self.context.placement().id
    }

    /// Start a round if the clock wants one and none is in flight
    fn drive(&mut self) {
        if self.destroyed || self.round.is_some() || !self.clock.wants_round() {
            return;
        }
        self.clock.round_started();
        let ctx = self.context.next_round();
        debug!(
            placement = %ctx.placement_name,
            loop_index = ctx.loop_index,
            "Starting refresh round"
        );
        let loader = self.loader.clone();
        self.round = Some(async move { loader.load(&ctx).await }.boxed());
    }

    fn finish_round(&mut self, outcome: Result<Winner, LoadError>) {
        self.clock.round_finished(Instant::now());
        let stats = self.context.stats().clone();

        match outcome {
            Ok(winner) => {
                stats.fills.fetch_add(1, Ordering::Relaxed);
                let info = AdInfo::from_candidate(self.placement_id(), &winner.candidate);
                self.observers.emit(&AdEvent::Loaded(info.clone()));

                if self.clock.is_visible() {
                    self.show(winner.candidate, info);
                } else {
                    stats.backups_cached.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        placement = %self.placement_name(),
                        network = %info.network,
                        bid_id = %info.bid_id,
                        "Slot hidden, caching winner as backup"
                    );
                    if let Some(mut previous) = self.backup.replace(winner.candidate) {
                        previous.destroy();
                    }
                }
            }
            Err(LoadError::NoFill { auction_id }) => {
                stats.no_fills.fetch_add(1, Ordering::Relaxed);
                debug!(placement = %self.placement_name(), auction_id = %auction_id, "Round ended without fill");
                self.observers.emit(&AdEvent::LoadFailed {
                    placement_id: self.placement_id().to_string(),
                    reason: LoadFailureReason::NoFill,
                });
            }
            Err(LoadError::Transport(e)) => {
                stats.transport_failures.fetch_add(1, Ordering::Relaxed);
                self.observers.emit(&AdEvent::LoadFailed {
                    placement_id: self.placement_id().to_string(),
                    reason: LoadFailureReason::Transport(e),
                });
            }
        }
    }

    /// Swap a loaded candidate into the visible slot
    fn show(&mut self, candidate: Candidate, info: AdInfo) {
        if let Some(previous) = self.take_shown() {
            self.observers.emit(&AdEvent::Hidden(previous.info));
            drop_candidate(previous.candidate);
        }

        let mut subscription = candidate.subscribe();
        // A cached backup may have failed before it was swapped in
        let stale_error = subscription.errors.borrow_and_update().clone();
        self.clicks = Some(subscription.events);
        self.errors = Some(subscription.errors);
        self.context.stats().displays.fetch_add(1, Ordering::Relaxed);

        info!(
            placement = %self.placement_name(),
            network = %info.network,
            auction_id = %info.auction_id,
            bid_id = %info.bid_id,
            revenue = ?info.revenue,
            "Displaying banner"
        );
        self.shown = Some(Shown {
            candidate,
            info: info.clone(),
        });
        self.observers.emit(&AdEvent::Displayed(info));

        if let Some(error) = stale_error {
            self.on_display_error(error);
        }
    }

    fn take_shown(&mut self) -> Option<Shown> {
        self.clicks = None;
        self.errors = None;
        self.shown.take()
    }

    fn on_visibility(&mut self, effective: bool) {
        let now = Instant::now();
        if !self.clock.set_visible(effective, now) {
            return;
        }
        debug!(placement = %self.placement_name(), visible = effective, "Effective visibility changed");

        if effective {
            if let Some(backup) = self.backup.take() {
                self.clock.clear_pending();
                self.clock.restart(now);
                let info = AdInfo::from_candidate(self.placement_id(), &backup);
                self.show(backup, info);
            }
        }
    }

    fn on_adapter_event(&mut self, event: AdapterEvent) {
        let Some(shown) = self.shown.as_ref() else {
            return;
        };
        match event {
            AdapterEvent::Click => {
                self.context.stats().clicks.fetch_add(1, Ordering::Relaxed);
                self.observers.emit(&AdEvent::Clicked(shown.info.clone()));
            }
            AdapterEvent::Impression => {
                debug!(placement = %self.placement_name(), bid_id = %shown.info.bid_id, "Impression");
            }
        }
    }

    /// Tear down the failed creative and go straight back to requesting
    fn on_display_error(&mut self, error: AdapterError) {
        if let Some(failed) = self.take_shown() {
            self.context.stats().display_failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                placement = %self.placement_name(),
                network = %failed.info.network,
                bid_id = %failed.info.bid_id,
                error = %error,
                "Displayed banner failed, retrying immediately"
            );
            self.observers.emit(&AdEvent::DisplayFailed {
                info: failed.info.clone(),
                message: error.message.clone(),
            });
            self.observers.emit(&AdEvent::Hidden(failed.info));
            drop_candidate(failed.candidate);
        }
        self.clock.restart(Instant::now());
        self.clock.request();
    }

    /// Cancel the round, destroy both slots, emit nothing further
    fn teardown(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        // Dropping the round drops (and so destroys) whatever candidate it held
        self.round = None;
        self.clock.reset();
        if let Some(mut backup) = self.backup.take() {
            backup.destroy();
        }
        if let Some(shown) = self.take_shown() {
            drop_candidate(shown.candidate);
        }
        info!(
            placement = %self.placement_name(),
            rounds = self.context.loop_index(),
            "Banner refresher destroyed"
        );
        self.context.reset();
    }
}

impl Drop for RefreshActor {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn drop_candidate(mut candidate: Candidate) {
    candidate.destroy();
}

async fn next_round(round: &mut Option<RoundFuture>) -> Result<Winner, LoadError> {
    match round {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Next click/impression; `None` once the adapter closed its stream
async fn next_click(events: &mut Option<broadcast::Receiver<AdapterEvent>>) -> Option<AdapterEvent> {
    let rx = match events {
        Some(rx) => rx,
        None => return std::future::pending().await,
    };
    loop {
        match rx.recv().await {
            Ok(event) => return Some(event),
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => return None,
        }
    }
}

/// Next reported error; `None` once the adapter dropped its error channel
async fn next_error(
    errors: &mut Option<watch::Receiver<Option<AdapterError>>>,
) -> Option<AdapterError> {
    let rx = match errors {
        Some(rx) => rx,
        None => return std::future::pending().await,
    };
    loop {
        if rx.changed().await.is_err() {
            return None;
        }
        if let Some(error) = rx.borrow_and_update().clone() {
            return Some(error);
        }
    }
}

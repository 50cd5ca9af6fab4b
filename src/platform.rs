//! Platform collaborators
//!
//! Connectivity, host foreground state and slot visibility all reduce to a
//! boolean that changes over time. [`StatusSignal`] is the writable side,
//! [`ReadinessGate`] is what the waterfall loader waits on.

use std::sync::Arc;

use tokio::sync::watch;

/// Suspension point that completes once a platform condition holds
#[async_trait::async_trait]
pub trait ReadinessGate: Send + Sync {
    /// Resolve immediately if ready, otherwise wait until it is
    async fn ready(&self);
}

/// Gate that never blocks
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReady;

#[async_trait::async_trait]
impl ReadinessGate for AlwaysReady {
    async fn ready(&self) {}
}

/// Writable boolean status (connectivity, foreground, slot visibility)
#[derive(Debug, Clone)]
pub struct StatusSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl StatusSignal {
    pub fn new(initial: bool) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self, value: bool) {
        self.tx.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    pub fn get(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn gate(&self) -> WatchGate {
        WatchGate {
            rx: self.subscribe(),
        }
    }
}

/// Gate backed by a [`StatusSignal`]
#[derive(Debug, Clone)]
pub struct WatchGate {
    rx: watch::Receiver<bool>,
}

#[async_trait::async_trait]
impl ReadinessGate for WatchGate {
    async fn ready(&self) {
        let mut rx = self.rx.clone();
        // If the sender is gone the status can never change; stop waiting
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

/// Gates consulted before each candidate's load attempt
#[derive(Clone)]
pub struct LoadGates {
    pub connectivity: Arc<dyn ReadinessGate>,
    pub foreground: Arc<dyn ReadinessGate>,
}

impl LoadGates {
    pub fn new(connectivity: Arc<dyn ReadinessGate>, foreground: Arc<dyn ReadinessGate>) -> Self {
        Self {
            connectivity,
            foreground,
        }
    }

    pub fn always_ready() -> Self {
        Self::new(Arc::new(AlwaysReady), Arc::new(AlwaysReady))
    }
}

impl Default for LoadGates {
    fn default() -> Self {
        Self::always_ready()
    }
}

impl std::fmt::Debug for LoadGates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadGates").finish_non_exhaustive()
    }
}

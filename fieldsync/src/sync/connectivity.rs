//! Connectivity monitor
//!
//! Single source of truth for "are we online". Raw reachability reports
//! come from the platform (or the probe); the monitor turns them into
//! edge-triggered transitions. Going offline is declared immediately.
//! Going online is declared only after the network has stayed reachable
//! for the whole debounce window, so a flapping link yields at most one
//! online edge.

use super::remote::RemoteClient;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Online,
    Offline,
}

type TransitionCallback = Arc<dyn Fn(ConnectivityState) + Send + Sync>;

pub struct ConnectivityMonitor {
    /// Declared (debounced) state
    online: AtomicBool,
    /// Last raw observation
    reachable: AtomicBool,
    /// Bumped on every raw edge; stale debounce timers compare against it
    generation: AtomicU64,
    debounce: Duration,
    callbacks: Mutex<Vec<TransitionCallback>>,
    events: broadcast::Sender<ConnectivityState>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool, debounce: Duration) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            online: AtomicBool::new(initially_online),
            reachable: AtomicBool::new(initially_online),
            generation: AtomicU64::new(0),
            debounce,
            callbacks: Mutex::new(Vec::new()),
            events,
        })
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ConnectivityState {
        if self.is_online() {
            ConnectivityState::Online
        } else {
            ConnectivityState::Offline
        }
    }

    /// Register a callback invoked once per declared transition
    pub fn on_transition<F>(&self, callback: F)
    where
        F: Fn(ConnectivityState) + Send + Sync + 'static,
    {
        if let Ok(mut callbacks) = self.callbacks.lock() {
            callbacks.push(Arc::new(callback));
        }
    }

    /// Receive declared transitions as a stream
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityState> {
        self.events.subscribe()
    }

    /// Feed a raw reachability observation.
    ///
    /// Must be called from within a tokio runtime; the online debounce
    /// runs as a spawned timer.
    pub fn report(self: &Arc<Self>, reachable: bool) {
        if !reachable {
            self.reachable.store(false, Ordering::Release);
            self.generation.fetch_add(1, Ordering::AcqRel);

            if self.online.swap(false, Ordering::AcqRel) {
                tracing::info!("Connectivity lost");
                self.emit(ConnectivityState::Offline);
            }
            return;
        }

        if self.reachable.swap(true, Ordering::AcqRel) {
            // Already reachable: either online or a debounce is running
            return;
        }

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let monitor = Arc::clone(self);

        tokio::spawn(async move {
            tokio::time::sleep(monitor.debounce).await;
            monitor.settle_online(generation);
        });
    }

    fn settle_online(&self, generation: u64) {
        if self.generation.load(Ordering::Acquire) != generation
            || !self.reachable.load(Ordering::Acquire)
        {
            return;
        }

        if !self.online.swap(true, Ordering::AcqRel) {
            tracing::info!("Connectivity restored");
            self.emit(ConnectivityState::Online);
        }
    }

    fn emit(&self, state: ConnectivityState) {
        let callbacks: Vec<TransitionCallback> = match self.callbacks.lock() {
            Ok(callbacks) => callbacks.clone(),
            Err(e) => {
                tracing::error!("Connectivity callback registry poisoned: {}", e);
                return;
            }
        };

        for callback in callbacks {
            callback(state);
        }

        // No subscribers is fine
        let _ = self.events.send(state);
    }

    /// Periodically probe the remote and report the result
    pub fn spawn_probe(
        self: &Arc<Self>,
        remote: Arc<dyn RemoteClient>,
        interval: Duration,
    ) -> JoinHandle<()> {
        let monitor = Arc::clone(self);

        tokio::spawn(async move {
            tracing::info!("Starting reachability probe every {:?}", interval);
            let mut ticker = tokio::time::interval(interval);

            loop {
                ticker.tick().await;
                let reachable = remote.ping().await;
                monitor.report(reachable);
            }
        })
    }
}

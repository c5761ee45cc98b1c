//! Sync engine
//!
//! Drains the mutation queue against the remote API. One cycle runs at a
//! time (`Idle -> Draining -> Idle`); concurrent triggers from the
//! connectivity edge, writes, or a manual "sync now" are turned away and
//! fold into a single follow-up cycle. Retries are a flat counter on the
//! slot with no delay between attempts.

use super::connectivity::{ConnectivityMonitor, ConnectivityState};
use super::queue::{FailureOutcome, SyncQueue};
use super::remote::{RemoteClient, RemoteRequest};
use crate::crypto::EncryptionGateway;
use crate::database::{HttpMethod, LocalStore, QueueAction, SyncQueueItem};
use crate::error::{AppError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Draining,
}

/// Counters for one drain cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Slot ids removed without a successful replay
    pub dropped: Vec<String>,
    /// Whether a follow-up cycle should be scheduled
    pub needs_rerun: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Offline,
    AlreadyDraining,
    Completed(CycleReport),
}

/// Clears the draining flag however the cycle exits
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncEngine {
    queue: SyncQueue,
    store: LocalStore,
    crypto: Arc<EncryptionGateway>,
    remote: Arc<dyn RemoteClient>,
    connectivity: Arc<ConnectivityMonitor>,
    batch_size: u32,
    request_timeout: Duration,
    draining: AtomicBool,
    rerun_requested: AtomicBool,
}

impl SyncEngine {
    pub fn new(
        queue: SyncQueue,
        store: LocalStore,
        crypto: Arc<EncryptionGateway>,
        remote: Arc<dyn RemoteClient>,
        connectivity: Arc<ConnectivityMonitor>,
        batch_size: u32,
        request_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue,
            store,
            crypto,
            remote,
            connectivity,
            batch_size: batch_size.max(1),
            request_timeout,
            draining: AtomicBool::new(false),
            rerun_requested: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> EngineState {
        if self.draining.load(Ordering::Acquire) {
            EngineState::Draining
        } else {
            EngineState::Idle
        }
    }

    /// Run one drain cycle.
    ///
    /// A no-op when offline or when another cycle is draining. A failed item
    /// never stops the batch; only local database errors abort the cycle.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        if !self.connectivity.is_online() {
            tracing::debug!("Skipping sync cycle: offline");
            return Ok(CycleOutcome::Offline);
        }

        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.rerun_requested.store(true, Ordering::Release);
            tracing::debug!("Skipping sync cycle: already draining");
            return Ok(CycleOutcome::AlreadyDraining);
        }
        let _guard = DrainGuard(&self.draining);
        self.rerun_requested.store(false, Ordering::Release);

        let batch = self.queue.dequeue_batch(self.batch_size).await?;
        let mut report = CycleReport::default();

        if batch.is_empty() {
            return Ok(CycleOutcome::Completed(report));
        }

        tracing::info!("Draining {} queued mutation(s)", batch.len());

        for item in &batch {
            if !self.connectivity.is_online() {
                tracing::info!("Connectivity lost mid-cycle; leaving remaining items queued");
                break;
            }
            self.replay_item(item, &mut report).await?;
        }

        let full_batch = batch.len() == self.batch_size as usize;
        report.needs_rerun = self.rerun_requested.swap(false, Ordering::AcqRel)
            || (full_batch && report.succeeded > 0);

        tracing::info!(
            "Sync cycle finished: {} attempted, {} succeeded, {} failed, {} dropped",
            report.attempted,
            report.succeeded,
            report.failed,
            report.dropped.len()
        );

        Ok(CycleOutcome::Completed(report))
    }

    async fn replay_item(&self, item: &SyncQueueItem, report: &mut CycleReport) -> Result<()> {
        let request = match self.build_request(item) {
            Ok(request) => request,
            Err(e @ (AppError::Decryption(_) | AppError::Serialization(_) | AppError::InvalidInput(_))) => {
                report.attempted += 1;
                self.queue.discard(item, &e.to_string()).await?;
                report.dropped.push(item.id.clone());
                return Ok(());
            }
            Err(e) => {
                report.attempted += 1;
                self.record_failure(item, &e, report).await?;
                return Ok(());
            }
        };

        // From here on the server may see this revision
        if !self.queue.mark_dispatched(item).await? {
            tracing::debug!(
                "Slot for {} {} changed since dequeue, skipping",
                item.entity_type,
                item.entity_id
            );
            self.rerun_requested.store(true, Ordering::Release);
            return Ok(());
        }
        report.attempted += 1;

        match self.send(&request).await {
            Ok(()) => {
                report.succeeded += 1;

                if !self.queue.mark_done(item).await? {
                    tracing::debug!(
                        "Newer revision of {} {} queued during replay",
                        item.entity_type,
                        item.entity_id
                    );
                    if item.action()? == QueueAction::Create {
                        let endpoint = item.family()?.endpoint(HttpMethod::Put, &item.entity_id);
                        self.queue.promote_to_update(item, &endpoint).await?;
                    }
                    return Ok(());
                }

                if item.action()? != QueueAction::Delete {
                    self.store
                        .mark_synced(item.family()?, &item.entity_id)
                        .await?;
                }
                Ok(())
            }
            Err(e) => self.record_failure(item, &e, report).await,
        }
    }

    async fn record_failure(
        &self,
        item: &SyncQueueItem,
        error: &AppError,
        report: &mut CycleReport,
    ) -> Result<()> {
        report.failed += 1;

        match self.queue.mark_failed(item, &error.to_string()).await {
            Ok(FailureOutcome::Retrying { retries }) => {
                if error.is_transient() {
                    tracing::debug!("Replay of {} failed (attempt {}): {}", item.id, retries, error);
                } else {
                    tracing::warn!("Replay of {} failed (attempt {}): {}", item.id, retries, error);
                }
                Ok(())
            }
            Ok(FailureOutcome::Superseded) => Ok(()),
            Err(AppError::QueueExhausted(id)) => {
                report.dropped.push(id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn build_request(&self, item: &SyncQueueItem) -> Result<RemoteRequest> {
        let method = item.method()?;

        let body = if method == HttpMethod::Delete {
            None
        } else {
            let raw = if item.body_encrypted {
                if !self.crypto.is_initialized() {
                    self.crypto.initialize()?;
                }
                self.crypto.decrypt(&item.body)?
            } else {
                item.body.clone()
            };
            Some(serde_json::from_str(&raw)?)
        };

        Ok(RemoteRequest {
            method,
            endpoint: item.endpoint.clone(),
            body,
        })
    }

    async fn send(&self, request: &RemoteRequest) -> Result<()> {
        match tokio::time::timeout(self.request_timeout, self.remote.send(request)).await {
            Ok(Ok(status)) if (200..300).contains(&status) => Ok(()),
            Ok(Ok(status)) => Err(AppError::Network(format!("HTTP {}", status))),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AppError::Timeout(self.request_timeout.as_secs())),
        }
    }

    /// Fire-and-forget cycle. A follow-up cycle, when needed, is spawned as
    /// a fresh task rather than run from inside this one.
    pub fn trigger(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);

        tokio::spawn(async move {
            match engine.run_cycle().await {
                Ok(CycleOutcome::Completed(report)) if report.needs_rerun => {
                    engine.trigger();
                }
                Ok(_) => {}
                Err(e) => tracing::error!("Sync cycle failed: {}", e),
            }
        })
    }

    /// Trigger a cycle on every offline -> online edge
    pub fn attach(self: &Arc<Self>, monitor: &ConnectivityMonitor) {
        let engine: Weak<Self> = Arc::downgrade(self);

        monitor.on_transition(move |state| {
            if state != ConnectivityState::Online {
                return;
            }
            if let Some(engine) = engine.upgrade() {
                tracing::info!("Back online, draining sync queue");
                engine.trigger();
            }
        });
    }

    /// Background loop that attempts a cycle at a fixed interval
    pub fn start_periodic(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let engine = Arc::clone(self);

        tokio::spawn(async move {
            tracing::info!("Starting periodic sync every {:?}", interval);
            let mut ticker = tokio::time::interval(interval);

            loop {
                ticker.tick().await;

                if let Err(e) = engine.run_cycle().await {
                    tracing::error!("Periodic sync cycle failed: {}", e);
                }
            }
        })
    }
}

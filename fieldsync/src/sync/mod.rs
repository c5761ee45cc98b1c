//! Synchronization
//!
//! Durable mutation queue, connectivity tracking, the remote client seam,
//! and the engine that replays queued mutations when the network returns.

pub mod connectivity;
pub mod engine;
pub mod queue;
pub mod remote;

pub use connectivity::{ConnectivityMonitor, ConnectivityState};
pub use engine::{CycleOutcome, CycleReport, EngineState, SyncEngine};
pub use queue::{slot_id, EnqueueOutcome, FailureOutcome, QueuedMutation, SyncQueue};
pub use remote::{HttpRemoteClient, RemoteClient, RemoteRequest, UnconfiguredRemote};

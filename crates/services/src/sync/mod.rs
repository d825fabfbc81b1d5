//! Offline-first reconciliation between the local cache and the remote
//! progress store: the read/write engine plus the background queue drainer.

mod engine;
mod worker;

pub use engine::{FlushOutcome, ProgressSyncService, SyncConfig};
pub use worker::{ConnectivityHandle, SyncWorker};

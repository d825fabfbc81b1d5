#![forbid(unsafe_code)]

pub mod app_services;
pub mod error;
pub mod leaderboard;
pub mod remote;
pub mod sync;

pub use cursus_core::Clock;

pub use app_services::AppServices;
pub use error::AppServicesError;
pub use leaderboard::LeaderboardService;
pub use remote::{RemoteConfig, RemoteStore};
pub use sync::{ConnectivityHandle, FlushOutcome, ProgressSyncService, SyncConfig, SyncWorker};

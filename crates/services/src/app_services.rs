use std::path::PathBuf;
use std::sync::Arc;

use cursus_core::model::{ProgressSnapshot, UserId};
use storage::cache::FileCache;
use storage::repository::{MemoryCache, ProgressCache, Storage};

use crate::error::AppServicesError;
use crate::leaderboard::LeaderboardService;
use crate::remote::{RemoteConfig, RemoteStore};
use crate::sync::ProgressSyncService;
use crate::Clock;

/// Assembles the sync engine and the leaderboard projection over one backend.
#[derive(Clone)]
pub struct AppServices {
    sync: Arc<ProgressSyncService>,
    leaderboard: Arc<LeaderboardService>,
}

impl AppServices {
    /// Build services backed by `SQLite` storage and a file cache.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if the database or the cache directory
    /// cannot be opened.
    pub async fn new_sqlite(
        db_url: &str,
        cache_dir: impl Into<PathBuf>,
        clock: Clock,
    ) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        let cache = Arc::new(FileCache::open(cache_dir)?);
        Ok(Self::assemble(cache, storage, clock))
    }

    /// Build services backed by an HTTP sync backend and a file cache.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if the cache directory cannot be opened.
    pub fn new_remote(
        config: RemoteConfig,
        cache_dir: impl Into<PathBuf>,
        clock: Clock,
    ) -> Result<Self, AppServicesError> {
        let remote = RemoteStore::new(config);
        let storage = Storage {
            progress: Arc::new(remote.clone()),
            leaderboard: Arc::new(remote),
        };
        let cache = Arc::new(FileCache::open(cache_dir)?);
        Ok(Self::assemble(cache, storage, clock))
    }

    /// Build fully in-memory services, mostly for tests and demos.
    #[must_use]
    pub fn in_memory(clock: Clock) -> Self {
        Self::assemble(Arc::new(MemoryCache::new()), Storage::in_memory(), clock)
    }

    fn assemble(cache: Arc<dyn ProgressCache>, storage: Storage, clock: Clock) -> Self {
        let sync = Arc::new(
            ProgressSyncService::new(cache, Arc::clone(&storage.progress)).with_clock(clock),
        );
        let leaderboard = Arc::new(
            LeaderboardService::new(Arc::clone(&storage.leaderboard)).with_clock(clock),
        );
        Self { sync, leaderboard }
    }

    #[must_use]
    pub fn sync(&self) -> Arc<ProgressSyncService> {
        Arc::clone(&self.sync)
    }

    #[must_use]
    pub fn leaderboard(&self) -> Arc<LeaderboardService> {
        Arc::clone(&self.leaderboard)
    }

    /// Persist a snapshot locally and remotely, then refresh the user's
    /// leaderboard row from it.
    pub async fn record_progress(&self, user: &UserId, snapshot: &ProgressSnapshot) {
        self.sync.update_progress(user, snapshot).await;
        self.leaderboard.publish(user, snapshot).await;
    }
}

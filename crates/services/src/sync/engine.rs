use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use cursus_core::model::{ProgressSnapshot, UserId};
use cursus_core::time::Clock;
use storage::repository::{
    PendingWrite, ProgressCache, ProgressStore, StorageError, StoredProgress,
};

//
// ─── CONFIG ────────────────────────────────────────────────────────────────────
//

/// Tuning knobs for the reconciliation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Upper bound on any single remote call. A remote that is slower than
    /// this is treated exactly like one that is down.
    pub remote_timeout: Duration,
    /// Minimum spacing between opportunistic retries of a queued write, so
    /// a persistently offline device does not hammer the backend on every
    /// read. Explicit flushes ignore it.
    pub min_retry_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_timeout: Duration::from_secs(10),
            min_retry_interval: Duration::from_secs(30),
        }
    }
}

/// What became of one attempt to drain the pending-write slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The queued write reached the remote store; the slot is now empty.
    Flushed,
    /// The slot was already empty.
    Empty,
    /// A retry was skipped to respect the rate limit; the slot is untouched.
    Deferred,
    /// The attempt ran and the remote was still unreachable; the slot keeps
    /// the same payload with one more attempt booked.
    Failed,
}

//
// ─── ENGINE ────────────────────────────────────────────────────────────────────
//

/// Reconciles a user's progress between the device-local cache and the
/// remote durable store.
///
/// Callers see two operations, `get_progress` and `update_progress`, and
/// neither ever fails: reads prefer the most authoritative snapshot that is
/// actually available, writes land locally first and catch up remotely when
/// they can. The engine holds no per-user state of its own; every call is
/// parameterized by `UserId`, so one engine serves any number of users.
pub struct ProgressSyncService {
    cache: Arc<dyn ProgressCache>,
    remote: Arc<dyn ProgressStore>,
    clock: Clock,
    config: SyncConfig,
}

impl ProgressSyncService {
    #[must_use]
    pub fn new(cache: Arc<dyn ProgressCache>, remote: Arc<dyn ProgressStore>) -> Self {
        Self {
            cache,
            remote,
            clock: Clock::default(),
            config: SyncConfig::default(),
        }
    }

    /// Override the clock (usually for deterministic testing).
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Current time according to the engine's clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Users whose pending-write slot is occupied, for background draining.
    #[must_use]
    pub fn pending_users(&self) -> Vec<UserId> {
        self.cache.pending_users()
    }

    /// Returns the snapshot a caller should act on right now.
    ///
    /// Protocol: first try to drain any queued write, so a stale remote read
    /// cannot roll back a newer local one. If the queue could not be drained
    /// (still offline, or the retry was rate-limited), the local state is by
    /// definition the newest, so it is served directly. Otherwise the remote is
    /// authoritative when reachable: its record is normalized, written back
    /// to the cache, and returned. A reachable remote with no record means a
    /// brand-new user (initial snapshot, nothing cached); an unreachable one
    /// means the cache, then the initial snapshot.
    ///
    /// Never fails: every storage error folds into "serve the best snapshot
    /// available".
    pub async fn get_progress(&self, user: &UserId) -> ProgressSnapshot {
        let flush = self.flush_pending_inner(user, false).await;
        if matches!(flush, FlushOutcome::Deferred | FlushOutcome::Failed) {
            if let Some(snapshot) = self.cache.read(user) {
                return snapshot;
            }
            // The cache was lost but the queued write survived; it is still
            // the newest state we know.
            if let Some(pending) = self.cache.pending(user) {
                return pending.snapshot;
            }
            return ProgressSnapshot::initial();
        }

        match self.fetch_bounded(user).await {
            Ok(Some(stored)) => {
                let snapshot = stored.snapshot.normalized();
                self.cache.write(user, &snapshot);
                snapshot
            }
            Ok(None) => ProgressSnapshot::initial(),
            Err(StorageError::Malformed(reason)) => {
                warn!(user = %user, reason = %reason, "remote record malformed, serving initial snapshot");
                ProgressSnapshot::initial()
            }
            Err(StorageError::NotFound) => ProgressSnapshot::initial(),
            Err(err) => {
                debug!(user = %user, error = %err, "remote read failed, serving local state");
                self.cache
                    .read(user)
                    .unwrap_or_else(ProgressSnapshot::initial)
            }
        }
    }

    /// Applies a new snapshot: locally right away, remotely when possible.
    ///
    /// The local cache write always happens first, so the caller observes
    /// the mutation instantly regardless of connectivity. If the remote
    /// upsert fails the snapshot is parked in the pending-write slot,
    /// replacing whatever older write was queued there; if it succeeds, any
    /// queued write is obsolete and the slot is cleared. Never fails.
    pub async fn update_progress(&self, user: &UserId, snapshot: &ProgressSnapshot) {
        self.cache.write(user, snapshot);

        let now = self.now();
        match self.upsert_bounded(user, snapshot, now).await {
            Ok(()) => self.cache.clear_pending(user),
            Err(err) => {
                warn!(user = %user, error = %err, "remote write failed, queueing for retry");
                self.cache
                    .set_pending(user, PendingWrite::new(snapshot.clone(), now));
            }
        }
    }

    /// Attempts to deliver the queued write now, ignoring the rate limit.
    ///
    /// For explicit triggers: a connectivity-restored signal or a manual
    /// sync command.
    pub async fn flush_pending(&self, user: &UserId) -> FlushOutcome {
        self.flush_pending_inner(user, true).await
    }

    /// Attempts to deliver the queued write if enough time has passed since
    /// the last try. For periodic triggers that fire often.
    pub async fn flush_pending_if_due(&self, user: &UserId) -> FlushOutcome {
        self.flush_pending_inner(user, false).await
    }

    /// Overwrites the user's progress with a fresh initial snapshot, both
    /// locally and (connectivity permitting) remotely.
    pub async fn reset_progress(&self, user: &UserId) -> ProgressSnapshot {
        let initial = ProgressSnapshot::initial();
        self.update_progress(user, &initial).await;
        initial
    }

    async fn flush_pending_inner(&self, user: &UserId, forced: bool) -> FlushOutcome {
        let Some(pending) = self.cache.pending(user) else {
            return FlushOutcome::Empty;
        };

        let now = self.now();
        if !forced && !self.retry_due(&pending, now) {
            return FlushOutcome::Deferred;
        }

        match self.upsert_bounded(user, &pending.snapshot, now).await {
            Ok(()) => {
                self.cache.clear_pending(user);
                info!(user = %user, attempts = pending.attempts, "queued write delivered");
                FlushOutcome::Flushed
            }
            Err(err) => {
                debug!(user = %user, error = %err, "queued write still undeliverable");
                self.cache.set_pending(user, pending.recorded_attempt(now));
                FlushOutcome::Failed
            }
        }
    }

    fn retry_due(&self, pending: &PendingWrite, now: DateTime<Utc>) -> bool {
        let Some(last) = pending.last_attempt_at else {
            return true;
        };
        match now.signed_duration_since(last).to_std() {
            Ok(elapsed) => elapsed >= self.config.min_retry_interval,
            // The clock went backwards since the last attempt; trying again
            // beats wedging the queue.
            Err(_) => true,
        }
    }

    async fn fetch_bounded(
        &self,
        user: &UserId,
    ) -> Result<Option<StoredProgress>, StorageError> {
        match tokio::time::timeout(self.config.remote_timeout, self.remote.fetch_latest(user)).await
        {
            Ok(result) => result,
            Err(_) => Err(StorageError::Unreachable("remote call timed out".into())),
        }
    }

    async fn upsert_bounded(
        &self,
        user: &UserId,
        snapshot: &ProgressSnapshot,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        match tokio::time::timeout(
            self.config.remote_timeout,
            self.remote.upsert(user, snapshot, updated_at),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(StorageError::Unreachable("remote call timed out".into())),
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use cursus_core::model::Year;
    use cursus_core::time::{fixed_clock, fixed_now};
    use storage::repository::{MemoryCache, MemoryProgressStore, StoredProgress};

    use super::*;

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    fn advanced_snapshot() -> ProgressSnapshot {
        ProgressSnapshot::initial()
            .with_year_unlocked(Year::new(2).unwrap())
            .with_department("physics")
    }

    fn engine(
        cache: &Arc<MemoryCache>,
        store: &Arc<MemoryProgressStore>,
        clock: Clock,
    ) -> ProgressSyncService {
        ProgressSyncService::new(
            Arc::clone(cache) as Arc<dyn ProgressCache>,
            Arc::clone(store) as Arc<dyn ProgressStore>,
        )
        .with_clock(clock)
    }

    /// Remote double that fails every call with a fixed error.
    struct ErrStore(StorageError);

    #[async_trait]
    impl ProgressStore for ErrStore {
        async fn fetch_latest(
            &self,
            _user: &UserId,
        ) -> Result<Option<StoredProgress>, StorageError> {
            Err(self.0.clone())
        }

        async fn upsert(
            &self,
            _user: &UserId,
            _snapshot: &ProgressSnapshot,
            _updated_at: DateTime<Utc>,
        ) -> Result<(), StorageError> {
            Err(self.0.clone())
        }
    }

    /// Remote double that never answers, to exercise the timeout bound.
    struct HangingStore;

    #[async_trait]
    impl ProgressStore for HangingStore {
        async fn fetch_latest(
            &self,
            _user: &UserId,
        ) -> Result<Option<StoredProgress>, StorageError> {
            std::future::pending().await
        }

        async fn upsert(
            &self,
            _user: &UserId,
            _snapshot: &ProgressSnapshot,
            _updated_at: DateTime<Utc>,
        ) -> Result<(), StorageError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn fresh_user_gets_initial_without_caching_it() {
        let cache = Arc::new(MemoryCache::new());
        let store = Arc::new(MemoryProgressStore::new());
        let sync = engine(&cache, &store, fixed_clock());
        let alice = user("alice");

        assert_eq!(sync.get_progress(&alice).await, ProgressSnapshot::initial());
        // Absence is not worth caching; the first real write will be.
        assert_eq!(cache.read(&alice), None);
    }

    #[tokio::test]
    async fn remote_record_is_served_and_refreshes_the_cache() {
        let cache = Arc::new(MemoryCache::new());
        let store = Arc::new(MemoryProgressStore::new());
        let sync = engine(&cache, &store, fixed_clock());
        let alice = user("alice");
        let snapshot = advanced_snapshot();

        store.upsert(&alice, &snapshot, fixed_now()).await.unwrap();

        assert_eq!(sync.get_progress(&alice).await, snapshot);
        assert_eq!(cache.read(&alice), Some(snapshot));
    }

    #[tokio::test]
    async fn unreachable_remote_serves_the_cache_then_initial() {
        let cache = Arc::new(MemoryCache::new());
        let store = Arc::new(MemoryProgressStore::new());
        let sync = engine(&cache, &store, fixed_clock());
        let alice = user("alice");

        store.set_reachable(false);
        assert_eq!(sync.get_progress(&alice).await, ProgressSnapshot::initial());

        let snapshot = advanced_snapshot();
        cache.write(&alice, &snapshot);
        assert_eq!(sync.get_progress(&alice).await, snapshot);
    }

    #[tokio::test]
    async fn malformed_remote_record_serves_initial() {
        let cache = Arc::new(MemoryCache::new());
        let remote: Arc<dyn ProgressStore> =
            Arc::new(ErrStore(StorageError::Malformed("bad json".into())));
        let sync = ProgressSyncService::new(
            Arc::clone(&cache) as Arc<dyn ProgressCache>,
            remote,
        )
        .with_clock(fixed_clock());

        let snapshot = sync.get_progress(&user("alice")).await;
        assert_eq!(snapshot, ProgressSnapshot::initial());
    }

    #[tokio::test]
    async fn update_lands_locally_and_remotely_when_online() {
        let cache = Arc::new(MemoryCache::new());
        let store = Arc::new(MemoryProgressStore::new());
        let sync = engine(&cache, &store, fixed_clock());
        let alice = user("alice");
        let snapshot = advanced_snapshot();

        sync.update_progress(&alice, &snapshot).await;

        assert_eq!(cache.read(&alice), Some(snapshot.clone()));
        assert_eq!(cache.pending(&alice), None);
        assert_eq!(store.record(&alice).unwrap().snapshot, snapshot);
    }

    #[tokio::test]
    async fn offline_update_queues_exactly_one_pending_write() {
        let cache = Arc::new(MemoryCache::new());
        let store = Arc::new(MemoryProgressStore::new());
        let sync = engine(&cache, &store, fixed_clock());
        let alice = user("alice");
        let snapshot = advanced_snapshot();

        store.set_reachable(false);
        sync.update_progress(&alice, &snapshot).await;

        assert_eq!(cache.read(&alice), Some(snapshot.clone()));
        let pending = cache.pending(&alice).expect("queued write");
        assert_eq!(pending.snapshot, snapshot);
        assert_eq!(pending.attempts, 1);
        assert_eq!(store.successful_upserts(), 0);
    }

    #[tokio::test]
    async fn offline_reads_return_the_latest_local_write() {
        let cache = Arc::new(MemoryCache::new());
        let store = Arc::new(MemoryProgressStore::new());
        let sync = engine(&cache, &store, fixed_clock());
        let alice = user("alice");
        let snapshot = advanced_snapshot();

        store.set_reachable(false);
        sync.update_progress(&alice, &snapshot).await;

        assert_eq!(sync.get_progress(&alice).await, snapshot);
        // The rate limit kept the read from re-attempting the queued write.
        assert_eq!(store.successful_upserts(), 0);
    }

    #[tokio::test]
    async fn stale_remote_cannot_clobber_a_queued_local_write() {
        let cache = Arc::new(MemoryCache::new());
        let store = Arc::new(MemoryProgressStore::new());
        let alice = user("alice");
        let stale = ProgressSnapshot::initial();
        let newer = advanced_snapshot();

        // The remote holds an old record, then the device goes offline and
        // writes a newer one.
        store.upsert(&alice, &stale, fixed_now()).await.unwrap();
        store.set_reachable(false);
        let sync = engine(&cache, &store, fixed_clock());
        sync.update_progress(&alice, &newer).await;

        // Connectivity returns, but the queued write is still rate-limited:
        // the read must serve the local state, not the stale remote record.
        store.set_reachable(true);
        assert_eq!(sync.get_progress(&alice).await, newer);
        assert_eq!(cache.read(&alice), Some(newer.clone()));

        // Once the retry interval has passed, a read flushes the queue and
        // the remote catches up.
        let mut later = fixed_clock();
        later.advance(ChronoDuration::seconds(31));
        let sync = engine(&cache, &store, later);
        assert_eq!(sync.get_progress(&alice).await, newer);
        assert_eq!(store.record(&alice).unwrap().snapshot, newer);
        assert_eq!(cache.pending(&alice), None);
    }

    #[tokio::test]
    async fn forced_flush_ignores_the_rate_limit() {
        let cache = Arc::new(MemoryCache::new());
        let store = Arc::new(MemoryProgressStore::new());
        let sync = engine(&cache, &store, fixed_clock());
        let alice = user("alice");
        let snapshot = advanced_snapshot();

        store.set_reachable(false);
        sync.update_progress(&alice, &snapshot).await;
        store.set_reachable(true);

        assert_eq!(sync.flush_pending_if_due(&alice).await, FlushOutcome::Deferred);
        assert_eq!(sync.flush_pending(&alice).await, FlushOutcome::Flushed);
        assert_eq!(store.record(&alice).unwrap().snapshot, snapshot);
        assert_eq!(sync.flush_pending(&alice).await, FlushOutcome::Empty);
    }

    #[tokio::test]
    async fn superseded_offline_writes_deliver_only_the_newest() {
        let cache = Arc::new(MemoryCache::new());
        let store = Arc::new(MemoryProgressStore::new());
        let sync = engine(&cache, &store, fixed_clock());
        let alice = user("alice");
        let first = advanced_snapshot();
        let second = first.with_year_unlocked(Year::new(3).unwrap());

        store.set_reachable(false);
        sync.update_progress(&alice, &first).await;
        sync.update_progress(&alice, &second).await;
        assert_eq!(cache.pending(&alice).unwrap().snapshot, second);

        store.set_reachable(true);
        assert_eq!(sync.flush_pending(&alice).await, FlushOutcome::Flushed);
        assert_eq!(store.record(&alice).unwrap().snapshot, second);
        // The superseded write never reached the remote at all.
        assert_eq!(store.successful_upserts(), 1);
    }

    #[tokio::test]
    async fn failed_flushes_book_their_attempts() {
        let cache = Arc::new(MemoryCache::new());
        let store = Arc::new(MemoryProgressStore::new());
        let alice = user("alice");
        let snapshot = advanced_snapshot();

        store.set_reachable(false);
        let sync = engine(&cache, &store, fixed_clock());
        sync.update_progress(&alice, &snapshot).await;

        let mut clock = fixed_clock();
        clock.advance(ChronoDuration::minutes(1));
        let sync = engine(&cache, &store, clock);
        assert_eq!(sync.flush_pending(&alice).await, FlushOutcome::Failed);

        let pending = cache.pending(&alice).unwrap();
        assert_eq!(pending.attempts, 2);
        assert_eq!(
            pending.last_attempt_at,
            Some(fixed_now() + ChronoDuration::minutes(1))
        );
        // The payload never changes across retries.
        assert_eq!(pending.snapshot, snapshot);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_remote_counts_as_unreachable() {
        let cache = Arc::new(MemoryCache::new());
        let remote: Arc<dyn ProgressStore> = Arc::new(HangingStore);
        let sync = ProgressSyncService::new(
            Arc::clone(&cache) as Arc<dyn ProgressCache>,
            remote,
        )
        .with_clock(fixed_clock());
        let alice = user("alice");
        let snapshot = advanced_snapshot();

        cache.write(&alice, &snapshot);
        assert_eq!(sync.get_progress(&alice).await, snapshot);

        let newer = snapshot.with_year_unlocked(Year::new(3).unwrap());
        sync.update_progress(&alice, &newer).await;
        assert_eq!(cache.pending(&alice).unwrap().snapshot, newer);
    }

    #[tokio::test]
    async fn reset_overwrites_local_and_remote() {
        let cache = Arc::new(MemoryCache::new());
        let store = Arc::new(MemoryProgressStore::new());
        let sync = engine(&cache, &store, fixed_clock());
        let alice = user("alice");

        sync.update_progress(&alice, &advanced_snapshot()).await;
        let fresh = sync.reset_progress(&alice).await;

        assert_eq!(fresh, ProgressSnapshot::initial());
        assert_eq!(cache.read(&alice), Some(ProgressSnapshot::initial()));
        assert_eq!(
            store.record(&alice).unwrap().snapshot,
            ProgressSnapshot::initial()
        );
    }
}

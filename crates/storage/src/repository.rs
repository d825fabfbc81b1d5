use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cursus_core::model::{ActivityEntry, ActivityKind, ProgressSnapshot, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by progress storage adapters.
///
/// The taxonomy is deliberately small: callers only ever distinguish
/// "cannot reach the backend", "the record does not exist", and "the record
/// exists but does not decode". Everything else folds into one of those.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StorageError {
    /// The backend cannot be contacted, or the call timed out.
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// Valid absence: the user has no stored record.
    #[error("not found")]
    NotFound,

    /// A stored record failed to decode. Treated as absence, never retried.
    #[error("malformed record: {0}")]
    Malformed(String),
}

/// A user's remote record: one opaque snapshot document plus the timestamp
/// of the write that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredProgress {
    pub snapshot: ProgressSnapshot,
    pub updated_at: DateTime<Utc>,
}

/// A locally persisted write that has not been confirmed remotely.
///
/// At most one exists per user. A newer local write replaces it whole;
/// queued writes are superseded, never merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingWrite {
    pub snapshot: ProgressSnapshot,
    pub queued_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub attempts: u32,
}

impl PendingWrite {
    /// Queues a snapshot whose first upsert just failed at `queued_at`.
    #[must_use]
    pub fn new(snapshot: ProgressSnapshot, queued_at: DateTime<Utc>) -> Self {
        Self {
            snapshot,
            queued_at,
            last_attempt_at: Some(queued_at),
            attempts: 1,
        }
    }

    /// Returns the record with one more failed attempt booked at `at`.
    #[must_use]
    pub fn recorded_attempt(&self, at: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.attempts = next.attempts.saturating_add(1);
        next.last_attempt_at = Some(at);
        next
    }
}

/// One row of the leaderboard projection: the denormalized fields a ranking
/// display needs, without loading full snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub user_id: UserId,
    pub department: Option<String>,
    pub total_xp: u64,
    pub highest_exam_score: u8,
    pub fastest_exam_time_secs: Option<u32>,
    pub practice_parts_completed: u32,
    pub updated_at: DateTime<Utc>,
}

/// Append-only record of one accomplishment, for the activity feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEventRecord {
    /// Carries the entry's id so re-publishing after a retry stays
    /// idempotent.
    pub event_id: Uuid,
    pub user_id: UserId,
    pub kind: ActivityKind,
    pub label: String,
    pub xp: u32,
    pub occurred_at: DateTime<Utc>,
}

impl ActivityEventRecord {
    #[must_use]
    pub fn from_entry(user_id: UserId, entry: &ActivityEntry) -> Self {
        Self {
            event_id: entry.id,
            user_id,
            kind: entry.kind,
            label: entry.label.clone(),
            xp: entry.xp,
            occurred_at: entry.occurred_at,
        }
    }
}

// ─── Traits ────────────────────────────────────────────────────────────────────

/// The durable, remote record of a user's progress: the source of truth
/// whenever it is reachable.
///
/// Logically a single-row-per-user table: one whole document per user,
/// insert-or-replace semantics, no server-side merging.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Fetches the latest stored snapshot for a user.
    ///
    /// Returns `Ok(None)` when the user has no remote record yet; that is
    /// an expected outcome, not an error.
    ///
    /// # Errors
    ///
    /// `StorageError::Unreachable` when the backend cannot be contacted,
    /// `StorageError::Malformed` when the stored document fails to decode.
    async fn fetch_latest(&self, user: &UserId) -> Result<Option<StoredProgress>, StorageError>;

    /// Inserts or replaces the user's whole snapshot.
    ///
    /// Idempotent: repeating an upsert with the same payload leaves the
    /// same stored state.
    ///
    /// # Errors
    ///
    /// `StorageError::Unreachable` when the backend cannot be contacted.
    async fn upsert(
        &self,
        user: &UserId,
        snapshot: &ProgressSnapshot,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StorageError>;
}

/// Device-local snapshot cache plus the per-user pending-write slot.
///
/// Calls are synchronous and never surface errors: adapters log failures
/// and report absence instead, because a cache miss and a cache failure
/// demand the same reaction from callers. Values are whole snapshots; there
/// are no field-level operations.
pub trait ProgressCache: Send + Sync {
    /// Last locally known snapshot, or `None` on a fresh device.
    fn read(&self, user: &UserId) -> Option<ProgressSnapshot>;

    fn write(&self, user: &UserId, snapshot: &ProgressSnapshot);

    /// Current content of the pending-write slot.
    fn pending(&self, user: &UserId) -> Option<PendingWrite>;

    /// Replaces the pending-write slot wholesale.
    fn set_pending(&self, user: &UserId, pending: PendingWrite);

    fn clear_pending(&self, user: &UserId);

    /// Users with a non-empty pending slot, for background draining.
    fn pending_users(&self) -> Vec<UserId>;
}

/// Best-effort denormalized projections for ranking and activity feeds.
///
/// Nothing in the reconciliation protocol depends on these succeeding.
#[async_trait]
pub trait LeaderboardStore: Send + Sync {
    /// Inserts or replaces a user's leaderboard row.
    ///
    /// # Errors
    ///
    /// `StorageError::Unreachable` when the backend cannot be contacted.
    async fn publish_entry(&self, entry: &LeaderboardEntry) -> Result<(), StorageError>;

    /// Appends one activity event. Repeats with the same `event_id` are
    /// absorbed.
    ///
    /// # Errors
    ///
    /// `StorageError::Unreachable` when the backend cannot be contacted.
    async fn append_event(&self, event: &ActivityEventRecord) -> Result<(), StorageError>;

    /// The top `limit` rows by total XP, best first.
    ///
    /// # Errors
    ///
    /// `StorageError::Unreachable` when the backend cannot be contacted.
    async fn top_by_xp(&self, limit: u32) -> Result<Vec<LeaderboardEntry>, StorageError>;

    /// A user's most recent events, newest first.
    ///
    /// # Errors
    ///
    /// `StorageError::Unreachable` when the backend cannot be contacted.
    async fn recent_events(
        &self,
        user: &UserId,
        limit: u32,
    ) -> Result<Vec<ActivityEventRecord>, StorageError>;
}

// ─── In-memory doubles ─────────────────────────────────────────────────────────

/// In-memory progress store for tests and prototyping.
///
/// A reachability toggle simulates network loss: while unreachable, every
/// call fails with [`StorageError::Unreachable`] and nothing is stored.
#[derive(Clone)]
pub struct MemoryProgressStore {
    records: Arc<Mutex<HashMap<UserId, StoredProgress>>>,
    reachable: Arc<AtomicBool>,
    successful_upserts: Arc<AtomicU64>,
}

impl MemoryProgressStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            reachable: Arc::new(AtomicBool::new(true)),
            successful_upserts: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Number of upserts that landed, for asserting what reached "remote".
    #[must_use]
    pub fn successful_upserts(&self) -> u64 {
        self.successful_upserts.load(Ordering::SeqCst)
    }

    /// Direct look at the stored record, bypassing the reachability toggle.
    #[must_use]
    pub fn record(&self, user: &UserId) -> Option<StoredProgress> {
        self.records
            .lock()
            .ok()
            .and_then(|records| records.get(user).cloned())
    }

    fn ensure_reachable(&self) -> Result<(), StorageError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unreachable("simulated offline".into()))
        }
    }
}

impl Default for MemoryProgressStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn fetch_latest(&self, user: &UserId) -> Result<Option<StoredProgress>, StorageError> {
        self.ensure_reachable()?;
        let records = self
            .records
            .lock()
            .map_err(|e| StorageError::Unreachable(e.to_string()))?;
        Ok(records.get(user).cloned())
    }

    async fn upsert(
        &self,
        user: &UserId,
        snapshot: &ProgressSnapshot,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.ensure_reachable()?;
        let mut records = self
            .records
            .lock()
            .map_err(|e| StorageError::Unreachable(e.to_string()))?;
        records.insert(
            user.clone(),
            StoredProgress {
                snapshot: snapshot.clone(),
                updated_at,
            },
        );
        self.successful_upserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory cache for tests and prototyping. Not durable, by definition.
#[derive(Clone, Default)]
pub struct MemoryCache {
    snapshots: Arc<Mutex<HashMap<UserId, ProgressSnapshot>>>,
    pending: Arc<Mutex<HashMap<UserId, PendingWrite>>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressCache for MemoryCache {
    fn read(&self, user: &UserId) -> Option<ProgressSnapshot> {
        self.snapshots
            .lock()
            .ok()
            .and_then(|map| map.get(user).cloned())
    }

    fn write(&self, user: &UserId, snapshot: &ProgressSnapshot) {
        if let Ok(mut map) = self.snapshots.lock() {
            map.insert(user.clone(), snapshot.clone());
        }
    }

    fn pending(&self, user: &UserId) -> Option<PendingWrite> {
        self.pending
            .lock()
            .ok()
            .and_then(|map| map.get(user).cloned())
    }

    fn set_pending(&self, user: &UserId, pending: PendingWrite) {
        if let Ok(mut map) = self.pending.lock() {
            map.insert(user.clone(), pending);
        }
    }

    fn clear_pending(&self, user: &UserId) {
        if let Ok(mut map) = self.pending.lock() {
            map.remove(user);
        }
    }

    fn pending_users(&self) -> Vec<UserId> {
        self.pending
            .lock()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// In-memory leaderboard with a failure toggle, for exercising the
/// "failures are swallowed" contract.
#[derive(Clone, Default)]
pub struct MemoryLeaderboard {
    entries: Arc<Mutex<HashMap<UserId, LeaderboardEntry>>>,
    events: Arc<Mutex<Vec<ActivityEventRecord>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryLeaderboard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    #[must_use]
    pub fn events(&self) -> Vec<ActivityEventRecord> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    fn ensure_working(&self) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StorageError::Unreachable("simulated failure".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LeaderboardStore for MemoryLeaderboard {
    async fn publish_entry(&self, entry: &LeaderboardEntry) -> Result<(), StorageError> {
        self.ensure_working()?;
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| StorageError::Unreachable(e.to_string()))?;
        entries.insert(entry.user_id.clone(), entry.clone());
        Ok(())
    }

    async fn append_event(&self, event: &ActivityEventRecord) -> Result<(), StorageError> {
        self.ensure_working()?;
        let mut events = self
            .events
            .lock()
            .map_err(|e| StorageError::Unreachable(e.to_string()))?;
        if !events.iter().any(|e| e.event_id == event.event_id) {
            events.push(event.clone());
        }
        Ok(())
    }

    async fn top_by_xp(&self, limit: u32) -> Result<Vec<LeaderboardEntry>, StorageError> {
        self.ensure_working()?;
        let entries = self
            .entries
            .lock()
            .map_err(|e| StorageError::Unreachable(e.to_string()))?;
        let mut rows: Vec<LeaderboardEntry> = entries.values().cloned().collect();
        rows.sort_by(|a, b| b.total_xp.cmp(&a.total_xp));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn recent_events(
        &self,
        user: &UserId,
        limit: u32,
    ) -> Result<Vec<ActivityEventRecord>, StorageError> {
        self.ensure_working()?;
        let events = self
            .events
            .lock()
            .map_err(|e| StorageError::Unreachable(e.to_string()))?;
        let mut rows: Vec<ActivityEventRecord> = events
            .iter()
            .filter(|event| &event.user_id == user)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        rows.truncate(limit as usize);
        Ok(rows)
    }
}

/// Aggregates the backend stores behind trait objects for easy swapping.
#[derive(Clone)]
pub struct Storage {
    pub progress: Arc<dyn ProgressStore>,
    pub leaderboard: Arc<dyn LeaderboardStore>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            progress: Arc::new(MemoryProgressStore::new()),
            leaderboard: Arc::new(MemoryLeaderboard::new()),
        }
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────

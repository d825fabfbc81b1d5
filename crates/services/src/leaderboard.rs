use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use cursus_core::model::{ActivityEntry, ProgressSnapshot, UserId};
use cursus_core::time::Clock;
use storage::repository::{ActivityEventRecord, LeaderboardEntry, LeaderboardStore};

/// Best-effort push and pull of ranking rows and activity events.
///
/// Nothing here is correctness-critical: the reconciliation engine never
/// waits on a projection, and every failure is logged and swallowed.
pub struct LeaderboardService {
    store: Arc<dyn LeaderboardStore>,
    clock: Clock,
}

impl LeaderboardService {
    #[must_use]
    pub fn new(store: Arc<dyn LeaderboardStore>) -> Self {
        Self {
            store,
            clock: Clock::default(),
        }
    }

    /// Override the clock (usually for deterministic testing).
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Publishes the ranking row derived from a snapshot's denormalized
    /// fields.
    pub async fn publish(&self, user: &UserId, snapshot: &ProgressSnapshot) {
        let entry = LeaderboardEntry {
            user_id: user.clone(),
            department: snapshot.department().map(ToString::to_string),
            total_xp: snapshot.total_xp(),
            highest_exam_score: snapshot.highest_exam_score(),
            fastest_exam_time_secs: snapshot.fastest_exam_time_secs(),
            practice_parts_completed: snapshot.practice_parts_completed(),
            updated_at: self.now(),
        };
        if let Err(err) = self.store.publish_entry(&entry).await {
            warn!(user = %user, error = %err, "leaderboard publish failed, dropping");
        }
    }

    /// Appends one accomplishment to the user's activity feed.
    pub async fn log_event(&self, user: &UserId, entry: &ActivityEntry) {
        let record = ActivityEventRecord::from_entry(user.clone(), entry);
        if let Err(err) = self.store.append_event(&record).await {
            warn!(user = %user, error = %err, "activity event push failed, dropping");
        }
    }

    /// The top `limit` ranking rows, or nothing when the backend is away.
    pub async fn top(&self, limit: u32) -> Vec<LeaderboardEntry> {
        match self.store.top_by_xp(limit).await {
            Ok(rows) => rows,
            Err(err) => {
                warn!(error = %err, "leaderboard read failed, serving empty");
                Vec::new()
            }
        }
    }

    /// A user's most recent activity events, newest first.
    pub async fn recent(&self, user: &UserId, limit: u32) -> Vec<ActivityEventRecord> {
        match self.store.recent_events(user, limit).await {
            Ok(rows) => rows,
            Err(err) => {
                warn!(user = %user, error = %err, "activity feed read failed, serving empty");
                Vec::new()
            }
        }
    }
}

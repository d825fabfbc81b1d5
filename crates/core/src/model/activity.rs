use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upper bound on the recent-activity log carried in a snapshot.
///
/// Older entries fall off the end; the full history is not kept client-side.
pub const RECENT_ACTIVITY_CAP: usize = 20;

/// What kind of accomplishment an activity entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    PracticeCompleted,
    ExamPassed,
    DailyChallenge,
    StreakMilestone,
    YearUnlocked,
}

impl ActivityKind {
    /// Stable string form used in storage columns and log output.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::PracticeCompleted => "practice_completed",
            ActivityKind::ExamPassed => "exam_passed",
            ActivityKind::DailyChallenge => "daily_challenge",
            ActivityKind::StreakMilestone => "streak_milestone",
            ActivityKind::YearUnlocked => "year_unlocked",
        }
    }
}

/// One accomplishment in a user's recent-activity feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub id: Uuid,
    pub kind: ActivityKind,
    /// Human-readable description, e.g. "Passed the Year 2 exam".
    pub label: String,
    /// XP awarded for this accomplishment.
    pub xp: u32,
    pub occurred_at: DateTime<Utc>,
}

impl ActivityEntry {
    /// Creates an entry with a fresh random id.
    #[must_use]
    pub fn new(
        kind: ActivityKind,
        label: impl Into<String>,
        xp: u32,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            label: label.into(),
            xp,
            occurred_at,
        }
    }
}

use cursus_core::model::{ActivityKind, ProgressSnapshot, UserId};
use sqlx::Row;

use crate::repository::{ActivityEventRecord, LeaderboardEntry, StorageError, StoredProgress};

fn mal<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Malformed(e.to_string())
}

/// Transport and pool failures count as "cannot reach the backend" for
/// protocol purposes; only decode failures on fetched data are malformed.
pub(crate) fn unreachable(e: sqlx::Error) -> StorageError {
    StorageError::Unreachable(e.to_string())
}

pub(crate) fn encode_document(snapshot: &ProgressSnapshot) -> Result<String, StorageError> {
    serde_json::to_string(snapshot).map_err(mal)
}

/// Decodes a stored snapshot document.
///
/// Fields the writing version did not know about fall back to their serde
/// defaults, and `normalized` repairs any remaining invariant drift, so
/// documents from older app versions stay loadable.
pub(crate) fn decode_document(raw: &str) -> Result<ProgressSnapshot, StorageError> {
    let snapshot: ProgressSnapshot = serde_json::from_str(raw).map_err(mal)?;
    Ok(snapshot.normalized())
}

pub(crate) fn user_id_from_text(raw: String) -> Result<UserId, StorageError> {
    UserId::new(raw).map_err(mal)
}

pub(crate) fn xp_to_i64(xp: u64) -> Result<i64, StorageError> {
    i64::try_from(xp).map_err(|_| StorageError::Malformed("total_xp overflow".into()))
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Malformed(format!("{field} sign overflow")))
}

fn i64_to_u32(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Malformed(format!("invalid {field}: {v}")))
}

fn i64_to_score(field: &'static str, v: i64) -> Result<u8, StorageError> {
    u8::try_from(v)
        .ok()
        .filter(|score| *score <= 100)
        .ok_or_else(|| StorageError::Malformed(format!("invalid {field}: {v}")))
}

pub(crate) fn parse_activity_kind(s: &str) -> Result<ActivityKind, StorageError> {
    match s {
        "practice_completed" => Ok(ActivityKind::PracticeCompleted),
        "exam_passed" => Ok(ActivityKind::ExamPassed),
        "daily_challenge" => Ok(ActivityKind::DailyChallenge),
        "streak_milestone" => Ok(ActivityKind::StreakMilestone),
        "year_unlocked" => Ok(ActivityKind::YearUnlocked),
        _ => Err(StorageError::Malformed(format!("invalid kind: {s}"))),
    }
}

pub(crate) fn map_progress_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<StoredProgress, StorageError> {
    let document: String = row.try_get("document").map_err(mal)?;
    Ok(StoredProgress {
        snapshot: decode_document(&document)?,
        updated_at: row.try_get("updated_at").map_err(mal)?,
    })
}

pub(crate) fn map_activity_event_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<ActivityEventRecord, StorageError> {
    let event_id: String = row.try_get("event_id").map_err(mal)?;
    let kind: String = row.try_get("kind").map_err(mal)?;
    Ok(ActivityEventRecord {
        event_id: event_id.parse().map_err(mal)?,
        user_id: user_id_from_text(row.try_get("user_id").map_err(mal)?)?,
        kind: parse_activity_kind(&kind)?,
        label: row.try_get("label").map_err(mal)?,
        xp: i64_to_u32("xp", row.try_get::<i64, _>("xp").map_err(mal)?)?,
        occurred_at: row.try_get("occurred_at").map_err(mal)?,
    })
}

pub(crate) fn map_leaderboard_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<LeaderboardEntry, StorageError> {
    Ok(LeaderboardEntry {
        user_id: user_id_from_text(row.try_get("user_id").map_err(mal)?)?,
        department: row.try_get("department").map_err(mal)?,
        total_xp: i64_to_u64("total_xp", row.try_get::<i64, _>("total_xp").map_err(mal)?)?,
        highest_exam_score: i64_to_score(
            "highest_exam_score",
            row.try_get::<i64, _>("highest_exam_score").map_err(mal)?,
        )?,
        fastest_exam_time_secs: row
            .try_get::<Option<i64>, _>("fastest_exam_time_secs")
            .map_err(mal)?
            .map(|secs| i64_to_u32("fastest_exam_time_secs", secs))
            .transpose()?,
        practice_parts_completed: i64_to_u32(
            "practice_parts_completed",
            row.try_get::<i64, _>("practice_parts_completed")
                .map_err(mal)?,
        )?,
        updated_at: row.try_get("updated_at").map_err(mal)?,
    })
}

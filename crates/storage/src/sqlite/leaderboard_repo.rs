use cursus_core::model::UserId;

use super::SqliteRepository;
use super::mapping::{map_activity_event_row, map_leaderboard_row, unreachable, xp_to_i64};
use crate::repository::{ActivityEventRecord, LeaderboardEntry, LeaderboardStore, StorageError};

#[async_trait::async_trait]
impl LeaderboardStore for SqliteRepository {
    async fn publish_entry(&self, entry: &LeaderboardEntry) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO leaderboard_entries (
                user_id, department, total_xp, highest_exam_score,
                fastest_exam_time_secs, practice_parts_completed, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(user_id) DO UPDATE SET
                department = excluded.department,
                total_xp = excluded.total_xp,
                highest_exam_score = excluded.highest_exam_score,
                fastest_exam_time_secs = excluded.fastest_exam_time_secs,
                practice_parts_completed = excluded.practice_parts_completed,
                updated_at = excluded.updated_at
            ",
        )
        .bind(entry.user_id.as_str())
        .bind(entry.department.clone())
        .bind(xp_to_i64(entry.total_xp)?)
        .bind(i64::from(entry.highest_exam_score))
        .bind(entry.fastest_exam_time_secs.map(i64::from))
        .bind(i64::from(entry.practice_parts_completed))
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await
        .map_err(unreachable)?;

        Ok(())
    }

    async fn append_event(&self, event: &ActivityEventRecord) -> Result<(), StorageError> {
        // The event id is the conflict key, so retried publishes of the
        // same accomplishment insert exactly once.
        sqlx::query(
            r"
            INSERT INTO activity_events (event_id, user_id, kind, label, xp, occurred_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(event_id) DO NOTHING
            ",
        )
        .bind(event.event_id.to_string())
        .bind(event.user_id.as_str())
        .bind(event.kind.as_str())
        .bind(event.label.clone())
        .bind(i64::from(event.xp))
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await
        .map_err(unreachable)?;

        Ok(())
    }

    async fn top_by_xp(&self, limit: u32) -> Result<Vec<LeaderboardEntry>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT
                user_id, department, total_xp, highest_exam_score,
                fastest_exam_time_secs, practice_parts_completed, updated_at
            FROM leaderboard_entries
            ORDER BY total_xp DESC, updated_at ASC
            LIMIT ?1
            ",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(unreachable)?;

        rows.iter().map(map_leaderboard_row).collect()
    }

    async fn recent_events(
        &self,
        user: &UserId,
        limit: u32,
    ) -> Result<Vec<ActivityEventRecord>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT event_id, user_id, kind, label, xp, occurred_at
            FROM activity_events
            WHERE user_id = ?1
            ORDER BY occurred_at DESC
            LIMIT ?2
            ",
        )
        .bind(user.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(unreachable)?;

        rows.iter().map(map_activity_event_row).collect()
    }
}

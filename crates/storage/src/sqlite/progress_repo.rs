use chrono::{DateTime, Utc};
use cursus_core::model::{ProgressSnapshot, UserId};

use super::SqliteRepository;
use super::mapping::{encode_document, map_progress_row, unreachable};
use crate::repository::{ProgressStore, StorageError, StoredProgress};

#[async_trait::async_trait]
impl ProgressStore for SqliteRepository {
    async fn fetch_latest(&self, user: &UserId) -> Result<Option<StoredProgress>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT document, updated_at
            FROM progress_snapshots
            WHERE user_id = ?1
            ",
        )
        .bind(user.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(unreachable)?;

        match row {
            Some(row) => Ok(Some(map_progress_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn upsert(
        &self,
        user: &UserId,
        snapshot: &ProgressSnapshot,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let document = encode_document(snapshot)?;
        sqlx::query(
            r"
            INSERT INTO progress_snapshots (user_id, document, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(user_id) DO UPDATE SET
                document = excluded.document,
                updated_at = excluded.updated_at
            ",
        )
        .bind(user.as_str())
        .bind(document)
        .bind(updated_at)
        .execute(&self.pool)
        .await
        .map_err(unreachable)?;

        Ok(())
    }
}

use std::env;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};

use cursus_core::model::{ProgressSnapshot, UserId};
use storage::repository::{
    ActivityEventRecord, LeaderboardEntry, LeaderboardStore, ProgressStore, StorageError,
    StoredProgress,
};

#[derive(Clone, Debug)]
pub struct RemoteConfig {
    pub base_url: String,
    pub api_key: String,
}

impl RemoteConfig {
    /// Reads the backend location from the environment.
    ///
    /// Returns `None` when `CURSUS_SYNC_URL` is unset or blank, which is how
    /// a deployment says "run against local SQLite instead".
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let base_url = env::var("CURSUS_SYNC_URL").ok()?;
        if base_url.trim().is_empty() {
            return None;
        }
        let api_key = env::var("CURSUS_SYNC_API_KEY").unwrap_or_default();
        Some(Self { base_url, api_key })
    }
}

/// HTTP adapter for the remote progress backend.
///
/// The backend is logically one row per user: `GET`/`PUT` on
/// `users/{id}/progress` move whole documents, never fields. Leaderboard
/// rows and activity events ride the same host. All transport-level
/// failures surface as [`StorageError::Unreachable`]; only a response body
/// that fails to decode is [`StorageError::Malformed`]. Call timeouts are
/// the engine's job, not this adapter's.
#[derive(Clone)]
pub struct RemoteStore {
    client: Client,
    config: RemoteConfig,
}

impl RemoteStore {
    #[must_use]
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.config.base_url.trim_end_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        if self.config.api_key.is_empty() {
            request
        } else {
            request.bearer_auth(&self.config.api_key)
        }
    }
}

/// Wire form of one remote progress record.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProgressDocument {
    snapshot: ProgressSnapshot,
    updated_at: DateTime<Utc>,
}

fn transport(err: reqwest::Error) -> StorageError {
    if err.is_timeout() {
        StorageError::Unreachable("remote call timed out".into())
    } else {
        StorageError::Unreachable(err.to_string())
    }
}

fn body(err: reqwest::Error) -> StorageError {
    if err.is_decode() {
        StorageError::Malformed(err.to_string())
    } else {
        transport(err)
    }
}

fn unexpected_status(status: StatusCode) -> StorageError {
    StorageError::Unreachable(format!("remote returned {status}"))
}

#[async_trait]
impl ProgressStore for RemoteStore {
    async fn fetch_latest(&self, user: &UserId) -> Result<Option<StoredProgress>, StorageError> {
        let request = self.client.get(self.url(&format!("users/{user}/progress")));
        let response = self.authorize(request).send().await.map_err(transport)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(unexpected_status(response.status()));
        }

        let document: ProgressDocument = response.json().await.map_err(body)?;
        Ok(Some(StoredProgress {
            snapshot: document.snapshot.normalized(),
            updated_at: document.updated_at,
        }))
    }

    async fn upsert(
        &self,
        user: &UserId,
        snapshot: &ProgressSnapshot,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let document = ProgressDocument {
            snapshot: snapshot.clone(),
            updated_at,
        };
        let request = self
            .client
            .put(self.url(&format!("users/{user}/progress")))
            .json(&document);
        let response = self.authorize(request).send().await.map_err(transport)?;

        if !response.status().is_success() {
            return Err(unexpected_status(response.status()));
        }
        Ok(())
    }
}

#[async_trait]
impl LeaderboardStore for RemoteStore {
    async fn publish_entry(&self, entry: &LeaderboardEntry) -> Result<(), StorageError> {
        let request = self
            .client
            .put(self.url(&format!("leaderboard/{}", entry.user_id)))
            .json(entry);
        let response = self.authorize(request).send().await.map_err(transport)?;

        if !response.status().is_success() {
            return Err(unexpected_status(response.status()));
        }
        Ok(())
    }

    async fn append_event(&self, event: &ActivityEventRecord) -> Result<(), StorageError> {
        let request = self
            .client
            .post(self.url(&format!("users/{}/activity", event.user_id)))
            .json(event);
        let response = self.authorize(request).send().await.map_err(transport)?;

        if !response.status().is_success() {
            return Err(unexpected_status(response.status()));
        }
        Ok(())
    }

    async fn top_by_xp(&self, limit: u32) -> Result<Vec<LeaderboardEntry>, StorageError> {
        let request = self
            .client
            .get(self.url("leaderboard"))
            .query(&[("limit", limit)]);
        let response = self.authorize(request).send().await.map_err(transport)?;

        if !response.status().is_success() {
            return Err(unexpected_status(response.status()));
        }
        response.json().await.map_err(body)
    }

    async fn recent_events(
        &self,
        user: &UserId,
        limit: u32,
    ) -> Result<Vec<ActivityEventRecord>, StorageError> {
        let request = self
            .client
            .get(self.url(&format!("users/{user}/activity")))
            .query(&[("limit", limit)]);
        let response = self.authorize(request).send().await.map_err(transport)?;

        if !response.status().is_success() {
            return Err(unexpected_status(response.status()));
        }
        response.json().await.map_err(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_join_cleanly_with_and_without_trailing_slash() {
        let with = RemoteStore::new(RemoteConfig {
            base_url: "https://api.example.test/v1/".into(),
            api_key: String::new(),
        });
        let without = RemoteStore::new(RemoteConfig {
            base_url: "https://api.example.test/v1".into(),
            api_key: String::new(),
        });
        assert_eq!(
            with.url("users/alice/progress"),
            "https://api.example.test/v1/users/alice/progress"
        );
        assert_eq!(with.url("users/alice/progress"), without.url("users/alice/progress"));
    }

    #[test]
    fn progress_document_uses_camel_case_fields() {
        let document = ProgressDocument {
            snapshot: ProgressSnapshot::initial(),
            updated_at: cursus_core::time::fixed_now(),
        };
        let raw = serde_json::to_string(&document).unwrap();
        assert!(raw.contains(r#""updatedAt""#));
        assert!(raw.contains(r#""unlockedYears""#));
    }
}

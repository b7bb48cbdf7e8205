//! File-backed profile and interaction source.
//!
//! Serves profile documents from a local feed directory: `<dir>/<id>.json`
//! per account, `<dir>/<handle>_interactions.json` for interaction events,
//! `<dir>/<id>_followers.json` for follower sets. Stands in for the
//! platform transport, which applies decisions out-of-band.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use flocktend_common::{
    AccountId, FailureCategory, FetchFailure, ProfileSnapshot,
};

use crate::traits::{FetchedProfile, InteractionSource, ProfileFetcher};

pub struct JsonProfileSource {
    root: PathBuf,
}

impl JsonProfileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn read_id_list(&self, path: &Path) -> anyhow::Result<Vec<AccountId>> {
        if !path.exists() {
            debug!(path = %path.display(), "No id list file, treating as empty");
            return Ok(Vec::new());
        }
        let content = tokio::fs::read_to_string(path).await?;
        let raw: Vec<i64> = serde_json::from_str(&content)?;
        Ok(raw.into_iter().map(AccountId).collect())
    }
}

#[async_trait]
impl ProfileFetcher for JsonProfileSource {
    async fn fetch_profile(&self, id: AccountId) -> Result<FetchedProfile, FetchFailure> {
        let path = self.root.join(format!("{id}.json"));
        if !path.exists() {
            return Err(FetchFailure::new(
                FailureCategory::NoUser,
                format!("no profile document for {id}"),
            ));
        }
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            FetchFailure::new(FailureCategory::Transient, format!("{}: {e}", path.display()))
        })?;
        let doc: ProfileDoc = serde_json::from_str(&content).map_err(|e| {
            FetchFailure::new(FailureCategory::Transient, format!("{}: {e}", path.display()))
        })?;
        Ok(doc.into_fetched(id))
    }
}

#[async_trait]
impl InteractionSource for JsonProfileSource {
    async fn recent_interactor_ids(&self, handle: &str) -> anyhow::Result<Vec<AccountId>> {
        self.read_id_list(&self.root.join(format!("{handle}_interactions.json")))
            .await
    }

    async fn follower_ids(&self, id: AccountId) -> anyhow::Result<Vec<AccountId>> {
        self.read_id_list(&self.root.join(format!("{id}_followers.json")))
            .await
    }
}

/// On-disk profile document. Mirrors the snapshot shape minus identity
/// and observation time, which the scheduler assigns.
#[derive(Debug, Deserialize)]
struct ProfileDoc {
    username: String,
    #[serde(default)]
    display_name: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    followers_count: i64,
    #[serde(default)]
    friends_count: i64,
    #[serde(default)]
    listed_count: i64,
    #[serde(default)]
    statuses_count: i64,
    #[serde(default)]
    media_count: i64,
    #[serde(default)]
    last_posted: Option<DateTime<Utc>>,
    #[serde(default)]
    protected: bool,
    #[serde(default)]
    verified: bool,
    #[serde(default)]
    premium: bool,
    #[serde(default)]
    default_avatar: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    banner_url: Option<String>,
}

impl ProfileDoc {
    fn into_fetched(self, id: AccountId) -> FetchedProfile {
        let has_recent_activity = self.last_posted.is_some();
        FetchedProfile {
            snapshot: ProfileSnapshot {
                account_id: id,
                observed_at: Utc::now(),
                username: self.username,
                display_name: self.display_name,
                created_at: self.created_at,
                followers_count: self.followers_count,
                friends_count: self.friends_count,
                listed_count: self.listed_count,
                statuses_count: self.statuses_count,
                media_count: self.media_count,
                last_posted: self.last_posted,
                protected: self.protected,
                verified: self.verified,
                premium: self.premium,
                default_avatar: self.default_avatar,
                description: self.description,
                location: self.location,
                url: self.url,
                image_url: self.image_url,
                banner_url: self.banner_url,
            },
            has_recent_activity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_profile_document_is_no_user() {
        let dir = tempfile::tempdir().unwrap();
        let source = JsonProfileSource::new(dir.path());
        let err = source.fetch_profile(AccountId(404)).await.unwrap_err();
        assert_eq!(err.category, FailureCategory::NoUser);
    }

    #[tokio::test]
    async fn profile_document_round_trips_into_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("42.json"),
            r#"{
                "username": "alice",
                "created_at": "2020-01-01T00:00:00Z",
                "followers_count": 250,
                "statuses_count": 900,
                "last_posted": "2026-08-01T00:00:00Z"
            }"#,
        )
        .unwrap();

        let source = JsonProfileSource::new(dir.path());
        let fetched = source.fetch_profile(AccountId(42)).await.unwrap();
        assert_eq!(fetched.snapshot.account_id, AccountId(42));
        assert_eq!(fetched.snapshot.username, "alice");
        assert_eq!(fetched.snapshot.followers_count, 250);
        assert!(fetched.has_recent_activity);
    }

    #[tokio::test]
    async fn profile_without_posts_has_no_recent_activity() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("7.json"),
            r#"{"username": "quiet", "created_at": "2020-01-01T00:00:00Z"}"#,
        )
        .unwrap();

        let source = JsonProfileSource::new(dir.path());
        let fetched = source.fetch_profile(AccountId(7)).await.unwrap();
        assert!(!fetched.has_recent_activity);
    }

    #[tokio::test]
    async fn missing_interaction_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let source = JsonProfileSource::new(dir.path());
        let events = source.recent_interactor_ids("nobody").await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn follower_lists_parse_as_plain_id_arrays() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("9_followers.json"), "[1, 2, 3]").unwrap();

        let source = JsonProfileSource::new(dir.path());
        let followers = source.follower_ids(AccountId(9)).await.unwrap();
        assert_eq!(followers, vec![AccountId(1), AccountId(2), AccountId(3)]);
    }
}

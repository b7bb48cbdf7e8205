//! Shared fixtures and mock collaborators for unit and integration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use flocktend_common::{AccountId, FetchFailure, ProfileSnapshot};

use crate::traits::{FetchedProfile, InteractionSource, ProfileFetcher, Sleeper};

/// A healthy profile that passes every default classifier rule.
pub fn snapshot_fixture(account_id: AccountId, now: DateTime<Utc>) -> ProfileSnapshot {
    ProfileSnapshot {
        account_id,
        observed_at: now,
        username: format!("user{}", account_id.0),
        display_name: format!("User {}", account_id.0),
        created_at: now - chrono::Duration::days(400),
        followers_count: 500,
        friends_count: 200,
        listed_count: 5,
        statuses_count: 1000,
        media_count: 10,
        last_posted: Some(now - chrono::Duration::days(1)),
        protected: false,
        verified: false,
        premium: false,
        default_avatar: false,
        description: Some("fixture".to_string()),
        location: None,
        url: None,
        image_url: Some(format!("https://example.com/{}.jpg", account_id.0)),
        banner_url: None,
    }
}

pub fn fetched_fixture(account_id: AccountId, now: DateTime<Utc>) -> FetchedProfile {
    FetchedProfile {
        snapshot: snapshot_fixture(account_id, now),
        has_recent_activity: true,
    }
}

/// Scripted fetcher. Per-account outcomes are consumed in order; accounts
/// without a script (or with an exhausted one) fall back to either a
/// healthy fixture or a configured failure.
#[derive(Default)]
pub struct MockFetcher {
    scripts: Mutex<HashMap<AccountId, VecDeque<Result<FetchedProfile, FetchFailure>>>>,
    fallback_failure: Mutex<Option<FetchFailure>>,
    calls: Mutex<Vec<AccountId>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, id: AccountId, outcomes: Vec<Result<FetchedProfile, FetchFailure>>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(id, outcomes.into_iter().collect());
    }

    /// Make every unscripted fetch fail with this failure.
    pub fn set_fallback_failure(&self, failure: FetchFailure) {
        *self.fallback_failure.lock().unwrap() = Some(failure);
    }

    pub fn calls(&self) -> Vec<AccountId> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProfileFetcher for MockFetcher {
    async fn fetch_profile(&self, id: AccountId) -> Result<FetchedProfile, FetchFailure> {
        self.calls.lock().unwrap().push(id);
        if let Some(entry) = self.scripts.lock().unwrap().get_mut(&id) {
            if let Some(outcome) = entry.pop_front() {
                return outcome;
            }
        }
        match self.fallback_failure.lock().unwrap().clone() {
            Some(failure) => Err(failure),
            None => Ok(fetched_fixture(id, Utc::now())),
        }
    }
}

/// Canned interaction events and follower sets keyed by handle / account.
#[derive(Default)]
pub struct MockInteractions {
    interactors: Mutex<HashMap<String, Vec<AccountId>>>,
    followers: Mutex<HashMap<AccountId, Vec<AccountId>>>,
}

impl MockInteractions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_interactors(&self, handle: &str, events: Vec<AccountId>) {
        self.interactors
            .lock()
            .unwrap()
            .insert(handle.to_string(), events);
    }

    pub fn set_followers(&self, id: AccountId, followers: Vec<AccountId>) {
        self.followers.lock().unwrap().insert(id, followers);
    }
}

#[async_trait]
impl InteractionSource for MockInteractions {
    async fn recent_interactor_ids(&self, handle: &str) -> anyhow::Result<Vec<AccountId>> {
        Ok(self
            .interactors
            .lock()
            .unwrap()
            .get(handle)
            .cloned()
            .unwrap_or_default())
    }

    async fn follower_ids(&self, id: AccountId) -> anyhow::Result<Vec<AccountId>> {
        Ok(self
            .followers
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Records requested sleep durations and returns immediately.
#[derive(Default)]
pub struct InstantSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl InstantSleeper {
    pub fn slept(&self) -> Vec<Duration> {
        self.slept.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for InstantSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}

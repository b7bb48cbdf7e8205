// Trait abstractions for the pipeline's external collaborators.
//
// ProfileFetcher wraps the platform transport behind one opaque fallible
// call; InteractionSource covers the interaction-event and follower-set
// lookups the reconciler needs. Sleeper makes the deliberate pacing
// sleeps injectable so tests run instantly.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use flocktend_common::{AccountId, FetchFailure, ProfileSnapshot};

/// A fetched profile plus whether any recent activity was retrievable.
/// An account with no retrievable activity still gets a snapshot, but is
/// also recorded as a `no_tweets` issue.
#[derive(Debug, Clone)]
pub struct FetchedProfile {
    pub snapshot: ProfileSnapshot,
    pub has_recent_activity: bool,
}

/// The external rate-limited profile source. Failures are classified by
/// the transport; the scheduler decides retry and circuit-break policy.
#[async_trait]
pub trait ProfileFetcher: Send + Sync {
    async fn fetch_profile(&self, id: AccountId) -> Result<FetchedProfile, FetchFailure>;
}

/// Interaction events and follower sets used by the follow/prune
/// decision rules.
#[async_trait]
pub trait InteractionSource: Send + Sync {
    /// Ids of accounts that recently interacted with the owner, one entry
    /// per interaction event (repeats matter for the candidacy rule).
    async fn recent_interactor_ids(&self, handle: &str) -> Result<Vec<AccountId>>;

    /// Follower ids of one account, for the common-friends override.
    async fn follower_ids(&self, id: AccountId) -> Result<Vec<AccountId>>;
}

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

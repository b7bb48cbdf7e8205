//! Splits relation-id sets into cached/fresh vs stale, and tracks
//! known-bad ids that recently errored.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Duration, Utc};

use flocktend_common::{AccountId, FlocktendError};
use flocktend_store::RelationStore;

pub struct FreshnessIndex<'a> {
    store: &'a dyn RelationStore,
    window: Duration,
}

impl<'a> FreshnessIndex<'a> {
    pub fn new(store: &'a dyn RelationStore, staleness_days: i64) -> Self {
        Self {
            store,
            window: Duration::days(staleness_days),
        }
    }

    /// Partition `ids` into (fresh, stale). Fresh means a snapshot exists
    /// inside the staleness window. Store failures propagate; no internal
    /// retry.
    pub async fn split(
        &self,
        ids: &BTreeSet<AccountId>,
        now: DateTime<Utc>,
    ) -> Result<(HashSet<AccountId>, HashSet<AccountId>), FlocktendError> {
        let all: Vec<AccountId> = ids.iter().copied().collect();
        let fresh = self.store.fresh_ids(&all, self.window, now).await?;
        let stale = ids.iter().copied().filter(|id| !fresh.contains(id)).collect();
        Ok((fresh, stale))
    }

    /// Ids with a qualifying issue record inside the window. Excluded from
    /// fetch regardless of freshness.
    pub async fn bad(
        &self,
        ids: &BTreeSet<AccountId>,
        now: DateTime<Utc>,
    ) -> Result<HashSet<AccountId>, FlocktendError> {
        let all: Vec<AccountId> = ids.iter().copied().collect();
        self.store.bad_ids(&all, self.window, now).await
    }

    /// Fetch candidates = ids - fresh - bad, sorted for determinism.
    pub async fn fetch_candidates(
        &self,
        ids: &BTreeSet<AccountId>,
        now: DateTime<Utc>,
    ) -> Result<Vec<AccountId>, FlocktendError> {
        let (fresh, _) = self.split(ids, now).await?;
        let bad = self.bad(ids, now).await?;
        Ok(ids
            .iter()
            .copied()
            .filter(|id| !fresh.contains(id) && !bad.contains(id))
            .collect())
    }
}

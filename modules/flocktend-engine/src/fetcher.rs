//! Batched, jittered, retrying fetch loop with circuit-breaking.
//!
//! Strictly sequential by design: the rate-limited external source needs
//! inter-request pacing, not throughput. Every successful or failed fetch
//! persists its row immediately (write-through) so partial progress
//! survives a later abort.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info, warn};

use flocktend_common::{
    AccountId, FlocktendError, IssueRecord, Policy, ProfileSnapshot,
};
use flocktend_store::RelationStore;

use crate::traits::{ProfileFetcher, Sleeper};

/// Accumulated outcome of one scheduled fetch run.
#[derive(Debug, Default)]
pub struct FetchResult {
    pub succeeded: Vec<ProfileSnapshot>,
    pub failed: Vec<IssueRecord>,
}

impl FetchResult {
    pub fn fetched_ids(&self) -> BTreeSet<AccountId> {
        self.succeeded.iter().map(|s| s.account_id).collect()
    }
}

pub struct FetchScheduler<'a> {
    store: &'a dyn RelationStore,
    fetcher: &'a dyn ProfileFetcher,
    sleeper: &'a dyn Sleeper,
    policy: &'a Policy,
    run_at: DateTime<Utc>,
}

impl<'a> FetchScheduler<'a> {
    pub fn new(
        store: &'a dyn RelationStore,
        fetcher: &'a dyn ProfileFetcher,
        sleeper: &'a dyn Sleeper,
        policy: &'a Policy,
        run_at: DateTime<Utc>,
    ) -> Self {
        Self {
            store,
            fetcher,
            sleeper,
            policy,
            run_at,
        }
    }

    /// Fetch profiles for `ids`: shuffle, chunk into batches, pace every
    /// request, retry per account, and trip the circuit breaker on
    /// sustained consecutive failures.
    pub async fn run(&self, mut ids: Vec<AccountId>) -> Result<FetchResult, FlocktendError> {
        shuffle_well(&mut ids);

        let mut result = FetchResult::default();
        let mut consecutive_errors = 0u32;
        let mut processed = 0usize;

        let batch_size = self.policy.batch_size.max(1);
        for (batch_index, batch) in ids.chunks(batch_size).enumerate() {
            if batch_index > 0 {
                self.snooze(self.policy.min_batch_delay, self.policy.max_batch_delay)
                    .await;
            }
            for &id in batch {
                if processed > 0 {
                    self.snooze(self.policy.min_search_delay, self.policy.max_search_delay)
                        .await;
                }
                processed += 1;
                self.fetch_one(id, &mut consecutive_errors, &mut result)
                    .await?;
            }
            debug!(
                batch = batch_index + 1,
                fetched = result.succeeded.len(),
                issues = result.failed.len(),
                "Batch complete"
            );
        }

        info!(
            candidates = processed,
            fetched = result.succeeded.len(),
            issues = result.failed.len(),
            "Fetch run complete"
        );
        Ok(result)
    }

    /// One account: a plain state machine over attempts-remaining and the
    /// last failure category. Transient failures stay contained here and
    /// surface only as issue records; the circuit breaker is the one
    /// run-fatal signal.
    async fn fetch_one(
        &self,
        id: AccountId,
        consecutive_errors: &mut u32,
        result: &mut FetchResult,
    ) -> Result<(), FlocktendError> {
        let budget = self.policy.retry_budget.max(1);
        let mut last_failure = None;

        for attempt in 1..=budget {
            if attempt > 1 {
                // Escalating cooldown between retries on the same account.
                let base = jitter(self.policy.min_error_delay, self.policy.max_error_delay);
                self.sleeper
                    .sleep(Duration::from_secs_f64(base * (attempt - 1) as f64))
                    .await;
            }

            match self.fetcher.fetch_profile(id).await {
                Ok(fetched) => {
                    let mut snapshot = fetched.snapshot;
                    snapshot.account_id = id;
                    snapshot.observed_at = self.run_at;
                    self.store.insert_snapshot(&snapshot).await?;

                    if !fetched.has_recent_activity {
                        // Protected or shadow-limited account? Snapshot is
                        // still recorded, plus a no_tweets issue.
                        let issue = IssueRecord::no_tweets(
                            id,
                            self.run_at,
                            format!("no retrievable recent activity for {id}"),
                        );
                        warn!(account_id = %id, "No retrievable activity");
                        self.store.insert_issue(&issue).await?;
                        result.failed.push(issue);
                    }

                    *consecutive_errors = 0;
                    result.succeeded.push(snapshot);
                    return Ok(());
                }
                Err(failure) => {
                    *consecutive_errors += 1;
                    warn!(
                        account_id = %id,
                        attempt,
                        consecutive = *consecutive_errors,
                        error = %failure,
                        "Fetch attempt failed"
                    );
                    if *consecutive_errors >= self.policy.consecutive_error_ceiling {
                        // Sustained upstream blocking, not a per-account
                        // problem. Persist the issue, then abort the run.
                        let issue = IssueRecord::from_failure(id, self.run_at, &failure);
                        self.store.insert_issue(&issue).await?;
                        result.failed.push(issue);
                        return Err(FlocktendError::CircuitBreak {
                            consecutive: *consecutive_errors,
                        });
                    }
                    last_failure = Some(failure);
                }
            }
        }

        // Retry budget exhausted: record one issue and skip the account
        // for this run.
        if let Some(failure) = last_failure {
            let issue = IssueRecord::from_failure(id, self.run_at, &failure);
            self.store.insert_issue(&issue).await?;
            result.failed.push(issue);
        }
        Ok(())
    }

    async fn snooze(&self, min_secs: f64, max_secs: f64) {
        let secs = jitter(min_secs, max_secs);
        debug!(secs, "sleep");
        self.sleeper.sleep(Duration::from_secs_f64(secs)).await;
    }
}

fn jitter(min_secs: f64, max_secs: f64) -> f64 {
    if max_secs <= min_secs {
        return min_secs.abs();
    }
    rand::rng().random_range(min_secs..=max_secs).abs()
}

/// Shuffle at least 10 independent times. Over-applied on purpose:
/// upstream inputs arrive sorted, and one pass is not worth trusting.
pub fn shuffle_well<T>(items: &mut [T]) {
    let mut rng = rand::rng();
    for _ in 0..10 {
        items.shuffle(&mut rng);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fetched_fixture, InstantSleeper, MockFetcher};
    use flocktend_common::{FailureCategory, FetchFailure};
    use flocktend_store::MemoryStore;

    fn ids(n: i64) -> Vec<AccountId> {
        (1..=n).map(AccountId).collect()
    }

    fn transient() -> FetchFailure {
        FetchFailure::new(FailureCategory::Transient, "connection reset")
    }

    fn single_attempt_policy() -> Policy {
        Policy {
            retry_budget: 1,
            ..Policy::default()
        }
    }

    #[tokio::test]
    async fn successes_are_persisted_write_through() {
        let store = MemoryStore::new();
        let fetcher = MockFetcher::new();
        let sleeper = InstantSleeper::default();
        let policy = Policy::default();
        let run_at = Utc::now();

        let scheduler = FetchScheduler::new(&store, &fetcher, &sleeper, &policy, run_at);
        let result = scheduler.run(ids(5)).await.unwrap();

        assert_eq!(result.succeeded.len(), 5);
        assert!(result.failed.is_empty());
        assert_eq!(store.snapshots().len(), 5);
        for snapshot in store.snapshots() {
            assert_eq!(snapshot.observed_at, run_at);
        }
    }

    #[tokio::test]
    async fn no_activity_records_snapshot_and_issue() {
        let store = MemoryStore::new();
        let fetcher = MockFetcher::new();
        let run_at = Utc::now();
        let mut quiet = fetched_fixture(AccountId(1), run_at);
        quiet.has_recent_activity = false;
        fetcher.script(AccountId(1), vec![Ok(quiet)]);
        let sleeper = InstantSleeper::default();
        let policy = Policy::default();

        let scheduler = FetchScheduler::new(&store, &fetcher, &sleeper, &policy, run_at);
        let result = scheduler.run(vec![AccountId(1)]).await.unwrap();

        assert_eq!(result.succeeded.len(), 1);
        assert_eq!(result.failed.len(), 1);
        assert!(result.failed[0].no_tweets);
        assert_eq!(store.snapshots().len(), 1);
        assert_eq!(store.issues().len(), 1);
    }

    #[tokio::test]
    async fn retry_budget_exhaustion_yields_one_issue() {
        let store = MemoryStore::new();
        let fetcher = MockFetcher::new();
        fetcher.script(
            AccountId(1),
            vec![Err(transient()), Err(transient()), Err(transient())],
        );
        let sleeper = InstantSleeper::default();
        let policy = Policy::default(); // retry_budget = 3
        let run_at = Utc::now();

        let scheduler = FetchScheduler::new(&store, &fetcher, &sleeper, &policy, run_at);
        let result = scheduler.run(vec![AccountId(1)]).await.unwrap();

        assert!(result.succeeded.is_empty());
        assert_eq!(result.failed.len(), 1);
        assert!(result.failed[0].no_response);
        assert_eq!(store.issues().len(), 1);
        assert_eq!(fetcher.calls().len(), 3);
        // Two escalating cooldowns between the three attempts.
        assert_eq!(sleeper.slept().len(), 2);
    }

    #[tokio::test]
    async fn circuit_breaker_trips_at_ceiling() {
        let store = MemoryStore::new();
        let fetcher = MockFetcher::new();
        fetcher.set_fallback_failure(transient());
        let sleeper = InstantSleeper::default();
        let policy = single_attempt_policy();
        let run_at = Utc::now();

        let scheduler = FetchScheduler::new(&store, &fetcher, &sleeper, &policy, run_at);
        let result = scheduler.run(ids(40)).await;

        match result {
            Err(FlocktendError::CircuitBreak { consecutive }) => {
                assert_eq!(consecutive, 25);
            }
            other => panic!("expected circuit break, got {other:?}"),
        }
        // Every failure up to the abort was persisted write-through.
        assert_eq!(store.issues().len(), 25);
        assert_eq!(fetcher.calls().len(), 25);
    }

    #[tokio::test]
    async fn success_resets_consecutive_error_counter() {
        let store = MemoryStore::new();
        let fetcher = MockFetcher::new();
        // 24 accounts fail once each, the 25th succeeds, then 24 more
        // failures: the ceiling is never reached.
        for i in 1..=24 {
            fetcher.script(AccountId(i), vec![Err(transient())]);
        }
        for i in 26..=49 {
            fetcher.script(AccountId(i), vec![Err(transient())]);
        }
        let sleeper = InstantSleeper::default();
        let policy = single_attempt_policy();
        let run_at = Utc::now();

        let scheduler = FetchScheduler::new(&store, &fetcher, &sleeper, &policy, run_at);
        // Keep submission order: batching shuffles internally, so drive
        // accounts one at a time to make the sequence deterministic.
        let mut consecutive = 0u32;
        let mut result = FetchResult::default();
        for i in 1..=49 {
            scheduler
                .fetch_one(AccountId(i), &mut consecutive, &mut result)
                .await
                .unwrap();
        }

        assert_eq!(result.succeeded.len(), 1);
        assert_eq!(result.failed.len(), 48);
        assert_eq!(consecutive, 24);
    }

    #[tokio::test]
    async fn inter_request_pacing_skips_first_item_only() {
        let store = MemoryStore::new();
        let fetcher = MockFetcher::new();
        let sleeper = InstantSleeper::default();
        let policy = Policy {
            batch_size: 2,
            ..Policy::default()
        };
        let run_at = Utc::now();

        let scheduler = FetchScheduler::new(&store, &fetcher, &sleeper, &policy, run_at);
        scheduler.run(ids(5)).await.unwrap();

        // 5 accounts in batches of 2: four inter-account sleeps plus two
        // inter-batch sleeps.
        assert_eq!(sleeper.slept().len(), 6);
    }
}

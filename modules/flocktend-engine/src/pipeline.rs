//! One full maintenance run: load export sets, reconcile against stored
//! edges, fetch stale profiles, classify, and decide follow/prune actions.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use flocktend_common::{
    AccountId, ActionKind, ActionRecord, FlagSet, FlocktendError, Policy, RelationEdge,
    RelationKind,
};
use flocktend_store::RelationStore;

use crate::archive::{AccountInfo, ArchiveLoader};
use crate::classifier::classify;
use crate::fetcher::{shuffle_well, FetchScheduler};
use crate::freshness::FreshnessIndex;
use crate::reconciler::Reconciler;
use crate::traits::{InteractionSource, ProfileFetcher, Sleeper};

const RELATION_KINDS: [RelationKind; 4] = [
    RelationKind::Following,
    RelationKind::Follower,
    RelationKind::Blocked,
    RelationKind::Muted,
];

/// Counters accumulated across all handles in one invocation.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunStats {
    pub handles: usize,
    pub edges_upserted: usize,
    pub cached: usize,
    pub fetched: usize,
    pub issues: usize,
    pub gained: usize,
    pub lost: usize,
    pub follows: usize,
    pub follows_deferred: usize,
    pub prunes: usize,
    pub prunes_spared: usize,
    pub prunes_deferred: usize,
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "handles={} edges={} cached={} fetched={} issues={} gained={} lost={} \
             follows={}(+{} deferred) prunes={}(+{} spared, +{} deferred)",
            self.handles,
            self.edges_upserted,
            self.cached,
            self.fetched,
            self.issues,
            self.gained,
            self.lost,
            self.follows,
            self.follows_deferred,
            self.prunes,
            self.prunes_spared,
            self.prunes_deferred,
        )
    }
}

pub struct MaintenanceRun<'a> {
    store: &'a dyn RelationStore,
    fetcher: &'a dyn ProfileFetcher,
    interactions: &'a dyn InteractionSource,
    sleeper: &'a dyn Sleeper,
    loader: &'a ArchiveLoader,
    policy: &'a Policy,
    run_at: DateTime<Utc>,
    dry_run: bool,
}

impl<'a> MaintenanceRun<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: &'a dyn RelationStore,
        fetcher: &'a dyn ProfileFetcher,
        interactions: &'a dyn InteractionSource,
        sleeper: &'a dyn Sleeper,
        loader: &'a ArchiveLoader,
        policy: &'a Policy,
        run_at: DateTime<Utc>,
    ) -> Self {
        Self {
            store,
            fetcher,
            interactions,
            sleeper,
            loader,
            policy,
            run_at,
            dry_run: false,
        }
    }

    /// Plan but record no actions. Edge and snapshot observations are
    /// still persisted; they describe what was seen, not what was decided.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Run maintenance for every handle, in shuffled order.
    pub async fn run(&self, handles: &[String]) -> Result<RunStats, FlocktendError> {
        let mut normalized = Vec::with_capacity(handles.len());
        for handle in handles {
            let handle = handle.trim().trim_start_matches('@');
            if handle.is_empty() {
                return Err(FlocktendError::Validation(
                    "empty account handle".to_string(),
                ));
            }
            normalized.push(handle.to_string());
        }
        shuffle_well(&mut normalized);

        let mut stats = RunStats::default();
        for handle in &normalized {
            self.process_handle(handle, &mut stats).await?;
            stats.handles += 1;
        }
        Ok(stats)
    }

    async fn process_handle(
        &self,
        handle: &str,
        stats: &mut RunStats,
    ) -> Result<(), FlocktendError> {
        let info = self.loader.load_account_info(handle)?;
        info!(handle, owner_id = %info.account_id, "Starting maintenance");

        if !self.store.acquire_run_lock(info.account_id).await? {
            return Err(FlocktendError::RunLockConflict);
        }
        let outcome = self.run_owner(&info, stats).await;
        if let Err(e) = self.store.release_run_lock(info.account_id).await {
            warn!(owner_id = %info.account_id, error = %e, "Failed to release run lock");
        }
        outcome
    }

    async fn run_owner(
        &self,
        info: &AccountInfo,
        stats: &mut RunStats,
    ) -> Result<(), FlocktendError> {
        let owner = info.account_id;
        let excluded = self.loader.load_excluded_ids()?;

        let mut current: HashMap<RelationKind, BTreeSet<AccountId>> = HashMap::new();
        for kind in RELATION_KINDS {
            let ids = self.loader.load_relation_ids(&info.handle, kind)?;
            current.insert(kind, ids.into_iter().collect());
        }
        let following = current[&RelationKind::Following].clone();

        // Previous membership must be read before this run's upserts
        // overwrite it.
        let previous_following = self
            .store
            .edge_members(
                owner,
                RelationKind::Following.op(),
                RelationKind::Following.direction(),
            )
            .await?;

        for kind in RELATION_KINDS {
            for &other_id in &current[&kind] {
                self.store
                    .upsert_edge(&RelationEdge {
                        owner_id: owner,
                        other_id,
                        kind: kind.op(),
                        asof: info.asof,
                        direction: kind.direction(),
                    })
                    .await?;
                stats.edges_upserted += 1;
            }
        }

        // Profiles are maintained for everyone the owner follows or is
        // followed by; block and mute lists are edge-only.
        let watched: BTreeSet<AccountId> = following
            .union(&current[&RelationKind::Follower])
            .copied()
            .collect();

        let index = FreshnessIndex::new(self.store, self.policy.staleness_days);
        let mut candidates = index.fetch_candidates(&watched, self.run_at).await?;
        stats.cached += watched.len() - candidates.len();
        if let Some(max) = self.policy.max_accounts {
            candidates.truncate(max);
        }

        let scheduler = FetchScheduler::new(
            self.store,
            self.fetcher,
            self.sleeper,
            self.policy,
            self.run_at,
        );
        let fetch_result = scheduler.run(candidates).await?;
        stats.fetched += fetch_result.succeeded.len();
        stats.issues += fetch_result.failed.len();

        // Classification runs over the freshest snapshot per account,
        // whether fetched this run or cached.
        let all_ids: Vec<AccountId> = watched.iter().copied().collect();
        let snapshots = self
            .store
            .latest_snapshots(
                &all_ids,
                chrono::Duration::days(self.policy.staleness_days),
                self.run_at,
            )
            .await?;
        let mut flags_by_id: HashMap<AccountId, FlagSet> = HashMap::new();
        let mut username_by_id: HashMap<AccountId, String> = HashMap::new();
        for snapshot in &snapshots {
            flags_by_id.insert(
                snapshot.account_id,
                classify(snapshot, self.policy, self.run_at),
            );
            username_by_id.insert(snapshot.account_id, snapshot.username.clone());
        }

        let reconciler = Reconciler::new(self.policy);
        let diff = reconciler.diff(&previous_following, &following);
        stats.gained += diff.to_add.len();
        stats.lost += diff.to_remove.len();
        info!(
            owner_id = %owner,
            gained = diff.to_add.len(),
            lost = diff.to_remove.len(),
            "Following membership reconciled"
        );

        let events = self
            .interactions
            .recent_interactor_ids(&info.handle)
            .await
            .map_err(FlocktendError::Anyhow)?;
        let candidates = reconciler.interaction_candidates(&events);
        let follow_plan = reconciler.plan_follows(&candidates, &following, &flags_by_id);
        stats.follows += follow_plan.follow.len();
        stats.follows_deferred += follow_plan.deferred;

        let prune_candidates = reconciler.prune_candidates(&following, &flags_by_id);
        let mut common_counts: HashMap<AccountId, usize> = HashMap::new();
        for &id in &prune_candidates {
            let followers = self
                .interactions
                .follower_ids(id)
                .await
                .map_err(FlocktendError::Anyhow)?;
            let common = followers
                .iter()
                .filter(|f| following.contains(f) && **f != id)
                .count();
            common_counts.insert(id, common);
        }
        let prune_plan = reconciler.plan_prunes(&prune_candidates, &excluded, &common_counts);
        stats.prunes += prune_plan.prune.len();
        stats.prunes_spared += prune_plan.spared.len();
        stats.prunes_deferred += prune_plan.deferred;

        for &id in &follow_plan.follow {
            self.record(owner, id, ActionKind::Follow, &flags_by_id, &username_by_id)
                .await?;
        }
        for &id in &prune_plan.prune {
            self.record(owner, id, ActionKind::Unfollow, &flags_by_id, &username_by_id)
                .await?;
        }

        info!(
            owner_id = %owner,
            follows = follow_plan.follow.len(),
            prunes = prune_plan.prune.len(),
            spared = prune_plan.spared.len(),
            dry_run = self.dry_run,
            "Maintenance complete"
        );
        Ok(())
    }

    async fn record(
        &self,
        owner: AccountId,
        id: AccountId,
        action: ActionKind,
        flags_by_id: &HashMap<AccountId, FlagSet>,
        username_by_id: &HashMap<AccountId, String>,
    ) -> Result<(), FlocktendError> {
        let flags = flags_by_id.get(&id).cloned().unwrap_or_default();
        let username = username_by_id.get(&id).cloned();
        if self.dry_run {
            info!(owner_id = %owner, account_id = %id, action = action.as_str(), flags = %flags,
                "Planned (dry run)");
            return Ok(());
        }
        self.store
            .record_action(&ActionRecord {
                account_id: id,
                asof: self.run_at,
                username,
                action,
                flags,
            })
            .await?;
        Ok(())
    }
}

//! Set reconciliation between stored relation edges and the current
//! export, plus the follow/prune decision rules.
//!
//! All pure: inputs are id sets, interaction events, and already-computed
//! flag sets. The pipeline gathers those and records the resulting
//! actions.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use flocktend_common::{AccountId, FlagSet, Policy};

/// Difference between the previously stored membership and the current
/// export membership. The two sides are disjoint and together cover
/// exactly the symmetric difference of the inputs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MembershipDiff {
    /// Present now, absent before.
    pub to_add: BTreeSet<AccountId>,
    /// Present before, absent now.
    pub to_remove: BTreeSet<AccountId>,
}

/// Follow decisions for one run, capped at the per-run limit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FollowPlan {
    pub follow: Vec<AccountId>,
    /// Qualified candidates dropped by the per-run cap.
    pub deferred: usize,
}

/// Prune decisions for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrunePlan {
    pub prune: Vec<AccountId>,
    /// Candidates kept because enough of the owner's other friends follow
    /// them.
    pub spared: Vec<AccountId>,
    /// Candidates dropped by the per-run cap.
    pub deferred: usize,
}

pub struct Reconciler<'a> {
    policy: &'a Policy,
}

impl<'a> Reconciler<'a> {
    pub fn new(policy: &'a Policy) -> Self {
        Self { policy }
    }

    pub fn diff(
        &self,
        previous: &HashSet<AccountId>,
        current: &BTreeSet<AccountId>,
    ) -> MembershipDiff {
        let to_add = current
            .iter()
            .copied()
            .filter(|id| !previous.contains(id))
            .collect();
        let to_remove = previous
            .iter()
            .copied()
            .filter(|id| !current.contains(id))
            .collect();
        MembershipDiff { to_add, to_remove }
    }

    /// Accounts with enough repeat interactions to be follow candidates,
    /// most-frequent first. One stray interaction is noise; repetition is
    /// the signal.
    pub fn interaction_candidates(&self, events: &[AccountId]) -> Vec<AccountId> {
        let mut counts: HashMap<AccountId, usize> = HashMap::new();
        for &id in events {
            *counts.entry(id).or_insert(0) += 1;
        }
        let mut ranked: Vec<(AccountId, usize)> = counts
            .into_iter()
            .filter(|(_, count)| *count >= self.policy.min_interaction_count)
            .collect();
        // Ties broken by id so the ordering is stable run to run.
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.into_iter().map(|(id, _)| id).collect()
    }

    /// Follow candidates in ranked order, kept only when a snapshot exists
    /// and classified clean, capped at the per-run limit.
    pub fn plan_follows(
        &self,
        candidates: &[AccountId],
        already_following: &BTreeSet<AccountId>,
        flags_by_id: &HashMap<AccountId, FlagSet>,
    ) -> FollowPlan {
        let mut plan = FollowPlan::default();
        for &id in candidates {
            if already_following.contains(&id) {
                continue;
            }
            // No snapshot means the fetch failed or was skipped; never
            // follow unvetted.
            let Some(flags) = flags_by_id.get(&id) else {
                debug!(account_id = %id, "Skipping follow candidate without snapshot");
                continue;
            };
            if !flags.is_empty() {
                debug!(account_id = %id, flags = %flags, "Follow candidate disqualified");
                continue;
            }
            if plan.follow.len() < self.policy.new_friend_limit {
                plan.follow.push(id);
            } else {
                plan.deferred += 1;
            }
        }
        plan
    }

    /// Everything prune-worthy before overrides: friends flagged by the
    /// classifier, in stable order. Unfollowers are not pruned, they
    /// already left.
    pub fn prune_candidates(
        &self,
        following: &BTreeSet<AccountId>,
        flags_by_id: &HashMap<AccountId, FlagSet>,
    ) -> Vec<AccountId> {
        following
            .iter()
            .copied()
            .filter(|id| flags_by_id.get(id).is_some_and(|f| !f.is_empty()))
            .collect()
    }

    /// Apply exclusion list, the common-friends override, and the per-run
    /// cap to the raw prune candidates.
    pub fn plan_prunes(
        &self,
        candidates: &[AccountId],
        excluded: &HashSet<AccountId>,
        common_friend_counts: &HashMap<AccountId, usize>,
    ) -> PrunePlan {
        let mut plan = PrunePlan::default();
        for &id in candidates {
            if excluded.contains(&id) {
                debug!(account_id = %id, "Prune candidate on exclusion list");
                continue;
            }
            let common = common_friend_counts.get(&id).copied().unwrap_or(0);
            if common > self.policy.common_friends_threshold {
                debug!(account_id = %id, common, "Prune cancelled by common friends");
                plan.spared.push(id);
                continue;
            }
            if plan.prune.len() < self.policy.prune_limit {
                plan.prune.push(id);
            } else {
                plan.deferred += 1;
            }
        }
        plan
    }
}

//! Policy rules applied to a fetched profile. Pure and deterministic
//! given snapshot + policy + current time, so it tests without network
//! or database access.

use chrono::{DateTime, Utc};

use flocktend_common::{Flag, FlagSet, IdleBand, Policy, ProfileSnapshot};

/// Evaluate every rule independently and accumulate flags. An empty
/// result marks the account qualified; non-empty marks it prune-eligible.
pub fn classify(snapshot: &ProfileSnapshot, policy: &Policy, now: DateTime<Utc>) -> FlagSet {
    let mut flags = FlagSet::new();

    if snapshot.followers_count < policy.min_followers {
        flags.insert(Flag::LowFollowers);
    }
    if (now - snapshot.created_at).num_days() < policy.min_account_age_days {
        flags.insert(Flag::NewAccount);
    }
    if snapshot.default_avatar {
        flags.insert(Flag::NoAvatar);
    }
    if snapshot.listed_count < policy.min_listed_count {
        flags.insert(Flag::LowListed);
    }
    if snapshot.protected {
        flags.insert(Flag::Protected);
    }
    if snapshot.statuses_count < policy.min_status_count {
        flags.insert(Flag::LowStatuses);
    }

    // Absent last_posted means maximally idle.
    let idle_days = snapshot
        .last_posted
        .map(|t| (now - t).num_days())
        .unwrap_or(i64::MAX);
    if idle_days >= policy.max_idle_days {
        flags.insert(Flag::Idle(IdleBand::for_idle_days(
            idle_days,
            policy.max_idle_days,
        )));
    }

    flags
}

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FlocktendError;

/// Opaque platform account identifier. Used as the set/map key everywhere.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct AccountId(pub i64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// --- Relations ---

/// Named relation collections as they appear in a platform data export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Following,
    Follower,
    Blocked,
    Muted,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::Following => "following",
            RelationKind::Follower => "follower",
            RelationKind::Blocked => "blocked",
            RelationKind::Muted => "muted",
        }
    }

    /// Key used in export filenames and JSON payloads (`<key>.js`).
    pub fn archive_key(&self) -> &'static str {
        self.as_str()
    }

    /// The edge operation this relation maps to.
    pub fn op(&self) -> RelationOp {
        match self {
            RelationKind::Following | RelationKind::Follower => RelationOp::Follow,
            RelationKind::Blocked => RelationOp::Block,
            RelationKind::Muted => RelationOp::Mute,
        }
    }

    /// Which way the edge points relative to the owning account.
    pub fn direction(&self) -> EdgeDirection {
        match self {
            RelationKind::Follower => EdgeDirection::OtherToOwner,
            _ => EdgeDirection::OwnerToOther,
        }
    }
}

impl FromStr for RelationKind {
    type Err = FlocktendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "following" | "friend" => Ok(RelationKind::Following),
            "follower" => Ok(RelationKind::Follower),
            "blocked" => Ok(RelationKind::Blocked),
            "muted" => Ok(RelationKind::Muted),
            other => Err(FlocktendError::Validation(format!(
                "unrecognized relation kind: '{other}'"
            ))),
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Edge operation stored per relation edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationOp {
    Follow,
    Block,
    Mute,
}

impl RelationOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationOp::Follow => "follow",
            RelationOp::Block => "block",
            RelationOp::Mute => "mute",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeDirection {
    OwnerToOther,
    OtherToOwner,
}

impl EdgeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeDirection::OwnerToOther => "owner_to_other",
            EdgeDirection::OtherToOwner => "other_to_owner",
        }
    }
}

/// One relation edge observation. Upserted, never deleted: the latest
/// `asof` wins per (owner, other, kind, direction) key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationEdge {
    pub owner_id: AccountId,
    pub other_id: AccountId,
    pub kind: RelationOp,
    pub asof: DateTime<Utc>,
    pub direction: EdgeDirection,
}

// --- Profile observations ---

/// One observation of an account profile. Append-only: natural key is
/// (account_id, observed_at), never updated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    pub account_id: AccountId,
    pub observed_at: DateTime<Utc>,
    pub username: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub followers_count: i64,
    pub friends_count: i64,
    pub listed_count: i64,
    pub statuses_count: i64,
    pub media_count: i64,
    pub last_posted: Option<DateTime<Utc>>,
    pub protected: bool,
    pub verified: bool,
    pub premium: bool,
    pub default_avatar: bool,
    pub description: Option<String>,
    pub location: Option<String>,
    pub url: Option<String>,
    pub image_url: Option<String>,
    pub banner_url: Option<String>,
}

/// A fetch failure classified by cause. Append-only; an account with a
/// recent issue is treated as known-bad and skipped for re-fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueRecord {
    pub account_id: AccountId,
    pub observed_at: DateTime<Utc>,
    pub no_response: bool,
    pub no_tweets: bool,
    pub no_user: bool,
    pub message: String,
}

impl IssueRecord {
    pub fn from_failure(
        account_id: AccountId,
        observed_at: DateTime<Utc>,
        failure: &FetchFailure,
    ) -> Self {
        let (no_response, no_tweets, no_user) = match failure.category {
            FailureCategory::Transient | FailureCategory::RateLimited => (true, false, false),
            FailureCategory::NoTweets => (false, true, false),
            FailureCategory::NoUser => (false, false, true),
        };
        Self {
            account_id,
            observed_at,
            no_response,
            no_tweets,
            no_user,
            message: failure.message.clone(),
        }
    }

    pub fn no_tweets(account_id: AccountId, observed_at: DateTime<Utc>, message: String) -> Self {
        Self {
            account_id,
            observed_at,
            no_response: false,
            no_tweets: true,
            no_user: false,
            message,
        }
    }
}

// --- Fetch collaborator contract ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Transient,
    NoUser,
    NoTweets,
    RateLimited,
}

/// Classified failure returned by the external fetch collaborator.
/// These are business data, not run-fatal errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchFailure {
    pub category: FailureCategory,
    pub message: String,
}

impl FetchFailure {
    pub fn new(category: FailureCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.category, self.message)
    }
}

// --- Flags ---

/// Severity band for long-idle accounts. Banding keeps them sortable by
/// tier without storing the raw day count redundantly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IdleBand {
    Over999,
    Over499,
    Over364,
    /// Idle past the configured threshold but under the named bands.
    Threshold(i64),
}

impl IdleBand {
    pub fn for_idle_days(idle_days: i64, max_idle_days: i64) -> Self {
        if idle_days > 999 {
            IdleBand::Over999
        } else if idle_days > 499 {
            IdleBand::Over499
        } else if idle_days > 364 {
            IdleBand::Over364
        } else {
            IdleBand::Threshold(max_idle_days)
        }
    }

    pub fn label(&self) -> String {
        match self {
            IdleBand::Over999 => "ID999".to_string(),
            IdleBand::Over499 => "ID500".to_string(),
            IdleBand::Over364 => "ID365".to_string(),
            IdleBand::Threshold(days) => format!("ID{days:03}"),
        }
    }
}

/// Symbolic policy flag computed from a profile snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Flag {
    LowFollowers,
    NewAccount,
    NoAvatar,
    LowListed,
    Protected,
    LowStatuses,
    Idle(IdleBand),
}

impl Flag {
    pub fn label(&self) -> String {
        match self {
            Flag::LowFollowers => "FLWRS".to_string(),
            Flag::NewAccount => "NEWBI".to_string(),
            Flag::NoAvatar => "NOIMG".to_string(),
            Flag::LowListed => "LISTS".to_string(),
            Flag::Protected => "PROTECTED".to_string(),
            Flag::LowStatuses => "TWEETS".to_string(),
            Flag::Idle(band) => band.label(),
        }
    }
}

/// Accumulated flags for one account. Empty means qualified; non-empty
/// means prune-eligible. Derived on demand, never persisted standalone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlagSet(BTreeSet<Flag>);

impl FlagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, flag: Flag) {
        self.0.insert(flag);
    }

    pub fn contains(&self, flag: &Flag) -> bool {
        self.0.contains(flag)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Flag> {
        self.0.iter()
    }

    /// Labels in stable alphabetical order, the way they are reported.
    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.0.iter().map(Flag::label).collect();
        labels.sort();
        labels
    }
}

impl fmt::Display for FlagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.labels().join(","))
    }
}

impl FromIterator<Flag> for FlagSet {
    fn from_iter<I: IntoIterator<Item = Flag>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// --- Action audit ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Follow,
    Unfollow,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Follow => "follow",
            ActionKind::Unfollow => "unfollow",
        }
    }
}

/// One decided follow/unfollow action, recorded for audit and applied
/// out-of-band by the platform transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub account_id: AccountId,
    pub asof: DateTime<Utc>,
    pub username: Option<String>,
    pub action: ActionKind,
    pub flags: FlagSet,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relation_kind_parse_accepts_friend_alias() {
        assert_eq!("friend".parse::<RelationKind>().unwrap(), RelationKind::Following);
        assert_eq!("follower".parse::<RelationKind>().unwrap(), RelationKind::Follower);
        assert!("enemy".parse::<RelationKind>().is_err());
    }

    #[test]
    fn follower_edges_point_back_at_owner() {
        assert_eq!(RelationKind::Follower.direction(), EdgeDirection::OtherToOwner);
        assert_eq!(RelationKind::Following.direction(), EdgeDirection::OwnerToOther);
        assert_eq!(RelationKind::Blocked.op(), RelationOp::Block);
        assert_eq!(RelationKind::Muted.op(), RelationOp::Mute);
    }

    #[test]
    fn flag_set_renders_sorted_labels() {
        let mut flags = FlagSet::new();
        flags.insert(Flag::LowStatuses);
        flags.insert(Flag::Idle(IdleBand::Over999));
        flags.insert(Flag::LowFollowers);
        flags.insert(Flag::LowFollowers); // dedup
        assert_eq!(flags.len(), 3);
        assert_eq!(flags.to_string(), "FLWRS,ID999,TWEETS");
    }

    #[test]
    fn idle_band_boundaries() {
        assert_eq!(IdleBand::for_idle_days(1000, 180).label(), "ID999");
        assert_eq!(IdleBand::for_idle_days(500, 180).label(), "ID500");
        assert_eq!(IdleBand::for_idle_days(365, 180).label(), "ID365");
        assert_eq!(IdleBand::for_idle_days(200, 180).label(), "ID180");
    }

    #[test]
    fn threshold_label_keeps_the_full_configured_value() {
        assert_eq!(IdleBand::for_idle_days(90, 90).label(), "ID090");
        // Thresholds wider than two bytes render untruncated.
        assert_eq!(IdleBand::for_idle_days(200, 100_000).label(), "ID100000");
    }

    #[test]
    fn issue_from_failure_maps_categories() {
        let now = Utc::now();
        let issue = IssueRecord::from_failure(
            AccountId(7),
            now,
            &FetchFailure::new(FailureCategory::NoUser, "gone"),
        );
        assert!(issue.no_user);
        assert!(!issue.no_response);

        let issue = IssueRecord::from_failure(
            AccountId(7),
            now,
            &FetchFailure::new(FailureCategory::RateLimited, "slow down"),
        );
        assert!(issue.no_response);
    }
}

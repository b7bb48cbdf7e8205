//! Persistence contract for the maintenance pipeline.
//!
//! The core depends only on the [`RelationStore`] trait. `PgRelationStore`
//! is the Postgres implementation; `MemoryStore` (behind `test-support`)
//! backs deterministic tests with no database.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use flocktend_common::{
    AccountId, ActionRecord, EdgeDirection, FlocktendError, IssueRecord, ProfileSnapshot,
    RelationEdge, RelationOp,
};

pub mod pg;

#[cfg(any(test, feature = "test-support"))]
pub mod memory;

pub use pg::PgRelationStore;

#[cfg(any(test, feature = "test-support"))]
pub use memory::MemoryStore;

/// Narrow capability set the pipeline needs from persistence.
///
/// Every call is its own atomic write; there is no multi-step transaction
/// spanning a fetch. A crash between fetch and persist drops that one
/// record, re-fetched on the next run (at-least-once, idempotent via
/// natural-key upsert).
#[async_trait]
pub trait RelationStore: Send + Sync {
    /// Subset of `ids` with a profile snapshot newer than `now - window`.
    async fn fresh_ids(
        &self,
        ids: &[AccountId],
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<HashSet<AccountId>, FlocktendError>;

    /// Subset of `ids` with an issue record newer than `now - window`.
    /// These are known-bad and excluded from re-fetch.
    async fn bad_ids(
        &self,
        ids: &[AccountId],
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<HashSet<AccountId>, FlocktendError>;

    /// Most recent snapshot per account within the window, for accounts in
    /// `ids`. Used to classify cached accounts without a re-fetch.
    async fn latest_snapshots(
        &self,
        ids: &[AccountId],
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<ProfileSnapshot>, FlocktendError>;

    /// Append one profile observation. Keyed on (account_id, observed_at);
    /// re-inserting the same observation is a no-op returning the existing
    /// row id.
    async fn insert_snapshot(&self, snapshot: &ProfileSnapshot) -> Result<i64, FlocktendError>;

    /// Append one fetch-failure record.
    async fn insert_issue(&self, issue: &IssueRecord) -> Result<i64, FlocktendError>;

    /// Upsert one relation edge. Latest `asof` wins per
    /// (owner, other, kind, direction); an older `asof` never overwrites a
    /// newer one.
    async fn upsert_edge(&self, edge: &RelationEdge) -> Result<i64, FlocktendError>;

    /// Current edge membership recorded for an owner, used as the
    /// "previous members" side of reconciliation.
    async fn edge_members(
        &self,
        owner: AccountId,
        kind: RelationOp,
        direction: EdgeDirection,
    ) -> Result<HashSet<AccountId>, FlocktendError>;

    /// Append one decided follow/unfollow action for audit.
    async fn record_action(&self, action: &ActionRecord) -> Result<i64, FlocktendError>;

    /// Try to take the per-owner run lock. Returns false if another run
    /// holds it; concurrent runs against one owner are not supported.
    async fn acquire_run_lock(&self, owner: AccountId) -> Result<bool, FlocktendError>;

    /// Release a lock taken by `acquire_run_lock`. Implementations must
    /// release in whatever session/context acquired (Postgres advisory
    /// locks are session-scoped); releasing a lock this store does not
    /// hold is a no-op.
    async fn release_run_lock(&self, owner: AccountId) -> Result<(), FlocktendError>;
}

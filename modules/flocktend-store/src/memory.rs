//! In-memory store for deterministic tests. No network, no database.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use flocktend_common::{
    AccountId, ActionRecord, EdgeDirection, FlocktendError, IssueRecord, ProfileSnapshot,
    RelationEdge, RelationOp,
};

use crate::RelationStore;

type EdgeKey = (AccountId, AccountId, RelationOp, EdgeDirection);

#[derive(Default)]
struct Inner {
    snapshots: Vec<ProfileSnapshot>,
    issues: Vec<IssueRecord>,
    edges: HashMap<EdgeKey, RelationEdge>,
    actions: Vec<ActionRecord>,
    locks: HashSet<AccountId>,
    failing: bool,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with a store error, for testing
    /// propagation.
    pub fn set_failing(&self, failing: bool) {
        self.inner.lock().unwrap().failing = failing;
    }

    pub fn snapshots(&self) -> Vec<ProfileSnapshot> {
        self.inner.lock().unwrap().snapshots.clone()
    }

    pub fn issues(&self) -> Vec<IssueRecord> {
        self.inner.lock().unwrap().issues.clone()
    }

    pub fn edges(&self) -> Vec<RelationEdge> {
        let mut edges: Vec<RelationEdge> =
            self.inner.lock().unwrap().edges.values().cloned().collect();
        edges.sort_by_key(|e| (e.owner_id, e.other_id));
        edges
    }

    pub fn actions(&self) -> Vec<ActionRecord> {
        self.inner.lock().unwrap().actions.clone()
    }

    fn check(&self, inner: &Inner) -> Result<(), FlocktendError> {
        if inner.failing {
            Err(FlocktendError::Store("memory store unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RelationStore for MemoryStore {
    async fn fresh_ids(
        &self,
        ids: &[AccountId],
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<HashSet<AccountId>, FlocktendError> {
        let inner = self.inner.lock().unwrap();
        self.check(&inner)?;
        let wanted: HashSet<AccountId> = ids.iter().copied().collect();
        Ok(inner
            .snapshots
            .iter()
            .filter(|s| wanted.contains(&s.account_id) && s.observed_at > now - window)
            .map(|s| s.account_id)
            .collect())
    }

    async fn bad_ids(
        &self,
        ids: &[AccountId],
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<HashSet<AccountId>, FlocktendError> {
        let inner = self.inner.lock().unwrap();
        self.check(&inner)?;
        let wanted: HashSet<AccountId> = ids.iter().copied().collect();
        Ok(inner
            .issues
            .iter()
            .filter(|i| wanted.contains(&i.account_id) && i.observed_at > now - window)
            .map(|i| i.account_id)
            .collect())
    }

    async fn latest_snapshots(
        &self,
        ids: &[AccountId],
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<ProfileSnapshot>, FlocktendError> {
        let inner = self.inner.lock().unwrap();
        self.check(&inner)?;
        let wanted: HashSet<AccountId> = ids.iter().copied().collect();
        let mut latest: HashMap<AccountId, ProfileSnapshot> = HashMap::new();
        for snapshot in &inner.snapshots {
            if !wanted.contains(&snapshot.account_id) || snapshot.observed_at <= now - window {
                continue;
            }
            match latest.get(&snapshot.account_id) {
                Some(existing) if existing.observed_at >= snapshot.observed_at => {}
                _ => {
                    latest.insert(snapshot.account_id, snapshot.clone());
                }
            }
        }
        let mut result: Vec<ProfileSnapshot> = latest.into_values().collect();
        result.sort_by_key(|s| s.account_id);
        Ok(result)
    }

    async fn insert_snapshot(&self, snapshot: &ProfileSnapshot) -> Result<i64, FlocktendError> {
        let mut inner = self.inner.lock().unwrap();
        self.check(&inner)?;
        let existing = inner
            .snapshots
            .iter()
            .position(|s| {
                s.account_id == snapshot.account_id && s.observed_at == snapshot.observed_at
            });
        match existing {
            Some(index) => Ok(index as i64 + 1),
            None => {
                inner.snapshots.push(snapshot.clone());
                Ok(inner.snapshots.len() as i64)
            }
        }
    }

    async fn insert_issue(&self, issue: &IssueRecord) -> Result<i64, FlocktendError> {
        let mut inner = self.inner.lock().unwrap();
        self.check(&inner)?;
        inner.issues.push(issue.clone());
        Ok(inner.issues.len() as i64)
    }

    async fn upsert_edge(&self, edge: &RelationEdge) -> Result<i64, FlocktendError> {
        let mut inner = self.inner.lock().unwrap();
        self.check(&inner)?;
        let key = (edge.owner_id, edge.other_id, edge.kind, edge.direction);
        match inner.edges.get(&key) {
            // An older asof never overwrites a newer one.
            Some(existing) if existing.asof > edge.asof => {}
            _ => {
                inner.edges.insert(key, edge.clone());
            }
        }
        Ok(inner.edges.len() as i64)
    }

    async fn edge_members(
        &self,
        owner: AccountId,
        kind: RelationOp,
        direction: EdgeDirection,
    ) -> Result<HashSet<AccountId>, FlocktendError> {
        let inner = self.inner.lock().unwrap();
        self.check(&inner)?;
        Ok(inner
            .edges
            .values()
            .filter(|e| e.owner_id == owner && e.kind == kind && e.direction == direction)
            .map(|e| e.other_id)
            .collect())
    }

    async fn record_action(&self, action: &ActionRecord) -> Result<i64, FlocktendError> {
        let mut inner = self.inner.lock().unwrap();
        self.check(&inner)?;
        inner.actions.push(action.clone());
        Ok(inner.actions.len() as i64)
    }

    async fn acquire_run_lock(&self, owner: AccountId) -> Result<bool, FlocktendError> {
        let mut inner = self.inner.lock().unwrap();
        self.check(&inner)?;
        Ok(inner.locks.insert(owner))
    }

    async fn release_run_lock(&self, owner: AccountId) -> Result<(), FlocktendError> {
        let mut inner = self.inner.lock().unwrap();
        self.check(&inner)?;
        inner.locks.remove(&owner);
        Ok(())
    }
}

//! Postgres-backed store. All queries are schema-qualified by the
//! configured namespace.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres};
use tracing::info;

use flocktend_common::{
    AccountId, ActionRecord, EdgeDirection, FlocktendError, IssueRecord, ProfileSnapshot,
    RelationEdge, RelationOp,
};

use crate::RelationStore;

#[derive(Clone)]
pub struct PgRelationStore {
    pool: PgPool,
    schema: String,
    // Advisory locks are session-scoped, so the acquiring connection must
    // stay checked out of the pool until release runs on that same
    // session. Keyed by owner id.
    held_locks: Arc<Mutex<HashMap<i64, PoolConnection<Postgres>>>>,
}

impl PgRelationStore {
    pub async fn connect(database_url: &str, schema: &str) -> Result<Self, FlocktendError> {
        validate_schema_name(schema)?;
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(store_err)?;
        Ok(Self {
            pool,
            schema: schema.to_string(),
            held_locks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn new(pool: PgPool, schema: &str) -> Result<Self, FlocktendError> {
        validate_schema_name(schema)?;
        Ok(Self {
            pool,
            schema: schema.to_string(),
            held_locks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn held_locks(&self) -> MutexGuard<'_, HashMap<i64, PoolConnection<Postgres>>> {
        self.held_locks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create the schema and tables if they don't exist. Idempotent.
    pub async fn migrate(&self) -> Result<(), FlocktendError> {
        let s = &self.schema;
        let statements = [
            format!("CREATE SCHEMA IF NOT EXISTS {s}"),
            format!(
                "CREATE TABLE IF NOT EXISTS {s}.snapshot (
                    id BIGSERIAL PRIMARY KEY,
                    account_id BIGINT NOT NULL,
                    observed_at TIMESTAMPTZ NOT NULL,
                    username TEXT NOT NULL,
                    display_name TEXT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL,
                    followers_count BIGINT NOT NULL,
                    friends_count BIGINT NOT NULL,
                    listed_count BIGINT NOT NULL,
                    statuses_count BIGINT NOT NULL,
                    media_count BIGINT NOT NULL,
                    last_posted TIMESTAMPTZ,
                    protected BOOLEAN NOT NULL,
                    verified BOOLEAN NOT NULL,
                    premium BOOLEAN NOT NULL,
                    default_avatar BOOLEAN NOT NULL,
                    description TEXT,
                    location TEXT,
                    url TEXT,
                    image_url TEXT,
                    banner_url TEXT,
                    UNIQUE (account_id, observed_at)
                )"
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_snapshot_observed_at
                 ON {s}.snapshot (observed_at DESC)"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {s}.issue (
                    id BIGSERIAL PRIMARY KEY,
                    account_id BIGINT NOT NULL,
                    observed_at TIMESTAMPTZ NOT NULL,
                    no_response BOOLEAN NOT NULL,
                    no_tweets BOOLEAN NOT NULL,
                    no_user BOOLEAN NOT NULL,
                    message TEXT NOT NULL
                )"
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_issue_account_observed
                 ON {s}.issue (account_id, observed_at DESC)"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {s}.relation_edge (
                    id BIGSERIAL PRIMARY KEY,
                    owner_id BIGINT NOT NULL,
                    other_id BIGINT NOT NULL,
                    kind TEXT NOT NULL,
                    direction TEXT NOT NULL,
                    asof TIMESTAMPTZ NOT NULL,
                    UNIQUE (owner_id, other_id, kind, direction)
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {s}.action_log (
                    id BIGSERIAL PRIMARY KEY,
                    account_id BIGINT NOT NULL,
                    asof TIMESTAMPTZ NOT NULL,
                    username TEXT,
                    action TEXT NOT NULL,
                    flags TEXT NOT NULL
                )"
            ),
        ];
        for statement in &statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(store_err)?;
        }
        info!(schema = s.as_str(), "Store migration complete");
        Ok(())
    }
}

#[async_trait]
impl RelationStore for PgRelationStore {
    async fn fresh_ids(
        &self,
        ids: &[AccountId],
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<HashSet<AccountId>, FlocktendError> {
        distinct_ids_since(&self.pool, &self.schema, "snapshot", ids, now - window).await
    }

    async fn bad_ids(
        &self,
        ids: &[AccountId],
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<HashSet<AccountId>, FlocktendError> {
        distinct_ids_since(&self.pool, &self.schema, "issue", ids, now - window).await
    }

    async fn latest_snapshots(
        &self,
        ids: &[AccountId],
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<ProfileSnapshot>, FlocktendError> {
        let raw: Vec<i64> = ids.iter().map(|id| id.0).collect();
        let sql = format!(
            "SELECT DISTINCT ON (account_id)
                account_id, observed_at, username, display_name, created_at,
                followers_count, friends_count, listed_count, statuses_count,
                media_count, last_posted, protected, verified, premium,
                default_avatar, description, location, url, image_url, banner_url
             FROM {}.snapshot
             WHERE account_id = ANY($1) AND observed_at > $2
             ORDER BY account_id, observed_at DESC",
            self.schema
        );
        let rows: Vec<SnapshotRow> = sqlx::query_as(&sql)
            .bind(&raw)
            .bind(now - window)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(rows.into_iter().map(ProfileSnapshot::from).collect())
    }

    async fn insert_snapshot(&self, snapshot: &ProfileSnapshot) -> Result<i64, FlocktendError> {
        let sql = format!(
            "INSERT INTO {}.snapshot (
                account_id, observed_at, username, display_name, created_at,
                followers_count, friends_count, listed_count, statuses_count,
                media_count, last_posted, protected, verified, premium,
                default_avatar, description, location, url, image_url, banner_url
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                       $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
             ON CONFLICT (account_id, observed_at) DO NOTHING
             RETURNING id",
            self.schema
        );
        let inserted: Option<i64> = sqlx::query_scalar(&sql)
            .bind(snapshot.account_id.0)
            .bind(snapshot.observed_at)
            .bind(&snapshot.username)
            .bind(&snapshot.display_name)
            .bind(snapshot.created_at)
            .bind(snapshot.followers_count)
            .bind(snapshot.friends_count)
            .bind(snapshot.listed_count)
            .bind(snapshot.statuses_count)
            .bind(snapshot.media_count)
            .bind(snapshot.last_posted)
            .bind(snapshot.protected)
            .bind(snapshot.verified)
            .bind(snapshot.premium)
            .bind(snapshot.default_avatar)
            .bind(&snapshot.description)
            .bind(&snapshot.location)
            .bind(&snapshot.url)
            .bind(&snapshot.image_url)
            .bind(&snapshot.banner_url)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;

        match inserted {
            Some(id) => Ok(id),
            // Same (account_id, observed_at) observation already recorded.
            None => {
                let sql = format!(
                    "SELECT id FROM {}.snapshot WHERE account_id = $1 AND observed_at = $2",
                    self.schema
                );
                sqlx::query_scalar(&sql)
                    .bind(snapshot.account_id.0)
                    .bind(snapshot.observed_at)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(store_err)
            }
        }
    }

    async fn insert_issue(&self, issue: &IssueRecord) -> Result<i64, FlocktendError> {
        let sql = format!(
            "INSERT INTO {}.issue (
                account_id, observed_at, no_response, no_tweets, no_user, message
             ) VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id",
            self.schema
        );
        sqlx::query_scalar(&sql)
            .bind(issue.account_id.0)
            .bind(issue.observed_at)
            .bind(issue.no_response)
            .bind(issue.no_tweets)
            .bind(issue.no_user)
            .bind(&issue.message)
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)
    }

    async fn upsert_edge(&self, edge: &RelationEdge) -> Result<i64, FlocktendError> {
        let sql = format!(
            "INSERT INTO {}.relation_edge (owner_id, other_id, kind, direction, asof)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (owner_id, other_id, kind, direction)
             DO UPDATE SET asof = EXCLUDED.asof
             WHERE relation_edge.asof <= EXCLUDED.asof
             RETURNING id",
            self.schema
        );
        let updated: Option<i64> = sqlx::query_scalar(&sql)
            .bind(edge.owner_id.0)
            .bind(edge.other_id.0)
            .bind(edge.kind.as_str())
            .bind(edge.direction.as_str())
            .bind(edge.asof)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;

        match updated {
            Some(id) => Ok(id),
            // A newer asof already recorded for this key; the stale write
            // is dropped and the existing row id returned.
            None => {
                let sql = format!(
                    "SELECT id FROM {}.relation_edge
                     WHERE owner_id = $1 AND other_id = $2 AND kind = $3 AND direction = $4",
                    self.schema
                );
                sqlx::query_scalar(&sql)
                    .bind(edge.owner_id.0)
                    .bind(edge.other_id.0)
                    .bind(edge.kind.as_str())
                    .bind(edge.direction.as_str())
                    .fetch_one(&self.pool)
                    .await
                    .map_err(store_err)
            }
        }
    }

    async fn edge_members(
        &self,
        owner: AccountId,
        kind: RelationOp,
        direction: EdgeDirection,
    ) -> Result<HashSet<AccountId>, FlocktendError> {
        let sql = format!(
            "SELECT other_id FROM {}.relation_edge
             WHERE owner_id = $1 AND kind = $2 AND direction = $3",
            self.schema
        );
        let rows: Vec<i64> = sqlx::query_scalar(&sql)
            .bind(owner.0)
            .bind(kind.as_str())
            .bind(direction.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(rows.into_iter().map(AccountId).collect())
    }

    async fn record_action(&self, action: &ActionRecord) -> Result<i64, FlocktendError> {
        let sql = format!(
            "INSERT INTO {}.action_log (account_id, asof, username, action, flags)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id",
            self.schema
        );
        sqlx::query_scalar(&sql)
            .bind(action.account_id.0)
            .bind(action.asof)
            .bind(&action.username)
            .bind(action.action.as_str())
            .bind(action.flags.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)
    }

    async fn acquire_run_lock(&self, owner: AccountId) -> Result<bool, FlocktendError> {
        if self.held_locks().contains_key(&owner.0) {
            return Ok(false);
        }
        // A dedicated connection, not the pool: the lock lives on this
        // session, and the session is kept checked out until release.
        // A second acquirer necessarily lands on a different session (the
        // holder's is out of the pool), so Postgres arbitrates contention.
        let mut conn = self.pool.acquire().await.map_err(store_err)?;
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(owner.0)
            .fetch_one(&mut *conn)
            .await
            .map_err(store_err)?;
        if acquired {
            self.held_locks().insert(owner.0, conn);
        }
        Ok(acquired)
    }

    async fn release_run_lock(&self, owner: AccountId) -> Result<(), FlocktendError> {
        // Unlock must run on the session that acquired; a no-op if this
        // store never took the lock.
        let conn = self.held_locks().remove(&owner.0);
        if let Some(mut conn) = conn {
            sqlx::query("SELECT pg_advisory_unlock($1)")
                .bind(owner.0)
                .execute(&mut *conn)
                .await
                .map_err(store_err)?;
        }
        Ok(())
    }
}

async fn distinct_ids_since(
    pool: &PgPool,
    schema: &str,
    table: &str,
    ids: &[AccountId],
    since: DateTime<Utc>,
) -> Result<HashSet<AccountId>, FlocktendError> {
    if ids.is_empty() {
        return Ok(HashSet::new());
    }
    let raw: Vec<i64> = ids.iter().map(|id| id.0).collect();
    let sql = format!(
        "SELECT DISTINCT account_id FROM {schema}.{table}
         WHERE account_id = ANY($1) AND observed_at > $2"
    );
    let rows: Vec<i64> = sqlx::query_scalar(&sql)
        .bind(&raw)
        .bind(since)
        .fetch_all(pool)
        .await
        .map_err(store_err)?;
    Ok(rows.into_iter().map(AccountId).collect())
}

fn validate_schema_name(schema: &str) -> Result<(), FlocktendError> {
    let valid = !schema.is_empty()
        && schema
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(FlocktendError::Config(format!(
            "invalid schema name: '{schema}'"
        )))
    }
}

fn store_err(e: sqlx::Error) -> FlocktendError {
    FlocktendError::Store(e.to_string())
}

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    account_id: i64,
    observed_at: DateTime<Utc>,
    username: String,
    display_name: String,
    created_at: DateTime<Utc>,
    followers_count: i64,
    friends_count: i64,
    listed_count: i64,
    statuses_count: i64,
    media_count: i64,
    last_posted: Option<DateTime<Utc>>,
    protected: bool,
    verified: bool,
    premium: bool,
    default_avatar: bool,
    description: Option<String>,
    location: Option<String>,
    url: Option<String>,
    image_url: Option<String>,
    banner_url: Option<String>,
}

impl From<SnapshotRow> for ProfileSnapshot {
    fn from(row: SnapshotRow) -> Self {
        Self {
            account_id: AccountId(row.account_id),
            observed_at: row.observed_at,
            username: row.username,
            display_name: row.display_name,
            created_at: row.created_at,
            followers_count: row.followers_count,
            friends_count: row.friends_count,
            listed_count: row.listed_count,
            statuses_count: row.statuses_count,
            media_count: row.media_count,
            last_posted: row.last_posted,
            protected: row.protected,
            verified: row.verified,
            premium: row.premium,
            default_avatar: row.default_avatar,
            description: row.description,
            location: row.location,
            url: row.url,
            image_url: row.image_url,
            banner_url: row.banner_url,
        }
    }
}

//! End-to-end maintenance run over an in-memory store and a scripted
//! fetcher, driven by a real export directory on disk.

use std::fs;
use std::path::Path;

use chrono::Utc;

use flocktend_common::{AccountId, ActionKind, EdgeDirection, Policy, RelationEdge, RelationOp};
use flocktend_engine::testing::{fetched_fixture, InstantSleeper, MockFetcher, MockInteractions};
use flocktend_engine::{ArchiveLoader, MaintenanceRun};
use flocktend_store::{MemoryStore, RelationStore};

const OWNER: AccountId = AccountId(1000);

fn write_archive(root: &Path, following: &[i64], followers: &[i64]) {
    let data = root.join("alice").join("data");
    fs::create_dir_all(&data).unwrap();
    fs::write(
        data.join("account.js"),
        r#"window.YTD.account.part0 = [{"account": {"accountId": "1000", "username": "alice"}}]"#,
    )
    .unwrap();

    let entries = |kind: &str, ids: &[i64]| {
        let body: Vec<String> = ids
            .iter()
            .map(|id| format!(r#"{{"{kind}": {{"accountId": "{id}"}}}}"#))
            .collect();
        format!("window.YTD.{kind}.part0 = [{}]", body.join(","))
    };
    fs::write(data.join("following.js"), entries("following", following)).unwrap();
    fs::write(data.join("follower.js"), entries("follower", followers)).unwrap();
}

async fn seed_previous_following(store: &MemoryStore, ids: &[i64]) {
    let asof = Utc::now() - chrono::Duration::days(7);
    for &id in ids {
        store
            .upsert_edge(&RelationEdge {
                owner_id: OWNER,
                other_id: AccountId(id),
                kind: RelationOp::Follow,
                asof,
                direction: EdgeDirection::OwnerToOther,
            })
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn reconciles_membership_and_skips_single_interaction_candidates() {
    let dir = tempfile::tempdir().unwrap();
    write_archive(dir.path(), &[2, 3, 4], &[2]);

    let store = MemoryStore::new();
    seed_previous_following(&store, &[1, 2, 3]).await;

    let fetcher = MockFetcher::new();
    let interactions = MockInteractions::new();
    // Account 4 interacted exactly once, below the candidacy bar.
    interactions.set_interactors("alice", vec![AccountId(4)]);
    let sleeper = InstantSleeper::default();
    let loader = ArchiveLoader::new(dir.path());
    let policy = Policy::default();

    let run = MaintenanceRun::new(
        &store,
        &fetcher,
        &interactions,
        &sleeper,
        &loader,
        &policy,
        Utc::now(),
    );
    let stats = run.run(&["@alice".to_string()]).await.unwrap();

    assert_eq!(stats.handles, 1);
    assert_eq!(stats.gained, 1); // 4 appeared
    assert_eq!(stats.lost, 1); // 1 left
    assert_eq!(stats.follows, 0);
    assert_eq!(stats.prunes, 0);
    assert!(store.actions().is_empty());

    // Current membership was upserted for both directions.
    let following = store
        .edge_members(OWNER, RelationOp::Follow, EdgeDirection::OwnerToOther)
        .await
        .unwrap();
    assert!(following.contains(&AccountId(4)));
    let followers = store
        .edge_members(OWNER, RelationOp::Follow, EdgeDirection::OtherToOwner)
        .await
        .unwrap();
    assert_eq!(followers.len(), 1);
}

#[tokio::test]
async fn repeat_interactions_produce_a_follow_action() {
    let dir = tempfile::tempdir().unwrap();
    write_archive(dir.path(), &[2, 3], &[]);

    let store = MemoryStore::new();
    let fetcher = MockFetcher::new();
    let interactions = MockInteractions::new();
    interactions.set_interactors("alice", vec![AccountId(9), AccountId(9)]);
    let sleeper = InstantSleeper::default();
    let loader = ArchiveLoader::new(dir.path());
    let policy = Policy::default();

    let run = MaintenanceRun::new(
        &store,
        &fetcher,
        &interactions,
        &sleeper,
        &loader,
        &policy,
        Utc::now(),
    );
    let stats = run.run(&["alice".to_string()]).await.unwrap();

    // 9 is not in the watched set, so it never got a snapshot and is
    // skipped as unvetted.
    assert_eq!(stats.follows, 0);

    // Re-run with 9 in the follower set so a snapshot exists.
    write_archive(dir.path(), &[2, 3], &[9]);
    let stats = run.run(&["alice".to_string()]).await.unwrap();
    assert_eq!(stats.follows, 1);

    let actions = store.actions();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].account_id, AccountId(9));
    assert_eq!(actions[0].action, ActionKind::Follow);
    assert!(actions[0].flags.is_empty());
}

#[tokio::test]
async fn flagged_friend_is_pruned_with_flags_recorded() {
    let dir = tempfile::tempdir().unwrap();
    write_archive(dir.path(), &[2, 3], &[]);

    let store = MemoryStore::new();
    let fetcher = MockFetcher::new();
    let now = Utc::now();
    let mut weak = fetched_fixture(AccountId(2), now);
    weak.snapshot.followers_count = 3;
    fetcher.script(AccountId(2), vec![Ok(weak)]);
    let interactions = MockInteractions::new();
    let sleeper = InstantSleeper::default();
    let loader = ArchiveLoader::new(dir.path());
    let policy = Policy::default();

    let run = MaintenanceRun::new(
        &store,
        &fetcher,
        &interactions,
        &sleeper,
        &loader,
        &policy,
        now,
    );
    let stats = run.run(&["alice".to_string()]).await.unwrap();

    assert_eq!(stats.prunes, 1);
    let actions = store.actions();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].account_id, AccountId(2));
    assert_eq!(actions[0].action, ActionKind::Unfollow);
    assert_eq!(actions[0].flags.to_string(), "FLWRS");
}

#[tokio::test]
async fn common_friends_spare_a_flagged_friend() {
    let dir = tempfile::tempdir().unwrap();
    write_archive(dir.path(), &[2, 3, 4, 5, 6], &[]);

    let store = MemoryStore::new();
    let fetcher = MockFetcher::new();
    let now = Utc::now();
    let mut weak = fetched_fixture(AccountId(2), now);
    weak.snapshot.followers_count = 3;
    fetcher.script(AccountId(2), vec![Ok(weak)]);
    let interactions = MockInteractions::new();
    // Four of the owner's other friends follow account 2, above the
    // threshold of three.
    interactions.set_followers(
        AccountId(2),
        vec![AccountId(3), AccountId(4), AccountId(5), AccountId(6)],
    );
    let sleeper = InstantSleeper::default();
    let loader = ArchiveLoader::new(dir.path());
    let policy = Policy::default();

    let run = MaintenanceRun::new(
        &store,
        &fetcher,
        &interactions,
        &sleeper,
        &loader,
        &policy,
        now,
    );
    let stats = run.run(&["alice".to_string()]).await.unwrap();

    assert_eq!(stats.prunes, 0);
    assert_eq!(stats.prunes_spared, 1);
    assert!(store.actions().is_empty());
}

#[tokio::test]
async fn exclusion_list_protects_a_flagged_friend() {
    let dir = tempfile::tempdir().unwrap();
    write_archive(dir.path(), &[2, 3], &[]);
    fs::write(dir.path().join("ignore_account_ids.txt"), "2\n").unwrap();

    let store = MemoryStore::new();
    let fetcher = MockFetcher::new();
    let now = Utc::now();
    let mut weak = fetched_fixture(AccountId(2), now);
    weak.snapshot.followers_count = 3;
    fetcher.script(AccountId(2), vec![Ok(weak)]);
    let interactions = MockInteractions::new();
    let sleeper = InstantSleeper::default();
    let loader = ArchiveLoader::new(dir.path());
    let policy = Policy::default();

    let run = MaintenanceRun::new(
        &store,
        &fetcher,
        &interactions,
        &sleeper,
        &loader,
        &policy,
        now,
    );
    let stats = run.run(&["alice".to_string()]).await.unwrap();

    assert_eq!(stats.prunes, 0);
    assert!(store.actions().is_empty());
}

#[tokio::test]
async fn dry_run_plans_without_recording() {
    let dir = tempfile::tempdir().unwrap();
    write_archive(dir.path(), &[2, 3], &[]);

    let store = MemoryStore::new();
    let fetcher = MockFetcher::new();
    let now = Utc::now();
    let mut weak = fetched_fixture(AccountId(2), now);
    weak.snapshot.followers_count = 3;
    fetcher.script(AccountId(2), vec![Ok(weak)]);
    let interactions = MockInteractions::new();
    let sleeper = InstantSleeper::default();
    let loader = ArchiveLoader::new(dir.path());
    let policy = Policy::default();

    let run = MaintenanceRun::new(
        &store,
        &fetcher,
        &interactions,
        &sleeper,
        &loader,
        &policy,
        now,
    )
    .with_dry_run(true);
    let stats = run.run(&["alice".to_string()]).await.unwrap();

    // Still planned and counted, but nothing hit the action log.
    assert_eq!(stats.prunes, 1);
    assert!(store.actions().is_empty());
    // Observations still persist in a dry run.
    assert!(!store.snapshots().is_empty());
}

#[tokio::test]
async fn fresh_accounts_are_not_refetched() {
    let dir = tempfile::tempdir().unwrap();
    write_archive(dir.path(), &[2, 3], &[]);

    let store = MemoryStore::new();
    let fetcher = MockFetcher::new();
    let interactions = MockInteractions::new();
    let sleeper = InstantSleeper::default();
    let loader = ArchiveLoader::new(dir.path());
    let policy = Policy::default();
    let now = Utc::now();

    let run = MaintenanceRun::new(
        &store,
        &fetcher,
        &interactions,
        &sleeper,
        &loader,
        &policy,
        now,
    );
    run.run(&["alice".to_string()]).await.unwrap();
    assert_eq!(fetcher.calls().len(), 2);

    // Second run inside the staleness window: everything is cached.
    let stats = run.run(&["alice".to_string()]).await.unwrap();
    assert_eq!(fetcher.calls().len(), 2);
    assert_eq!(stats.cached, 2);
}

#[tokio::test]
async fn empty_handle_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = MemoryStore::new();
    let fetcher = MockFetcher::new();
    let interactions = MockInteractions::new();
    let sleeper = InstantSleeper::default();
    let loader = ArchiveLoader::new(dir.path());
    let policy = Policy::default();

    let run = MaintenanceRun::new(
        &store,
        &fetcher,
        &interactions,
        &sleeper,
        &loader,
        &policy,
        Utc::now(),
    );
    assert!(run.run(&["@".to_string()]).await.is_err());
}

//! Persistence integration tests.
//!
//! Verifies:
//! - Histories survive closing and reopening the RocksDB store
//! - Generations continue from their stored value after reopen
//! - Generation preconditions hold against the on-disk value
//! - Compaction state and removals are persisted
//! - Files are isolated under one database

use palimpsest_server::{
    BlobError, BlobStore, EntryKind, ErrorCode, FileKey, HistoryConfig, MediatorConfig,
    Precondition, RocksBlobStore, RocksConfig, VersionService, VersionedFileMediator,
};
use std::path::Path;
use tempfile::tempdir;

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn open_service(path: &Path) -> VersionService<RocksBlobStore> {
    let store = RocksBlobStore::open(RocksConfig::for_testing(path)).unwrap();
    let mediator = VersionedFileMediator::new(store, MediatorConfig::for_testing());
    VersionService::new(mediator, HistoryConfig::for_testing())
}

fn generation(service: &VersionService<RocksBlobStore>, key: &FileKey) -> u64 {
    service
        .mediator()
        .store()
        .get(key)
        .unwrap()
        .map(|blob| blob.generation)
        .unwrap_or(0)
}

// ─── Reopen ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_history_survives_reopen() {
    let dir = tempdir().unwrap();
    let key = FileKey::random();

    {
        let service = open_service(dir.path());
        service.create_version(&key, "alice", "first draft").await.unwrap();
        service.create_version(&key, "alice", "second draft").await.unwrap();
        service.create_version(&key, "bob", "final draft").await.unwrap();
        assert_eq!(generation(&service, &key), 3);
    }

    let service = open_service(dir.path());
    assert_eq!(generation(&service, &key), 3);

    let latest = service.get_version(&key, None).await.unwrap();
    assert_eq!(latest.info.version, 3);
    assert_eq!(latest.info.author, "bob");
    assert_eq!(latest.content, "final draft");

    let first = service.get_version(&key, Some(1)).await.unwrap();
    assert_eq!(first.content, "first draft");

    // Writes continue from the stored generation
    service.create_version(&key, "carol", "post-reopen").await.unwrap();
    assert_eq!(generation(&service, &key), 4);
    assert_eq!(service.list_versions(&key).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_removal_survives_reopen() {
    let dir = tempdir().unwrap();
    let key = FileKey::random();

    {
        let service = open_service(dir.path());
        service.create_version(&key, "alice", "Hello world").await.unwrap();
        service.create_version(&key, "alice", "Hello world!").await.unwrap();
        service.create_version(&key, "bob", "Hi world!").await.unwrap();
        service.remove_edit(&key, 2, "carol").await.unwrap();
    }

    let service = open_service(dir.path());
    let latest = service.get_version(&key, None).await.unwrap();
    assert_eq!(latest.content, "Hi world");
    assert_eq!(latest.info.kind, EntryKind::Removal { removed_version: 2 });

    // The removal itself can be removed after reopen
    service.remove_edit(&key, 4, "carol").await.unwrap();
    assert_eq!(
        service.get_version(&key, None).await.unwrap().content,
        "Hi world!"
    );
}

#[tokio::test]
async fn test_compaction_survives_reopen() {
    let dir = tempdir().unwrap();
    let key = FileKey::random();

    {
        let service = open_service(dir.path());
        for i in 1..=10 {
            service
                .create_version(&key, "alice", &format!("revision {i}"))
                .await
                .unwrap();
        }
    }

    let service = open_service(dir.path());
    let versions = service.list_versions(&key).await.unwrap();
    assert_eq!(versions.first().map(|v| v.version), Some(5));
    assert_eq!(versions.last().map(|v| v.version), Some(10));

    let base = service.get_version(&key, Some(5)).await.unwrap();
    assert_eq!(base.content, "revision 5");

    let err = service.get_version(&key, Some(3)).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Compacted);
}

// ─── Preconditions ───────────────────────────────────────────────────────────

#[test]
fn test_preconditions_against_disk() {
    let dir = tempdir().unwrap();
    let key = FileKey::random();

    {
        let store = RocksBlobStore::open(RocksConfig::for_testing(dir.path())).unwrap();
        assert_eq!(store.put(&key, b"one", Precondition::MustNotExist).unwrap(), 1);
        assert_eq!(
            store
                .put(&key, b"two", Precondition::GenerationEquals(1))
                .unwrap(),
            2
        );
        store.sync().unwrap();
    }

    let store = RocksBlobStore::open(RocksConfig::for_testing(dir.path())).unwrap();
    assert_eq!(
        store.put(&key, b"again", Precondition::MustNotExist),
        Err(BlobError::PreconditionFailed {
            expected: 0,
            actual: 2
        })
    );
    assert_eq!(
        store.put(&key, b"stale", Precondition::GenerationEquals(1)),
        Err(BlobError::PreconditionFailed {
            expected: 1,
            actual: 2
        })
    );

    let blob = store.get(&key).unwrap().unwrap();
    assert_eq!(blob.bytes, b"two");
    assert_eq!(blob.generation, 2);
}

// ─── Isolation ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_files_isolated_in_one_database() {
    let dir = tempdir().unwrap();
    let project = uuid::Uuid::new_v4();
    let keys: Vec<FileKey> = (0..5)
        .map(|_| FileKey::new(project, uuid::Uuid::new_v4()))
        .collect();

    {
        let service = open_service(dir.path());
        for (i, key) in keys.iter().enumerate() {
            for edit in 0..=i {
                service
                    .create_version(key, "alice", &format!("file {i} edit {edit}"))
                    .await
                    .unwrap();
            }
        }
    }

    let service = open_service(dir.path());
    let mut stored = service.mediator().store().keys().unwrap();
    stored.sort();
    let mut expected = keys.clone();
    expected.sort();
    assert_eq!(stored, expected);

    for (i, key) in keys.iter().enumerate() {
        let latest = service.get_version(key, None).await.unwrap();
        assert_eq!(latest.info.version, i as u64 + 1);
        assert_eq!(latest.content, format!("file {i} edit {i}"));
    }
}

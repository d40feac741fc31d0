//! End-to-end tests for the guard core.
//!
//! These exercise the full staging pipeline around the external snapshot
//! utility without invoking it: descriptor indexing, resource packing,
//! archive commit/extract, and unpacking back into place.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use snapguard_core::pack::{ResourcePacker, EXT_RES_DIR, FD_INDEX_NAME};
use snapguard_core::store::SnapshotStore;
use snapguard_core::{CheckpointRound, GuardConfig, GuardError, NodeId, Pid};

/// Descriptor index + pack + commit + extract + unpack, against this test
/// process's own open descriptors.
#[tokio::test]
async fn staging_pipeline_round_trips_through_an_archive() {
    let world = TempDir::new().unwrap();

    // Live state: one file held open, one external-data directory.
    let held_path = world.path().join("appendonly.aof");
    fs::write(&held_path, b"replica log").unwrap();
    let _held = fs::File::open(&held_path).unwrap();

    let ext_dir = world.path().join("data").join("store");
    fs::create_dir_all(&ext_dir).unwrap();
    fs::write(ext_dir.join("kvs.bin"), b"key value bytes").unwrap();

    let packer = ResourcePacker::new(&ext_dir);
    let store = SnapshotStore::open(world.path().join("ck_store"), Duration::from_secs(60)).unwrap();

    // Checkpoint side.
    let staging = TempDir::new().unwrap();
    let own_pid = Pid::new(std::process::id() as i32).unwrap();
    packer.index_descriptors(staging.path(), own_pid).unwrap();
    fs::write(staging.path().join("pages-1.img"), b"fake dump").unwrap();
    packer.pack_resources(staging.path()).unwrap();

    let round = store.next_round().unwrap();
    assert_eq!(round, CheckpointRound::ZERO);
    store.commit(staging.path(), round).await.unwrap();
    drop(staging);

    // Mutate live state the way a diverged replica would.
    fs::write(&held_path, b"diverged").unwrap();
    fs::remove_dir_all(&ext_dir).unwrap();

    // Restore side.
    let restored = store.nearest_round(CheckpointRound::new(10)).unwrap();
    assert_eq!(restored, round);
    let staging = TempDir::new().unwrap();
    store.extract_into(restored, staging.path()).await.unwrap();

    let index = fs::read_to_string(staging.path().join(FD_INDEX_NAME)).unwrap();
    assert!(index.lines().any(|l| l == held_path.to_string_lossy()));
    assert!(staging.path().join(EXT_RES_DIR).join("kvs.bin").exists());

    packer.unpack(staging.path()).unwrap();
    assert_eq!(fs::read(&held_path).unwrap(), b"replica log");
    assert_eq!(fs::read(ext_dir.join("kvs.bin")).unwrap(), b"key value bytes");
}

#[test]
fn config_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cluster.yaml");
    fs::write(
        &path,
        r#"
nodes:
  - id: 1
    host: 10.22.1.1
  - id: 2
    host: 10.22.1.2
  - id: 3
    host: 10.22.1.3
checkpoint_interval_secs: 60
transfer_user: hkucs
"#,
    )
    .unwrap();

    let config = GuardConfig::load(&path, NodeId::new(3), "redis-server").unwrap();
    assert_eq!(config.topology.len(), 3);
    assert_eq!(config.checkpoint_interval, Duration::from_secs(60));
    assert_eq!(config.transfer_user.as_deref(), Some("hkucs"));
    assert!(!config.is_checkpoint_leader());

    let config = Arc::new(config);
    assert_eq!(
        config.topology.address_of(NodeId::new(2)).unwrap().host,
        "10.22.1.2"
    );
}

#[test]
fn rounds_never_reuse_after_commits() {
    let dir = TempDir::new().unwrap();
    let store = SnapshotStore::open(dir.path(), Duration::from_secs(60)).unwrap();

    let mut assigned = Vec::new();
    for _ in 0..4 {
        let round = store.next_round().unwrap();
        assert!(!assigned.contains(&round), "round {round} reused");
        // Simulate a committed archive without invoking tar.
        fs::write(store.archive_path(round), b"archive").unwrap();
        assigned.push(round);
    }
    assert_eq!(
        assigned,
        vec![
            CheckpointRound::new(0),
            CheckpointRound::new(1),
            CheckpointRound::new(2),
            CheckpointRound::new(3),
        ]
    );
}

#[test]
fn empty_store_restore_has_nothing_to_offer() {
    let dir = TempDir::new().unwrap();
    let store = SnapshotStore::open(dir.path(), Duration::from_secs(60)).unwrap();
    let err = store.nearest_round(CheckpointRound::ZERO).unwrap_err();
    assert!(matches!(err, GuardError::NoCheckpointAvailable { .. }));
}

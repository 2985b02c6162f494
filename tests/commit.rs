//! Commit pipeline behavior against a real repository on disk.

mod common;

use common::{mode, write_descriptor, write_file, TestRepo};
use jobrepo::descriptor::JobMetadata;
use jobrepo::lock::LockManager;
use jobrepo::staging::restore_write;
use jobrepo::{CommitError, DependencyError, LockError};
use serde_json::json;
use std::fs;
use std::time::Duration;

#[test]
fn committing_identical_content_twice_is_idempotent() {
    let t = TestRepo::new();
    let work = t.scratch("job");
    write_file(&work, "data.txt", "hello");

    let first = t.repo.commit(&work, None).expect("first commit");
    let second = t.repo.commit(&work, None).expect("second commit");
    assert_eq!(first.hash, second.hash);
    assert!(first.inserted);
    assert!(!second.inserted);
    assert_eq!(t.object_count(), 1);
    assert_eq!(
        first.path,
        std::path::Path::new("jobs/by_hash").join(first.hash.as_str())
    );
    assert_eq!(t.staging_entries(), 0);
}

#[test]
fn stored_job_is_write_protected_with_writable_output() {
    let t = TestRepo::new();
    let work = t.scratch("job");
    write_file(&work, "src/run.py", "print('hi')");
    let outcome = t.repo.commit(&work, None).expect("commit");

    let stored = t.repo.root().join(&outcome.path);
    assert_eq!(mode(&stored.join("src/run.py")) & 0o222, 0);
    assert_eq!(mode(&stored.join("job.json")) & 0o222, 0);
    assert_eq!(mode(&stored) & 0o222, 0);
    assert!(stored.join("output").is_dir());
    assert_ne!(mode(&stored.join("output")) & 0o200, 0);
}

#[test]
fn ignored_paths_affect_neither_hash_nor_storage() {
    let t = TestRepo::new();
    let work = t.scratch("job");
    write_descriptor(&work, json!({"commit": {"ignore": ["*.log", "cache/"]}}));
    write_file(&work, "train.py", "fit()");
    let clean = t.repo.commit(&work, None).expect("commit clean");

    write_file(&work, "debug.log", "noise");
    write_file(&work, "cache/blob.bin", "junk");
    write_file(&work, "output/result.txt", "local run");
    let noisy = t.repo.commit(&work, None).expect("commit noisy");

    assert_eq!(clean.hash, noisy.hash);
    let stored = t.repo.root().join(&noisy.path);
    assert!(!stored.join("debug.log").exists());
    assert!(!stored.join("cache").exists());
    assert!(!stored.join("output/result.txt").exists());
}

#[test]
fn descriptor_payload_changes_identity() {
    let t = TestRepo::new();
    let work = t.scratch("job");
    write_file(&work, "train.py", "fit()");
    write_descriptor(&work, json!({"parameters": {"lr": 0.1}}));
    let first = t.repo.commit(&work, None).expect("commit");
    write_descriptor(&work, json!({"parameters": {"lr": 0.2}}));
    let second = t.repo.commit(&work, None).expect("commit");
    assert_ne!(first.hash, second.hash);
    assert_eq!(t.object_count(), 2);
}

#[test]
fn missing_dependency_leaves_store_and_tags_unchanged() {
    let t = TestRepo::new();
    let work = t.scratch("job");
    write_descriptor(
        &work,
        json!({"dependencies": [{"item": "deadbeef", "destination": "input"}]}),
    );
    let err = t.repo.commit(&work, Some("latest")).unwrap_err();
    assert!(
        matches!(&err, CommitError::Dependency(dep) if dep.is_missing()),
        "{err}"
    );
    assert_eq!(t.object_count(), 0);
    assert!(t.repo.tags().expect("list tags").is_empty());
    assert_eq!(t.staging_entries(), 0);
}

#[test]
fn missing_source_path_is_rejected() {
    let t = TestRepo::new();
    let raw = t.scratch("raw");
    write_file(&raw, "data.txt", "hello");
    let raw = t.repo.commit_data(&raw, None).expect("commit data");

    let work = t.scratch("job");
    write_descriptor(
        &work,
        json!({"dependencies": [{"item": raw.hash, "source": "absent.txt", "destination": "in"}]}),
    );
    let err = t.repo.commit(&work, None).unwrap_err();
    assert!(matches!(
        err,
        CommitError::Dependency(DependencyError::MissingSource { .. })
    ));
    assert_eq!(t.object_count(), 1);
}

#[test]
fn dependencies_resolve_through_tags_and_record_references() {
    let t = TestRepo::new();
    let raw = t.scratch("raw");
    write_file(&raw, "data.txt", "hello");
    let raw = t.repo.commit_data(&raw, Some("raw")).expect("commit data");

    let work = t.scratch("job");
    write_descriptor(
        &work,
        json!({"dependencies": [{"item": "#raw", "source": "data.txt", "destination": "input/data.txt"}]}),
    );
    let job = t.repo.commit(&work, None).expect("commit");

    let info = t.repo.job_info(job.hash.as_str()).expect("job info");
    assert_eq!(info.descriptor.dependencies.len(), 1);
    assert_eq!(info.descriptor.dependencies[0].job, raw.hash);
    let metadata: JobMetadata = info.metadata.expect("metadata");
    assert_eq!(metadata.references["input/data.txt"], "#raw");

    // Retagging `raw` does not change what the committed job points at.
    let other = t.scratch("other");
    write_file(&other, "data.txt", "bye");
    t.repo.commit_data(&other, Some("raw")).expect("retag");
    let info = t.repo.job_info(job.hash.as_str()).expect("job info");
    assert_eq!(info.descriptor.dependencies[0].job, raw.hash);
}

#[test]
fn hand_edited_cycle_is_rejected() {
    let t = TestRepo::new();
    let a_dir = t.scratch("a");
    write_file(&a_dir, "a.txt", "a");
    let a = t.repo.commit_data(&a_dir, None).expect("commit a");

    let b_dir = t.scratch("b");
    write_descriptor(
        &b_dir,
        json!({"dependencies": [{"item": a.hash, "destination": "a"}]}),
    );
    let b = t.repo.commit(&b_dir, None).expect("commit b");

    // Make A depend on B behind the repository's back.
    let a_root = t.repo.root().join(&a.path);
    restore_write(&a_root).expect("unlock a");
    fs::remove_file(a_root.join("job.json")).expect("remove descriptor");
    let forged = json!({"dependencies": [{"job": b.hash, "source": ".", "destination": "b"}]});
    fs::write(a_root.join("job.json"), forged.to_string()).expect("forge descriptor");

    let c_dir = t.scratch("c");
    write_descriptor(
        &c_dir,
        json!({"dependencies": [{"item": b.hash, "destination": "b"}]}),
    );
    let before = t.object_count();
    let err = t.repo.commit(&c_dir, None).unwrap_err();
    assert!(
        matches!(err, CommitError::Dependency(DependencyError::Cycle { .. })),
        "{err}"
    );
    assert_eq!(t.object_count(), before);
}

#[test]
fn busy_lock_times_out_without_mutation() {
    let t = TestRepo::new();
    let work = t.scratch("job");
    write_file(&work, "data.txt", "hello");

    let holder = LockManager::new(t.repo.paths().lock_path(), Duration::from_secs(3600));
    let held = holder.acquire(Duration::from_secs(1)).expect("hold lock");
    let repo = t.repo.clone().with_lock_timeout(Duration::from_millis(50));
    let err = repo.commit(&work, Some("latest")).unwrap_err();
    assert!(matches!(err, CommitError::Lock(LockError::Busy { .. })), "{err}");
    assert_eq!(t.object_count(), 0);
    assert!(t.repo.tags().expect("list tags").is_empty());
    assert_eq!(t.staging_entries(), 0);

    held.release().expect("release");
    repo.commit(&work, Some("latest")).expect("commit after release");
}

#[test]
fn tag_updates_are_atomic_for_readers() {
    let t = TestRepo::new();
    let first = t.scratch("one");
    write_file(&first, "v", "1");
    let one = t.repo.commit_data(&first, Some("current")).expect("commit one");
    let second = t.scratch("two");
    write_file(&second, "v", "2");
    let two = t.repo.commit_data(&second, None).expect("commit two");

    std::thread::scope(|scope| {
        let writer = scope.spawn(|| {
            for round in 0..100 {
                let target = if round % 2 == 0 { &two.hash } else { &one.hash };
                t.repo
                    .set_tag("current", target.as_str(), true)
                    .expect("retag");
            }
        });
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..300 {
                    let seen = t.repo.resolve_tag("current").expect("resolve during update");
                    assert!(seen == one.hash || seen == two.hash);
                }
            });
        }
        writer.join().expect("writer thread");
    });
}

#[test]
fn commit_data_accepts_single_file() {
    let t = TestRepo::new();
    let dir = t.scratch("raw");
    write_file(&dir, "table.csv", "a,b\n1,2\n");
    let outcome = t
        .repo
        .commit_data(&dir.join("table.csv"), Some("table"))
        .expect("commit file");
    let stored = t.repo.root().join(&outcome.path);
    assert_eq!(
        fs::read_to_string(stored.join("table.csv")).expect("read stored"),
        "a,b\n1,2\n"
    );
    assert!(!stored.join("output").exists());
    assert_eq!(t.repo.resolve_tag("table").expect("tag"), outcome.hash);
}

#[test]
fn commit_data_rejects_reserved_names() {
    let t = TestRepo::new();
    let dir = t.scratch("raw");
    write_file(&dir, "job.json", "{}");
    let err = t.repo.commit_data(&dir, None).unwrap_err();
    assert!(matches!(err, CommitError::Descriptor(_)), "{err}");
    assert_eq!(t.object_count(), 0);
}

#[test]
fn invalid_tag_name_fails_before_staging() {
    let t = TestRepo::new();
    let work = t.scratch("job");
    write_file(&work, "data.txt", "hello");
    let err = t.repo.commit(&work, Some("bad/name")).unwrap_err();
    assert!(matches!(err, CommitError::Tag(_)), "{err}");
    assert_eq!(t.object_count(), 0);
}

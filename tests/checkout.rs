//! Checkout and development checkout against a real repository on disk.

mod common;

use common::{is_symlink, mode, write_descriptor, write_file, TestRepo};
use jobrepo::{CheckoutError, CommitOutcome};
use serde_json::json;
use std::fs;

/// Commit raw data `A` and a job `B` linking A's `data.txt` at `input/data.txt`.
fn data_and_consumer(t: &TestRepo) -> (CommitOutcome, CommitOutcome) {
    let raw = t.scratch("raw");
    write_file(&raw, "data.txt", "hello");
    let raw = t.repo.commit_data(&raw, Some("raw")).expect("commit data");

    let work = t.scratch("consumer");
    write_file(&work, "run.sh", "cat input/data.txt");
    write_descriptor(
        &work,
        json!({
            "dependencies": [{"item": raw.hash, "source": "data.txt", "destination": "input/data.txt"}],
            "commands": {"run": "sh run.sh"}
        }),
    );
    let consumer = t.repo.commit(&work, Some("consumer")).expect("commit consumer");
    (raw, consumer)
}

#[test]
fn checkout_links_dependencies_and_output() {
    let t = TestRepo::new();
    let (raw, consumer) = data_and_consumer(&t);
    let out = t.fresh_path("out");
    let outcome = t
        .repo
        .checkout(consumer.hash.as_str(), &out, false)
        .expect("checkout");
    assert_eq!(outcome.hash, consumer.hash);
    assert_eq!(outcome.links, 1);

    let link = out.join("input/data.txt");
    assert!(is_symlink(&link));
    let stored_data = t.repo.root().join(&raw.path).join("data.txt");
    assert_eq!(
        fs::canonicalize(&link).expect("resolve link"),
        fs::canonicalize(&stored_data).expect("resolve stored")
    );
    assert_eq!(fs::read_to_string(&link).expect("read through link"), "hello");

    let output = out.join("output");
    assert!(is_symlink(&output));
    assert_eq!(
        fs::read_link(&output).expect("read output link"),
        t.repo.root().join(&consumer.path).join("output")
    );

    assert_eq!(fs::read_to_string(out.join("run.sh")).expect("copied"), "cat input/data.txt");
    assert_eq!(mode(&out.join("run.sh")) & 0o222, 0);
    assert!(!out.join("job.json").exists());
    assert!(!out.join("metadata.json").exists());
}

#[test]
fn writes_through_output_link_land_in_store() {
    let t = TestRepo::new();
    let (_, consumer) = data_and_consumer(&t);
    let out = t.fresh_path("out");
    t.repo.checkout("consumer", &out, false).expect("checkout");
    fs::write(out.join("output/result.txt"), "42").expect("write result");
    let stored = t.repo.root().join(&consumer.path).join("output/result.txt");
    assert_eq!(fs::read_to_string(stored).expect("read stored result"), "42");
}

#[test]
fn unknown_reference_is_not_found() {
    let t = TestRepo::new();
    let out = t.fresh_path("out");
    let err = t.repo.checkout("nothing-here", &out, false).unwrap_err();
    assert!(matches!(err, CheckoutError::NotFound(_)), "{err}");
    assert!(!out.exists());
}

#[test]
fn non_empty_destination_requires_overwrite() {
    let t = TestRepo::new();
    let (_, consumer) = data_and_consumer(&t);
    let out = t.scratch("busy");
    write_file(&out, "old.txt", "stale");

    let err = t
        .repo
        .checkout(consumer.hash.as_str(), &out, false)
        .unwrap_err();
    assert!(matches!(err, CheckoutError::DestinationExists(_)), "{err}");
    assert!(out.join("old.txt").exists());

    t.repo
        .checkout(consumer.hash.as_str(), &out, true)
        .expect("overwrite checkout");
    assert!(!out.join("old.txt").exists());
    assert!(out.join("run.sh").exists());

    // A second overwrite clears read-only copies from the first.
    t.repo
        .checkout(consumer.hash.as_str(), &out, true)
        .expect("repeat overwrite");
}

#[test]
fn transitive_dependencies_are_linked_inside_expanded_directories() {
    let t = TestRepo::new();
    let (raw, consumer) = data_and_consumer(&t);

    let work = t.scratch("report");
    write_file(&work, "report.md", "# report");
    write_descriptor(
        &work,
        json!({"dependencies": [{"item": "#consumer", "destination": "upstream"}]}),
    );
    let report = t.repo.commit(&work, None).expect("commit report");

    let out = t.fresh_path("out");
    let outcome = t
        .repo
        .checkout(report.hash.as_str(), &out, false)
        .expect("checkout");
    assert_eq!(outcome.links, 2);

    let upstream = out.join("upstream");
    assert!(upstream.is_dir());
    assert!(!is_symlink(&upstream));
    assert!(is_symlink(&upstream.join("run.sh")));
    assert!(is_symlink(&upstream.join("output")));
    let nested = upstream.join("input/data.txt");
    assert!(is_symlink(&nested));
    assert_eq!(
        fs::canonicalize(&nested).expect("resolve nested"),
        fs::canonicalize(t.repo.root().join(&raw.path).join("data.txt")).expect("resolve stored")
    );
    assert_eq!(
        fs::read_to_string(upstream.join("run.sh")).expect("read linked file"),
        fs::read_to_string(t.repo.root().join(&consumer.path).join("run.sh")).expect("read stored")
    );
}

#[test]
fn source_through_dependency_destination_is_followed() {
    let t = TestRepo::new();
    let (raw, _) = data_and_consumer(&t);

    let work = t.scratch("reader");
    write_descriptor(
        &work,
        json!({"dependencies": [{"item": "consumer", "source": "input/data.txt", "destination": "copy.txt"}]}),
    );
    let reader = t.repo.commit(&work, None).expect("commit reader");
    let out = t.fresh_path("out");
    t.repo
        .checkout(reader.hash.as_str(), &out, false)
        .expect("checkout");
    assert_eq!(
        fs::read_link(out.join("copy.txt")).expect("read link"),
        t.repo.root().join(&raw.path).join("data.txt")
    );
}

#[test]
fn nested_destination_under_followed_source_is_kept() {
    let t = TestRepo::new();
    let table = t.scratch("table");
    write_file(&table, "rows.csv", "a,b");
    let table = t.repo.commit_data(&table, None).expect("commit table");
    let notes = t.scratch("notes");
    write_file(&notes, "notes.txt", "n");
    let notes = t.repo.commit_data(&notes, None).expect("commit notes");

    let work = t.scratch("prep");
    write_descriptor(
        &work,
        json!({"dependencies": [
            {"item": table.hash, "destination": "in"},
            {"item": notes.hash, "destination": "in/sub"}
        ]}),
    );
    let prep = t.repo.commit(&work, None).expect("commit prep");

    let work = t.scratch("reader");
    write_descriptor(
        &work,
        json!({"dependencies": [{"item": prep.hash, "source": "in", "destination": "x"}]}),
    );
    let reader = t.repo.commit(&work, None).expect("commit reader");

    let out = t.fresh_path("out");
    t.repo
        .checkout(reader.hash.as_str(), &out, false)
        .expect("checkout");
    assert!(is_symlink(&out.join("x/rows.csv")));
    let sub = out.join("x/sub");
    assert!(is_symlink(&sub));
    assert_eq!(
        fs::canonicalize(&sub).expect("resolve sub"),
        fs::canonicalize(t.repo.root().join(&notes.path)).expect("resolve stored")
    );
    assert_eq!(
        fs::read_to_string(sub.join("notes.txt")).expect("read through link"),
        "n"
    );
}

#[test]
fn dev_checkout_links_into_working_job_and_is_repeatable() {
    let t = TestRepo::new();
    let (raw, _) = data_and_consumer(&t);

    let work = t.scratch("dev");
    write_file(&work, "train.py", "fit()");
    write_descriptor(
        &work,
        json!({"dependencies": [{"item": "raw", "source": "data.txt", "destination": "data/in.txt"}]}),
    );
    let before = t.repo.commit(&work, None).expect("commit before dev checkout");

    let outcome = t.repo.dev_checkout(&work).expect("dev checkout");
    assert_eq!(outcome.links, 1);
    let link = work.join("data/in.txt");
    assert!(is_symlink(&link));
    assert_eq!(
        fs::read_link(&link).expect("read link"),
        t.repo.root().join(&raw.path).join("data.txt")
    );
    assert!(work.join("output").is_dir());

    t.repo.dev_checkout(&work).expect("repeat dev checkout");

    let after = t.repo.commit(&work, None).expect("commit after dev checkout");
    assert_eq!(before.hash, after.hash);
    assert!(!after.inserted);
}

#[test]
fn dev_checkout_refuses_to_replace_real_files() {
    let t = TestRepo::new();
    data_and_consumer(&t);
    let work = t.scratch("dev");
    write_file(&work, "in.txt", "local copy");
    write_descriptor(
        &work,
        json!({"dependencies": [{"item": "raw", "source": "data.txt", "destination": "in.txt"}]}),
    );
    let err = t.repo.dev_checkout(&work).unwrap_err();
    assert!(matches!(err, CheckoutError::DestinationExists(_)), "{err}");
    assert_eq!(
        fs::read_to_string(work.join("in.txt")).expect("read"),
        "local copy"
    );
}

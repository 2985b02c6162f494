//! Shared test infrastructure for integration tests.
#![allow(dead_code)]

use jobrepo::staging::restore_write;
use jobrepo::Repository;
use serde_json::Value;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A fresh repository plus scratch space, both inside one temp dir.
pub struct TestRepo {
    pub dir: TempDir,
    pub repo: Repository,
}

impl TestRepo {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let repo = Repository::init(&dir.path().join("repo")).expect("init repository");
        Self { dir, repo }
    }

    /// Empty scratch directory outside the repository.
    pub fn scratch(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join("scratch").join(name);
        fs::create_dir_all(&path).expect("create scratch dir");
        path
    }

    /// Path below the temp dir that does not exist yet.
    pub fn fresh_path(&self, name: &str) -> PathBuf {
        self.dir.path().join("fresh").join(name)
    }

    /// Number of jobs in the object store.
    pub fn object_count(&self) -> usize {
        self.repo.jobs().expect("list jobs").len()
    }

    /// Entries currently under `jobs/staging/`.
    pub fn staging_entries(&self) -> usize {
        fs::read_dir(self.repo.paths().staging_dir())
            .expect("read staging dir")
            .count()
    }
}

impl Drop for TestRepo {
    fn drop(&mut self) {
        // Stored jobs are read-only; TempDir cleanup needs write access back.
        let _ = restore_write(self.dir.path());
    }
}

pub fn write_file(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dir");
    }
    fs::write(&path, contents).expect("write file");
}

pub fn write_descriptor(root: &Path, descriptor: Value) {
    let text = serde_json::to_string_pretty(&descriptor).expect("serialize descriptor");
    write_file(root, "job.json", &text);
}

pub fn mode(path: &Path) -> u32 {
    fs::metadata(path).expect("stat").permissions().mode()
}

pub fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|meta| meta.file_type().is_symlink())
        .unwrap_or(false)
}

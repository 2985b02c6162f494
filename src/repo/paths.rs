//! Typed paths into a repository layout.
//!
//! Every component derives its locations from here so the layout is defined
//! once.
use crate::config::CONFIG_FILE;
use crate::hash::JobHash;
use crate::lock::LOCK_FILE;
use std::path::{Path, PathBuf};

/// Locations of the well-known directories and files under a repository root.
#[derive(Debug, Clone)]
pub struct RepoPaths {
    root: PathBuf,
}

impl RepoPaths {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Return the repository root used for path derivation.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Return the `repo.json` path.
    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// Return the `repo.lock` path.
    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    /// Return the `jobs/` directory path.
    pub fn jobs_dir(&self) -> PathBuf {
        self.root.join("jobs")
    }

    /// Return the `jobs/by_hash/` object store path.
    pub fn by_hash_dir(&self) -> PathBuf {
        self.jobs_dir().join("by_hash")
    }

    /// Return the `jobs/tags/` tag index path.
    pub fn tags_dir(&self) -> PathBuf {
        self.jobs_dir().join("tags")
    }

    /// Return the `jobs/staging/` directory path.
    pub fn staging_dir(&self) -> PathBuf {
        self.jobs_dir().join("staging")
    }

    /// Repository-relative location of a stored job.
    pub fn job_rel_path(hash: &JobHash) -> PathBuf {
        Path::new("jobs").join("by_hash").join(hash.as_str())
    }

    /// Directories `init` creates.
    pub fn layout_dirs(&self) -> [PathBuf; 4] {
        [
            self.jobs_dir(),
            self.by_hash_dir(),
            self.tags_dir(),
            self.staging_dir(),
        ]
    }
}

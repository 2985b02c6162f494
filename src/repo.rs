//! Repository facade tying the store, tag index, lock and staging area
//! together.
//!
//! Mutations (`commit`, `commit_data`, `set_tag`) run under the repository
//! lock. Reads never take it: stored jobs are immutable and tag entries are
//! replaced by rename.
use crate::config::{default_config, load_config, validate_config, write_config, RepoConfig};
use crate::descriptor::{JobMetadata, StoredDescriptor};
use crate::error::{DependencyError, FsError, LockError, RepoError, StoreError, TagError};
use crate::hash::JobHash;
use crate::hasher::ContentHasher;
use crate::lock::{LockManager, LockOwner, LockState};
use crate::resolver::Resolver;
use crate::staging::StagingArea;
use crate::store::ObjectStore;
use crate::tags::TagIndex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod checkout;
mod commit;
mod paths;

pub use checkout::{CheckoutOutcome, DevCheckoutOutcome};
pub use commit::CommitOutcome;
pub use paths::RepoPaths;

/// An opened repository.
#[derive(Debug, Clone)]
pub struct Repository {
    paths: RepoPaths,
    config: RepoConfig,
    store: ObjectStore,
    tags: TagIndex,
    locks: LockManager,
    staging: StagingArea,
    hasher: ContentHasher,
    lock_timeout: Duration,
}

/// Everything recorded about one stored job.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub hash: JobHash,
    pub path: PathBuf,
    pub descriptor: StoredDescriptor,
    pub metadata: Option<JobMetadata>,
    pub tags: Vec<String>,
}

impl Repository {
    /// Create an empty repository at `path`, creating the directory if needed.
    pub fn init(path: &Path) -> Result<Self, RepoError> {
        fs::create_dir_all(path).map_err(|source| RepoError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let root = canonical_root(path)?;
        let paths = RepoPaths::new(root.clone());
        if paths.config_path().exists() || paths.jobs_dir().exists() {
            return Err(RepoError::AlreadyExists(root));
        }
        for dir in paths.layout_dirs() {
            fs::create_dir_all(&dir).map_err(|source| RepoError::Io { path: dir, source })?;
        }
        let config = default_config();
        write_config(&root, &config)?;
        tracing::info!(root = %root.display(), "initialized repository");
        Ok(Self::assemble(paths, config))
    }

    /// Open an existing repository rooted exactly at `path`.
    pub fn open(path: &Path) -> Result<Self, RepoError> {
        let root = match canonical_root(path) {
            Err(RepoError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
                return Err(RepoError::NotARepository(path.to_path_buf()))
            }
            other => other?,
        };
        let paths = RepoPaths::new(root.clone());
        if !paths.config_path().is_file() || !paths.by_hash_dir().is_dir() {
            return Err(RepoError::NotARepository(root));
        }
        let config = load_config(&root)?;
        validate_config(&config)?;
        for dir in [paths.tags_dir(), paths.staging_dir()] {
            fs::create_dir_all(&dir).map_err(|source| RepoError::Io { path: dir, source })?;
        }
        Ok(Self::assemble(paths, config))
    }

    fn assemble(paths: RepoPaths, config: RepoConfig) -> Self {
        Self {
            store: ObjectStore::new(paths.by_hash_dir()),
            tags: TagIndex::new(paths.tags_dir()),
            locks: LockManager::new(paths.lock_path(), config.stale_lock_after()),
            staging: StagingArea::new(paths.staging_dir()),
            hasher: ContentHasher::new(config.hash_threads),
            lock_timeout: config.lock_timeout(),
            config,
            paths,
        }
    }

    /// Override the configured lock timeout for this handle.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn root(&self) -> &Path {
        self.paths.root()
    }

    pub fn paths(&self) -> &RepoPaths {
        &self.paths
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    pub(crate) fn resolver(&self) -> Resolver<'_, ObjectStore, TagIndex> {
        Resolver::new(&self.store, &self.tags)
    }

    /// Stored job hashes, sorted.
    pub fn jobs(&self) -> Result<Vec<JobHash>, StoreError> {
        self.store.list()
    }

    /// All tag bindings, sorted by name.
    pub fn tags(&self) -> Result<BTreeMap<String, JobHash>, TagError> {
        self.tags.list()
    }

    /// Resolve a job reference the way dependency items are resolved.
    pub fn resolve(&self, reference: &str) -> Result<JobHash, DependencyError> {
        self.resolver().resolve_reference(reference)
    }

    pub fn resolve_tag(&self, name: &str) -> Result<JobHash, TagError> {
        self.tags.resolve(name)
    }

    /// Point `name` at the job `reference` resolves to.
    pub fn set_tag(
        &self,
        name: &str,
        reference: &str,
        overwrite: bool,
    ) -> Result<Option<JobHash>, TagError> {
        TagIndex::validate_name(name)?;
        let hash = match self.resolve(reference) {
            Ok(hash) => hash,
            Err(err) => {
                return Err(match JobHash::parse(reference) {
                    Some(hash) if err.is_missing() => TagError::Dangling {
                        name: name.to_string(),
                        hash,
                    },
                    _ => TagError::Reference(Box::new(err)),
                })
            }
        };
        let lock = self.locks.acquire(self.lock_timeout)?;
        if !self.store.contains(&hash) {
            return Err(TagError::Dangling {
                name: name.to_string(),
                hash,
            });
        }
        let previous = self.tags.set(name, &hash, overwrite)?;
        lock.release()?;
        tracing::info!(tag = name, hash = %hash, "tag set");
        Ok(previous)
    }

    /// Descriptor, metadata and tags of a stored job.
    pub fn job_info(&self, reference: &str) -> Result<JobInfo, DependencyError> {
        let hash = self.resolve(reference)?;
        Ok(JobInfo {
            path: RepoPaths::job_rel_path(&hash),
            descriptor: self.store.descriptor(&hash)?,
            metadata: self.store.metadata(&hash)?,
            tags: self.tags.names_for(&hash)?,
            hash,
        })
    }

    pub fn lock_state(&self) -> LockState {
        self.locks.state()
    }

    /// Remove the repository lock regardless of its holder.
    pub fn break_lock(&self) -> Result<Option<LockOwner>, LockError> {
        self.locks.break_lock()
    }

    /// Remove staging directories left by dead processes.
    pub fn sweep_staging(&self) -> Result<Vec<PathBuf>, FsError> {
        self.staging.sweep()
    }
}

fn canonical_root(path: &Path) -> Result<PathBuf, RepoError> {
    path.canonicalize().map_err(|source| RepoError::Io {
        path: path.to_path_buf(),
        source,
    })
}

//! Error taxonomy for repository operations.
//!
//! Each component reports its own enum; `CommitError` and `CheckoutError`
//! wrap them transparently so callers can match on the original failure.
use crate::hash::JobHash;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Filesystem failure tied to the action and path it concerns.
#[derive(Debug, Error)]
#[error("{action} {}: {source}", .path.display())]
pub struct FsError {
    pub action: &'static str,
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl FsError {
    /// Adapter for `map_err` at a call site.
    pub fn at(action: &'static str, path: &Path) -> impl FnOnce(io::Error) -> FsError {
        let path = path.to_path_buf();
        move |source| FsError {
            action,
            path,
            source,
        }
    }
}

/// Failures while enumerating or hashing a tree.
#[derive(Debug, Error)]
pub enum HashError {
    #[error("cannot read {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unsupported file type at {}", .path.display())]
    UnsupportedEntry { path: PathBuf },
    #[error("invalid ignore pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Failures reading the object store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {0} is not in the store")]
    NotFound(JobHash),
    #[error("stored job {hash} is corrupt: {reason}")]
    Corrupt { hash: JobHash, reason: String },
    #[error("store I/O at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failures reading or updating the tag index.
#[derive(Debug, Error)]
pub enum TagError {
    #[error("unknown tag {0:?}")]
    Unknown(String),
    #[error("tag {name:?} already points at {current}; overwrite was not requested")]
    Exists { name: String, current: JobHash },
    #[error("invalid tag name {0:?}")]
    InvalidName(String),
    #[error("tag {name:?} would point at {hash}, which is not in the store")]
    Dangling { name: String, hash: JobHash },
    #[error("tag {name:?} holds {content:?}, which is not a job hash")]
    Corrupt { name: String, content: String },
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Reference(#[from] Box<DependencyError>),
    #[error("tag I/O at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failures resolving or validating a dependency graph.
#[derive(Debug, Error)]
pub enum DependencyError {
    #[error("missing dependency {reference:?}")]
    Missing { reference: String },
    #[error("path {} does not exist in job {job}", .path.display())]
    MissingSource { job: JobHash, path: PathBuf },
    #[error("dependency cycle: {}", format_cycle(.cycle))]
    Cycle { cycle: Vec<JobHash> },
    #[error("destination conflict at {}", .destination.display())]
    DestinationConflict { destination: PathBuf },
    #[error(transparent)]
    Tag(#[from] TagError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DependencyError {
    /// True for both unresolved references and absent source paths.
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing { .. } | Self::MissingSource { .. })
    }
}

fn format_cycle(cycle: &[JobHash]) -> String {
    cycle
        .iter()
        .map(|hash| hash.short())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Repository lock contention.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("repository is busy: lock held by {owner} (waited {waited_ms} ms)")]
    Busy { owner: String, waited_ms: u128 },
    #[error("repository lock {} is stale (held by {owner}); break it explicitly to recover", .path.display())]
    Stale { path: PathBuf, owner: String },
    #[error("lock I/O at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Malformed or unreadable job descriptors.
#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("read descriptor {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parse descriptor {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("serialize descriptor: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("invalid descriptor: {0}")]
    Invalid(String),
}

/// Failures of the commit pipeline. The store and tag index are unchanged
/// whenever one of these is returned.
#[derive(Debug, Error)]
pub enum CommitError {
    #[error(transparent)]
    Hash(#[from] HashError),
    #[error(transparent)]
    Dependency(#[from] DependencyError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Tag(#[from] TagError),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Fs(#[from] FsError),
}

/// Failures materializing a job on disk.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("job {0:?} not found")]
    NotFound(String),
    #[error("destination {} exists and is not empty", .0.display())]
    DestinationExists(PathBuf),
    #[error("cannot link {} -> {}: {source}", .link.display(), .target.display())]
    Symlink {
        link: PathBuf,
        target: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Dependency(#[from] DependencyError),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Scan(#[from] HashError),
    #[error(transparent)]
    Fs(#[from] FsError),
}

/// Repository configuration problems.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parse config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Failures creating or opening a repository.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("{} already contains a repository", .0.display())]
    AlreadyExists(PathBuf),
    #[error("{} is not a repository", .0.display())]
    NotARepository(PathBuf),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("repository I/O at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

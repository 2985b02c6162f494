//! Local, content-addressed repository for research job artifacts.
//!
//! Jobs are directory trees identified by a hash of their content and
//! resolved dependencies. They are stored once under `jobs/by_hash/`, named
//! through mutable tags, and reconstructed with copies for their own files and
//! symlinks for their outputs and dependencies.
pub mod config;
pub mod descriptor;
pub mod error;
pub mod hash;
pub mod hasher;
pub mod lock;
pub mod repo;
pub mod resolver;
pub mod staging;
pub mod store;
pub mod tags;
pub mod tree;
pub mod util;

pub use error::{
    CheckoutError, CommitError, ConfigError, DependencyError, DescriptorError, FsError, HashError,
    LockError, RepoError, StoreError, TagError,
};
pub use hash::JobHash;
pub use repo::{CheckoutOutcome, CommitOutcome, DevCheckoutOutcome, JobInfo, Repository};

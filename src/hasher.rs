//! Deterministic content hashing for job trees.
//!
//! File contents are hashed in parallel; the records are then folded in the
//! sorted entry order, so the digest does not depend on thread scheduling or
//! directory iteration order.
use crate::descriptor::StoredDescriptor;
use crate::error::{DescriptorError, HashError};
use crate::hash::JobHash;
use crate::tree::{scan_tree, EntryKind, IgnoreRules, TreeEntry};
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

const READ_CHUNK: usize = 1 << 16;

/// Digest of a tree plus counters for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeDigest {
    pub digest: String,
    pub entries: usize,
    pub files: usize,
    pub bytes: u64,
}

/// Content hasher with an optional dedicated thread budget.
#[derive(Debug, Clone, Default)]
pub struct ContentHasher {
    threads: usize,
}

impl ContentHasher {
    /// `threads == 0` uses the global rayon pool.
    pub fn new(threads: usize) -> Self {
        Self { threads }
    }

    /// Hash everything under `root` that the rules keep.
    pub fn hash_tree(&self, root: &Path, rules: &IgnoreRules) -> Result<TreeDigest, HashError> {
        let entries = scan_tree(root, rules)?;
        self.hash_entries(root, &entries)
    }

    /// Hash pre-scanned entries; `entries` must be in `scan_tree` order.
    pub fn hash_entries(&self, root: &Path, entries: &[TreeEntry]) -> Result<TreeDigest, HashError> {
        if self.threads == 0 {
            return fold_entries(root, entries);
        }
        match rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()
        {
            Ok(pool) => pool.install(|| fold_entries(root, entries)),
            Err(err) => {
                tracing::warn!(threads = self.threads, error = %err, "hash pool unavailable; using global pool");
                fold_entries(root, entries)
            }
        }
    }
}

fn fold_entries(root: &Path, entries: &[TreeEntry]) -> Result<TreeDigest, HashError> {
    let contents = entries
        .par_iter()
        .map(|entry| match entry.kind {
            EntryKind::File { .. } => hash_file(&root.join(&entry.rel_path)).map(Some),
            _ => Ok(None),
        })
        .collect::<Result<Vec<_>, HashError>>()?;

    let mut hasher = Sha256::new();
    let mut files = 0;
    let mut bytes = 0;
    for (entry, content) in entries.iter().zip(contents) {
        let (kind, mode): (&[u8], &[u8]) = match &entry.kind {
            EntryKind::Dir => (b"dir", b"-"),
            EntryKind::File { executable: true } => (b"file", b"x"),
            EntryKind::File { executable: false } => (b"file", b"-"),
            EntryKind::Symlink { .. } => (b"symlink", b"-"),
        };
        hasher.update(kind);
        hasher.update(b"\0");
        hasher.update(entry.rel_path.as_os_str().as_bytes());
        hasher.update(b"\0");
        hasher.update(mode);
        hasher.update(b"\0");
        match (&entry.kind, content) {
            (EntryKind::Symlink { target }, _) => hasher.update(target.as_os_str().as_bytes()),
            (_, Some((digest, size))) => {
                files += 1;
                bytes += size;
                hasher.update(digest.as_bytes());
            }
            _ => {}
        }
        hasher.update(b"\n");
    }
    Ok(TreeDigest {
        digest: format!("{:x}", hasher.finalize()),
        entries: entries.len(),
        files,
        bytes,
    })
}

/// Hex SHA-256 of a file's content and its size.
pub fn hash_file(path: &Path) -> Result<(String, u64), HashError> {
    let unreadable = |source: std::io::Error| HashError::Unreadable {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(unreadable)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_CHUNK];
    let mut size = 0u64;
    loop {
        let read = file.read(&mut buf).map_err(unreadable)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
        size += read as u64;
    }
    Ok((format!("{:x}", hasher.finalize()), size))
}

/// Combine a tree digest with the resolved descriptor into the job identity.
pub fn job_hash(tree: &TreeDigest, descriptor: &StoredDescriptor) -> Result<JobHash, DescriptorError> {
    let canonical = descriptor.canonical_bytes()?;
    let mut hasher = Sha256::new();
    hasher.update(b"tree\0");
    hasher.update(tree.digest.as_bytes());
    hasher.update(b"\n");
    hasher.update(b"descriptor\0");
    hasher.update(&canonical);
    hasher.update(b"\n");
    Ok(JobHash::from_digest(hasher.finalize()))
}

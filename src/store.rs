//! Immutable, hash-keyed object store.
//!
//! Entries appear only through a same-filesystem rename from staging, so a
//! directory under `by_hash/` is either absent or complete.
use crate::descriptor::{JobMetadata, StoredDescriptor, DESCRIPTOR_FILE, METADATA_FILE};
use crate::error::StoreError;
use crate::hash::JobHash;
use crate::staging::set_readonly;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Result of moving a staged job into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyPresent,
}

#[derive(Debug, Clone)]
pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of a job, whether or not it is stored.
    pub fn job_path(&self, hash: &JobHash) -> PathBuf {
        self.root.join(hash.as_str())
    }

    pub fn contains(&self, hash: &JobHash) -> bool {
        self.job_path(hash).is_dir()
    }

    /// Stored hashes in sorted order. Stray entries are skipped.
    pub fn list(&self) -> Result<Vec<JobHash>, StoreError> {
        let io_err = |source: std::io::Error| StoreError::Io {
            path: self.root.clone(),
            source,
        };
        let mut hashes = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            let Some(hash) = entry.file_name().to_str().and_then(JobHash::parse) else {
                continue;
            };
            if entry.path().is_dir() {
                hashes.push(hash);
            }
        }
        hashes.sort();
        Ok(hashes)
    }

    /// Resolved descriptor of a stored job.
    pub fn descriptor(&self, hash: &JobHash) -> Result<StoredDescriptor, StoreError> {
        if !self.contains(hash) {
            return Err(StoreError::NotFound(hash.clone()));
        }
        StoredDescriptor::load(&self.job_path(hash).join(DESCRIPTOR_FILE)).map_err(|err| {
            StoreError::Corrupt {
                hash: hash.clone(),
                reason: err.to_string(),
            }
        })
    }

    /// Commit metadata, or `None` for jobs stored without it.
    pub fn metadata(&self, hash: &JobHash) -> Result<Option<JobMetadata>, StoreError> {
        if !self.contains(hash) {
            return Err(StoreError::NotFound(hash.clone()));
        }
        let path = self.job_path(hash).join(METADATA_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|err| StoreError::Corrupt {
                hash: hash.clone(),
                reason: format!("metadata.json: {err}"),
            })
    }

    /// Rename a fully prepared staging directory to its final location.
    ///
    /// Callers hold the repository lock. The stored root is made read-only
    /// afterwards on a best-effort basis.
    pub fn insert(&self, staged: &Path, hash: &JobHash) -> Result<InsertOutcome, StoreError> {
        let dest = self.job_path(hash);
        if dest.exists() {
            return Ok(InsertOutcome::AlreadyPresent);
        }
        match fs::rename(staged, &dest) {
            Ok(()) => {}
            // Renaming onto a non-empty directory fails; someone got there first.
            Err(_) if dest.is_dir() => return Ok(InsertOutcome::AlreadyPresent),
            Err(source) => return Err(StoreError::Io { path: dest, source }),
        }
        if let Err(err) = set_readonly(&dest) {
            tracing::warn!(path = %dest.display(), error = %err, "failed to write-protect stored job root");
        }
        Ok(InsertOutcome::Inserted)
    }

    /// Undo a fresh insertion. Only used when tagging fails within the same
    /// locked commit, before anyone else can have observed the job.
    pub(crate) fn remove_fresh(&self, hash: &JobHash) -> Result<(), StoreError> {
        let path = self.job_path(hash);
        crate::staging::restore_write(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        fs::remove_dir_all(&path).map_err(|source| StoreError::Io { path, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(byte: char) -> JobHash {
        JobHash::parse(&byte.to_string().repeat(64)).unwrap()
    }

    fn staged_job(parent: &Path, name: &str) -> PathBuf {
        let dir = parent.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("data.txt"), "hello").unwrap();
        let descriptor = StoredDescriptor::data().to_pretty_json().unwrap();
        fs::write(dir.join(DESCRIPTOR_FILE), descriptor).unwrap();
        dir
    }

    #[test]
    fn insert_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(dir.path().join("by_hash"));
        fs::create_dir(store.root()).unwrap();
        let staged = staged_job(dir.path(), "stage");

        assert_eq!(store.insert(&staged, &hash('a')).unwrap(), InsertOutcome::Inserted);
        assert!(!staged.exists());
        assert!(store.contains(&hash('a')));
        assert_eq!(store.list().unwrap(), vec![hash('a')]);
        assert_eq!(store.descriptor(&hash('a')).unwrap(), StoredDescriptor::data());
        assert_eq!(store.metadata(&hash('a')).unwrap(), None);
        store.remove_fresh(&hash('a')).unwrap();
    }

    #[test]
    fn second_insert_reports_already_present() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(dir.path().join("by_hash"));
        fs::create_dir(store.root()).unwrap();
        let first = staged_job(dir.path(), "one");
        let second = staged_job(dir.path(), "two");
        store.insert(&first, &hash('b')).unwrap();
        assert_eq!(
            store.insert(&second, &hash('b')).unwrap(),
            InsertOutcome::AlreadyPresent
        );
        assert!(second.exists());
        store.remove_fresh(&hash('b')).unwrap();
    }

    #[test]
    fn missing_and_corrupt_entries_are_distinguished() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(dir.path().to_path_buf());
        assert!(matches!(
            store.descriptor(&hash('c')),
            Err(StoreError::NotFound(_))
        ));
        fs::create_dir(store.job_path(&hash('c'))).unwrap();
        fs::write(store.job_path(&hash('c')).join(DESCRIPTOR_FILE), "{").unwrap();
        assert!(matches!(
            store.descriptor(&hash('c')),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn list_ignores_stray_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(dir.path().to_path_buf());
        fs::create_dir(dir.path().join("not-a-hash")).unwrap();
        fs::write(dir.path().join("d".repeat(64)), "file, not dir").unwrap();
        assert!(store.list().unwrap().is_empty());
    }
}

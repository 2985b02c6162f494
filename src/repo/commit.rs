//! Commit pipeline: stage, hash, resolve, lock, insert, tag.
//!
//! Everything up to the rename into `by_hash/` happens in a private staging
//! directory, so a failure at any earlier point leaves the store and tag
//! index untouched. A tag failure right after a fresh insert removes the new
//! job again before the lock is released.
use super::{RepoPaths, Repository};
use crate::descriptor::{JobDescriptor, JobMetadata, StoredDescriptor, DESCRIPTOR_FILE, METADATA_FILE};
use crate::error::{CommitError, DescriptorError, FsError};
use crate::hash::JobHash;
use crate::hasher::job_hash;
use crate::staging::{copy_entries, restore_write, set_readonly, write_protect};
use crate::store::InsertOutcome;
use crate::tags::TagIndex;
use crate::tree::{scan_tree, EntryKind, IgnoreRules, TreeEntry};
use crate::util::{display_path, now_epoch_ms};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// What a successful commit produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitOutcome {
    pub hash: JobHash,
    /// Location of the stored job relative to the repository root.
    pub path: PathBuf,
    /// False when identical content was already stored.
    pub inserted: bool,
    pub tag: Option<String>,
}

/// A working tree ready to be staged.
struct Candidate {
    source_root: PathBuf,
    entries: Vec<TreeEntry>,
    descriptor: JobDescriptor,
}

impl Repository {
    /// Commit the working job at `working`, optionally tagging the result.
    pub fn commit(&self, working: &Path, tag: Option<&str>) -> Result<CommitOutcome, CommitError> {
        let descriptor = JobDescriptor::load(working)?;
        let mut rules = IgnoreRules::new(working, &descriptor.commit.ignore)?;
        for excluded in descriptor.implicit_exclusions() {
            rules.exclude(excluded);
        }
        let mut entries = scan_tree(working, &rules)?;
        prune_destination_parents(&mut entries, &descriptor);
        self.commit_candidate(
            Candidate {
                source_root: working.to_path_buf(),
                entries,
                descriptor,
            },
            tag,
        )
    }

    /// Commit a raw data file or directory: no dependencies, commands or
    /// output directory.
    pub fn commit_data(&self, data: &Path, tag: Option<&str>) -> Result<CommitOutcome, CommitError> {
        let meta = fs::symlink_metadata(data).map_err(FsError::at("read", data))?;
        let candidate = if meta.is_dir() {
            let entries = scan_tree(data, &IgnoreRules::none())?;
            if let Some(reserved) = entries.iter().find(|entry| {
                entry.rel_path == Path::new(DESCRIPTOR_FILE)
                    || entry.rel_path == Path::new(METADATA_FILE)
            }) {
                return Err(DescriptorError::Invalid(format!(
                    "data directory contains reserved name {}",
                    reserved.rel_path.display()
                ))
                .into());
            }
            Candidate {
                source_root: data.to_path_buf(),
                entries,
                descriptor: JobDescriptor::data(),
            }
        } else if meta.is_file() {
            let (Some(parent), Some(name)) = (data.parent(), data.file_name()) else {
                return Err(DescriptorError::Invalid(format!(
                    "cannot commit {} as data",
                    data.display()
                ))
                .into());
            };
            if name == DESCRIPTOR_FILE || name == METADATA_FILE {
                return Err(DescriptorError::Invalid(format!(
                    "data file uses reserved name {}",
                    Path::new(name).display()
                ))
                .into());
            }
            Candidate {
                source_root: parent.to_path_buf(),
                entries: vec![TreeEntry {
                    rel_path: PathBuf::from(name),
                    kind: EntryKind::File {
                        executable: meta.permissions().mode() & 0o111 != 0,
                    },
                }],
                descriptor: JobDescriptor::data(),
            }
        } else {
            return Err(DescriptorError::Invalid(format!(
                "{} is neither a file nor a directory",
                data.display()
            ))
            .into());
        };
        self.commit_candidate(candidate, tag)
    }

    fn commit_candidate(
        &self,
        candidate: Candidate,
        tag: Option<&str>,
    ) -> Result<CommitOutcome, CommitError> {
        let started = Instant::now();
        if let Some(name) = tag {
            TagIndex::validate_name(name)?;
        }
        if let Err(err) = self.staging.sweep() {
            tracing::warn!(error = %err, "staging sweep failed");
        }

        let staged = self.staging.create()?;
        copy_entries(&candidate.source_root, &candidate.entries, staged.path())?;
        let tree = self.hasher.hash_tree(staged.path(), &IgnoreRules::none())?;
        tracing::debug!(
            source = %candidate.source_root.display(),
            staged = %display_path(staged.path(), Some(self.root())),
            entries = tree.entries,
            "staged working tree"
        );

        let resolver = self.resolver();
        let declared = &candidate.descriptor.dependencies;
        // Fail before waiting on the lock; re-validated once it is held.
        resolver.resolve_dependencies(declared)?;

        let lock = self.locks.acquire(self.lock_timeout)?;
        let resolved = resolver.resolve_dependencies(declared)?;
        let stored = candidate.descriptor.to_stored(resolved);
        let hash = job_hash(&tree, &stored)?;
        resolver.check_acyclic(Some(&hash), &stored.dependencies)?;

        let inserted = if self.store.contains(&hash) {
            tracing::debug!(hash = %hash, "identical job already stored");
            false
        } else {
            self.insert_staged(staged.path(), &hash, &stored, &candidate)?
        };

        if let Some(name) = tag {
            if let Err(err) = self.tags.set(name, &hash, true) {
                if inserted {
                    if let Err(undo) = self.store.remove_fresh(&hash) {
                        tracing::warn!(hash = %hash, error = %undo, "failed to roll back insert");
                    }
                }
                return Err(err.into());
            }
        }
        lock.release()?;

        tracing::info!(
            hash = %hash,
            inserted,
            files = tree.files,
            bytes = tree.bytes,
            elapsed_ms = started.elapsed().as_millis(),
            "commit finished"
        );
        Ok(CommitOutcome {
            path: RepoPaths::job_rel_path(&hash),
            hash,
            inserted,
            tag: tag.map(str::to_string),
        })
    }

    /// Finish the staged job and rename it into the store. Returns whether
    /// this call inserted it.
    fn insert_staged(
        &self,
        staged: &Path,
        hash: &JobHash,
        stored: &StoredDescriptor,
        candidate: &Candidate,
    ) -> Result<bool, CommitError> {
        let descriptor_path = staged.join(DESCRIPTOR_FILE);
        fs::write(&descriptor_path, stored.to_pretty_json()?)
            .map_err(FsError::at("write", &descriptor_path))?;

        let metadata = JobMetadata {
            committed_at_epoch_ms: now_epoch_ms(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            references: candidate
                .descriptor
                .dependencies
                .iter()
                .map(|dep| (dep.destination.display().to_string(), dep.item.clone()))
                .collect::<BTreeMap<_, _>>(),
        };
        let metadata_path = staged.join(METADATA_FILE);
        let metadata_bytes = serde_json::to_vec_pretty(&metadata).map_err(DescriptorError::Serialize)?;
        fs::write(&metadata_path, metadata_bytes).map_err(FsError::at("write", &metadata_path))?;

        if let Some(output) = &stored.output {
            let output_dir = staged.join(output);
            fs::create_dir_all(&output_dir).map_err(FsError::at("create", &output_dir))?;
        }

        let protected = write_protect(staged, &candidate.entries, stored.output.as_deref())
            .and_then(|()| {
                for path in [&descriptor_path, &metadata_path] {
                    set_readonly(path).map_err(FsError::at("write-protect", path))?;
                }
                Ok(())
            });
        let outcome = protected
            .map_err(CommitError::from)
            .and_then(|()| self.store.insert(staged, hash).map_err(CommitError::from));
        match outcome {
            Ok(InsertOutcome::Inserted) => Ok(true),
            Ok(InsertOutcome::AlreadyPresent) => {
                release_staged(staged);
                Ok(false)
            }
            Err(err) => {
                release_staged(staged);
                Err(err)
            }
        }
    }
}

/// Drop directories that hold nothing but dependency destinations, such as
/// those a development checkout creates for its links.
fn prune_destination_parents(entries: &mut Vec<TreeEntry>, descriptor: &JobDescriptor) {
    let mut keep = vec![true; entries.len()];
    for (index, entry) in entries.iter().enumerate().rev() {
        if entry.kind != EntryKind::Dir {
            continue;
        }
        let holds_destination = descriptor
            .dependencies
            .iter()
            .any(|dep| dep.destination.starts_with(&entry.rel_path));
        let has_content = entries[index + 1..]
            .iter()
            .zip(&keep[index + 1..])
            .any(|(later, kept)| *kept && later.rel_path.starts_with(&entry.rel_path));
        if holds_destination && !has_content {
            keep[index] = false;
        }
    }
    let mut flags = keep.into_iter();
    entries.retain(|_| flags.next().unwrap_or(true));
}

/// Make a staging directory removable again after write protection.
fn release_staged(staged: &Path) {
    if let Err(err) = restore_write(staged) {
        tracing::warn!(path = %staged.display(), error = %err, "failed to restore write access on staging dir");
    }
}

//! Reconstructing jobs on disk.
//!
//! A checkout copies the job's own files, links its output directory back
//! into the store and links every dependency of the transitive closure.
//! Dependencies are never copied. Failures are reported as they happen; links
//! already created are left in place.
use super::Repository;
use crate::descriptor::{JobDescriptor, DESCRIPTOR_FILE, METADATA_FILE};
use crate::error::{CheckoutError, DependencyError, FsError};
use crate::hash::JobHash;
use crate::resolver::Link;
use crate::staging::{copy_entries, restore_write};
use crate::store::ObjectStore;
use crate::tree::{scan_tree, IgnoreRules};
use crate::util::under_root;
use serde::Serialize;
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::symlink;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutOutcome {
    pub hash: JobHash,
    pub destination: PathBuf,
    /// Entries copied from the stored job.
    pub copied: usize,
    /// Dependency links in the materialized closure.
    pub links: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DevCheckoutOutcome {
    pub working: PathBuf,
    pub links: usize,
}

impl Repository {
    /// Materialize a stored job and its dependency closure at `destination`.
    pub fn checkout(
        &self,
        reference: &str,
        destination: &Path,
        overwrite: bool,
    ) -> Result<CheckoutOutcome, CheckoutError> {
        let started = Instant::now();
        let hash = self.resolve(reference).map_err(|err| {
            if err.is_missing() {
                CheckoutError::NotFound(reference.to_string())
            } else {
                err.into()
            }
        })?;
        let stored = self.store.descriptor(&hash)?;
        let resolver = self.resolver();
        let links = resolver.closure(&stored.dependencies)?;
        prepare_destination(destination, overwrite)?;

        let job_root = self.store.job_path(&hash);
        let mut rules = IgnoreRules::none();
        rules.exclude(DESCRIPTOR_FILE);
        rules.exclude(METADATA_FILE);
        if let Some(output) = &stored.output {
            rules.exclude(output.clone());
        }
        let entries = scan_tree(&job_root, &rules)?;
        copy_entries(&job_root, &entries, destination)?;

        let materializer = Materializer {
            base: destination,
            store: &self.store,
            links: &links,
            replace_links: false,
        };
        if let Some(output) = &stored.output {
            materializer.link(&job_root.join(output), &destination.join(output))?;
        }
        materializer.place_all()?;

        tracing::info!(
            hash = %hash,
            destination = %destination.display(),
            copied = entries.len(),
            links = links.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "checkout finished"
        );
        Ok(CheckoutOutcome {
            hash,
            destination: destination.to_path_buf(),
            copied: entries.len(),
            links: links.len(),
        })
    }

    /// Link the declared dependencies of an uncommitted working job into
    /// place, replacing links left by an earlier run.
    pub fn dev_checkout(&self, working: &Path) -> Result<DevCheckoutOutcome, CheckoutError> {
        let descriptor = JobDescriptor::load(working)?;
        let resolver = self.resolver();
        let resolved = resolver.resolve_dependencies(&descriptor.dependencies)?;
        let links = resolver.closure(&resolved)?;
        if let Some(output) = &descriptor.output {
            let output_dir = working.join(output);
            fs::create_dir_all(&output_dir).map_err(FsError::at("create", &output_dir))?;
        }
        Materializer {
            base: working,
            store: &self.store,
            links: &links,
            replace_links: true,
        }
        .place_all()?;
        tracing::info!(working = %working.display(), links = links.len(), "dev checkout finished");
        Ok(DevCheckoutOutcome {
            working: working.to_path_buf(),
            links: links.len(),
        })
    }
}

/// Create `destination` or make sure it may be filled.
fn prepare_destination(destination: &Path, overwrite: bool) -> Result<(), CheckoutError> {
    let meta = match fs::symlink_metadata(destination) {
        Ok(meta) => meta,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            fs::create_dir_all(destination).map_err(FsError::at("create", destination))?;
            return Ok(());
        }
        Err(source) => return Err(FsError::at("inspect", destination)(source).into()),
    };
    if !meta.is_dir() {
        return Err(CheckoutError::DestinationExists(destination.to_path_buf()));
    }
    let mut children = fs::read_dir(destination)
        .map_err(FsError::at("read", destination))?
        .peekable();
    if children.peek().is_none() {
        return Ok(());
    }
    if !overwrite {
        return Err(CheckoutError::DestinationExists(destination.to_path_buf()));
    }
    for child in children {
        let child = child.map_err(FsError::at("read", destination))?;
        let path = child.path();
        let is_dir = child
            .file_type()
            .map_err(FsError::at("inspect", &path))?
            .is_dir();
        let removed = if is_dir {
            restore_write(&path).and_then(|()| fs::remove_dir_all(&path))
        } else {
            fs::remove_file(&path)
        };
        removed.map_err(FsError::at("remove", &path))?;
    }
    tracing::debug!(destination = %destination.display(), "cleared destination for overwrite");
    Ok(())
}

/// Places closure links below `base`.
///
/// A link with other links nested inside it becomes a real directory whose
/// entries are linked one by one, recursively, so nested links never write
/// into the store.
struct Materializer<'a> {
    base: &'a Path,
    store: &'a ObjectStore,
    links: &'a [Link],
    /// Replace existing symlinks and reuse existing directories.
    replace_links: bool,
}

impl<'a> Materializer<'a> {
    fn place_all(&self) -> Result<(), CheckoutError> {
        for link in self.links {
            let covered = self
                .links
                .iter()
                .any(|outer| is_strictly_under(&link.destination, &outer.destination));
            if covered {
                continue;
            }
            let nested = self.nested_in(&link.destination);
            self.place(&link.destination, Some(self.target(link)), &nested)?;
        }
        Ok(())
    }

    fn target(&self, link: &Link) -> PathBuf {
        under_root(&self.store.job_path(&link.job), &link.path)
    }

    fn nested_in(&self, rel: &Path) -> Vec<&'a Link> {
        self.links
            .iter()
            .filter(|link| is_strictly_under(&link.destination, rel))
            .collect()
    }

    /// Put `target` (or an empty directory when there is none) at `rel`,
    /// making room for the `nested` links below it.
    fn place(&self, rel: &Path, target: Option<PathBuf>, nested: &[&Link]) -> Result<(), CheckoutError> {
        let here = self.base.join(rel);
        if nested.is_empty() {
            return match target {
                Some(target) => self.link(&target, &here),
                None => self.ensure_dir(&here),
            };
        }
        if let Some(target) = &target {
            if !target.is_dir() {
                return Err(DependencyError::DestinationConflict {
                    destination: rel.to_path_buf(),
                }
                .into());
            }
        }
        self.ensure_dir(&here)?;

        let mut names: BTreeSet<OsString> = BTreeSet::new();
        if let Some(target) = &target {
            for entry in fs::read_dir(target).map_err(FsError::at("read", target))? {
                let entry = entry.map_err(FsError::at("read", target))?;
                names.insert(entry.file_name());
            }
        }
        for link in nested {
            if let Ok(rest) = link.destination.strip_prefix(rel) {
                if let Some(Component::Normal(first)) = rest.components().next() {
                    names.insert(first.to_os_string());
                }
            }
        }

        for name in names {
            let child = rel.join(&name);
            let exact = nested.iter().find(|link| link.destination == child);
            let deeper: Vec<&Link> = nested
                .iter()
                .copied()
                .filter(|link| is_strictly_under(&link.destination, &child))
                .collect();
            let child_target = match exact {
                Some(link) => Some(self.target(link)),
                None => target
                    .as_ref()
                    .map(|target| target.join(&name))
                    .filter(|path| fs::symlink_metadata(path).is_ok()),
            };
            self.place(&child, child_target, &deeper)?;
        }
        Ok(())
    }

    fn link(&self, target: &Path, at: &Path) -> Result<(), CheckoutError> {
        match fs::symlink_metadata(at) {
            Ok(meta) if meta.file_type().is_symlink() && self.replace_links => {
                fs::remove_file(at).map_err(FsError::at("replace", at))?;
            }
            Ok(_) => return Err(CheckoutError::DestinationExists(at.to_path_buf())),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(source) => return Err(FsError::at("inspect", at)(source).into()),
        }
        if let Some(parent) = at.parent() {
            fs::create_dir_all(parent).map_err(FsError::at("create", parent))?;
        }
        symlink(target, at).map_err(|source| CheckoutError::Symlink {
            link: at.to_path_buf(),
            target: target.to_path_buf(),
            source,
        })
    }

    fn ensure_dir(&self, at: &Path) -> Result<(), CheckoutError> {
        match fs::symlink_metadata(at) {
            Ok(meta) if meta.is_dir() => return Ok(()),
            Ok(meta) if meta.file_type().is_symlink() && self.replace_links => {
                fs::remove_file(at).map_err(FsError::at("replace", at))?;
            }
            Ok(_) => return Err(CheckoutError::DestinationExists(at.to_path_buf())),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(source) => return Err(FsError::at("inspect", at)(source).into()),
        }
        fs::create_dir_all(at).map_err(FsError::at("create", at))?;
        Ok(())
    }
}

fn is_strictly_under(path: &Path, ancestor: &Path) -> bool {
    path != ancestor && path.starts_with(ancestor)
}

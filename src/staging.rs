//! Staging directories and the file-copy primitives shared by commit and
//! checkout.
//!
//! A commit builds its candidate job in `jobs/staging/<pid>.<random>/` on the
//! same filesystem as the store, so publishing is a single rename. Staging
//! directories are `TempDir`s and vanish on drop; ones orphaned by a killed
//! process are removed by `sweep`.
use crate::error::FsError;
use crate::tree::{EntryKind, TreeEntry};
use crate::util::process_alive;
use std::fs;
use std::io;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Parent directory of all in-flight staging directories.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fresh staging directory tagged with the current pid.
    pub fn create(&self) -> Result<TempDir, FsError> {
        tempfile::Builder::new()
            .prefix(&format!("{}.", std::process::id()))
            .tempdir_in(&self.root)
            .map_err(FsError::at("create staging dir in", &self.root))
    }

    /// Remove staging directories whose owning process is gone.
    ///
    /// Owners are identified by pid only, so this assumes every writer runs on
    /// the local host.
    pub fn sweep(&self) -> Result<Vec<PathBuf>, FsError> {
        let mut removed = Vec::new();
        let read = match fs::read_dir(&self.root) {
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(removed),
            Err(source) => return Err(FsError::at("read", &self.root)(source)),
        };
        for entry in read {
            let entry = entry.map_err(FsError::at("read", &self.root))?;
            let path = entry.path();
            let owner = entry
                .file_name()
                .to_str()
                .and_then(|name| name.split('.').next())
                .and_then(|pid| pid.parse::<u32>().ok());
            if owner.is_some_and(process_alive) {
                continue;
            }
            let cleared = if path.is_dir() {
                restore_write(&path).and_then(|()| fs::remove_dir_all(&path))
            } else {
                fs::remove_file(&path)
            };
            cleared.map_err(FsError::at("remove orphaned staging entry", &path))?;
            tracing::info!(path = %path.display(), "removed orphaned staging entry");
            removed.push(path);
        }
        Ok(removed)
    }
}

/// Recreate scanned entries from `src_root` under `dest_root`.
///
/// Files are copied with their permissions, symlinks are recreated with the
/// same target, and directories are created empty. Entries must be in
/// `scan_tree` order so parents precede children.
pub fn copy_entries(src_root: &Path, entries: &[TreeEntry], dest_root: &Path) -> Result<(), FsError> {
    for entry in entries {
        let from = src_root.join(&entry.rel_path);
        let to = dest_root.join(&entry.rel_path);
        match &entry.kind {
            EntryKind::Dir => fs::create_dir_all(&to).map_err(FsError::at("create", &to))?,
            EntryKind::File { .. } => {
                fs::copy(&from, &to).map_err(FsError::at("copy", &from))?;
            }
            EntryKind::Symlink { target } => {
                symlink(target, &to).map_err(FsError::at("create symlink", &to))?
            }
        }
    }
    Ok(())
}

/// Clear write bits on copied files and directories, except anything under
/// `writable`.
pub fn write_protect(root: &Path, entries: &[TreeEntry], writable: Option<&Path>) -> Result<(), FsError> {
    // Children first, so a read-only directory never blocks a later chmod.
    for entry in entries.iter().rev() {
        if writable.is_some_and(|keep| entry.rel_path.starts_with(keep)) {
            continue;
        }
        if matches!(entry.kind, EntryKind::Symlink { .. }) {
            continue;
        }
        let path = root.join(&entry.rel_path);
        set_readonly(&path).map_err(FsError::at("write-protect", &path))?;
    }
    Ok(())
}

/// Clear all write bits on one path.
pub fn set_readonly(path: &Path) -> io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() & !0o222);
    fs::set_permissions(path, perms)
}

/// Give the owner write access to every directory below `root`, without
/// following symlinks, so the tree can be removed.
pub fn restore_write(root: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(root)?;
    if !meta.is_dir() {
        return Ok(());
    }
    let mut perms = meta.permissions();
    if perms.mode() & 0o200 == 0 {
        perms.set_mode(perms.mode() | 0o700);
        fs::set_permissions(root, perms)?;
    }
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            restore_write(&entry.path())?;
        }
    }
    Ok(())
}

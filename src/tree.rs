//! Working-tree enumeration shared by staging, hashing and checkout.
//!
//! Entries come back sorted byte-wise by relative path so every consumer sees
//! the same order regardless of how the filesystem returned directory entries.
use crate::error::HashError;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// What a tree entry is, with the attributes that participate in hashing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File { executable: bool },
    Symlink { target: PathBuf },
}

/// One path below a tree root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub rel_path: PathBuf,
    pub kind: EntryKind,
}

/// Commit ignore rules: gitignore-style globs plus exact excluded subtrees.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    matcher: Gitignore,
    excluded: Vec<PathBuf>,
}

impl IgnoreRules {
    /// Rules that match nothing.
    pub fn none() -> Self {
        Self {
            matcher: Gitignore::empty(),
            excluded: Vec::new(),
        }
    }

    /// Build rules from glob patterns anchored at `root`.
    pub fn new(root: &Path, patterns: &[String]) -> Result<Self, HashError> {
        let mut builder = GitignoreBuilder::new(root);
        for pattern in patterns {
            builder
                .add_line(None, pattern)
                .map_err(|err| HashError::InvalidPattern {
                    pattern: pattern.clone(),
                    reason: err.to_string(),
                })?;
        }
        let matcher = builder.build().map_err(|err| HashError::InvalidPattern {
            pattern: patterns.join(", "),
            reason: err.to_string(),
        })?;
        Ok(Self {
            matcher,
            excluded: Vec::new(),
        })
    }

    /// Exclude a relative path and everything below it.
    pub fn exclude(&mut self, rel: impl Into<PathBuf>) {
        self.excluded.push(rel.into());
    }

    pub fn is_ignored(&self, rel: &Path, is_dir: bool) -> bool {
        if self.excluded.iter().any(|excluded| rel.starts_with(excluded)) {
            return true;
        }
        self.matcher.matched(rel, is_dir).is_ignore()
    }
}

/// Enumerate everything under `root` that the rules keep.
///
/// Symlinks are recorded by target and never followed. Ignored directories
/// are pruned, so nothing below them is visited.
pub fn scan_tree(root: &Path, rules: &IgnoreRules) -> Result<Vec<TreeEntry>, HashError> {
    let mut entries = Vec::new();
    scan_dir(root, Path::new(""), rules, &mut entries)?;
    entries.sort_by(|a, b| {
        a.rel_path
            .as_os_str()
            .as_bytes()
            .cmp(b.rel_path.as_os_str().as_bytes())
    });
    Ok(entries)
}

fn scan_dir(
    root: &Path,
    rel_dir: &Path,
    rules: &IgnoreRules,
    out: &mut Vec<TreeEntry>,
) -> Result<(), HashError> {
    let dir = root.join(rel_dir);
    let read = fs::read_dir(&dir).map_err(|source| HashError::Unreadable {
        path: dir.clone(),
        source,
    })?;
    for entry in read {
        let entry = entry.map_err(|source| HashError::Unreadable {
            path: dir.clone(),
            source,
        })?;
        let path = entry.path();
        let rel = rel_dir.join(entry.file_name());
        let meta = fs::symlink_metadata(&path).map_err(|source| HashError::Unreadable {
            path: path.clone(),
            source,
        })?;
        let file_type = meta.file_type();
        if rules.is_ignored(&rel, file_type.is_dir()) {
            continue;
        }
        if file_type.is_symlink() {
            let target = fs::read_link(&path).map_err(|source| HashError::Unreadable {
                path: path.clone(),
                source,
            })?;
            out.push(TreeEntry {
                rel_path: rel,
                kind: EntryKind::Symlink { target },
            });
        } else if file_type.is_dir() {
            out.push(TreeEntry {
                rel_path: rel.clone(),
                kind: EntryKind::Dir,
            });
            scan_dir(root, &rel, rules, out)?;
        } else if file_type.is_file() {
            out.push(TreeEntry {
                rel_path: rel,
                kind: EntryKind::File {
                    executable: meta.permissions().mode() & 0o111 != 0,
                },
            });
        } else {
            return Err(HashError::UnsupportedEntry { path });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    fn rel_paths(entries: &[TreeEntry]) -> Vec<String> {
        entries
            .iter()
            .map(|entry| entry.rel_path.display().to_string())
            .collect()
    }

    #[test]
    fn scan_sorts_bytewise_and_keeps_empty_dirs() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/empty")).unwrap();
        fs::write(dir.path().join("a.txt"), b"x").unwrap();
        fs::write(dir.path().join("B.txt"), b"y").unwrap();
        let entries = scan_tree(dir.path(), &IgnoreRules::none()).unwrap();
        assert_eq!(rel_paths(&entries), vec!["B.txt", "a", "a.txt", "a/empty"]);
        assert_eq!(entries[1].kind, EntryKind::Dir);
    }

    #[test]
    fn scan_records_symlinks_without_following() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("real")).unwrap();
        fs::write(dir.path().join("real/file"), b"x").unwrap();
        symlink("real", dir.path().join("link")).unwrap();
        let entries = scan_tree(dir.path(), &IgnoreRules::none()).unwrap();
        let link = entries
            .iter()
            .find(|entry| entry.rel_path == Path::new("link"))
            .unwrap();
        assert_eq!(
            link.kind,
            EntryKind::Symlink {
                target: PathBuf::from("real")
            }
        );
        assert!(!rel_paths(&entries).contains(&"link/file".to_string()));
    }

    #[test]
    fn ignore_rules_prune_globs_and_excluded_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("cache/deep")).unwrap();
        fs::create_dir_all(dir.path().join("input")).unwrap();
        fs::write(dir.path().join("cache/deep/blob"), b"x").unwrap();
        fs::write(dir.path().join("notes.tmp"), b"x").unwrap();
        fs::write(dir.path().join("run.py"), b"x").unwrap();
        fs::write(dir.path().join("input/data"), b"x").unwrap();

        let mut rules =
            IgnoreRules::new(dir.path(), &["/cache".to_string(), "*.tmp".to_string()]).unwrap();
        rules.exclude("input");
        let entries = scan_tree(dir.path(), &rules).unwrap();
        assert_eq!(rel_paths(&entries), vec!["run.py"]);
    }

    #[test]
    fn scan_reports_executable_bit() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("run.sh");
        fs::write(&script, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        let entries = scan_tree(dir.path(), &IgnoreRules::none()).unwrap();
        assert_eq!(entries[0].kind, EntryKind::File { executable: true });
    }

    #[test]
    fn scan_fails_on_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let err = scan_tree(&dir.path().join("absent"), &IgnoreRules::none()).unwrap_err();
        assert!(matches!(err, HashError::Unreadable { .. }));
    }
}

//! Mutable tag index over the immutable store.
//!
//! Each tag is one file under `jobs/tags/` holding a hash. Updates write a
//! sibling temp file and rename it over the entry, so readers observe either
//! the previous or the new binding.
use crate::error::TagError;
use crate::hash::JobHash;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

fn tag_name_regex() -> &'static Regex {
    static TAG_NAME: OnceLock<Regex> = OnceLock::new();
    TAG_NAME.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,127}$").expect("regex for tag names")
    })
}

/// Name-to-hash bindings persisted under one directory.
#[derive(Debug, Clone)]
pub struct TagIndex {
    root: PathBuf,
}

impl TagIndex {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Tag names are plain file names and never look like a full hash.
    pub fn validate_name(name: &str) -> Result<(), TagError> {
        if !tag_name_regex().is_match(name) || JobHash::parse(name).is_some() {
            return Err(TagError::InvalidName(name.to_string()));
        }
        Ok(())
    }

    fn entry_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Current binding, or `None` when the tag is unset.
    pub fn get(&self, name: &str) -> Result<Option<JobHash>, TagError> {
        Self::validate_name(name)?;
        let path = self.entry_path(name);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(TagError::Io { path, source }),
        };
        let content = text.trim();
        JobHash::parse(content)
            .map(Some)
            .ok_or_else(|| TagError::Corrupt {
                name: name.to_string(),
                content: content.to_string(),
            })
    }

    /// Current binding; unset tags are an error.
    pub fn resolve(&self, name: &str) -> Result<JobHash, TagError> {
        self.get(name)?
            .ok_or_else(|| TagError::Unknown(name.to_string()))
    }

    /// Bind `name` to `hash`, returning the previous binding.
    ///
    /// Callers must hold the repository lock and have checked that `hash` is
    /// stored.
    pub fn set(
        &self,
        name: &str,
        hash: &JobHash,
        overwrite: bool,
    ) -> Result<Option<JobHash>, TagError> {
        let previous = self.get(name)?;
        if let Some(current) = &previous {
            if !overwrite && current != hash {
                return Err(TagError::Exists {
                    name: name.to_string(),
                    current: current.clone(),
                });
            }
        }
        let path = self.entry_path(name);
        let io_err = |source: std::io::Error| TagError::Io {
            path: path.clone(),
            source,
        };
        let mut tmp = tempfile::Builder::new()
            .prefix(".")
            .suffix(".tmp")
            .tempfile_in(&self.root)
            .map_err(io_err)?;
        tmp.write_all(format!("{hash}\n").as_bytes())
            .map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&path).map_err(|err| io_err(err.error))?;
        tracing::debug!(tag = name, hash = %hash, "tag updated");
        Ok(previous)
    }

    /// All bindings, sorted by name.
    pub fn list(&self) -> Result<BTreeMap<String, JobHash>, TagError> {
        let mut tags = BTreeMap::new();
        let read = fs::read_dir(&self.root).map_err(|source| TagError::Io {
            path: self.root.clone(),
            source,
        })?;
        for entry in read {
            let entry = entry.map_err(|source| TagError::Io {
                path: self.root.clone(),
                source,
            })?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if Self::validate_name(&name).is_err() {
                continue;
            }
            if let Some(hash) = self.get(&name)? {
                tags.insert(name, hash);
            }
        }
        Ok(tags)
    }

    /// Names currently bound to `hash`.
    pub fn names_for(&self, hash: &JobHash) -> Result<Vec<String>, TagError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|(_, bound)| bound == hash)
            .map(|(name, _)| name)
            .collect())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

//! Typed job descriptors.
//!
//! `JobDescriptor` is what a working job declares in `job.json`; it is checked
//! at this boundary so the rest of the core only sees well-formed paths.
//! `StoredDescriptor` is the resolved form persisted with a committed job and
//! folded into its hash. `environment`, `commands` and `parameters` are opaque
//! pass-through payloads.
use crate::error::DescriptorError;
use crate::hash::JobHash;
use crate::util::{is_plain_relative, is_root_path};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Descriptor file name, both in working jobs and stored jobs.
pub const DESCRIPTOR_FILE: &str = "job.json";
/// Commit metadata written next to a stored job's descriptor.
pub const METADATA_FILE: &str = "metadata.json";
/// Output subpath used when a descriptor does not name one.
pub const DEFAULT_OUTPUT: &str = "output";

const RESERVED_NAMES: [&str; 2] = [DESCRIPTOR_FILE, METADATA_FILE];

fn default_output() -> Option<PathBuf> {
    Some(PathBuf::from(DEFAULT_OUTPUT))
}

fn default_source() -> PathBuf {
    PathBuf::from(".")
}

/// `commit` section of a working job descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommitSettings {
    #[serde(default)]
    pub ignore: Vec<String>,
}

/// A declared dependency: `item` is a job hash, a tag, or `#tag`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DependencySpec {
    pub item: String,
    #[serde(default = "default_source")]
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// Descriptor of a working (uncommitted) job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobDescriptor {
    #[serde(default)]
    pub commit: CommitSettings,
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
    #[serde(default)]
    pub environment: Map<String, Value>,
    #[serde(default)]
    pub commands: Map<String, Value>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default = "default_output")]
    pub output: Option<PathBuf>,
}

impl JobDescriptor {
    /// Descriptor of a job that declares nothing: no dependencies, default output.
    pub fn empty() -> Self {
        Self {
            commit: CommitSettings::default(),
            dependencies: Vec::new(),
            environment: Map::new(),
            commands: Map::new(),
            parameters: Map::new(),
            output: default_output(),
        }
    }

    /// Descriptor implied for raw data: no dependencies, commands or output.
    pub fn data() -> Self {
        Self {
            output: None,
            ..Self::empty()
        }
    }

    /// Load and validate `job.json` from a working job; a missing file means
    /// an empty descriptor.
    pub fn load(job_root: &Path) -> Result<Self, DescriptorError> {
        let path = job_root.join(DESCRIPTOR_FILE);
        let descriptor = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|source| DescriptorError::Parse { path, source })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                if !job_root.is_dir() {
                    return Err(DescriptorError::Io { path, source: err });
                }
                Self::empty()
            }
            Err(source) => return Err(DescriptorError::Io { path, source }),
        };
        validate_descriptor(&descriptor)?;
        Ok(descriptor)
    }

    /// Paths implicitly kept out of staging and hashing.
    pub fn implicit_exclusions(&self) -> Vec<PathBuf> {
        let mut excluded: Vec<PathBuf> = RESERVED_NAMES.iter().map(PathBuf::from).collect();
        excluded.extend(self.output.iter().cloned());
        excluded.extend(self.dependencies.iter().map(|dep| dep.destination.clone()));
        excluded
    }

    /// Resolved form persisted with the committed job.
    pub fn to_stored(&self, dependencies: Vec<ResolvedDependency>) -> StoredDescriptor {
        StoredDescriptor {
            dependencies,
            environment: self.environment.clone(),
            commands: self.commands.clone(),
            parameters: self.parameters.clone(),
            output: self.output.clone(),
        }
    }
}

/// Check a descriptor's paths and patterns.
pub fn validate_descriptor(descriptor: &JobDescriptor) -> Result<(), DescriptorError> {
    if let Some(output) = &descriptor.output {
        check_job_path(output, "output")?;
    }
    for pattern in &descriptor.commit.ignore {
        if pattern.trim().is_empty() {
            return Err(DescriptorError::Invalid(
                "commit.ignore patterns must be non-empty".to_string(),
            ));
        }
    }
    for dep in &descriptor.dependencies {
        if dep.item.trim().is_empty() {
            return Err(DescriptorError::Invalid(format!(
                "dependency at {} has an empty item",
                dep.destination.display()
            )));
        }
        if !is_root_path(&dep.source) && !is_plain_relative(&dep.source) {
            return Err(DescriptorError::Invalid(format!(
                "dependency source must be a relative path without '..' (got {:?})",
                dep.source
            )));
        }
        check_job_path(&dep.destination, "dependency destination")?;
        if let Some(output) = &descriptor.output {
            if dep.destination.starts_with(output) || output.starts_with(&dep.destination) {
                return Err(DescriptorError::Invalid(format!(
                    "dependency destination {} overlaps output {}",
                    dep.destination.display(),
                    output.display()
                )));
            }
        }
    }
    Ok(())
}

fn check_job_path(path: &Path, label: &str) -> Result<(), DescriptorError> {
    if !is_plain_relative(path) {
        return Err(DescriptorError::Invalid(format!(
            "{label} must be a relative path without '.' or '..' (got {path:?})"
        )));
    }
    if RESERVED_NAMES.iter().any(|name| path.starts_with(name)) {
        return Err(DescriptorError::Invalid(format!(
            "{label} uses reserved name {}",
            path.display()
        )));
    }
    Ok(())
}

/// A dependency pinned to a stored job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedDependency {
    pub job: JobHash,
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// Descriptor persisted as `job.json` inside a stored job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDescriptor {
    #[serde(default)]
    pub dependencies: Vec<ResolvedDependency>,
    #[serde(default)]
    pub environment: Map<String, Value>,
    #[serde(default)]
    pub commands: Map<String, Value>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub output: Option<PathBuf>,
}

impl StoredDescriptor {
    pub fn data() -> Self {
        JobDescriptor::data().to_stored(Vec::new())
    }

    /// Stable serialization folded into the job hash. Object keys are sorted
    /// because `serde_json::Map` is ordered.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, DescriptorError> {
        serde_json::to_vec(self).map_err(DescriptorError::Serialize)
    }

    pub fn load(path: &Path) -> Result<Self, DescriptorError> {
        let bytes = fs::read(path).map_err(|source| DescriptorError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| DescriptorError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn to_pretty_json(&self) -> Result<Vec<u8>, DescriptorError> {
        serde_json::to_vec_pretty(self).map_err(DescriptorError::Serialize)
    }
}

/// Commit metadata; not part of the job hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub committed_at_epoch_ms: u128,
    pub tool_version: String,
    /// How each dependency was referenced, keyed by destination.
    #[serde(default)]
    pub references: BTreeMap<String, String>,
}

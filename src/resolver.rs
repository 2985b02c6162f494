//! Dependency resolution and graph validation.
//!
//! The resolver works against two read-only views: the job graph (stored
//! descriptors) and the tag index. Both are traits so the graph algorithms can
//! be exercised without a repository on disk.
use crate::descriptor::{DependencySpec, ResolvedDependency};
use crate::error::{DependencyError, StoreError, TagError};
use crate::hash::JobHash;
use crate::store::ObjectStore;
use crate::tags::TagIndex;
use crate::util::{is_root_path, join_rel, under_root};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

/// Read access to stored jobs and their declared edges.
pub trait JobGraph {
    fn contains(&self, hash: &JobHash) -> bool;
    fn dependencies(&self, hash: &JobHash) -> Result<Vec<ResolvedDependency>, StoreError>;
    /// Whether `rel` physically exists inside the stored job.
    fn path_exists(&self, hash: &JobHash, rel: &Path) -> bool;
}

/// Tag lookups; `None` for unset or unusable names.
pub trait TagLookup {
    fn lookup(&self, name: &str) -> Result<Option<JobHash>, TagError>;
}

impl JobGraph for ObjectStore {
    fn contains(&self, hash: &JobHash) -> bool {
        ObjectStore::contains(self, hash)
    }

    fn dependencies(&self, hash: &JobHash) -> Result<Vec<ResolvedDependency>, StoreError> {
        Ok(self.descriptor(hash)?.dependencies)
    }

    fn path_exists(&self, hash: &JobHash, rel: &Path) -> bool {
        fs::symlink_metadata(under_root(&self.job_path(hash), rel)).is_ok()
    }
}

impl TagLookup for TagIndex {
    fn lookup(&self, name: &str) -> Result<Option<JobHash>, TagError> {
        match self.get(name) {
            Err(TagError::InvalidName(_)) => Ok(None),
            other => other,
        }
    }
}

/// One symlink of a checkout closure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Location relative to the checkout root.
    pub destination: PathBuf,
    pub job: JobHash,
    /// Physical path inside `job`'s stored directory.
    pub path: PathBuf,
    /// 0 for the checked-out job's own dependencies.
    pub depth: usize,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Active,
    Done,
}

/// Result of following a path through dependency destinations.
struct Trace {
    via: Vec<(JobHash, PathBuf)>,
    physical: (JobHash, PathBuf),
}

struct Frame {
    node: Option<JobHash>,
    children: Vec<JobHash>,
    next: usize,
}

pub struct Resolver<'a, G, T> {
    graph: &'a G,
    tags: &'a T,
}

impl<'a, G: JobGraph, T: TagLookup> Resolver<'a, G, T> {
    pub fn new(graph: &'a G, tags: &'a T) -> Self {
        Self { graph, tags }
    }

    /// Resolve a dependency item: `#name` is a tag, a full hash must be
    /// stored, anything else falls back to a tag of that name.
    pub fn resolve_reference(&self, item: &str) -> Result<JobHash, DependencyError> {
        if let Some(name) = item.strip_prefix('#') {
            return self.resolve_tag(name, item);
        }
        if let Some(hash) = JobHash::parse(item) {
            if self.graph.contains(&hash) {
                return Ok(hash);
            }
        }
        self.resolve_tag(item, item)
    }

    fn resolve_tag(&self, name: &str, reference: &str) -> Result<JobHash, DependencyError> {
        match self.tags.lookup(name)? {
            Some(hash) if self.graph.contains(&hash) => Ok(hash),
            Some(hash) => {
                tracing::warn!(tag = name, hash = %hash, "tag points at a job that is not stored");
                Err(missing(reference))
            }
            None => Err(missing(reference)),
        }
    }

    /// Pin declared dependencies to stored jobs.
    ///
    /// Destinations must be unique and every source path must exist in its
    /// job, possibly by passing through that job's own dependencies.
    pub fn resolve_dependencies(
        &self,
        specs: &[DependencySpec],
    ) -> Result<Vec<ResolvedDependency>, DependencyError> {
        let mut destinations = HashSet::new();
        for spec in specs {
            if !destinations.insert(spec.destination.as_path()) {
                return Err(DependencyError::DestinationConflict {
                    destination: spec.destination.clone(),
                });
            }
        }
        specs
            .iter()
            .map(|spec| {
                let job = self.resolve_reference(&spec.item)?;
                self.locate(&job, &spec.source)?;
                Ok(ResolvedDependency {
                    job,
                    source: spec.source.clone(),
                    destination: spec.destination.clone(),
                })
            })
            .collect()
    }

    /// Physical location of `path` inside `job`, following the job's own
    /// dependency destinations into the jobs they link to.
    pub fn locate(&self, job: &JobHash, path: &Path) -> Result<(JobHash, PathBuf), DependencyError> {
        Ok(self.trace(job, path)?.physical)
    }

    /// Like `locate`, also reporting every (job, path) passed through on the
    /// way, outermost first.
    fn trace(&self, job: &JobHash, path: &Path) -> Result<Trace, DependencyError> {
        let mut current = (job.clone(), path.to_path_buf());
        let mut via = Vec::new();
        let mut seen = HashSet::new();
        loop {
            if !seen.insert(current.clone()) {
                return Err(DependencyError::Cycle {
                    cycle: vec![current.0.clone(), current.0],
                });
            }
            let deps = self.graph.dependencies(&current.0)?;
            let through = deps
                .iter()
                .filter(|dep| current.1.starts_with(&dep.destination))
                .max_by_key(|dep| dep.destination.components().count());
            let Some(dep) = through else {
                if self.graph.path_exists(&current.0, &current.1) {
                    return Ok(Trace {
                        via,
                        physical: current,
                    });
                }
                return Err(DependencyError::MissingSource {
                    job: current.0,
                    path: current.1,
                });
            };
            let rest = current
                .1
                .strip_prefix(&dep.destination)
                .map(Path::to_path_buf)
                .unwrap_or_default();
            let next = (dep.job.clone(), join_rel(&dep.source, &rest));
            via.push(std::mem::replace(&mut current, next));
        }
    }

    /// Depth-first search with three colors over everything reachable from
    /// `deps`. When `root` is the hash of the job declaring `deps`, reaching
    /// it again is also a cycle.
    pub fn check_acyclic(
        &self,
        root: Option<&JobHash>,
        deps: &[ResolvedDependency],
    ) -> Result<(), DependencyError> {
        let mut marks: HashMap<JobHash, Mark> = HashMap::new();
        if let Some(root) = root {
            marks.insert(root.clone(), Mark::Active);
        }
        let mut frames = vec![Frame {
            node: root.cloned(),
            children: deps.iter().map(|dep| dep.job.clone()).collect(),
            next: 0,
        }];
        while let Some(frame) = frames.last_mut() {
            if frame.next == frame.children.len() {
                if let Some(node) = frame.node.take() {
                    marks.insert(node, Mark::Done);
                }
                frames.pop();
                continue;
            }
            let child = frame.children[frame.next].clone();
            frame.next += 1;
            match marks.get(&child) {
                Some(Mark::Done) => {}
                Some(Mark::Active) => {
                    let mut cycle: Vec<JobHash> = frames
                        .iter()
                        .filter_map(|frame| frame.node.clone())
                        .skip_while(|node| node != &child)
                        .collect();
                    cycle.push(child);
                    return Err(DependencyError::Cycle { cycle });
                }
                None => {
                    let children = self
                        .graph
                        .dependencies(&child)?
                        .into_iter()
                        .map(|dep| dep.job)
                        .collect();
                    marks.insert(child.clone(), Mark::Active);
                    frames.push(Frame {
                        node: Some(child),
                        children,
                        next: 0,
                    });
                }
            }
        }
        Ok(())
    }

    /// Every symlink needed to reconstruct `deps` transitively, sorted by
    /// destination.
    ///
    /// A dependency of a linked job whose destination lies inside the linked
    /// path surfaces one level deeper. The shallowest link wins a destination;
    /// two different links at the same depth conflict.
    pub fn closure(&self, deps: &[ResolvedDependency]) -> Result<Vec<Link>, DependencyError> {
        self.check_acyclic(None, deps)?;
        let mut queue: VecDeque<(PathBuf, JobHash, PathBuf, usize)> = deps
            .iter()
            .map(|dep| (dep.destination.clone(), dep.job.clone(), dep.source.clone(), 0))
            .collect();
        let mut chosen: BTreeMap<PathBuf, Link> = BTreeMap::new();
        while let Some((destination, job, source, depth)) = queue.pop_front() {
            let Trace { mut via, physical } = self.trace(&job, &source)?;
            let (job, path) = physical;
            if let Some(existing) = chosen.get(&destination) {
                if existing.depth < depth || (existing.job == job && existing.path == path) {
                    continue;
                }
                return Err(DependencyError::DestinationConflict { destination });
            }
            // Each job passed through may declare destinations inside the
            // followed path; outer jobs sit closer to the declaring job.
            via.push((job.clone(), path.clone()));
            for (hop, (hop_job, hop_path)) in via.iter().enumerate() {
                for dep in self.graph.dependencies(hop_job)? {
                    let nested = if is_root_path(hop_path) {
                        Some(dep.destination.as_path())
                    } else {
                        dep.destination
                            .strip_prefix(hop_path)
                            .ok()
                            .filter(|rest| !rest.as_os_str().is_empty())
                    };
                    if let Some(rest) = nested {
                        queue.push_back((
                            destination.join(rest),
                            dep.job.clone(),
                            dep.source,
                            depth + 1 + hop,
                        ));
                    }
                }
            }
            chosen.insert(
                destination.clone(),
                Link {
                    destination,
                    job,
                    path,
                    depth,
                },
            );
        }
        Ok(chosen.into_values().collect())
    }
}

fn missing(reference: &str) -> DependencyError {
    DependencyError::Missing {
        reference: reference.to_string(),
    }
}

#[cfg(test)]
#[path = "resolver_tests.rs"]
mod tests;

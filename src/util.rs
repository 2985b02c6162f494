use sha2::Digest;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn display_path(path: &Path, base: Option<&Path>) -> String {
    if let Some(base) = base {
        if let Ok(relative) = path.strip_prefix(base) {
            return relative.display().to_string();
        }
    }
    path.display().to_string()
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Current epoch time in milliseconds for metadata timestamps.
pub fn now_epoch_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default()
}

/// True for `.` and the empty path, both of which name a job root.
pub fn is_root_path(path: &Path) -> bool {
    path.as_os_str().is_empty() || path == Path::new(".")
}

/// Join a relative path onto a base that may itself be the root marker.
pub fn join_rel(base: &Path, rest: &Path) -> PathBuf {
    if is_root_path(base) {
        rest.to_path_buf()
    } else if is_root_path(rest) {
        base.to_path_buf()
    } else {
        base.join(rest)
    }
}

/// Resolve `rel` under `root`, treating the root marker as `root` itself.
pub fn under_root(root: &Path, rel: &Path) -> PathBuf {
    if is_root_path(rel) {
        root.to_path_buf()
    } else {
        root.join(rel)
    }
}

/// Relative paths made only of normal components.
pub fn is_plain_relative(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
}

/// Whether a process with this id exists on the local host.
pub fn process_alive(pid: u32) -> bool {
    pid != 0 && Path::new(&format!("/proc/{pid}/stat")).exists()
}

/// Local hostname, or an empty string when it cannot be read.
pub fn hostname() -> String {
    fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|name| name.trim().to_string())
        .unwrap_or_default()
}

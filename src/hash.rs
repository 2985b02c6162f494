//! Job identity hashes.
//!
//! A job hash is the lowercase hex SHA-256 of a job's tree digest and its
//! resolved descriptor. The newtype keeps hashes and tag names from being mixed
//! up at API boundaries.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Length of a hex-encoded SHA-256 digest.
pub const HASH_HEX_LEN: usize = 64;

/// Content identity of a stored job.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobHash(String);

/// Returned when text is not a 64-digit hex hash.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid job hash {0:?}")]
pub struct InvalidHash(pub String);

impl JobHash {
    /// Parse a full hex hash, normalizing to lowercase.
    pub fn parse(text: &str) -> Option<Self> {
        if text.len() == HASH_HEX_LEN && text.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(Self(text.to_ascii_lowercase()))
        } else {
            None
        }
    }

    /// Wrap a finished digest.
    pub(crate) fn from_digest<D: fmt::LowerHex>(digest: D) -> Self {
        Self(format!("{digest:x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for JobHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobHash {
    type Err = InvalidHash;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| InvalidHash(s.to_string()))
    }
}

impl TryFrom<String> for JobHash {
    type Error = InvalidHash;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or(InvalidHash(value))
    }
}

impl From<JobHash> for String {
    fn from(hash: JobHash) -> Self {
        hash.0
    }
}

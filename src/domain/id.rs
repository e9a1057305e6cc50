//! Content identifiers.
//!
//! Ids are derived from on-disk names, so they compare the way the
//! filesystem does on the platforms content managers care about:
//! case-insensitively.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Case-insensitive content identifier.
///
/// The original spelling is kept for display and for building new paths,
/// while equality, hashing and ordering use a lowercase key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ContentId {
    raw: String,
    key: String,
}

impl ContentId {
    /// Create an id from its raw spelling
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let key = raw.to_lowercase();
        Self { raw, key }
    }

    /// Derive the id from the final component of a location
    pub fn from_location(location: &Path) -> Option<Self> {
        location
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.is_empty())
            .map(Self::new)
    }

    /// Get the raw string value
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Get the normalized (lowercase) key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// True if both ids match exactly, including case
    pub fn same_spelling(&self, other: &ContentId) -> bool {
        self.raw == other.raw
    }
}

impl PartialEq for ContentId {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for ContentId {}

impl Hash for ContentId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for ContentId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ContentId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl From<String> for ContentId {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<&str> for ContentId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<ContentId> for String {
    fn from(id: ContentId) -> Self {
        id.raw
    }
}

/// Normalized key for a location, used to index per-path state
pub fn location_key(location: &Path) -> String {
    location.to_string_lossy().to_lowercase()
}

/// Compare two locations the way ids compare
pub fn same_location(a: &Path, b: &Path) -> bool {
    location_key(a) == location_key(b)
}

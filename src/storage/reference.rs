use crate::errors::StorageError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a stored object lives.
///
/// Rows persisted before references were tagged only hold the raw string;
/// [`StoredReference::classify`] is the one place that turns such a string
/// back into a variant, so nothing else in the crate inspects URL shapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", content = "location", rename_all = "snake_case")]
pub enum StoredReference {
    /// Relative key, resolved against local disk or the object store.
    Local(String),
    /// Absolute URL produced by the cloud media backend.
    Cloud(String),
    /// Absolute URL from anywhere else. Readable, never deleted.
    External(String),
}

impl StoredReference {
    /// Classifies a legacy untagged reference.
    ///
    /// A URL only counts as `Cloud` when it contains `cloud_marker`; other
    /// URLs are `External`. Relative paths with a `..` segment or an absolute
    /// prefix are rejected before anything touches a backend.
    pub fn classify(raw: &str, cloud_marker: &str) -> Result<Self, StorageError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(StorageError::InvalidReference("empty reference".into()));
        }

        if is_absolute_url(raw) {
            if !cloud_marker.is_empty() && raw.contains(cloud_marker) {
                return Ok(Self::Cloud(raw.to_string()));
            }
            return Ok(Self::External(raw.to_string()));
        }

        validate_relative_path(raw)?;
        Ok(Self::Local(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Local(path) => path,
            Self::Cloud(url) | Self::External(url) => url,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    /// Last path segment, used for content-type inference.
    pub fn file_name(&self) -> &str {
        let path = self.as_str();
        let path = path.split(['?', '#']).next().unwrap_or(path);
        path.rsplit(['/', '\\']).next().unwrap_or(path)
    }
}

impl fmt::Display for StoredReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_absolute_url(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    ["http://", "https://"].iter().any(|scheme| {
        bytes
            .get(..scheme.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme.as_bytes()))
    })
}

fn validate_relative_path(path: &str) -> Result<(), StorageError> {
    let has_drive_prefix = path.as_bytes().get(1) == Some(&b':');
    if path.contains("..") || path.starts_with('/') || path.starts_with('\\') || has_drive_prefix {
        return Err(StorageError::InvalidReference(path.to_string()));
    }
    Ok(())
}

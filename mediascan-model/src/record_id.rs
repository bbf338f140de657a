use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Primary key of a [`MediaRecord`](crate::MediaRecord).
///
/// The value is the path of the media file relative to the media root, with
/// the final extension stripped, separators forced to `/` and upper-cased, so
/// `/media/show/ep01.mov` under `/media` becomes `SHOW/EP01`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Wrap an already-normalized identifier.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Derive the identifier of `path` relative to `root`.
    ///
    /// Pure and deterministic: no filesystem access is performed, both paths
    /// are normalized lexically before comparison.
    pub fn from_path(root: &Path, path: &Path) -> Result<Self> {
        let joined = relative_key(root, path)?;
        let stem = strip_extension(&joined).replace('\\', "/");
        if stem.is_empty() {
            return Err(ModelError::EmptyId(path.to_path_buf()));
        }

        Ok(Self(stem.to_uppercase()))
    }

    /// Common prefix of every id derived from a path below `dir`, for
    /// example `SEASON.1/` for `/media/season.1`. The directory name keeps
    /// its dots since only the file segment loses an extension.
    pub fn child_prefix(root: &Path, dir: &Path) -> Result<String> {
        let joined = relative_key(root, dir)?.replace('\\', "/");
        if joined.is_empty() {
            return Err(ModelError::EmptyId(dir.to_path_buf()));
        }
        Ok(format!("{}/", joined.to_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// Consumer-facing location of the thumbnail for this record.
    pub fn thumbnail_path(&self) -> String {
        format!("thumbnail/{}.png", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Normal components of `path` below `root`, joined with `/`.
fn relative_key(root: &Path, path: &Path) -> Result<String> {
    let root_norm = normalize_lexically(root);
    let path_norm = normalize_lexically(path);

    let relative = path_norm
        .strip_prefix(&root_norm)
        .map_err(|_| ModelError::OutsideRoot {
            root: root.to_path_buf(),
            path: path.to_path_buf(),
        })?;

    Ok(relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(segment) => Some(segment.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/"))
}

/// Drop a trailing `.ext` from the last path segment. The extension must be
/// non-empty and contain neither `/` nor `.`.
fn strip_extension(value: &str) -> &str {
    match value.rfind('.') {
        Some(dot) => {
            let ext = &value[dot + 1..];
            if ext.is_empty() || ext.contains('/') {
                value
            } else {
                &value[..dot]
            }
        }
        None => value,
    }
}

/// Resolve `.` and `..` components without touching the filesystem.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// True when `path` lies inside `root` after lexical normalization.
pub fn is_within_root(root: &Path, path: &Path) -> bool {
    normalize_lexically(path).starts_with(normalize_lexically(root))
}

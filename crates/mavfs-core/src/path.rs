//! Validated absolute paths on the remote device.

use crate::error::InvalidPath;
use std::fmt;

/// An absolute, normalized path on the remote device.
///
/// Always starts with `/`, never ends with `/` (except the root itself), and
/// contains no empty, `.` or `..` segments and no NUL bytes. Anything that
/// crosses the filesystem boundary is parsed into one of these first, so the
/// rest of the stack never sees a malformed path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemotePath(String);

impl RemotePath {
    /// The device root (`/`).
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Parses and validates an absolute path.
    pub fn parse(path: &str) -> Result<Self, InvalidPath> {
        if !path.starts_with('/') {
            return Err(InvalidPath::new(path, "path must be absolute"));
        }
        if path.contains('\0') {
            return Err(InvalidPath::new(path, "path contains a NUL byte"));
        }
        if path == "/" {
            return Ok(Self::root());
        }
        for segment in path[1..].split('/') {
            match segment {
                "" => return Err(InvalidPath::new(path, "empty path segment")),
                "." | ".." => return Err(InvalidPath::new(path, "relative path segment")),
                _ => {}
            }
        }
        Ok(Self(path.to_string()))
    }

    /// Returns the path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for the device root.
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Returns the containing directory. The root is its own parent.
    pub fn parent(&self) -> RemotePath {
        match self.0.rfind('/') {
            Some(0) | None => Self::root(),
            Some(idx) => Self(self.0[..idx].to_string()),
        }
    }

    /// Returns the last path segment, or `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        self.0.rsplit('/').next()
    }

    /// Appends a single path segment.
    pub fn join(&self, name: &str) -> Result<RemotePath, InvalidPath> {
        if name.is_empty() || name.contains('/') {
            return Err(InvalidPath::new(name, "not a single path segment"));
        }
        if self.is_root() {
            Self::parse(&format!("/{name}"))
        } else {
            Self::parse(&format!("{}/{name}", self.0))
        }
    }

    /// Iterates over path segments, root first. The root has none.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Component-wise prefix test. Every path starts with the root, and a
    /// path starts with itself.
    pub fn starts_with(&self, prefix: &RemotePath) -> bool {
        if prefix.is_root() {
            return true;
        }
        match self.0.strip_prefix(prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// Number of segments below the root.
    pub fn depth(&self) -> usize {
        self.components().count()
    }

    /// Re-roots `self` from `from` onto `to`. Returns `None` when `self` is
    /// not at or below `from`.
    pub fn rebase(&self, from: &RemotePath, to: &RemotePath) -> Option<RemotePath> {
        if !self.starts_with(from) {
            return None;
        }
        if self == from {
            return Some(to.clone());
        }
        let rest = if from.is_root() {
            &self.0[1..]
        } else {
            &self.0[from.0.len() + 1..]
        };
        if to.is_root() {
            Some(Self(format!("/{rest}")))
        } else {
            Some(Self(format!("{}/{rest}", to.0)))
        }
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RemotePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for RemotePath {
    type Error = InvalidPath;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

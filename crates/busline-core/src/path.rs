//! Object path validation.

use std::fmt;

use crate::Error;

/// A validated object path.
///
/// A path is valid iff it is non-empty, starts with `/`, has no trailing
/// `/` unless it is exactly `/`, and every `/`-delimited segment is
/// non-empty and composed only of ASCII letters, digits, or `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectPath(String);

impl ObjectPath {
    /// Validate `path` and wrap it.
    pub fn new(path: impl Into<String>) -> Result<Self, Error> {
        let path = path.into();
        if Self::is_valid(&path) {
            Ok(Self(path))
        } else {
            Err(Error::InvalidObjectPath(path))
        }
    }

    /// The root path `/`.
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Check validity without constructing.
    pub fn is_valid(path: &str) -> bool {
        if path == "/" {
            return true;
        }
        let Some(rest) = path.strip_prefix('/') else {
            return false;
        };
        if rest.is_empty() || path.ends_with('/') {
            return false;
        }
        rest.split('/').all(|segment| {
            !segment.is_empty()
                && segment
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'_')
        })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for ObjectPath {
    type Error = Error;

    fn try_from(path: &str) -> Result<Self, Error> {
        Self::new(path)
    }
}

impl AsRef<str> for ObjectPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

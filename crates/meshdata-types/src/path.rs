//! Hierarchical store addresses.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Segment separator.
pub const SEPARATOR: char = '/';

/// A slash-separated address for a shared data store.
///
/// Two paths are equal iff their string forms are equal; no normalization is
/// applied to leading or trailing separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StorePath(String);

impl StorePath {
    /// Creates a path from its string form.
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        if path.is_empty() {
            return Err(Error::InvalidPath("path cannot be empty".into()));
        }
        Ok(Self(path))
    }

    /// Builds a path from individual segments.
    pub fn from_segments<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = segments
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect::<Vec<_>>()
            .join("/");
        Self::new(joined)
    }

    /// Returns the full path string.
    #[must_use]
    pub fn full_path(&self) -> &str {
        &self.0
    }

    /// Returns the number of segments.
    #[must_use]
    pub fn element_count(&self) -> usize {
        self.0.split(SEPARATOR).count()
    }

    /// Returns the segment at `index`.
    #[must_use]
    pub fn element(&self, index: usize) -> Option<&str> {
        self.0.split(SEPARATOR).nth(index)
    }

    /// Iterates over the segments in order.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEPARATOR)
    }

    /// Returns the last segment.
    #[must_use]
    pub fn name(&self) -> &str {
        self.0.rsplit(SEPARATOR).next().unwrap_or(&self.0)
    }

    /// Returns a child path one level below this one.
    pub fn child(&self, segment: &str) -> Result<Self> {
        if segment.is_empty() || segment.contains(SEPARATOR) {
            return Err(Error::InvalidPath(format!("invalid segment: {segment:?}")));
        }
        Ok(Self(format!("{}{SEPARATOR}{segment}", self.0)))
    }

    /// Returns the parent path, or `None` for a single-segment path.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        let (parent, _) = self.0.rsplit_once(SEPARATOR)?;
        if parent.is_empty() {
            return None;
        }
        Some(Self(parent.to_string()))
    }

    /// Returns true if this path sits exactly one level below `parent`.
    #[must_use]
    pub fn is_child_of(&self, parent: &StorePath) -> bool {
        self.parent().as_ref() == Some(parent)
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StorePath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for StorePath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<StorePath> for String {
    fn from(path: StorePath) -> Self {
        path.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn segment_count_and_full_path() {
        let path = StorePath::new("a/b/c").unwrap();
        assert_eq!(path.element_count(), 3);
        assert_eq!(path.full_path(), "a/b/c");
        assert_eq!(path.element(1), Some("b"));
        assert_eq!(path.name(), "c");
    }

    #[test]
    fn no_normalization_of_separators() {
        let lead = StorePath::new("/a/b").unwrap();
        assert_eq!(lead.element_count(), 3);
        assert_ne!(lead, StorePath::new("a/b").unwrap());
    }

    #[test]
    fn empty_path_is_rejected() {
        assert!(matches!(StorePath::new(""), Err(Error::InvalidPath(_))));
    }

    #[test]
    fn parent_and_children() {
        let root = StorePath::new("apps").unwrap();
        let child = root.child("billing").unwrap();
        assert_eq!(child.full_path(), "apps/billing");
        assert!(child.is_child_of(&root));
        assert!(!child.child("x").unwrap().is_child_of(&root));
        assert_eq!(root.parent(), None);
        assert!(root.child("a/b").is_err());
    }

    #[test]
    fn serde_uses_string_form() {
        let path = StorePath::new("a/b").unwrap();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"a/b\"");
        let back: StorePath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
        assert!(serde_json::from_str::<StorePath>("\"\"").is_err());
    }

    proptest! {
        #[test]
        fn prop_segments_rebuild_the_path(segments in prop::collection::vec("[a-z0-9_-]{1,8}", 1..6)) {
            let path = StorePath::from_segments(&segments).unwrap();
            prop_assert_eq!(path.element_count(), segments.len());
            prop_assert_eq!(path.segments().collect::<Vec<_>>(), segments.iter().map(String::as_str).collect::<Vec<_>>());
        }
    }
}

//! Paths addressing nodes of a secret tree.

use std::fmt;

use secenv_common::{Error, Result};

/// Separator between path segments in flat keys.
pub const SEPARATOR: char = '/';

/// A sequence of segments from the tree root, written `a/b/c`.
///
/// The empty path addresses the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SecretPath {
    segments: Vec<String>,
}

impl SecretPath {
    /// The root path.
    pub fn root() -> Self {
        Self::default()
    }

    /// Build a path from segments.
    ///
    /// # Errors
    /// - `InvalidInput` if a segment is empty or contains the separator
    pub fn from_segments(segments: Vec<String>) -> Result<Self> {
        for segment in &segments {
            check_segment(segment)?;
        }
        Ok(Self { segments })
    }

    /// Parse a flat key. `""` is the root; `"a//b"` and `"/a"` are rejected.
    pub fn parse(key: &str) -> Result<Self> {
        if key.is_empty() {
            return Ok(Self::root());
        }
        Self::from_segments(key.split(SEPARATOR).map(String::from).collect())
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Get the parent path, if any.
    pub fn parent(&self) -> Option<Self> {
        let (_, parent) = self.segments.split_last()?;
        Some(Self {
            segments: parent.to_vec(),
        })
    }

    /// Last segment.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Append a child segment.
    pub fn join(&self, child: &str) -> Result<Self> {
        check_segment(child)?;
        let mut segments = self.segments.clone();
        segments.push(child.to_string());
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Flat key form, `""` for the root.
    pub fn to_key(&self) -> String {
        self.segments.join("/")
    }
}

impl fmt::Display for SecretPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_key())
    }
}

pub(crate) fn check_segment(segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(Error::InvalidInput(
            "Path segment cannot be empty".to_string(),
        ));
    }
    if segment.contains(SEPARATOR) {
        return Err(Error::InvalidInput(format!(
            "Path segment '{}' cannot contain '{}'",
            segment, SEPARATOR
        )));
    }
    Ok(())
}

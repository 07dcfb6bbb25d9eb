//! Content hash addressing a source blob.

use std::fmt;

/// Identifier of a stored source blob, as it appears in request paths.
///
/// Only lowercase ASCII letters, digits and `-` are allowed, which keeps the
/// value safe to use as a path component.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BlobHash(String);

impl BlobHash {
    /// Parse and validate a hash string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.is_empty() {
            return Err(crate::Error::InvalidHash("empty hash".to_string()));
        }
        if let Some(c) = s
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
        {
            return Err(crate::Error::InvalidHash(format!(
                "unexpected character {c:?} in {s:?}"
            )));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into fixed-width groups of four characters. The final group may
    /// be shorter.
    pub fn groups(&self) -> impl Iterator<Item = &str> {
        // ASCII-only, so byte offsets are char boundaries.
        self.0
            .as_bytes()
            .chunks(4)
            .map(|c| std::str::from_utf8(c).unwrap_or_default())
    }
}

impl fmt::Debug for BlobHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobHash({})", self.0)
    }
}

impl fmt::Display for BlobHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BlobHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

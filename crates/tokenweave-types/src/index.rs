use serde::{Deserialize, Serialize};
use std::fmt;

/// Coordinate of a token within a nested-collection iteration space.
///
/// Index arrays are immutable: every operation that would change one returns a
/// new value. An empty array addresses the whole (non-iterated) value, and a
/// completion carrying an empty array is a final completion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexArray(Vec<usize>);

impl IndexArray {
    pub fn new(indices: Vec<usize>) -> Self {
        Self(indices)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, usize> {
        self.0.iter()
    }

    /// Ordered concatenation: entries of `self` precede those of `other`.
    pub fn concat(&self, other: &IndexArray) -> IndexArray {
        let mut indices = Vec::with_capacity(self.len() + other.len());
        indices.extend_from_slice(&self.0);
        indices.extend_from_slice(&other.0);
        IndexArray(indices)
    }

    /// Concatenates any number of arrays in iteration order.
    pub fn concat_all<'a, I>(parts: I) -> IndexArray
    where
        I: IntoIterator<Item = &'a IndexArray>,
    {
        let mut indices = Vec::new();
        for part in parts {
            indices.extend_from_slice(&part.0);
        }
        IndexArray(indices)
    }

    /// True when `prefix` is a leading segment of this array (equal arrays count).
    pub fn has_prefix(&self, prefix: &IndexArray) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// True when `prefix` is a leading segment strictly shorter than this array.
    pub fn has_strict_prefix(&self, prefix: &IndexArray) -> bool {
        prefix.len() < self.len() && self.has_prefix(prefix)
    }

    /// The first `len` entries, or a copy of the whole array when shorter.
    pub fn truncated(&self, len: usize) -> IndexArray {
        IndexArray(self.0[..len.min(self.len())].to_vec())
    }

    /// Appends one coordinate, producing the address of a child element.
    pub fn child(&self, position: usize) -> IndexArray {
        let mut indices = self.0.clone();
        indices.push(position);
        IndexArray(indices)
    }

    /// Removes `prefix` from the front, if present.
    pub fn strip_prefix(&self, prefix: &IndexArray) -> Option<IndexArray> {
        self.0
            .strip_prefix(prefix.as_slice())
            .map(|rest| IndexArray(rest.to_vec()))
    }
}

impl From<Vec<usize>> for IndexArray {
    fn from(indices: Vec<usize>) -> Self {
        Self(indices)
    }
}

impl<const N: usize> From<[usize; N]> for IndexArray {
    fn from(indices: [usize; N]) -> Self {
        Self(indices.to_vec())
    }
}

impl From<&[usize]> for IndexArray {
    fn from(indices: &[usize]) -> Self {
        Self(indices.to_vec())
    }
}

impl fmt::Display for IndexArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, index) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", index)?;
        }
        write!(f, "]")
    }
}

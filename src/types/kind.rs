//! Kinds: the labels and relationship types of the graph.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A named label or relationship type (e.g. `User`, `HasSession`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Kind(String);

impl Kind {
    /// Create a kind from its name.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().to_string())
    }

    /// The kind name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this kind is contained in the given set.
    pub fn is(&self, others: &[Kind]) -> bool {
        others.iter().any(|other| other == self)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Kind {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Kind {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// An ordered set of kinds.
///
/// Insertion order is preserved and duplicates are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Kinds(Vec<Kind>);

impl Kinds {
    /// Empty kind set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the set contains `kind`.
    pub fn contains(&self, kind: &Kind) -> bool {
        self.0.contains(kind)
    }

    /// Whether the set contains any of `others`.
    pub fn contains_any(&self, others: &Kinds) -> bool {
        others.iter().any(|kind| self.contains(kind))
    }

    /// Add a kind if not already present. Returns true if it was added.
    pub fn add(&mut self, kind: Kind) -> bool {
        if self.contains(&kind) {
            false
        } else {
            self.0.push(kind);
            true
        }
    }

    /// Remove a kind. Returns true if it was present.
    pub fn remove(&mut self, kind: &Kind) -> bool {
        let before = self.0.len();
        self.0.retain(|existing| existing != kind);
        before != self.0.len()
    }

    /// Kinds in this set that are not in `other`.
    pub fn exclude(&self, other: &Kinds) -> Kinds {
        self.0.iter().filter(|kind| !other.contains(kind)).cloned().collect()
    }

    /// This set followed by the members of `other` not already present.
    pub fn concatenate(&self, other: &Kinds) -> Kinds {
        let mut joined = self.clone();
        for kind in other.iter() {
            joined.add(kind.clone());
        }
        joined
    }

    /// Kind names in order.
    pub fn strings(&self) -> Vec<String> {
        self.0.iter().map(|kind| kind.to_string()).collect()
    }

    /// Iterate over the kinds.
    pub fn iter(&self) -> std::slice::Iter<'_, Kind> {
        self.0.iter()
    }

    /// Number of kinds.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Kinds as a slice.
    pub fn as_slice(&self) -> &[Kind] {
        &self.0
    }

    /// First kind, if any.
    pub fn first(&self) -> Option<&Kind> {
        self.0.first()
    }
}

impl fmt::Display for Kinds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.strings().join(", "))
    }
}

impl FromIterator<Kind> for Kinds {
    fn from_iter<I: IntoIterator<Item = Kind>>(iter: I) -> Self {
        let mut kinds = Kinds::new();
        for kind in iter {
            kinds.add(kind);
        }
        kinds
    }
}

impl<'a> IntoIterator for &'a Kinds {
    type Item = &'a Kind;
    type IntoIter = std::slice::Iter<'a, Kind>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl IntoIterator for Kinds {
    type Item = Kind;
    type IntoIter = std::vec::IntoIter<Kind>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl From<Kind> for Kinds {
    fn from(kind: Kind) -> Self {
        Kinds(vec![kind])
    }
}

impl From<Vec<Kind>> for Kinds {
    fn from(kinds: Vec<Kind>) -> Self {
        kinds.into_iter().collect()
    }
}

impl<const N: usize> From<[Kind; N]> for Kinds {
    fn from(kinds: [Kind; N]) -> Self {
        kinds.into_iter().collect()
    }
}

impl From<&[&str]> for Kinds {
    fn from(names: &[&str]) -> Self {
        names.iter().map(|name| Kind::new(name)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_dedupe_and_order() {
        let mut kinds = Kinds::from([Kind::new("Base"), Kind::new("User")]);
        assert!(!kinds.add(Kind::new("Base")));
        assert!(kinds.add(Kind::new("Group")));
        assert_eq!(kinds.strings(), vec!["Base", "User", "Group"]);
    }

    #[test]
    fn test_exclude_and_concatenate() {
        let left = Kinds::from([Kind::new("A"), Kind::new("B")]);
        let right = Kinds::from([Kind::new("B"), Kind::new("C")]);

        assert_eq!(left.exclude(&right).strings(), vec!["A"]);
        assert_eq!(left.concatenate(&right).strings(), vec!["A", "B", "C"]);
        assert!(left.contains_any(&right));
    }
}

//! Backend-assigned identity for nodes and relationships.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identity of a node or relationship.
///
/// IDs are assigned by the backend on create. An entity that has not been
/// persisted yet carries [`ID::UNREGISTERED`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ID(u64);

impl ID {
    /// Sentinel for entities that have not been written to a backend.
    pub const UNREGISTERED: ID = ID(u64::MAX);

    /// Create an ID from its raw value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric value.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Value as a signed 64-bit integer for backends that store ids as `bigint`.
    pub fn as_i64(self) -> i64 {
        self.0 as i64
    }

    /// Whether this ID was assigned by a backend.
    pub fn is_registered(self) -> bool {
        self != Self::UNREGISTERED
    }
}

impl fmt::Display for ID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ID {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<u32> for ID {
    fn from(raw: u32) -> Self {
        Self(raw as u64)
    }
}

impl TryFrom<i64> for ID {
    type Error = std::num::TryFromIntError;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        u64::try_from(raw).map(Self)
    }
}

/// Collect the raw values of a slice of IDs as signed integers.
pub fn ids_as_i64(ids: &[ID]) -> Vec<i64> {
    ids.iter().map(|id| id.as_i64()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unregistered_sentinel() {
        assert!(!ID::UNREGISTERED.is_registered());
        assert!(ID::new(0).is_registered());
    }

    #[test]
    fn test_negative_ids_are_rejected() {
        assert!(ID::try_from(-1i64).is_err());
        assert_eq!(ID::try_from(42i64).unwrap(), ID::new(42));
    }
}

//! Directed graph edges.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use super::id::ID;
use super::kind::Kind;
use super::properties::Properties;

/// Direction of travel along a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    /// From end to start.
    Inbound,
    /// From start to end.
    Outbound,
    /// Either way.
    Both,
}

impl Direction {
    /// The opposite direction. `Both` is its own reverse.
    pub fn reverse(self) -> Direction {
        match self {
            Direction::Inbound => Direction::Outbound,
            Direction::Outbound => Direction::Inbound,
            Direction::Both => Direction::Both,
        }
    }

    /// The node a traversal in this direction arrives at.
    ///
    /// Returns `None` for `Both` since the answer depends on where the walk came from.
    pub fn pick_id(self, relationship: &Relationship) -> Option<ID> {
        match self {
            Direction::Inbound => Some(relationship.start_id),
            Direction::Outbound => Some(relationship.end_id),
            Direction::Both => None,
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    /// Parse from a lowercase name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inbound" => Ok(Direction::Inbound),
            "outbound" => Ok(Direction::Outbound),
            "both" => Ok(Direction::Both),
            _ => Err(format!("unknown direction: {s}")),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
            Direction::Both => write!(f, "both"),
        }
    }
}

/// A directed edge with exactly one kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Relationship {
    /// Backend identity, or [`ID::UNREGISTERED`] before create.
    pub id: ID,
    /// Start node.
    pub start_id: ID,
    /// End node.
    pub end_id: ID,
    /// Relationship type.
    pub kind: Kind,
    /// Property bag.
    pub properties: Properties,
}

impl Relationship {
    /// A relationship as loaded from a backend.
    pub fn new(id: ID, start_id: ID, end_id: ID, properties: Properties, kind: Kind) -> Self {
        Self {
            id,
            start_id,
            end_id,
            kind,
            properties,
        }
    }

    /// A relationship that has not been persisted and whose endpoints are not known yet.
    pub fn prepare(properties: Properties, kind: Kind) -> Self {
        Self::new(ID::UNREGISTERED, ID::UNREGISTERED, ID::UNREGISTERED, properties, kind)
    }

    /// A relationship between known nodes that has not been persisted yet.
    pub fn between(start_id: ID, end_id: ID, kind: Kind, properties: Properties) -> Self {
        Self::new(ID::UNREGISTERED, start_id, end_id, properties, kind)
    }

    /// Merge another relationship's properties into this one.
    pub fn merge(&mut self, other: &Relationship) {
        self.properties.merge(&other.properties);
    }
}

/// Relationships keyed by ID.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationshipSet(BTreeMap<ID, Relationship>);

impl RelationshipSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a relationship.
    pub fn add(&mut self, relationship: Relationship) {
        self.0.insert(relationship.id, relationship);
    }

    /// Relationship by ID.
    pub fn get(&self, id: ID) -> Option<&Relationship> {
        self.0.get(&id)
    }

    /// Whether the set has a relationship with this ID.
    pub fn contains(&self, id: ID) -> bool {
        self.0.contains_key(&id)
    }

    /// IDs in ascending order.
    pub fn ids(&self) -> Vec<ID> {
        self.0.keys().copied().collect()
    }

    /// Number of relationships.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in ID order.
    pub fn iter(&self) -> impl Iterator<Item = &Relationship> {
        self.0.values()
    }
}

impl FromIterator<Relationship> for RelationshipSet {
    fn from_iter<I: IntoIterator<Item = Relationship>>(iter: I) -> Self {
        let mut set = RelationshipSet::new();
        for relationship in iter {
            set.add(relationship);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_parses_display_form() {
        for direction in [Direction::Inbound, Direction::Outbound, Direction::Both] {
            assert_eq!(direction.to_string().parse::<Direction>(), Ok(direction));
        }
        assert!("sideways".parse::<Direction>().is_err());
    }

    #[test]
    fn test_direction_pick() {
        let rel = Relationship::new(ID::new(9), ID::new(1), ID::new(2), Properties::new(), Kind::new("MemberOf"));

        assert_eq!(Direction::Outbound.pick_id(&rel), Some(ID::new(2)));
        assert_eq!(Direction::Inbound.pick_id(&rel), Some(ID::new(1)));
        assert_eq!(Direction::Both.pick_id(&rel), None);
        assert_eq!(Direction::Outbound.reverse(), Direction::Inbound);
    }
}

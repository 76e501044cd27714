//! Backend-agnostic graph domain model.

pub mod id;
pub mod kind;
pub mod node;
pub mod path;
pub mod properties;
pub mod relationship;
pub mod schema;
pub mod update;
pub mod value;

pub use id::ID;
pub use kind::{Kind, Kinds};
pub use node::{Node, NodeSet};
pub use path::{Path, Segment};
pub use properties::{Properties, PropertyError, PropertyValue};
pub use relationship::{Direction, Relationship, RelationshipSet};
pub use schema::{Constraint, GraphSchema, Index, IndexType, Schema};
pub use update::{NodeShape, NodeUpdate, RelationshipShape, RelationshipUpdate};
pub use value::Value;

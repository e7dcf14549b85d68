//! Programmatic object schema.
//!
//! # Responsibility
//! - Build entity descriptions (attributes, indexes, uniqueness groups and
//!   paired relationships) into one immutable `Model`.
//! - Resolve lifecycle-managed fields once, at build time.
//!
//! # Invariants
//! - Relationships never exist unpaired: `forward.inverse.inverse == forward`.
//! - Entities built with `describe` always carry `local_id`, `created_at` and
//!   `updated_at`; `local_id` is indexed and unique.
//! - Entities are addressed by `EntityId` handles into the model arena, so
//!   the relationship graph holds no owning cycles.

mod builder;
mod entity;
mod managed;

pub use builder::{EntityBuilder, ModelBuilder, RelationshipBuilder};
pub use entity::{
    AttributeDescription, AttributeType, Collation, DeleteRule, EntityDescription, EntityId,
    IndexDescription, IndexElement, Model, PropertyDescription, RelationshipDescription,
    RelationshipRef, ValidationRule,
};
pub use managed::{ManagedField, ManagedRule, CREATED_AT, LOCAL_ID, UPDATED_AT};

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Schema authoring errors.
///
/// These describe bugs in schema construction code, not runtime conditions.
/// Builder entry points panic with this message; `try_*` variants return it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    UnknownProperty { entity: String, property: String },
    DuplicateProperty { entity: String, property: String },
    DuplicateEntity(String),
    UnknownEntity(EntityId),
}

impl Display for SchemaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownProperty { entity, property } => write!(
                f,
                "failed to find a property named `{property}` on entity `{entity}`"
            ),
            Self::DuplicateProperty { entity, property } => {
                write!(f, "entity `{entity}` already declares property `{property}`")
            }
            Self::DuplicateEntity(name) => write!(f, "entity `{name}` is already described"),
            Self::UnknownEntity(id) => write!(f, "entity handle {id} is not part of this model"),
        }
    }
}

impl Error for SchemaError {}

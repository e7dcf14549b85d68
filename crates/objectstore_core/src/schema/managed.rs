//! Lifecycle-managed fields.
//!
//! Identity and timestamp assignment is driven by a fixed list resolved when
//! the model is built, so record hooks never look properties up by name.

use crate::schema::entity::{AttributeType, EntityDescription, PropertyDescription};

pub const LOCAL_ID: &str = "local_id";
pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";

/// Assignment rule applied by the record lifecycle hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagedRule {
    /// Fresh UUID on first insert, never reassigned.
    Identity,
    /// Current time on first insert.
    CreatedAt,
    /// Current time on first insert and before every save.
    UpdatedAt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedField {
    pub property: String,
    pub rule: ManagedRule,
}

/// Resolves the managed fields an entity actually declares.
///
/// Entities without one of the well-known properties (or with a different
/// attribute type for it) simply skip that rule.
pub(crate) fn resolve_managed_fields(entity: &EntityDescription) -> Vec<ManagedField> {
    [
        (LOCAL_ID, AttributeType::Uuid, ManagedRule::Identity),
        (CREATED_AT, AttributeType::Date, ManagedRule::CreatedAt),
        (UPDATED_AT, AttributeType::Date, ManagedRule::UpdatedAt),
    ]
    .into_iter()
    .filter(|(name, expected_type, _)| {
        matches!(
            entity.property(name),
            Some(PropertyDescription::Attribute(attribute))
                if attribute.attribute_type == *expected_type
        )
    })
    .map(|(name, _, rule)| ManagedField {
        property: name.to_string(),
        rule,
    })
    .collect()
}

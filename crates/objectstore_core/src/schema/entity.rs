//! Entity, property and index descriptions.

use crate::predicate::Predicate;
use crate::schema::managed::ManagedField;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Stable handle of one entity inside a `Model` arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub(crate) usize);

impl EntityId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl Display for EntityId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Addresses one relationship property: owning entity + property position.
///
/// Properties are append-only, so positions stay valid for the model lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelationshipRef {
    pub entity: EntityId,
    pub position: usize,
}

/// Primitive attribute type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    Boolean,
    Integer,
    Double,
    String,
    Uuid,
    /// Unix epoch milliseconds.
    Date,
    Binary,
}

/// What happens to the related side when a record is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteRule {
    NoAction,
    #[default]
    Nullify,
    Cascade,
    Deny,
}

/// Index key collation. Only byte-exact comparison is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Collation {
    #[default]
    Binary,
}

/// Validation predicate with its diagnostic message.
///
/// The predicate sees the attribute value as `Expr::This`.
#[derive(Debug, Clone)]
pub struct ValidationRule {
    pub predicate: Predicate,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct AttributeDescription {
    pub name: String,
    pub attribute_type: AttributeType,
    pub optional: bool,
    pub default_value: Option<Value>,
    pub validators: Vec<ValidationRule>,
}

impl AttributeDescription {
    pub fn new(name: impl Into<String>, attribute_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attribute_type,
            optional: true,
            default_value: None,
            validators: Vec::new(),
        }
    }

    /// Marks the attribute as non-optional.
    pub fn required(&mut self) -> &mut Self {
        self.optional = false;
        self
    }

    pub fn optional(&mut self, optional: bool) -> &mut Self {
        self.optional = optional;
        self
    }

    pub fn default_value(&mut self, value: impl Into<Value>) -> &mut Self {
        self.default_value = Some(value.into());
        self
    }

    /// Appends one `(predicate, message)` validation pair.
    pub fn validate(&mut self, predicate: Predicate, message: impl Into<String>) -> &mut Self {
        self.validators.push(ValidationRule {
            predicate,
            message: message.into(),
        });
        self
    }
}

#[derive(Debug, Clone)]
pub struct RelationshipDescription {
    pub name: String,
    pub destination: EntityId,
    pub inverse: RelationshipRef,
    pub min_count: u32,
    /// `None` means unbounded.
    pub max_count: Option<u32>,
    pub delete_rule: DeleteRule,
}

impl RelationshipDescription {
    pub fn is_to_many(&self) -> bool {
        self.max_count != Some(1)
    }

    pub fn is_required(&self) -> bool {
        self.min_count > 0
    }
}

#[derive(Debug, Clone)]
pub enum PropertyDescription {
    Attribute(AttributeDescription),
    Relationship(RelationshipDescription),
}

impl PropertyDescription {
    pub fn name(&self) -> &str {
        match self {
            Self::Attribute(attribute) => attribute.name.as_str(),
            Self::Relationship(relationship) => relationship.name.as_str(),
        }
    }

    pub fn as_attribute(&self) -> Option<&AttributeDescription> {
        match self {
            Self::Attribute(attribute) => Some(attribute),
            Self::Relationship(_) => None,
        }
    }

    pub fn as_relationship(&self) -> Option<&RelationshipDescription> {
        match self {
            Self::Attribute(_) => None,
            Self::Relationship(relationship) => Some(relationship),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexElement {
    pub property: String,
    pub collation: Collation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescription {
    pub name: String,
    pub elements: Vec<IndexElement>,
}

impl IndexDescription {
    /// Derives `<Entity>_index_<a>_<b>` when no explicit name is given.
    pub(crate) fn derived_name(entity: &str, properties: &[&str]) -> String {
        format!("{entity}_index_{}", properties.join("_"))
    }
}

/// Schema definition for one record type.
#[derive(Debug, Clone)]
pub struct EntityDescription {
    pub(crate) id: EntityId,
    pub(crate) name: String,
    pub(crate) properties: Vec<PropertyDescription>,
    pub(crate) indexes: Vec<IndexDescription>,
    pub(crate) uniqueness_constraints: Vec<Vec<String>>,
    pub(crate) managed_fields: Vec<ManagedField>,
}

impl EntityDescription {
    pub(crate) fn new(id: EntityId, name: String) -> Self {
        Self {
            id,
            name,
            properties: Vec::new(),
            indexes: Vec::new(),
            uniqueness_constraints: Vec::new(),
            managed_fields: Vec::new(),
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Properties in declaration order.
    pub fn properties(&self) -> &[PropertyDescription] {
        &self.properties
    }

    pub fn indexes(&self) -> &[IndexDescription] {
        &self.indexes
    }

    pub fn uniqueness_constraints(&self) -> &[Vec<String>] {
        &self.uniqueness_constraints
    }

    /// Lifecycle-managed fields resolved when the model was built.
    pub fn managed_fields(&self) -> &[ManagedField] {
        &self.managed_fields
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDescription> {
        self.properties
            .iter()
            .find(|property| property.name() == name)
    }

    pub(crate) fn position_of(&self, name: &str) -> Option<usize> {
        self.properties
            .iter()
            .position(|property| property.name() == name)
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDescription> {
        self.property(name).and_then(PropertyDescription::as_attribute)
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipDescription> {
        self.property(name)
            .and_then(PropertyDescription::as_relationship)
    }

    pub fn attributes(&self) -> impl Iterator<Item = &AttributeDescription> {
        self.properties
            .iter()
            .filter_map(PropertyDescription::as_attribute)
    }

    pub fn relationships(&self) -> impl Iterator<Item = &RelationshipDescription> {
        self.properties
            .iter()
            .filter_map(PropertyDescription::as_relationship)
    }
}

/// Immutable collection of entity descriptions.
///
/// Built once by `ModelBuilder::build` and shared read-only afterwards.
#[derive(Debug, Clone)]
pub struct Model {
    pub(crate) name: String,
    pub(crate) entities: Vec<EntityDescription>,
}

impl Model {
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn entities(&self) -> &[EntityDescription] {
        &self.entities
    }

    /// Returns the entity behind `id`.
    ///
    /// Handles are only minted by the builder of this model, so a foreign
    /// handle is a programming error.
    pub fn entity(&self, id: EntityId) -> &EntityDescription {
        &self.entities[id.0]
    }

    pub fn entity_named(&self, name: &str) -> Option<&EntityDescription> {
        self.entities.iter().find(|entity| entity.name == name)
    }

    /// Resolves a relationship handle to its description.
    pub fn relationship(&self, reference: RelationshipRef) -> Option<&RelationshipDescription> {
        self.entities
            .get(reference.entity.0)?
            .properties
            .get(reference.position)?
            .as_relationship()
    }

    /// Returns the handle of relationship `name` on `entity`.
    pub fn relationship_ref(&self, entity: EntityId, name: &str) -> Option<RelationshipRef> {
        let description = self.entities.get(entity.0)?;
        let position = description.position_of(name)?;
        description.properties[position].as_relationship()?;
        Some(RelationshipRef { entity, position })
    }

    /// Returns the paired relationship of `reference`.
    pub fn inverse_of(&self, reference: RelationshipRef) -> Option<&RelationshipDescription> {
        let relationship = self.relationship(reference)?;
        self.relationship(relationship.inverse)
    }
}

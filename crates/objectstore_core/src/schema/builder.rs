//! Entity schema builder.
//!
//! # Responsibility
//! - Assemble entity descriptions inside one arena.
//! - Create relationships as linked forward/inverse pairs in one step.
//!
//! # Invariants
//! - Authoring mistakes (unknown index property, duplicate names, foreign
//!   entity handles) abort schema construction with a panic.
//! - A relationship pair is pushed onto both entities before the call
//!   returns; no caller can observe half of a pair.

use crate::schema::entity::{
    AttributeDescription, AttributeType, Collation, DeleteRule, EntityDescription, EntityId,
    IndexDescription, IndexElement, Model, PropertyDescription, RelationshipDescription,
    RelationshipRef,
};
use crate::schema::managed::{resolve_managed_fields, CREATED_AT, LOCAL_ID, UPDATED_AT};
use crate::schema::SchemaError;
use log::error;

/// Builds a `Model` from programmatic entity descriptions.
#[derive(Debug)]
pub struct ModelBuilder {
    name: String,
    entities: Vec<EntityDescription>,
}

impl ModelBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entities: Vec::new(),
        }
    }

    /// Describes a new entity with the mandatory lifecycle properties.
    ///
    /// `local_id` (uuid), `created_at` and `updated_at` (dates) are added
    /// first; `local_id` is indexed and registered as a single-property
    /// uniqueness constraint. `configure` then adds the entity's own
    /// properties.
    ///
    /// # Panics
    /// - When `name` is already described, or `configure` commits an
    ///   authoring error.
    pub fn describe<F>(&mut self, name: &str, configure: F) -> EntityId
    where
        F: FnOnce(&mut EntityBuilder<'_>),
    {
        let id = self.push_entity(name);
        let mut entity = EntityBuilder {
            entities: &mut self.entities,
            id,
        };
        entity.add_attribute(LOCAL_ID, AttributeType::Uuid).required();
        entity.add_attribute(CREATED_AT, AttributeType::Date).required();
        entity.add_attribute(UPDATED_AT, AttributeType::Date).required();
        entity.index(&[LOCAL_ID]);
        entity.unique(&[LOCAL_ID]);

        configure(&mut entity);
        id
    }

    /// Describes an entity without lifecycle properties.
    ///
    /// Used for partial or legacy schemas. If `configure` declares any of the
    /// well-known lifecycle properties with the expected type, the record
    /// hooks still manage them.
    pub fn describe_unmanaged<F>(&mut self, name: &str, configure: F) -> EntityId
    where
        F: FnOnce(&mut EntityBuilder<'_>),
    {
        let id = self.push_entity(name);
        configure(&mut EntityBuilder {
            entities: &mut self.entities,
            id,
        });
        id
    }

    /// Reopens an already described entity for further configuration.
    pub fn entity(&mut self, id: EntityId) -> EntityBuilder<'_> {
        if id.0 >= self.entities.len() {
            fatal(SchemaError::UnknownEntity(id));
        }
        EntityBuilder {
            entities: &mut self.entities,
            id,
        }
    }

    /// Freezes the arena into an immutable model.
    pub fn build(mut self) -> Model {
        for entity in &mut self.entities {
            entity.managed_fields = resolve_managed_fields(entity);
        }
        Model {
            name: self.name,
            entities: self.entities,
        }
    }

    fn push_entity(&mut self, name: &str) -> EntityId {
        if self.entities.iter().any(|entity| entity.name == name) {
            fatal(SchemaError::DuplicateEntity(name.to_string()));
        }
        let id = EntityId(self.entities.len());
        self.entities
            .push(EntityDescription::new(id, name.to_string()));
        id
    }
}

/// Mutable view of one entity while its model is under construction.
pub struct EntityBuilder<'a> {
    entities: &'a mut Vec<EntityDescription>,
    id: EntityId,
}

impl EntityBuilder<'_> {
    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.entities[self.id.0].name.as_str()
    }

    pub fn description(&self) -> &EntityDescription {
        &self.entities[self.id.0]
    }

    /// Appends an optional attribute and returns it for further configuration.
    ///
    /// # Panics
    /// - When the entity already declares a property named `name`.
    pub fn add_attribute(
        &mut self,
        name: &str,
        attribute_type: AttributeType,
    ) -> &mut AttributeDescription {
        match self.try_add_attribute(name, attribute_type) {
            Ok(attribute) => attribute,
            Err(err) => fatal(err),
        }
    }

    pub fn try_add_attribute(
        &mut self,
        name: &str,
        attribute_type: AttributeType,
    ) -> Result<&mut AttributeDescription, SchemaError> {
        let entity = &mut self.entities[self.id.0];
        if entity.property(name).is_some() {
            return Err(SchemaError::DuplicateProperty {
                entity: entity.name.clone(),
                property: name.to_string(),
            });
        }

        entity
            .properties
            .push(PropertyDescription::Attribute(AttributeDescription::new(
                name,
                attribute_type,
            )));
        match entity.properties.last_mut() {
            Some(PropertyDescription::Attribute(attribute)) => Ok(attribute),
            _ => unreachable!("an attribute was pushed last"),
        }
    }

    /// Indexes the named properties under a derived index name.
    ///
    /// # Panics
    /// - When any name is not a property of this entity.
    pub fn index(&mut self, properties: &[&str]) {
        if let Err(err) = self.try_index(properties) {
            fatal(err);
        }
    }

    /// Same as [`EntityBuilder::index`], reporting the authoring error.
    pub fn try_index(&mut self, properties: &[&str]) -> Result<(), SchemaError> {
        let name = IndexDescription::derived_name(self.name(), properties);
        self.try_index_named(&name, properties)
    }

    /// Indexes the named properties under an explicit index name.
    ///
    /// # Panics
    /// - When any name is not a property of this entity.
    pub fn index_named(&mut self, name: &str, properties: &[&str]) {
        if let Err(err) = self.try_index_named(name, properties) {
            fatal(err);
        }
    }

    fn try_index_named(&mut self, name: &str, properties: &[&str]) -> Result<(), SchemaError> {
        let entity = &mut self.entities[self.id.0];
        let mut elements = Vec::with_capacity(properties.len());
        for property in properties {
            if entity.property(property).is_none() {
                return Err(SchemaError::UnknownProperty {
                    entity: entity.name.clone(),
                    property: property.to_string(),
                });
            }
            elements.push(IndexElement {
                property: property.to_string(),
                collation: Collation::Binary,
            });
        }

        entity.indexes.push(IndexDescription {
            name: name.to_string(),
            elements,
        });
        Ok(())
    }

    /// Appends a uniqueness group.
    ///
    /// Names are not checked here; the storage engine rejects unknown names
    /// when it loads a store against the model.
    pub fn unique(&mut self, properties: &[&str]) {
        self.entities[self.id.0]
            .uniqueness_constraints
            .push(properties.iter().map(|name| name.to_string()).collect());
    }

    /// Declares a required to-one relationship to `destination`.
    ///
    /// The inverse (`inverse` on `destination`) is to-many. Both directions
    /// default to `DeleteRule::Nullify`.
    ///
    /// # Panics
    /// - When `destination` is unknown or either name is already taken.
    pub fn belongs_to(
        &mut self,
        destination: EntityId,
        property: &str,
        inverse: &str,
    ) -> RelationshipBuilder<'_> {
        self.relate(destination, property, inverse, Some(1), 1, None)
    }

    /// Declares a to-many relationship to `destination`.
    ///
    /// The inverse (`inverse` on `destination`) is an optional to-one.
    ///
    /// # Panics
    /// - When `destination` is unknown or either name is already taken.
    pub fn has_many(
        &mut self,
        destination: EntityId,
        property: &str,
        inverse: &str,
    ) -> RelationshipBuilder<'_> {
        self.relate(destination, property, inverse, None, 0, Some(1))
    }

    fn relate(
        &mut self,
        destination: EntityId,
        property: &str,
        inverse: &str,
        forward_max: Option<u32>,
        forward_min: u32,
        inverse_max: Option<u32>,
    ) -> RelationshipBuilder<'_> {
        match self.try_relate(destination, property, inverse, forward_max, forward_min, inverse_max)
        {
            Ok((forward, inverse)) => RelationshipBuilder {
                entities: &mut *self.entities,
                forward,
                inverse,
            },
            Err(err) => fatal(err),
        }
    }

    fn try_relate(
        &mut self,
        destination: EntityId,
        property: &str,
        inverse: &str,
        forward_max: Option<u32>,
        forward_min: u32,
        inverse_max: Option<u32>,
    ) -> Result<(RelationshipRef, RelationshipRef), SchemaError> {
        if destination.0 >= self.entities.len() {
            return Err(SchemaError::UnknownEntity(destination));
        }

        let source = &self.entities[self.id.0];
        let target = &self.entities[destination.0];
        let self_referencing_clash = destination == self.id && property == inverse;
        if source.property(property).is_some() || self_referencing_clash {
            return Err(SchemaError::DuplicateProperty {
                entity: source.name.clone(),
                property: property.to_string(),
            });
        }
        if target.property(inverse).is_some() {
            return Err(SchemaError::DuplicateProperty {
                entity: target.name.clone(),
                property: inverse.to_string(),
            });
        }

        let forward_ref = RelationshipRef {
            entity: self.id,
            position: source.properties.len(),
        };
        let inverse_ref = RelationshipRef {
            entity: destination,
            position: if destination == self.id {
                forward_ref.position + 1
            } else {
                target.properties.len()
            },
        };

        self.entities[self.id.0]
            .properties
            .push(PropertyDescription::Relationship(RelationshipDescription {
                name: property.to_string(),
                destination,
                inverse: inverse_ref,
                min_count: forward_min,
                max_count: forward_max,
                delete_rule: DeleteRule::Nullify,
            }));
        self.entities[destination.0]
            .properties
            .push(PropertyDescription::Relationship(RelationshipDescription {
                name: inverse.to_string(),
                destination: self.id,
                inverse: forward_ref,
                min_count: 0,
                max_count: inverse_max,
                delete_rule: DeleteRule::Nullify,
            }));

        Ok((forward_ref, inverse_ref))
    }
}

/// Adjusts a freshly created relationship pair.
pub struct RelationshipBuilder<'a> {
    entities: &'a mut Vec<EntityDescription>,
    forward: RelationshipRef,
    inverse: RelationshipRef,
}

impl RelationshipBuilder<'_> {
    pub fn forward(&self) -> RelationshipRef {
        self.forward
    }

    pub fn inverse(&self) -> RelationshipRef {
        self.inverse
    }

    /// Lets the forward side be empty.
    pub fn optional(&mut self) -> &mut Self {
        self.relationship_mut(self.forward).min_count = 0;
        self
    }

    pub fn required(&mut self, required: bool) -> &mut Self {
        self.relationship_mut(self.forward).min_count = u32::from(required);
        self
    }

    /// Rule applied to the destination when the owning record is deleted.
    pub fn delete_rule(&mut self, rule: DeleteRule) -> &mut Self {
        self.relationship_mut(self.forward).delete_rule = rule;
        self
    }

    /// Rule applied to the owner when a destination record is deleted.
    pub fn inverse_delete_rule(&mut self, rule: DeleteRule) -> &mut Self {
        self.relationship_mut(self.inverse).delete_rule = rule;
        self
    }

    fn relationship_mut(&mut self, reference: RelationshipRef) -> &mut RelationshipDescription {
        match &mut self.entities[reference.entity.0].properties[reference.position] {
            PropertyDescription::Relationship(relationship) => relationship,
            PropertyDescription::Attribute(_) => {
                unreachable!("relationship handles always point at relationships")
            }
        }
    }
}

fn fatal(err: SchemaError) -> ! {
    error!("event=schema_build module=schema status=error error={err}");
    panic!("schema authoring error: {err}");
}

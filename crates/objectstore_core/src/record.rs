//! Record handles and the typed model-object surface.
//!
//! # Responsibility
//! - Hold one record's attribute and to-one relationship values inside a
//!   session, together with its save-tracking state.
//! - Run lifecycle hooks: identity and timestamps on first insert,
//!   `updated_at` refresh before every save.
//! - Let typed wrappers (`ModelObject`) reuse `insert`/`find`/`fetch_all`.
//!
//! # Invariants
//! - A `Record` is bound to the session that produced it; the handle is
//!   neither `Send` nor `Sync`.
//! - `local_id` is assigned exactly once and cannot be reassigned.
//! - `set` stores only values whose shape matches the declared type.

use crate::error::{Error, Result};
use crate::predicate::{FetchRequest, Subject};
use crate::schema::{
    AttributeType, EntityDescription, EntityId, ManagedRule, Model, PropertyDescription,
};
use crate::session::SessionContext;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt::{Debug, Display, Formatter};
use std::rc::Rc;
use std::sync::Arc;
use uuid::Uuid;

/// Session-independent identity of one stored record.
///
/// Unlike `Record`, an `ObjectId` may cross threads and be resolved in any
/// session with `SessionContext::existing`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ObjectId {
    entity: EntityId,
    key: Uuid,
}

impl ObjectId {
    pub(crate) fn new(entity: EntityId, key: Uuid) -> Self {
        Self { entity, key }
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }

    /// Storage key of the row.
    pub fn key(&self) -> Uuid {
        self.key
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.entity, self.key)
    }
}

#[derive(Debug, Default)]
struct RecordState {
    values: BTreeMap<String, Value>,
    /// Values as of the last successful save or load.
    committed: BTreeMap<String, Value>,
    /// Store the row lives in; `None` until first saved.
    store: Option<Uuid>,
    inserted: bool,
    deleted: bool,
    /// Edited since the last save.
    changed: bool,
    /// Edited since pending changes were last processed.
    unprocessed: bool,
}

struct RecordInner {
    id: ObjectId,
    model: Arc<Model>,
    state: RefCell<RecordState>,
}

/// Session-bound handle to one record.
///
/// Clones share state; use `object_id` to refer to the record elsewhere.
#[derive(Clone)]
pub struct Record {
    inner: Rc<RecordInner>,
}

impl Record {
    pub(crate) fn new_inserted(id: ObjectId, model: Arc<Model>) -> Self {
        Self::with_state(
            id,
            model,
            RecordState {
                inserted: true,
                ..RecordState::default()
            },
        )
    }

    pub(crate) fn from_row(
        id: ObjectId,
        model: Arc<Model>,
        store: Uuid,
        values: BTreeMap<String, Value>,
    ) -> Self {
        Self::with_state(
            id,
            model,
            RecordState {
                committed: values.clone(),
                values,
                store: Some(store),
                ..RecordState::default()
            },
        )
    }

    fn with_state(id: ObjectId, model: Arc<Model>, state: RecordState) -> Self {
        Self {
            inner: Rc::new(RecordInner {
                id,
                model,
                state: RefCell::new(state),
            }),
        }
    }

    pub fn object_id(&self) -> ObjectId {
        self.inner.id
    }

    pub fn entity(&self) -> &EntityDescription {
        self.inner.model.entity(self.inner.id.entity)
    }

    pub fn entity_name(&self) -> &str {
        self.entity().name()
    }

    /// Returns the current value of `key`, `Value::Null` when unset.
    pub fn get(&self, key: &str) -> Value {
        self.inner
            .state
            .borrow()
            .values
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key) {
            Value::String(text) => Some(text),
            _ => None,
        }
    }

    /// Assigns an attribute or to-one relationship.
    ///
    /// # Errors
    /// - `UnknownProperty` when the entity declares no such property.
    /// - `TypeMismatch` when the value does not fit the declared type, or
    ///   when the target of a relationship has the wrong entity.
    /// - `ImmutableProperty` when reassigning an assigned identity.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let value = self.checked_value(key, value.into())?;
        self.write(key, value, true);
        Ok(())
    }

    /// Points the to-one relationship `relationship` at `target`.
    pub fn set_related(&self, relationship: &str, target: Option<&Record>) -> Result<()> {
        self.set(relationship, target.map(Record::object_id))
    }

    /// Target of a to-one relationship.
    pub fn related_id(&self, relationship: &str) -> Option<ObjectId> {
        self.get(relationship).as_reference()
    }

    pub fn local_id(&self) -> Option<Uuid> {
        self.managed_value(ManagedRule::Identity)
            .and_then(|value| value.as_uuid())
    }

    pub fn created_at(&self) -> Option<i64> {
        self.managed_value(ManagedRule::CreatedAt)
            .and_then(|value| value.as_i64())
    }

    pub fn updated_at(&self) -> Option<i64> {
        self.managed_value(ManagedRule::UpdatedAt)
            .and_then(|value| value.as_i64())
    }

    /// Inserted in its session and not yet saved.
    pub fn is_inserted(&self) -> bool {
        self.inner.state.borrow().inserted
    }

    pub fn is_deleted(&self) -> bool {
        self.inner.state.borrow().deleted
    }

    /// Has unsaved inserts, edits or a pending delete.
    pub fn has_changes(&self) -> bool {
        let state = self.inner.state.borrow();
        state.inserted || state.deleted || state.changed
    }

    /// Snapshot of every assigned value.
    pub fn values(&self) -> BTreeMap<String, Value> {
        self.inner.state.borrow().values.clone()
    }

    pub(crate) fn store(&self) -> Option<Uuid> {
        self.inner.state.borrow().store
    }

    /// First-insert hook: defaults, then identity and timestamps.
    pub(crate) fn awake_from_insert(&self, now: i64) {
        let entity = self.entity();
        for attribute in entity.attributes() {
            if let Some(default) = &attribute.default_value {
                self.write(&attribute.name, default.clone(), false);
            }
        }
        for field in entity.managed_fields() {
            let value = match field.rule {
                ManagedRule::Identity => Value::Uuid(Uuid::new_v4()),
                ManagedRule::CreatedAt | ManagedRule::UpdatedAt => Value::Date(now),
            };
            self.write(&field.property, value, false);
        }
    }

    /// Pre-save hook. Bypasses validation and change tracking.
    pub(crate) fn will_save(&self, now: i64) {
        for field in self.entity().managed_fields() {
            if field.rule == ManagedRule::UpdatedAt {
                self.write(&field.property, Value::Date(now), false);
            }
        }
    }

    pub(crate) fn mark_deleted(&self) {
        let mut state = self.inner.state.borrow_mut();
        state.deleted = true;
    }

    /// Clears the unprocessed flag, reporting whether it was set.
    pub(crate) fn take_unprocessed(&self) -> bool {
        std::mem::take(&mut self.inner.state.borrow_mut().unprocessed)
    }

    pub(crate) fn is_changed(&self) -> bool {
        self.inner.state.borrow().changed
    }

    /// Records a successful save into `store`.
    pub(crate) fn mark_saved(&self, store: Uuid) {
        let mut state = self.inner.state.borrow_mut();
        state.committed = state.values.clone();
        state.store = Some(store);
        state.inserted = false;
        state.changed = false;
    }

    /// Discards unsaved edits and a pending delete.
    pub(crate) fn revert(&self) {
        let mut state = self.inner.state.borrow_mut();
        state.values = state.committed.clone();
        state.deleted = false;
        state.changed = false;
        state.unprocessed = false;
    }

    /// Raw assignment used by hooks and delete propagation.
    pub(crate) fn write(&self, key: &str, value: Value, track: bool) {
        let mut state = self.inner.state.borrow_mut();
        let previous = if value.is_null() {
            state.values.remove(key)
        } else {
            state.values.insert(key.to_string(), value.clone())
        };
        if track && previous.unwrap_or_default() != value {
            state.changed = true;
            state.unprocessed = true;
        }
    }

    fn managed_value(&self, rule: ManagedRule) -> Option<Value> {
        self.entity()
            .managed_fields()
            .iter()
            .find(|field| field.rule == rule)
            .map(|field| self.get(&field.property))
    }

    fn checked_value(&self, key: &str, value: Value) -> Result<Value> {
        let entity = self.entity();
        let mismatch = |expected: &'static str, found: &Value| Error::TypeMismatch {
            entity: entity.name().to_string(),
            property: key.to_string(),
            expected,
            found: found.type_name(),
        };
        match entity.property(key) {
            None => Err(Error::UnknownProperty {
                entity: entity.name().to_string(),
                property: key.to_string(),
            }),
            Some(PropertyDescription::Attribute(attribute)) => {
                let is_identity = entity
                    .managed_fields()
                    .iter()
                    .any(|field| field.rule == ManagedRule::Identity && field.property == key);
                if is_identity && !self.get(key).is_null() {
                    return Err(Error::ImmutableProperty {
                        entity: entity.name().to_string(),
                        property: key.to_string(),
                    });
                }
                let found = value.type_name();
                value.coerce_to(attribute.attribute_type).ok_or_else(|| Error::TypeMismatch {
                    entity: entity.name().to_string(),
                    property: key.to_string(),
                    expected: attribute_type_name(attribute.attribute_type),
                    found,
                })
            }
            Some(PropertyDescription::Relationship(relationship)) if relationship.is_to_many() => {
                Err(mismatch("to-one relationship", &value))
            }
            Some(PropertyDescription::Relationship(relationship)) => match &value {
                Value::Null => Ok(value),
                Value::Reference(target) if target.entity() == relationship.destination => {
                    Ok(value)
                }
                other => Err(mismatch("reference", other)),
            },
        }
    }
}

fn attribute_type_name(attribute_type: AttributeType) -> &'static str {
    match attribute_type {
        AttributeType::Boolean => "bool",
        AttributeType::Integer => "integer",
        AttributeType::Double => "double",
        AttributeType::String => "string",
        AttributeType::Uuid => "uuid",
        AttributeType::Date => "date",
        AttributeType::Binary => "binary",
    }
}

impl Subject for Record {
    fn value_for_key(&self, key: &str) -> Option<Value> {
        self.inner.state.borrow().values.get(key).cloned()
    }
}

impl Debug for Record {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Record")
            .field("entity", &self.entity_name())
            .field("id", &self.inner.id)
            .field("values", &state.values)
            .field("inserted", &state.inserted)
            .field("deleted", &state.deleted)
            .finish()
    }
}

/// Typed wrapper over one entity's records.
///
/// Implementors name their entity and convert from a `Record`; the
/// lifecycle conveniences come for free.
pub trait ModelObject: Sized {
    const ENTITY: &'static str;

    fn from_record(record: Record) -> Self;

    fn record(&self) -> &Record;

    /// Inserts a new instance into `context`, running first-insert hooks.
    fn insert(context: &mut SessionContext) -> Result<Self> {
        context.insert(Self::ENTITY).map(Self::from_record)
    }

    /// Finds the instance whose `local_id` is `local_id`.
    ///
    /// # Errors
    /// - `Error::NotFound` when no record matches.
    fn find(local_id: Uuid, context: &mut SessionContext) -> Result<Self> {
        context.find(Self::ENTITY, local_id).map(Self::from_record)
    }

    fn fetch_all(context: &mut SessionContext) -> Result<Vec<Self>> {
        Ok(context
            .fetch(&FetchRequest::new(Self::ENTITY))?
            .into_iter()
            .map(Self::from_record)
            .collect())
    }

    fn object_id(&self) -> ObjectId {
        self.record().object_id()
    }

    fn local_id(&self) -> Option<Uuid> {
        self.record().local_id()
    }

    fn created_at(&self) -> Option<i64> {
        self.record().created_at()
    }

    fn updated_at(&self) -> Option<i64> {
        self.record().updated_at()
    }
}

//! Unit of work owned by one session worker.
//!
//! # Responsibility
//! - Register every record the session inserts, fetches or resolves.
//! - Merge unsaved work into fetch results.
//! - Run the save pipeline: delete rules, change processing, pre-save
//!   hooks, validation, then one commit per store.
//!
//! # Invariants
//! - One `Record` instance per `ObjectId` per context.
//! - A failed save leaves the context dirty; `rollback` discards it.
//! - Change notifications only ever describe processed changes.

use crate::db::RowChange;
use crate::error::{Error, Result};
use crate::manager::coordinator::Coordinator;
use crate::predicate::{FetchRequest, Predicate};
use crate::record::{ObjectId, Record};
use crate::schema::{DeleteRule, EntityDescription, Model};
use crate::session::changes::{ChangeObservers, ChangedObjects};
use crate::session::SessionKind;
use crate::value::{now_epoch_ms, Value};
use log::{debug, info, trace};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

pub struct SessionContext {
    id: u64,
    kind: SessionKind,
    coordinator: Arc<Coordinator>,
    observers: Arc<ChangeObservers>,
    registry: BTreeMap<ObjectId, Record>,
    unprocessed_inserted: BTreeSet<ObjectId>,
    unprocessed_deleted: BTreeSet<ObjectId>,
}

impl SessionContext {
    pub(crate) fn new(
        id: u64,
        kind: SessionKind,
        coordinator: Arc<Coordinator>,
        observers: Arc<ChangeObservers>,
    ) -> Self {
        Self {
            id,
            kind,
            coordinator,
            observers,
            registry: BTreeMap::new(),
            unprocessed_inserted: BTreeSet::new(),
            unprocessed_deleted: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn model(&self) -> &Model {
        self.coordinator.model()
    }

    /// Number of records currently registered in this context.
    pub fn registered_count(&self) -> usize {
        self.registry.len()
    }

    /// Creates a record of `entity` and runs its first-insert hook.
    pub fn insert(&mut self, entity: &str) -> Result<Record> {
        let model = self.coordinator.model().clone();
        let description = entity_named(&model, entity)?;
        let id = ObjectId::new(description.id(), Uuid::new_v4());
        let record = Record::new_inserted(id, model.clone());
        record.awake_from_insert(now_epoch_ms());

        self.registry.insert(id, record.clone());
        self.unprocessed_inserted.insert(id);
        trace!(
            "event=record_insert module=session status=ok session={} entity={}",
            self.id,
            description.name()
        );
        Ok(record)
    }

    /// Runs `request` over stored rows merged with this context's unsaved work.
    ///
    /// Results are registered in the context.
    pub fn fetch(&mut self, request: &FetchRequest) -> Result<Vec<Record>> {
        let matched = self.matching(request)?;
        for record in &matched {
            self.registry
                .entry(record.object_id())
                .or_insert_with(|| record.clone());
        }
        Ok(matched)
    }

    /// Counts what `fetch` would return without registering anything.
    pub fn count(&self, request: &FetchRequest) -> Result<usize> {
        Ok(self.matching(request)?.len())
    }

    /// Looks a record up by its `local_id`.
    ///
    /// # Errors
    /// - `Error::NotFound` when no record of `entity` carries that identity.
    pub fn find(&mut self, entity: &str, local_id: Uuid) -> Result<Record> {
        let model = self.coordinator.model().clone();
        let entity = entity_named(&model, entity)?;

        let registered = self.registry.iter().find(|(id, record)| {
            id.entity() == entity.id()
                && !record.is_deleted()
                && record.local_id() == Some(local_id)
        });
        if let Some((_, record)) = registered {
            return Ok(record.clone());
        }

        for (store, row) in self.coordinator.fetch_by_local_id(entity, local_id)? {
            let id = ObjectId::new(entity.id(), row.key);
            // Registered rows were checked above; only deleted ones remain.
            if self.registry.contains_key(&id) {
                continue;
            }
            let record = Record::from_row(id, model.clone(), store, row.values);
            self.registry.insert(id, record.clone());
            return Ok(record);
        }
        Err(Error::NotFound(local_id))
    }

    /// Resolves an identifier handed over from another session.
    pub fn existing(&mut self, object: ObjectId) -> Result<Record> {
        if let Some(record) = self.registry.get(&object) {
            if record.is_deleted() {
                return Err(Error::ObjectNotFound(object));
            }
            return Ok(record.clone());
        }

        let model = self.coordinator.model().clone();
        let entity = model
            .entities()
            .get(object.entity().index())
            .ok_or(Error::ObjectNotFound(object))?;
        match self.coordinator.fetch_row(entity, object.key())? {
            Some((store, row)) => {
                let record = Record::from_row(object, model.clone(), store, row.values);
                self.registry.insert(object, record.clone());
                Ok(record)
            }
            None => Err(Error::ObjectNotFound(object)),
        }
    }

    /// Marks `record` for deletion at the next save.
    pub fn delete(&mut self, record: &Record) {
        let id = record.object_id();
        let registered = self
            .registry
            .entry(id)
            .or_insert_with(|| record.clone())
            .clone();
        if registered.is_deleted() {
            return;
        }
        registered.mark_deleted();
        self.unprocessed_deleted.insert(id);
    }

    /// Records on the other end of `relationship`.
    ///
    /// To-many sides are derived from the inverse to-one values, so unsaved
    /// assignments in this context are included.
    pub fn related(&mut self, record: &Record, relationship: &str) -> Result<Vec<Record>> {
        let model = self.coordinator.model().clone();
        let unknown = || Error::UnknownProperty {
            entity: record.entity_name().to_string(),
            property: relationship.to_string(),
        };
        let description = record.entity().relationship(relationship).ok_or_else(unknown)?;

        if !description.is_to_many() {
            let Some(target) = record.related_id(relationship) else {
                return Ok(Vec::new());
            };
            return match self.existing(target) {
                Ok(found) => Ok(vec![found]),
                Err(Error::ObjectNotFound(_)) => Ok(Vec::new()),
                Err(err) => Err(err),
            };
        }

        let inverse = model.relationship(description.inverse).ok_or_else(unknown)?;
        let destination = model.entity(description.destination);
        self.fetch(
            &FetchRequest::new(destination.name())
                .predicate(Predicate::key(inverse.name.clone()).eq(record.object_id())),
        )
    }

    pub fn has_changes(&self) -> bool {
        self.registry.values().any(Record::has_changes)
    }

    /// Folds pending edits into one change batch and notifies observers.
    ///
    /// A record inserted and deleted within the same batch is reported in
    /// neither list.
    pub fn process_pending_changes(&mut self) {
        let inserted = std::mem::take(&mut self.unprocessed_inserted);
        let deleted = std::mem::take(&mut self.unprocessed_deleted);

        let mut changes = ChangedObjects {
            inserted: inserted.difference(&deleted).copied().collect(),
            deleted: deleted.difference(&inserted).copied().collect(),
            updated: Vec::new(),
        };
        for (id, record) in &self.registry {
            if record.take_unprocessed() && !inserted.contains(id) && !deleted.contains(id) {
                changes.updated.push(*id);
            }
        }

        if changes.is_empty() {
            return;
        }
        debug!(
            "event=changes_processed module=session status=ok session={} inserted={} updated={} deleted={}",
            self.id,
            changes.inserted.len(),
            changes.updated.len(),
            changes.deleted.len()
        );
        self.observers.notify(&changes);
    }

    /// Persists every pending change.
    ///
    /// # Errors
    /// - `DeleteDenied` when a `Deny` relationship still has members.
    /// - `Validation`/`TypeMismatch` for the first invalid record.
    /// - Storage errors from the commit; nothing is persisted then.
    pub fn save(&mut self) -> Result<()> {
        let started_at = Instant::now();
        self.propagate_deletes()?;
        self.process_pending_changes();

        let now = now_epoch_ms();
        let mut batches: BTreeMap<Uuid, Vec<RowChange>> = BTreeMap::new();
        let mut saved = Vec::new();
        let mut removed = Vec::new();
        let mut default_store = None;

        for (id, record) in &self.registry {
            match (record.is_inserted(), record.is_deleted()) {
                (true, true) => removed.push((*id, None)),
                (false, true) => {
                    let store = record.store().ok_or(Error::ObjectNotFound(*id))?;
                    batches
                        .entry(store)
                        .or_default()
                        .push(RowChange::Delete { key: id.key() });
                    removed.push((*id, Some(store)));
                }
                (true, false) => {
                    record.will_save(now);
                    validate(record)?;
                    let store = match default_store {
                        Some(store) => store,
                        None => {
                            let store = self.coordinator.default_store()?;
                            default_store = Some(store);
                            store
                        }
                    };
                    batches.entry(store).or_default().push(RowChange::Insert {
                        entity: id.entity(),
                        key: id.key(),
                        values: record.values(),
                    });
                    saved.push((record.clone(), store));
                }
                (false, false) if record.is_changed() => {
                    record.will_save(now);
                    validate(record)?;
                    let store = record.store().ok_or(Error::ObjectNotFound(*id))?;
                    batches.entry(store).or_default().push(RowChange::Update {
                        entity: id.entity(),
                        key: id.key(),
                        values: record.values(),
                    });
                    saved.push((record.clone(), store));
                }
                (false, false) => {}
            }
        }

        let mut committed = Vec::new();
        let outcome = if batches.is_empty() {
            Ok(())
        } else {
            // Deletes first so a replacement row can reuse a unique value.
            for batch in batches.values_mut() {
                batch.sort_by_key(|change| match change {
                    RowChange::Delete { .. } => 0,
                    RowChange::Update { .. } => 1,
                    RowChange::Insert { .. } => 2,
                });
            }
            self.coordinator.commit(&batches, &mut committed)
        };

        // Records in stores that committed match storage even if a later
        // store failed.
        let settled = |store: &Uuid| outcome.is_ok() || committed.contains(store);
        for (record, store) in &saved {
            if settled(store) {
                record.mark_saved(*store);
            }
        }
        for (id, store) in &removed {
            if store.as_ref().map_or(true, settled) {
                self.registry.remove(id);
            }
        }
        if let Err(error) = outcome {
            info!(
                "event=session_save module=session status=error session={} committed_stores={} error={}",
                self.id,
                committed.len(),
                error
            );
            return Err(error);
        }
        if !saved.is_empty() || !removed.is_empty() {
            info!(
                "event=session_save module=session status=ok session={} saved={} removed={} duration_ms={}",
                self.id,
                saved.len(),
                removed.len(),
                started_at.elapsed().as_millis()
            );
        }
        Ok(())
    }

    /// Discards unsaved inserts, edits and deletes.
    pub fn rollback(&mut self) {
        let mut discarded = Vec::new();
        for (id, record) in &self.registry {
            if record.is_inserted() {
                record.mark_deleted();
                discarded.push(*id);
            } else {
                record.revert();
            }
        }
        for id in &discarded {
            self.registry.remove(id);
        }
        self.unprocessed_inserted.clear();
        self.unprocessed_deleted.clear();
        debug!(
            "event=session_rollback module=session status=ok session={} discarded={}",
            self.id,
            discarded.len()
        );
    }

    fn matching(&self, request: &FetchRequest) -> Result<Vec<Record>> {
        let model = self.coordinator.model();
        let entity = entity_named(model, &request.entity)?;

        let mut seen = BTreeSet::new();
        let mut candidates = Vec::new();
        for (store, row) in self.coordinator.fetch_rows(entity)? {
            let id = ObjectId::new(entity.id(), row.key);
            if !seen.insert(id) {
                continue;
            }
            let record = match self.registry.get(&id) {
                Some(registered) => registered.clone(),
                None => Record::from_row(id, model.clone(), store, row.values),
            };
            if !record.is_deleted() {
                candidates.push(record);
            }
        }
        for (id, record) in &self.registry {
            if id.entity() == entity.id()
                && record.is_inserted()
                && !record.is_deleted()
                && !seen.contains(id)
            {
                candidates.push(record.clone());
            }
        }

        candidates.retain(|record| request.matches(record));
        candidates.sort_by(|left, right| request.order(left, right));
        Ok(candidates
            .into_iter()
            .skip(request.offset)
            .take(request.limit.unwrap_or(usize::MAX))
            .collect())
    }

    /// Applies delete rules transitively from every record marked deleted.
    fn propagate_deletes(&mut self) -> Result<()> {
        let model = self.coordinator.model().clone();
        let mut pending: Vec<Record> = self
            .registry
            .values()
            .filter(|record| record.is_deleted())
            .cloned()
            .collect();
        let mut visited = BTreeSet::new();

        while let Some(record) = pending.pop() {
            let id = record.object_id();
            if !visited.insert(id) {
                continue;
            }
            let entity = model.entity(id.entity());
            for relationship in entity.relationships() {
                if relationship.delete_rule == DeleteRule::NoAction {
                    continue;
                }
                let related = self.related(&record, &relationship.name)?;
                if related.is_empty() {
                    continue;
                }
                match relationship.delete_rule {
                    DeleteRule::Deny => {
                        return Err(Error::DeleteDenied {
                            entity: entity.name().to_string(),
                            relationship: relationship.name.clone(),
                        });
                    }
                    DeleteRule::Cascade => {
                        for target in related {
                            self.delete(&target);
                            pending.push(target);
                        }
                    }
                    DeleteRule::Nullify => {
                        let Some(inverse) = model.relationship(relationship.inverse) else {
                            continue;
                        };
                        if inverse.is_to_many() {
                            continue;
                        }
                        for target in related {
                            if target.related_id(&inverse.name) == Some(id) {
                                target.write(&inverse.name, Value::Null, true);
                            }
                        }
                    }
                    DeleteRule::NoAction => {}
                }
            }
        }
        Ok(())
    }
}

fn entity_named<'m>(model: &'m Model, name: &str) -> Result<&'m EntityDescription> {
    model
        .entity_named(name)
        .ok_or_else(|| Error::UnknownEntity(name.to_string()))
}

/// Checks declared types, optionality, validators and required to-one links.
fn validate(record: &Record) -> Result<()> {
    let entity = record.entity();
    let failure = |property: &str, message: String| Error::Validation {
        entity: entity.name().to_string(),
        property: property.to_string(),
        message,
    };

    for attribute in entity.attributes() {
        let value = record.get(&attribute.name);
        if value.is_null() {
            if !attribute.optional {
                return Err(failure(&attribute.name, "value is required".to_string()));
            }
            continue;
        }
        if value.clone().coerce_to(attribute.attribute_type).is_none() {
            return Err(failure(
                &attribute.name,
                format!("{} does not fit {:?}", value.type_name(), attribute.attribute_type),
            ));
        }
        for rule in &attribute.validators {
            if !rule.predicate.evaluate_with(Some(&value), record) {
                return Err(failure(&attribute.name, rule.message.clone()));
            }
        }
    }

    for relationship in entity.relationships() {
        if !relationship.is_to_many()
            && relationship.is_required()
            && record.related_id(&relationship.name).is_none()
        {
            return Err(failure(
                &relationship.name,
                "relationship is required".to_string(),
            ));
        }
    }
    Ok(())
}

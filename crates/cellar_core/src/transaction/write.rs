//! Write transactions.

use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::object::ObjectRef;
use crate::query::Results;
use crate::schema::TypeLayout;
use crate::transaction::state::{ChangeLog, TransactionState};
use crate::types::{CollectionId, ObjectId, SnapshotVersion, TransactionId};
use crate::value::Value;
use crate::view::{TxnView, View};
use parking_lot::MutexGuard;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// A write transaction.
///
/// Holds the database's write lock from begin until commit or cancel.
/// Reads inside the transaction see the base snapshot plus the
/// transaction's own writes; nothing is visible to other readers until
/// [`WriteTransaction::commit`] publishes a new version.
///
/// Dropping an active transaction cancels it.
pub struct WriteTransaction<'db> {
    db: &'db Database,
    guard: Option<MutexGuard<'db, ()>>,
    id: TransactionId,
    base: SnapshotVersion,
    state: TransactionState,
    view: Arc<TxnView>,
    changes: ChangeLog,
    violation: Option<(String, String)>,
}

impl<'db> WriteTransaction<'db> {
    pub(crate) fn new(
        db: &'db Database,
        guard: MutexGuard<'db, ()>,
        id: TransactionId,
        base: SnapshotVersion,
        view: Arc<TxnView>,
    ) -> Self {
        Self {
            db,
            guard: Some(guard),
            id,
            base,
            state: TransactionState::Active,
            view,
            changes: ChangeLog::default(),
            violation: None,
        }
    }

    /// Transaction id.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Version the transaction started from.
    #[must_use]
    pub fn base_version(&self) -> SnapshotVersion {
        self.base
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Returns true while reads and writes are allowed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Creates an object from values in declaration order.
    ///
    /// # Errors
    ///
    /// Returns `UnknownType`, `TypeMismatch` or `ObjectNotFound` (dangling
    /// reference) without cancelling, and `DuplicateKey` after cancelling.
    pub fn create(&mut self, type_name: &str, values: Vec<Value>) -> CoreResult<ObjectRef> {
        self.ensure_active()?;
        let layout = self.db.schema.layout_by_name(type_name)?;
        layout.check_values(&values)?;
        let collection = layout.id();

        let inserted = {
            let mut state = self.view.state().write();
            for (index, value) in values.iter().enumerate() {
                check_ref_target(&state, layout, index, value)?;
            }
            let id = state.allocate_id();
            state
                .collection_mut(collection)
                .insert(id, values)
                .map(|()| id)
        };
        let id = self.cancel_on_violation(inserted)?;
        self.changes.record_create(collection, id);
        self.db.counters.record_create();
        Ok(self.object(collection, id))
    }

    /// Creates an object from `(property, value)` pairs; omitted optional
    /// properties are null.
    ///
    /// # Errors
    ///
    /// As [`WriteTransaction::create`], plus `UnknownProperty`.
    pub fn create_with<'a, I>(&mut self, type_name: &str, named: I) -> CoreResult<ObjectRef>
    where
        I: IntoIterator<Item = (&'a str, Value)>,
    {
        self.ensure_active()?;
        let values = self
            .db
            .schema
            .layout_by_name(type_name)?
            .values_from_named(named)?;
        self.create(type_name, values)
    }

    /// Assigns one property.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for the primary key, `UnknownProperty`,
    /// `TypeMismatch`, `StaleAccessor` and `ObjectNotFound`.
    pub fn set(
        &mut self,
        object: &ObjectRef,
        property: &str,
        value: impl Into<Value>,
    ) -> CoreResult<()> {
        self.ensure_active()?;
        self.check_accessor(object)?;
        let value = value.into();
        let layout = self.db.schema.layout(object.collection());
        let index = layout.require_property(property)?;
        if layout.primary_key() == Some(index) {
            return Err(CoreError::invalid_operation(format!(
                "primary key '{}.{property}' cannot be changed",
                layout.name()
            )));
        }
        layout.check_value(index, &value)?;

        let updated = {
            let mut state = self.view.state().write();
            check_ref_target(&state, layout, index, &value)?;
            state
                .collection_mut(object.collection())
                .update(object.id(), index, value)
        };
        self.cancel_on_violation(updated)?;
        self.changes.record_update(object.collection(), object.id());
        self.db.counters.record_update();
        Ok(())
    }

    /// Deletes an object. References to it become null.
    ///
    /// # Errors
    ///
    /// Returns `StaleAccessor` or `ObjectNotFound`.
    pub fn delete(&mut self, object: &ObjectRef) -> CoreResult<()> {
        self.ensure_active()?;
        self.check_accessor(object)?;
        self.delete_objects(&[(object.collection(), object.id())])?;
        Ok(())
    }

    /// Deletes every object of every type, returning how many were deleted.
    ///
    /// # Errors
    ///
    /// Returns `TransactionState` unless active.
    pub fn delete_all(&mut self) -> CoreResult<usize> {
        self.ensure_active()?;
        let collections: Vec<CollectionId> =
            self.db.schema.types().iter().map(TypeLayout::id).collect();
        let targets = self.existing(&collections);
        self.delete_objects(&targets)
    }

    /// Deletes every object of one type, returning how many were deleted.
    ///
    /// # Errors
    ///
    /// Returns `UnknownType`.
    pub fn delete_all_of(&mut self, type_name: &str) -> CoreResult<usize> {
        self.ensure_active()?;
        let collection = self.db.schema.layout_by_name(type_name)?.id();
        let targets = self.existing(&[collection]);
        self.delete_objects(&targets)
    }

    /// All objects of a type as seen by this transaction.
    ///
    /// # Errors
    ///
    /// Returns `UnknownType` or `TransactionState`.
    pub fn objects(&self, type_name: &str) -> CoreResult<Results> {
        self.ensure_active()?;
        let collection = self.db.schema.layout_by_name(type_name)?.id();
        self.db.counters.record_query();
        Ok(Results::new(
            View::Transaction(Arc::clone(&self.view)),
            Arc::clone(&self.db.schema),
            collection,
        ))
    }

    /// Looks an object up by primary key.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the type has no primary key.
    pub fn object_for_primary_key(
        &self,
        type_name: &str,
        key: impl Into<Value>,
    ) -> CoreResult<Option<ObjectRef>> {
        self.ensure_active()?;
        let layout = self.db.schema.layout_by_name(type_name)?;
        if layout.primary_key().is_none() {
            return Err(CoreError::invalid_operation(format!(
                "type '{type_name}' has no primary key"
            )));
        }
        let key = key.into();
        let found = self
            .view
            .state()
            .read()
            .collection(layout.id())
            .indexes
            .lookup_primary(&key);
        Ok(found.map(|id| self.object(layout.id(), id)))
    }

    /// Validates the changes and publishes them as one new version.
    ///
    /// A transaction without changes commits without writing and returns
    /// the base version.
    ///
    /// # Errors
    ///
    /// Returns `TransactionState` unless active. Any other failure cancels
    /// the transaction and is returned as is.
    pub fn commit(&mut self) -> CoreResult<SnapshotVersion> {
        self.ensure_active()?;
        self.state = TransactionState::Committing;
        let result = self.db.commit_changes(&self.view, &self.changes);
        match &result {
            Ok(version) => {
                self.state = TransactionState::Committed;
                self.db.counters.record_commit();
                let (created, updated, deleted) = self.changes.counts();
                debug!(txn = %self.id, %version, created, updated, deleted, "committed transaction");
            }
            Err(e) => {
                self.state = TransactionState::Cancelled;
                self.db.counters.record_cancel();
                warn!(txn = %self.id, error = %e, "commit failed; transaction cancelled");
            }
        }
        self.finish();
        result
    }

    /// Discards all changes.
    ///
    /// Cancelling a cancelled transaction does nothing.
    ///
    /// # Errors
    ///
    /// Returns `TransactionState` if the transaction already committed.
    pub fn cancel(&mut self) -> CoreResult<()> {
        match self.state {
            TransactionState::Cancelled => Ok(()),
            TransactionState::Active => {
                self.cancel_with("cancelled by caller");
                Ok(())
            }
            other => Err(CoreError::transaction_state(format!(
                "cannot cancel a {other} transaction"
            ))),
        }
    }

    fn cancel_with(&mut self, reason: &str) {
        self.state = TransactionState::Cancelling;
        let changes = self.changes.len();
        self.changes = ChangeLog::default();
        self.state = TransactionState::Cancelled;
        self.db.counters.record_cancel();
        debug!(txn = %self.id, changes, reason, "cancelled transaction");
        self.finish();
    }

    fn finish(&mut self) {
        self.view.end();
        if let Some(guard) = self.guard.take() {
            self.db.txn_manager.end(guard);
        }
    }

    /// Cancels on invariant violations; other errors leave the transaction
    /// active.
    fn cancel_on_violation<T>(&mut self, result: CoreResult<T>) -> CoreResult<T> {
        if let Err(e @ CoreError::DuplicateKey { type_name, key }) = &result {
            let reason = e.to_string();
            self.violation = Some((type_name.clone(), key.clone()));
            self.cancel_with(&reason);
        }
        result
    }

    /// The invariant violation that cancelled this transaction, if any.
    pub(crate) fn violation(&self) -> Option<CoreError> {
        self.violation
            .as_ref()
            .map(|(type_name, key)| CoreError::duplicate_key(type_name.as_str(), key.as_str()))
    }

    /// Ids currently present in `collections`.
    fn existing(&self, collections: &[CollectionId]) -> Vec<(CollectionId, ObjectId)> {
        let guard = self.view.state().read();
        let state: &crate::collection::State = &guard;
        collections
            .iter()
            .flat_map(move |&collection| {
                state
                    .collection(collection)
                    .iter()
                    .map(move |(id, _)| (collection, id))
            })
            .collect()
    }

    /// Removes `targets`, then nulls references to them with one pass over
    /// each referencing property.
    fn delete_objects(&mut self, targets: &[(CollectionId, ObjectId)]) -> CoreResult<usize> {
        let schema = Arc::clone(&self.db.schema);
        let mut nullified = Vec::new();
        {
            let mut state = self.view.state().write();
            if let Some((_, id)) = targets
                .iter()
                .find(|(collection, id)| !state.contains(*collection, *id))
            {
                return Err(CoreError::object_not_found(format!("{id} does not exist")));
            }

            let mut deleted: HashMap<CollectionId, HashSet<ObjectId>> = HashMap::new();
            for &(collection, id) in targets {
                if state.collection_mut(collection).remove(id).is_some() {
                    deleted.entry(collection).or_default().insert(id);
                }
            }

            for layout in schema.types() {
                for index in 0..layout.properties().len() {
                    let Some(gone) = layout.ref_target(index).and_then(|t| deleted.get(&t)) else {
                        continue;
                    };
                    let referrers: Vec<ObjectId> = state
                        .collection(layout.id())
                        .iter()
                        .filter(|(_, values)| {
                            values[index].as_ref_id().is_some_and(|id| gone.contains(&id))
                        })
                        .map(|(referrer, _)| referrer)
                        .collect();
                    for referrer in referrers {
                        state
                            .collection_mut(layout.id())
                            .update(referrer, index, Value::Null)?;
                        nullified.push((layout.id(), referrer));
                    }
                }
            }
        }
        for &(collection, id) in targets {
            self.changes.record_delete(collection, id);
            self.db.counters.record_delete();
        }
        for (referrer_collection, referrer) in nullified {
            self.changes.record_update(referrer_collection, referrer);
        }
        Ok(targets.len())
    }

    fn ensure_active(&self) -> CoreResult<()> {
        self.db.ensure_open()?;
        if self.state == TransactionState::Active {
            Ok(())
        } else {
            Err(CoreError::transaction_state(format!(
                "{} is {}",
                self.id, self.state
            )))
        }
    }

    fn check_accessor(&self, object: &ObjectRef) -> CoreResult<()> {
        if !object.view().same_database(&self.db.views) {
            return Err(CoreError::invalid_operation(
                "object belongs to a different database",
            ));
        }
        if !object.view().is_live() {
            return Err(CoreError::stale(format!(
                "{} was read through a view that has ended",
                object.id()
            )));
        }
        Ok(())
    }

    fn object(&self, collection: CollectionId, id: ObjectId) -> ObjectRef {
        ObjectRef::new(
            View::Transaction(Arc::clone(&self.view)),
            Arc::clone(&self.db.schema),
            collection,
            id,
        )
    }
}

fn check_ref_target(
    state: &crate::collection::State,
    layout: &TypeLayout,
    index: usize,
    value: &Value,
) -> CoreResult<()> {
    if let (Some(target), Some(id)) = (layout.ref_target(index), value.as_ref_id()) {
        if !state.contains(target, id) {
            return Err(CoreError::object_not_found(format!(
                "'{}.{}' refers to missing {id}",
                layout.name(),
                layout.properties()[index].name
            )));
        }
    }
    Ok(())
}

impl Drop for WriteTransaction<'_> {
    fn drop(&mut self) {
        if self.state == TransactionState::Active {
            self.cancel_with("dropped while active");
        }
    }
}

impl std::fmt::Debug for WriteTransaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTransaction")
            .field("id", &self.id)
            .field("base", &self.base)
            .field("state", &self.state)
            .field("changes", &self.changes.len())
            .finish_non_exhaustive()
    }
}

//! Database handle, open and recovery.

use crate::catalog::{page_id, Catalog, ObjectRecord};
use crate::collection::State;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::file::DatabaseFile;
use crate::object::ObjectRef;
use crate::page::{CompactionStats, FrameInfo, PageStore, StagedPages};
use crate::query::Results;
use crate::schema::{
    map_objects, CompiledSchema, Migration, SchemaDescriptor, SchemaDiff, StoredObject,
};
use crate::stats::{DatabaseStats, StatsCounters, TypeStats};
use crate::transaction::{ChangeKind, ChangeLog, TransactionManager, TransactionState, WriteTransaction};
use crate::types::{ObjectId, SnapshotVersion};
use crate::value::Value;
use crate::view::{SnapshotView, TxnView, View, ViewRegistry};
use cellar_storage::{InMemoryBackend, StorageBackend};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The main database handle.
///
/// A database is one data file holding objects of the types declared in a
/// [`SchemaDescriptor`]. Reads go through immutable snapshots and never
/// block; writes go through a single [`WriteTransaction`] at a time.
///
/// ```rust,ignore
/// use cellar_core::{Database, ObjectSchema, SchemaDescriptor, Value};
///
/// let schema = SchemaDescriptor::new().with_type(
///     ObjectSchema::from_shorthand("Person", &[("name", "string"), ("age", "int")])?,
/// );
/// let db = Database::open("people.cellar", &schema)?;
///
/// db.write(|txn| {
///     txn.create("Person", vec!["Ada".into(), 36.into()])?;
///     Ok(())
/// })?;
///
/// let adults = db.objects("Person")?.filtered("age >= 18")?;
/// for person in adults.iter()? {
///     println!("{}", person.get("name")?);
/// }
/// db.close()?;
/// ```
pub struct Database {
    config: Config,
    path: Option<PathBuf>,
    file: Mutex<Option<DatabaseFile>>,
    pub(crate) schema: Arc<CompiledSchema>,
    store: Arc<PageStore>,
    pub(crate) views: Arc<ViewRegistry>,
    latest: RwLock<Arc<SnapshotView>>,
    pub(crate) txn_manager: TransactionManager,
    pub(crate) counters: StatsCounters,
    is_open: RwLock<bool>,
}

impl Database {
    /// Opens or creates the database at `path` with the default config.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseLocked` if another handle has the file open,
    /// `InvalidFormat` or `Corruption` for unusable files, `Schema` for an
    /// invalid schema and `MigrationRequired` when the stored schema differs
    /// incompatibly.
    pub fn open(path: impl AsRef<Path>, schema: &SchemaDescriptor) -> CoreResult<Self> {
        Self::open_with_options(path, schema, Config::default(), None)
    }

    /// Opens or creates the database at `path`.
    ///
    /// # Errors
    ///
    /// As [`Database::open`].
    pub fn open_with_config(
        path: impl AsRef<Path>,
        schema: &SchemaDescriptor,
        config: Config,
    ) -> CoreResult<Self> {
        Self::open_with_options(path, schema, config, None)
    }

    /// Opens or creates the database at `path`, migrating stored objects
    /// with `migration` if the schema changed.
    ///
    /// # Errors
    ///
    /// As [`Database::open`], plus whatever `migration` returns.
    pub fn open_with_options(
        path: impl AsRef<Path>,
        schema: &SchemaDescriptor,
        config: Config,
        migration: Option<&dyn Migration>,
    ) -> CoreResult<Self> {
        let (file, backend) = DatabaseFile::open(path.as_ref(), &config)?;
        Self::open_inner(config, Some(schema), Box::new(backend), Some(file), migration)
    }

    /// Opens an existing database with the schema stored in it.
    ///
    /// # Errors
    ///
    /// As [`Database::open`]; a missing file is an error.
    pub fn open_existing(path: impl AsRef<Path>) -> CoreResult<Self> {
        let config = Config::default().create_if_missing(false);
        let (file, backend) = DatabaseFile::open(path.as_ref(), &config)?;
        Self::open_inner(config, None, Box::new(backend), Some(file), None)
    }

    /// Creates a database that lives in memory only.
    ///
    /// # Errors
    ///
    /// Returns `Schema` for an invalid schema.
    pub fn open_in_memory(schema: &SchemaDescriptor) -> CoreResult<Self> {
        Self::open_with_backend(Config::default(), schema, Box::new(InMemoryBackend::new()))
    }

    /// Opens a database over any storage backend.
    ///
    /// # Errors
    ///
    /// As [`Database::open`], except for locking.
    pub fn open_with_backend(
        config: Config,
        schema: &SchemaDescriptor,
        backend: Box<dyn StorageBackend>,
    ) -> CoreResult<Self> {
        Self::open_inner(config, Some(schema), backend, None, None)
    }

    fn open_inner(
        config: Config,
        declared: Option<&SchemaDescriptor>,
        backend: Box<dyn StorageBackend>,
        file: Option<DatabaseFile>,
        migration: Option<&dyn Migration>,
    ) -> CoreResult<Self> {
        let (store, catalog) = PageStore::open(backend, &config)?;
        let store = Arc::new(store);

        let (schema, state) = match catalog {
            None => {
                let descriptor = declared.cloned().unwrap_or_default();
                let schema = CompiledSchema::compile(&descriptor)?;
                let mut state = State::empty(&schema);
                state.version = write_all(&store, &schema, &state)?;
                info!(types = schema.len(), "created database");
                (schema, state)
            }
            Some(bytes) => {
                let catalog = Catalog::decode(&bytes)?;
                let descriptor = declared
                    .cloned()
                    .unwrap_or_else(|| catalog.schema.clone());
                let schema = CompiledSchema::compile(&descriptor)?;
                let diff = SchemaDiff::between(&catalog.schema, &descriptor);
                let state = load_state(&store, &schema, &catalog, &diff, migration)?;
                (schema, state)
            }
        };

        let path = file.as_ref().map(|f| f.path().to_path_buf());
        let views = ViewRegistry::new(Arc::clone(&store));
        let latest = views.snapshot(Arc::new(state))?;
        info!(
            path = ?path,
            version = %latest.version(),
            objects = latest.state().object_count(),
            "opened database"
        );

        Ok(Self {
            config,
            path,
            file: Mutex::new(file),
            schema: Arc::new(schema),
            store,
            views,
            latest: RwLock::new(latest),
            txn_manager: TransactionManager::new(),
            counters: StatsCounters::default(),
            is_open: RwLock::new(true),
        })
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Starts a write transaction, blocking while another thread writes.
    ///
    /// # Errors
    ///
    /// Returns `TransactionState` if this thread already has a write
    /// transaction open, and `DatabaseClosed` after close.
    pub fn begin_transaction(&self) -> CoreResult<WriteTransaction<'_>> {
        self.ensure_open()?;
        let (guard, id) = self.txn_manager.begin()?;
        if let Err(e) = self.ensure_open() {
            self.txn_manager.end(guard);
            return Err(e);
        }
        let base = self.latest.read().state().as_ref().clone();
        let version = base.version;
        let view = self.views.transaction(base);
        debug!(txn = %id, base = %version, "began write transaction");
        Ok(WriteTransaction::new(self, guard, id, version, view))
    }

    /// Commits `txn`. Same as [`WriteTransaction::commit`].
    ///
    /// # Errors
    ///
    /// As [`WriteTransaction::commit`].
    pub fn commit_transaction(&self, txn: &mut WriteTransaction<'_>) -> CoreResult<SnapshotVersion> {
        txn.commit()
    }

    /// Cancels `txn`. Same as [`WriteTransaction::cancel`].
    ///
    /// # Errors
    ///
    /// As [`WriteTransaction::cancel`].
    pub fn cancel_transaction(&self, txn: &mut WriteTransaction<'_>) -> CoreResult<()> {
        txn.cancel()
    }

    /// Runs `f` in a write transaction: commits when it returns `Ok`,
    /// cancels when it returns `Err` and hands the error back.
    ///
    /// # Errors
    ///
    /// Returns the error of `f`, of begin or of commit. If `f` returns `Ok`
    /// after an invariant violation cancelled the transaction, returns that
    /// violation.
    pub fn write<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut WriteTransaction<'_>) -> CoreResult<T>,
    {
        let mut txn = self.begin_transaction()?;
        match f(&mut txn) {
            Ok(value) => {
                if let Some(violation) = txn.violation() {
                    return Err(violation);
                }
                if txn.is_active() {
                    txn.commit()?;
                }
                Ok(value)
            }
            Err(e) => {
                if txn.is_active() {
                    txn.cancel()?;
                }
                Err(e)
            }
        }
    }

    /// `Active` while a write transaction holds the writer lock, else `Idle`.
    #[must_use]
    pub fn transaction_state(&self) -> TransactionState {
        if self.txn_manager.is_writing() {
            TransactionState::Active
        } else {
            TransactionState::Idle
        }
    }

    pub(crate) fn commit_changes(
        &self,
        view: &TxnView,
        changes: &ChangeLog,
    ) -> CoreResult<SnapshotVersion> {
        self.ensure_open()?;
        let state = view.state().read();
        if changes.is_empty() {
            return Ok(state.version);
        }
        self.validate(&state, changes)?;
        let catalog = catalog_bytes(&self.schema, &state)?;

        let mut staged = self.store.begin_staging()?;
        if let Err(e) = self.stage_changes(&mut staged, &state, changes) {
            self.store.discard(staged)?;
            return Err(e);
        }
        let version = self.store.commit(staged, catalog)?;

        let mut published = state.clone();
        drop(state);
        published.version = version;
        let snapshot = self.views.snapshot(Arc::new(published))?;
        *self.latest.write() = snapshot;

        self.maybe_compact();
        Ok(version)
    }

    fn validate(&self, state: &State, changes: &ChangeLog) -> CoreResult<()> {
        for (id, change) in changes.iter() {
            let layout = self.schema.layout(change.collection);
            let collection = state.collection(change.collection);
            match change.kind {
                ChangeKind::Created | ChangeKind::Updated => {
                    let values = collection.get(id).ok_or_else(|| {
                        CoreError::object_not_found(format!("changed {id} is missing"))
                    })?;
                    layout.check_values(values)?;
                    collection.indexes.verify_object(id, values)?;
                    for (index, value) in values.iter().enumerate() {
                        if let (Some(target), Some(ref_id)) =
                            (layout.ref_target(index), value.as_ref_id())
                        {
                            if !state.contains(target, ref_id) {
                                return Err(CoreError::object_not_found(format!(
                                    "{id} refers to missing {ref_id}"
                                )));
                            }
                        }
                    }
                }
                ChangeKind::Deleted => {
                    if collection.get(id).is_some() {
                        return Err(CoreError::corruption(format!(
                            "deleted {id} is still present"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn stage_changes(
        &self,
        staged: &mut StagedPages,
        state: &State,
        changes: &ChangeLog,
    ) -> CoreResult<()> {
        for (id, change) in changes.iter() {
            match change.kind {
                ChangeKind::Created | ChangeKind::Updated => {
                    let values = state.get(change.collection, id).ok_or_else(|| {
                        CoreError::object_not_found(format!("changed {id} is missing"))
                    })?;
                    let record = ObjectRecord {
                        collection: change.collection,
                        values: values.to_vec(),
                    };
                    self.store.write_page(staged, page_id(id), record.encode()?)?;
                }
                ChangeKind::Deleted => {
                    self.store.remove_page(staged, page_id(id));
                }
            }
        }
        Ok(())
    }

    fn maybe_compact(&self) {
        let threshold = self.config.compact_threshold;
        if threshold == 0 {
            return;
        }
        let reclaimable = match self.store.space() {
            Ok(space) => space.reclaimable_bytes,
            Err(e) => {
                warn!(error = %e, "could not measure reclaimable space");
                return;
            }
        };
        if reclaimable < threshold {
            return;
        }
        match self.store.compact() {
            Ok(Some(stats)) => {
                self.counters.record_compaction();
                debug!(reclaimed = stats.bytes_before - stats.bytes_after, "automatic compaction");
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "automatic compaction failed"),
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// All objects of a type in the latest committed version.
    ///
    /// The results keep reading that version even after later commits.
    ///
    /// # Errors
    ///
    /// Returns `UnknownType` or `DatabaseClosed`.
    pub fn objects(&self, type_name: &str) -> CoreResult<Results> {
        self.ensure_open()?;
        let collection = self.schema.layout_by_name(type_name)?.id();
        self.counters.record_query();
        Ok(Results::new(
            View::Snapshot(self.latest_snapshot()),
            Arc::clone(&self.schema),
            collection,
        ))
    }

    /// Looks an object up by primary key in the latest version.
    ///
    /// # Errors
    ///
    /// Returns `UnknownType`, `DatabaseClosed`, or `InvalidOperation` if
    /// the type has no primary key.
    pub fn object_for_primary_key(
        &self,
        type_name: &str,
        key: impl Into<Value>,
    ) -> CoreResult<Option<ObjectRef>> {
        self.ensure_open()?;
        let layout = self.schema.layout_by_name(type_name)?;
        if layout.primary_key().is_none() {
            return Err(CoreError::invalid_operation(format!(
                "type '{type_name}' has no primary key"
            )));
        }
        let snapshot = self.latest_snapshot();
        let found = snapshot
            .state()
            .collection(layout.id())
            .indexes
            .lookup_primary(&key.into());
        Ok(found.map(|id| {
            ObjectRef::new(
                View::Snapshot(Arc::clone(&snapshot)),
                Arc::clone(&self.schema),
                layout.id(),
                id,
            )
        }))
    }

    fn latest_snapshot(&self) -> Arc<SnapshotView> {
        Arc::clone(&self.latest.read())
    }

    /// Latest committed version.
    #[must_use]
    pub fn committed_version(&self) -> SnapshotVersion {
        self.latest.read().version()
    }

    /// The compiled schema the handle was opened with.
    #[must_use]
    pub fn schema(&self) -> &CompiledSchema {
        &self.schema
    }

    /// The configuration the handle was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Forces committed data to stable storage.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseClosed` or the storage error.
    pub fn flush(&self) -> CoreResult<()> {
        self.ensure_open()?;
        self.store.sync()
    }

    /// Rewrites the file to hold only the latest version.
    ///
    /// Returns `None` when older versions are still read by open results.
    ///
    /// # Errors
    ///
    /// Returns `TransactionState` if called from a thread with an open
    /// write transaction, `DatabaseClosed`, or the storage error.
    pub fn compact(&self) -> CoreResult<Option<CompactionStats>> {
        self.ensure_open()?;
        let (guard, _) = self.txn_manager.begin()?;
        let result = self.store.compact();
        self.txn_manager.end(guard);
        if let Ok(Some(_)) = &result {
            self.counters.record_compaction();
        }
        result
    }

    /// Reports versions, space and per-type counts.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseClosed` or the storage error.
    pub fn stats(&self) -> CoreResult<DatabaseStats> {
        self.ensure_open()?;
        let snapshot = self.latest_snapshot();
        let space = self.store.space()?;
        let state = snapshot.state();
        let types = self
            .schema
            .types()
            .iter()
            .map(|layout| {
                let collection = state.collection(layout.id());
                TypeStats {
                    name: layout.name().to_string(),
                    objects: collection.len(),
                    indexes: collection.indexes.count(),
                }
            })
            .collect();
        Ok(DatabaseStats {
            path: self.path.as_ref().map(|p| p.display().to_string()),
            version: snapshot.version().as_u64(),
            format_version: self.store.format_version(),
            file_size: space.file_size,
            live_bytes: space.live_bytes,
            reclaimable_bytes: space.reclaimable_bytes,
            retained_versions: self.store.retained_versions(),
            live_views: self.views.live_count(),
            objects: state.object_count(),
            types,
            operations: self.counters.snapshot(),
        })
    }

    /// Reads back every page of the latest version and checks it against
    /// the loaded objects and their indexes.
    ///
    /// # Errors
    ///
    /// Returns `Corruption` on the first inconsistency, a codec error for a
    /// damaged page, or `DatabaseClosed`.
    pub fn verify(&self) -> CoreResult<VerifyReport> {
        self.ensure_open()?;
        let snapshot = self.latest_snapshot();
        let version = snapshot.version();
        let state = snapshot.state();
        let table = self.store.table(version)?;

        for (page, _) in table.iter() {
            let record = ObjectRecord::decode(&self.store.read_page(page, version)?)?;
            let id = ObjectId::new(page);
            let loaded = state.get(record.collection, id).ok_or_else(|| {
                CoreError::corruption(format!("page {page} holds {id}, which is not loaded"))
            })?;
            if loaded != record.values.as_slice() {
                return Err(CoreError::corruption(format!(
                    "page {page} differs from the loaded {id}"
                )));
            }
        }
        if table.len() != state.object_count() {
            return Err(CoreError::corruption(format!(
                "{} pages for {} objects",
                table.len(),
                state.object_count()
            )));
        }
        for layout in self.schema.types() {
            let collection = state.collection(layout.id());
            collection.indexes.verify(layout, collection.iter())?;
        }

        info!(%version, pages = table.len(), "verified database");
        Ok(VerifyReport {
            version: version.as_u64(),
            pages: table.len(),
            objects: state.object_count(),
        })
    }

    /// Lists the frames in the data file.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseClosed` or the storage error.
    pub fn scan_frames(&self) -> CoreResult<Vec<FrameInfo>> {
        self.ensure_open()?;
        self.store.scan_frames()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Closes the database. Closing twice is fine.
    ///
    /// Outstanding results and accessors become stale and every later call
    /// fails with `DatabaseClosed`.
    ///
    /// # Errors
    ///
    /// Returns the storage error if the final sync fails; the handle is
    /// closed regardless.
    pub fn close(&self) -> CoreResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }
        *is_open = false;
        drop(is_open);

        self.views.close();
        let synced = self.store.sync();
        self.file.lock().take();
        info!(path = ?self.path, "closed database");
        synced
    }

    /// Returns true after [`Database::close`].
    #[must_use]
    pub fn is_closed(&self) -> bool {
        !*self.is_open.read()
    }

    /// Path of the data file; `None` for in-memory and custom backends.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub(crate) fn ensure_open(&self) -> CoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::DatabaseClosed)
        }
    }
}

/// Outcome of [`Database::verify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    /// Version checked.
    pub version: u64,
    /// Pages read back.
    pub pages: usize,
    /// Objects checked.
    pub objects: usize,
}

fn catalog_bytes(schema: &CompiledSchema, state: &State) -> CoreResult<Vec<u8>> {
    Catalog {
        schema: schema.descriptor().clone(),
        next_object_id: state.next_object_id,
    }
    .encode()
}

/// Commits `state` as a complete new version, replacing every page.
fn write_all(store: &PageStore, schema: &CompiledSchema, state: &State) -> CoreResult<SnapshotVersion> {
    let catalog = catalog_bytes(schema, state)?;
    let current = store.table(store.current_version())?;
    let mut staged = store.begin_staging()?;

    let staged_all = (|| -> CoreResult<()> {
        for (page, _) in current.iter() {
            store.remove_page(&mut staged, page);
        }
        for layout in schema.types() {
            for (id, values) in state.collection(layout.id()).iter() {
                let record = ObjectRecord {
                    collection: layout.id(),
                    values: values.to_vec(),
                };
                store.write_page(&mut staged, page_id(id), record.encode()?)?;
            }
        }
        Ok(())
    })();
    if let Err(e) = staged_all {
        store.discard(staged)?;
        return Err(e);
    }
    store.commit(staged, catalog)
}

/// Loads the recovered version, mapping it onto the declared schema and
/// committing the result if the schema changed.
fn load_state(
    store: &PageStore,
    schema: &CompiledSchema,
    catalog: &Catalog,
    diff: &SchemaDiff,
    migration: Option<&dyn Migration>,
) -> CoreResult<State> {
    let version = store.current_version();
    let table = store.table(version)?;
    let mut stored = Vec::with_capacity(table.len());
    for (page, _) in table.iter() {
        let record = ObjectRecord::decode(&store.read_page(page, version)?)?;
        stored.push(StoredObject {
            id: ObjectId::new(page),
            collection: record.collection,
            values: record.values,
        });
    }

    let mapped = map_objects(&catalog.schema, schema, diff, stored, migration)?;
    for object in &mapped {
        schema
            .layout(object.collection)
            .check_values(&object.values)
            .map_err(|e| CoreError::corruption(format!("stored {} is invalid: {e}", object.id)))?;
    }

    let mut state =
        State::build(schema, version, catalog.next_object_id, mapped).map_err(|e| match e {
            CoreError::DuplicateKey { .. } if !diff.is_identical() => {
                CoreError::schema(format!("migrated objects break a primary key: {e}"))
            }
            CoreError::DuplicateKey { .. } => {
                CoreError::corruption(format!("stored objects break a primary key: {e}"))
            }
            other => other,
        })?;

    if !diff.is_identical() {
        for change in diff.changes() {
            info!(%change, "schema change");
        }
        state.version = write_all(store, schema, &state)?;
        info!(version = %state.version, "committed migrated schema");
    }
    Ok(state)
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("is_open", &!self.is_closed())
            .field("version", &self.committed_version())
            .finish_non_exhaustive()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::schema::{MigrationObject, ObjectSchema, PropertyDescriptor};
    use tempfile::tempdir;

    fn people() -> SchemaDescriptor {
        SchemaDescriptor::new()
            .with_type(
                ObjectSchema::new("Person")
                    .property(PropertyDescriptor::string("name"))
                    .property(PropertyDescriptor::int("age").indexed())
                    .property(PropertyDescriptor::object("best_friend", "Person")),
            )
            .with_type(
                ObjectSchema::new("Book")
                    .property(PropertyDescriptor::string("id").primary_key())
                    .property(PropertyDescriptor::string("title"))
                    .property(PropertyDescriptor::object("author", "Person")),
            )
    }

    fn person(txn: &mut WriteTransaction<'_>, name: &str, age: i64) -> ObjectRef {
        txn.create("Person", vec![name.into(), age.into(), Value::Null])
            .unwrap()
    }

    fn names(results: &Results) -> Vec<String> {
        results
            .iter()
            .unwrap()
            .map(|p| p.get("name").unwrap().as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn filter_by_age_keeps_creation_order() {
        let db = Database::open_in_memory(&people()).unwrap();
        db.write(|txn| {
            person(txn, "Ann", 23);
            person(txn, "Ben", 18);
            person(txn, "Cat", 33);
            Ok(())
        })
        .unwrap();

        let adults = db.objects("Person").unwrap().filtered("age > 20").unwrap();
        assert_eq!(adults.len().unwrap(), 2);
        assert_eq!(names(&adults), vec!["Ann", "Cat"]);
        assert_eq!(adults.type_name(), "Person");
    }

    #[test]
    fn duplicate_primary_key_cancels_transaction() {
        let db = Database::open_in_memory(&people()).unwrap();
        let mut txn = db.begin_transaction().unwrap();
        txn.create("Book", vec!["b-1".into(), "First".into(), Value::Null])
            .unwrap();
        let err = txn
            .create("Book", vec!["b-1".into(), "Second".into(), Value::Null])
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DuplicateKey);
        assert_eq!(txn.state(), TransactionState::Cancelled);
        assert_eq!(txn.commit().unwrap_err().kind(), ErrorKind::TransactionState);
        txn.cancel().unwrap();
        drop(txn);

        assert!(db.objects("Book").unwrap().is_empty().unwrap());
        assert_eq!(db.transaction_state(), TransactionState::Idle);
    }

    #[test]
    fn cancel_restores_previous_state() {
        let db = Database::open_in_memory(&people()).unwrap();
        db.write(|txn| {
            person(txn, "Ann", 23);
            Ok(())
        })
        .unwrap();
        let version = db.committed_version();

        let mut txn = db.begin_transaction().unwrap();
        let ann = txn.objects("Person").unwrap().first().unwrap().unwrap();
        txn.set(&ann, "age", 24).unwrap();
        person(&mut txn, "Ben", 18);
        txn.delete(&ann).unwrap();
        txn.cancel().unwrap();
        drop(txn);

        assert_eq!(db.committed_version(), version);
        let all = db.objects("Person").unwrap();
        assert_eq!(names(&all), vec!["Ann"]);
        assert_eq!(all.first().unwrap().unwrap().get("age").unwrap(), Value::Int(23));
    }

    #[test]
    fn scoped_write_error_cancels() {
        let db = Database::open_in_memory(&people()).unwrap();
        let err = db
            .write(|txn| {
                person(txn, "Ann", 23);
                Err::<(), _>(CoreError::aborted("changed my mind"))
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::Aborted { .. }));
        assert!(db.objects("Person").unwrap().is_empty().unwrap());
    }

    #[test]
    fn nested_write_is_rejected() {
        let db = Database::open_in_memory(&people()).unwrap();
        let err = db
            .write(|_outer| db.write(|_inner| Ok(())))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransactionState);
        assert_eq!(db.transaction_state(), TransactionState::Idle);
    }

    #[test]
    fn usage_errors_keep_transaction_active() {
        let db = Database::open_in_memory(&people()).unwrap();
        let mut txn = db.begin_transaction().unwrap();
        let book = txn
            .create("Book", vec!["b-1".into(), "Title".into(), Value::Null])
            .unwrap();

        let err = txn.set(&book, "id", "b-2").unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
        assert!(matches!(
            txn.set(&book, "pages", 3).unwrap_err(),
            CoreError::UnknownProperty { .. }
        ));
        assert!(matches!(
            txn.set(&book, "title", 3).unwrap_err(),
            CoreError::TypeMismatch { .. }
        ));
        assert!(matches!(
            txn.create("Author", vec![]).unwrap_err(),
            CoreError::UnknownType { .. }
        ));
        assert!(matches!(
            txn.object_for_primary_key("Person", "x").unwrap_err(),
            CoreError::InvalidOperation { .. }
        ));

        assert!(txn.is_active());
        txn.set(&book, "title", "Better Title").unwrap();
        txn.commit().unwrap();

        let found = db.object_for_primary_key("Book", "b-1").unwrap().unwrap();
        assert_eq!(found.get("title").unwrap(), Value::from("Better Title"));
        assert!(db.object_for_primary_key("Book", "b-9").unwrap().is_none());
    }

    #[test]
    fn create_with_named_values() {
        let db = Database::open_in_memory(&people()).unwrap();
        db.write(|txn| {
            let ann = txn.create_with("Person", [("age", Value::Int(23)), ("name", "Ann".into())])?;
            assert_eq!(ann.get("best_friend")?, Value::Null);
            let err = txn.create_with("Person", [("name", Value::from("Ben"))]).unwrap_err();
            assert!(matches!(err, CoreError::TypeMismatch { .. }));
            Ok(())
        })
        .unwrap();
        assert_eq!(db.objects("Person").unwrap().len().unwrap(), 1);
    }

    #[test]
    fn delete_nullifies_references() {
        let db = Database::open_in_memory(&people()).unwrap();
        db.write(|txn| {
            let ann = person(txn, "Ann", 23);
            let ben = person(txn, "Ben", 18);
            txn.set(&ben, "best_friend", &ann)?;
            txn.create("Book", vec!["b-1".into(), "Memoir".into(), Value::from(&ann)])?;
            Ok(())
        })
        .unwrap();

        let ben = db
            .objects("Person")
            .unwrap()
            .filtered("name == 'Ben'")
            .unwrap()
            .first()
            .unwrap()
            .unwrap();
        assert_eq!(
            ben.get_ref("best_friend").unwrap().unwrap().get("name").unwrap(),
            Value::from("Ann")
        );

        db.write(|txn| {
            let ann = txn.objects("Person")?.filtered("name == 'Ann'")?.first()?;
            txn.delete(&ann.ok_or_else(|| CoreError::object_not_found("Ann"))?)
        })
        .unwrap();

        let ben = db.objects("Person").unwrap().first().unwrap().unwrap();
        assert!(ben.get_ref("best_friend").unwrap().is_none());
        let book = db.object_for_primary_key("Book", "b-1").unwrap().unwrap();
        assert_eq!(book.get("author").unwrap(), Value::Null);
        db.verify().unwrap();
    }

    #[test]
    fn dangling_reference_rejected() {
        let db = Database::open_in_memory(&people()).unwrap();
        let mut txn = db.begin_transaction().unwrap();
        let err = txn
            .create("Person", vec!["Ann".into(), 1.into(), Value::Ref(ObjectId::new(99))])
            .unwrap_err();
        assert!(matches!(err, CoreError::ObjectNotFound { .. }));
        assert!(txn.is_active());
    }

    #[test]
    fn transaction_accessors_go_stale_after_commit() {
        let db = Database::open_in_memory(&people()).unwrap();
        let mut txn = db.begin_transaction().unwrap();
        let ann = person(&mut txn, "Ann", 23);
        let results = txn.objects("Person").unwrap();
        txn.commit().unwrap();
        drop(txn);

        assert!(!ann.is_valid());
        assert_eq!(ann.get("name").unwrap_err().kind(), ErrorKind::StaleAccessor);
        assert_eq!(results.len().unwrap_err().kind(), ErrorKind::StaleAccessor);

        let mut txn = db.begin_transaction().unwrap();
        assert_eq!(
            txn.set(&ann, "age", 30).unwrap_err().kind(),
            ErrorKind::StaleAccessor
        );
    }

    #[test]
    fn snapshot_results_ignore_later_commits() {
        let db = Database::open_in_memory(&people()).unwrap();
        db.write(|txn| {
            person(txn, "Ann", 23);
            Ok(())
        })
        .unwrap();

        let before = db.objects("Person").unwrap();
        db.write(|txn| {
            person(txn, "Ben", 18);
            Ok(())
        })
        .unwrap();

        assert_eq!(before.len().unwrap(), 1);
        assert_eq!(db.objects("Person").unwrap().len().unwrap(), 2);
        assert_eq!(db.stats().unwrap().retained_versions, 2);

        drop(before);
        assert_eq!(db.stats().unwrap().retained_versions, 1);
    }

    #[test]
    fn deleted_object_reads_not_found_in_transaction() {
        let db = Database::open_in_memory(&people()).unwrap();
        let mut txn = db.begin_transaction().unwrap();
        let ann = person(&mut txn, "Ann", 23);
        txn.delete(&ann).unwrap();
        assert!(!ann.is_valid());
        assert!(matches!(
            ann.get("name").unwrap_err(),
            CoreError::ObjectNotFound { .. }
        ));
        assert!(matches!(
            txn.delete(&ann).unwrap_err(),
            CoreError::ObjectNotFound { .. }
        ));
    }

    #[test]
    fn empty_transaction_commits_without_new_version() {
        let db = Database::open_in_memory(&people()).unwrap();
        let version = db.committed_version();
        let mut txn = db.begin_transaction().unwrap();
        assert_eq!(txn.commit().unwrap(), version);
        assert_eq!(txn.state(), TransactionState::Committed);
        assert_eq!(txn.cancel().unwrap_err().kind(), ErrorKind::TransactionState);
    }

    #[test]
    fn delete_all_counts_objects() {
        let db = Database::open_in_memory(&people()).unwrap();
        db.write(|txn| {
            for age in 0..5 {
                person(txn, "P", age);
            }
            Ok(())
        })
        .unwrap();
        let deleted = db.write(|txn| txn.delete_all_of("Person")).unwrap();
        assert_eq!(deleted, 5);
        assert!(db.objects("Person").unwrap().is_empty().unwrap());
    }

    fn seed_person_and_book(db: &Database) {
        db.write(|txn| {
            let ann = person(txn, "Ann", 23);
            txn.create("Book", vec!["b-1".into(), "Title".into(), Value::Ref(ann.id())])?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn delete_all_clears_every_type() {
        let db = Database::open_in_memory(&people()).unwrap();
        seed_person_and_book(&db);
        let version = db.committed_version();

        let deleted = db.write(|txn| txn.delete_all()).unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(db.committed_version(), version.next());
        assert!(db.objects("Person").unwrap().is_empty().unwrap());
        assert!(db.objects("Book").unwrap().is_empty().unwrap());
    }

    #[test]
    fn cancelled_delete_all_keeps_every_type() {
        let db = Database::open_in_memory(&people()).unwrap();
        seed_person_and_book(&db);
        let version = db.committed_version();

        let mut txn = db.begin_transaction().unwrap();
        assert_eq!(txn.delete_all().unwrap(), 2);
        assert!(txn.objects("Book").unwrap().is_empty().unwrap());
        txn.cancel().unwrap();
        drop(txn);

        assert_eq!(db.committed_version(), version);
        assert_eq!(names(&db.objects("Person").unwrap()), vec!["Ann"]);
        let book = db.object_for_primary_key("Book", "b-1").unwrap().unwrap();
        assert!(matches!(book.get("author").unwrap(), Value::Ref(_)));
    }

    #[test]
    fn delete_all_of_nulls_references_from_other_types() {
        let db = Database::open_in_memory(&people()).unwrap();
        seed_person_and_book(&db);

        db.write(|txn| {
            let ben = person(txn, "Ben", 30);
            let ann = txn.objects("Person")?.first()?.unwrap();
            txn.set(&ben, "best_friend", Value::Ref(ann.id()))?;
            txn.delete_all_of("Person")
        })
        .unwrap();

        let book = db.object_for_primary_key("Book", "b-1").unwrap().unwrap();
        assert_eq!(book.get("author").unwrap(), Value::Null);
        assert!(db.objects("Person").unwrap().is_empty().unwrap());
    }

    #[test]
    fn scoped_write_reports_ignored_duplicate_key() {
        let db = Database::open_in_memory(&people()).unwrap();
        let version = db.committed_version();

        let result = db.write(|txn| {
            person(txn, "Ann", 23);
            txn.create("Book", vec!["b-1".into(), "First".into(), Value::Null])?;
            let _ = txn.create("Book", vec!["b-1".into(), "Again".into(), Value::Null]);
            Ok(())
        });

        assert_eq!(result.unwrap_err().kind(), ErrorKind::DuplicateKey);
        assert_eq!(db.committed_version(), version);
        assert!(db.objects("Person").unwrap().is_empty().unwrap());
        assert!(db.objects("Book").unwrap().is_empty().unwrap());
    }

    #[test]
    fn reopen_restores_committed_objects() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("people.cellar");

        let version = {
            let db = Database::open(&path, &people()).unwrap();
            db.write(|txn| {
                person(txn, "Ann", 23);
                txn.create("Book", vec!["b-1".into(), "Title".into(), Value::Null])?;
                Ok(())
            })
            .unwrap();
            let version = db.committed_version();
            db.close().unwrap();
            version
        };

        let db = Database::open(&path, &people()).unwrap();
        assert_eq!(db.committed_version(), version);
        assert_eq!(names(&db.objects("Person").unwrap()), vec!["Ann"]);
        assert!(db.object_for_primary_key("Book", "b-1").unwrap().is_some());
        db.verify().unwrap();

        // Ids keep increasing across opens.
        let new_id = db
            .write(|txn| Ok(person(txn, "Ben", 18).id()))
            .unwrap();
        assert_eq!(new_id, ObjectId::new(3));
    }

    #[test]
    fn open_existing_uses_stored_schema() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("people.cellar");
        {
            let db = Database::open(&path, &people()).unwrap();
            db.write(|txn| {
                person(txn, "Ann", 23);
                Ok(())
            })
            .unwrap();
        }

        let db = Database::open_existing(&path).unwrap();
        assert_eq!(db.schema().descriptor(), &people());
        assert_eq!(db.objects("Person").unwrap().len().unwrap(), 1);
        assert!(Database::open_existing(dir.path().join("missing.cellar")).is_err());
    }

    #[test]
    fn second_handle_is_locked_out() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("people.cellar");
        let db = Database::open(&path, &people()).unwrap();
        let err = Database::open(&path, &people()).unwrap_err();
        assert!(matches!(err, CoreError::DatabaseLocked));
        assert_eq!(err.kind(), ErrorKind::Open);

        db.close().unwrap();
        assert!(Database::open(&path, &people()).is_ok());
    }

    #[test]
    fn close_is_idempotent_and_final() {
        let db = Database::open_in_memory(&people()).unwrap();
        let results = db.objects("Person").unwrap();
        db.close().unwrap();
        db.close().unwrap();

        assert!(db.is_closed());
        assert_eq!(db.objects("Person").unwrap_err().kind(), ErrorKind::ClosedHandle);
        assert_eq!(db.begin_transaction().unwrap_err().kind(), ErrorKind::ClosedHandle);
        assert_eq!(results.len().unwrap_err().kind(), ErrorKind::StaleAccessor);
        assert!(db.path().is_none());
    }

    #[test]
    fn incompatible_schema_needs_migration() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("people.cellar");
        {
            let db = Database::open(&path, &people()).unwrap();
            db.write(|txn| {
                person(txn, "Ann Smith", 23);
                Ok(())
            })
            .unwrap();
        }

        let renamed = SchemaDescriptor::new()
            .with_type(
                ObjectSchema::new("Person")
                    .property(PropertyDescriptor::string("full_name"))
                    .property(PropertyDescriptor::int("age").indexed())
                    .property(PropertyDescriptor::object("best_friend", "Person")),
            )
            .with_type(people().object_types[1].clone());

        let err = Database::open(&path, &renamed).unwrap_err();
        assert!(matches!(err, CoreError::MigrationRequired { .. }));
        assert_eq!(err.kind(), ErrorKind::Schema);

        let rename = |_: &str, old: &MigrationObject, new: &mut MigrationObject| {
            let name = old.get("name").cloned().unwrap_or(Value::Null);
            new.set("full_name", name)
        };
        let db = Database::open_with_options(&path, &renamed, Config::default(), Some(&rename))
            .unwrap();
        let ann = db.objects("Person").unwrap().first().unwrap().unwrap();
        assert_eq!(ann.get("full_name").unwrap(), Value::from("Ann Smith"));
        assert_eq!(ann.get("age").unwrap(), Value::Int(23));
        db.close().unwrap();

        // The migrated layout is now the stored one.
        let db = Database::open(&path, &renamed).unwrap();
        assert_eq!(db.objects("Person").unwrap().len().unwrap(), 1);
    }

    #[test]
    fn added_type_and_index_need_no_migration() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("people.cellar");
        {
            let db = Database::open(&path, &people()).unwrap();
            db.write(|txn| {
                person(txn, "Ann", 23);
                Ok(())
            })
            .unwrap();
        }

        let mut extended = people();
        extended.object_types[0].properties[0].indexed = true;
        let extended = extended
            .with_type(ObjectSchema::new("Tag").property(PropertyDescriptor::string("label")));
        let db = Database::open(&path, &extended).unwrap();
        assert_eq!(names(&db.objects("Person").unwrap().filtered("name == 'Ann'").unwrap()), vec!["Ann"]);
        assert!(db.objects("Tag").unwrap().is_empty().unwrap());
        db.verify().unwrap();
    }

    #[test]
    fn compaction_shrinks_file() {
        let config = Config::default().compact_threshold(0);
        let db = Database::open_with_backend(config, &people(), Box::new(InMemoryBackend::new()))
            .unwrap();
        db.write(|txn| {
            person(txn, "Ann", 23);
            Ok(())
        })
        .unwrap();
        for age in 24..40 {
            db.write(|txn| {
                let ann = txn.objects("Person")?.first()?;
                txn.set(&ann.ok_or_else(|| CoreError::object_not_found("Ann"))?, "age", age)
            })
            .unwrap();
        }

        let before = db.stats().unwrap();
        assert!(before.reclaimable_bytes > 0);
        let stats = db.compact().unwrap().unwrap();
        assert!(stats.bytes_after < stats.bytes_before);

        let after = db.stats().unwrap();
        assert_eq!(after.reclaimable_bytes, 0);
        assert_eq!(after.version, before.version);
        assert_eq!(after.operations.compactions, 1);
        db.verify().unwrap();
    }

    #[test]
    fn automatic_compaction_runs_past_threshold() {
        let config = Config::default().compact_threshold(1);
        let db = Database::open_with_backend(config, &people(), Box::new(InMemoryBackend::new()))
            .unwrap();
        db.write(|txn| {
            person(txn, "Ann", 23);
            Ok(())
        })
        .unwrap();
        db.write(|txn| {
            person(txn, "Ben", 18);
            Ok(())
        })
        .unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.reclaimable_bytes, 0);
        assert!(stats.operations.compactions >= 1);
    }

    #[test]
    fn compact_inside_transaction_is_rejected() {
        let db = Database::open_in_memory(&people()).unwrap();
        let err = db.write(|_| db.compact()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransactionState);
    }

    #[test]
    fn stats_report_types() {
        let db = Database::open_in_memory(&people()).unwrap();
        db.write(|txn| {
            person(txn, "Ann", 23);
            Ok(())
        })
        .unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.objects, 1);
        assert_eq!(stats.types[0].name, "Person");
        assert_eq!(stats.types[0].objects, 1);
        assert_eq!(stats.types[0].indexes, 1);
        assert_eq!(stats.types[1].indexes, 1);
        assert_eq!(stats.operations.objects_created, 1);
        assert_eq!(stats.operations.transactions_committed, 1);
        assert_eq!(stats.format_version, (1, 0));
    }

    #[test]
    fn writers_on_other_threads_wait() {
        let db = Arc::new(Database::open_in_memory(&people()).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|n| {
                let db = Arc::clone(&db);
                std::thread::spawn(move || {
                    db.write(|txn| {
                        person(txn, "T", n);
                        Ok(())
                    })
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        assert_eq!(db.objects("Person").unwrap().len().unwrap(), 4);
        assert_eq!(db.committed_version(), SnapshotVersion::new(5));
    }

    #[test]
    fn scan_frames_marks_live_frames() {
        let db = Database::open_in_memory(&people()).unwrap();
        db.write(|txn| {
            person(txn, "Ann", 23);
            Ok(())
        })
        .unwrap();
        let frames = db.scan_frames().unwrap();
        assert!(frames.iter().any(|f| f.live && f.kind == Some(crate::FrameKind::Object)));
        assert!(frames.iter().any(|f| f.live && f.kind == Some(crate::FrameKind::Root)));
        assert!(frames.iter().all(|f| f.kind.is_some()));
    }
}

//! Database facade and per-model handles.

use crate::cache::{EngineCache, Engines};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::fetch;
use crate::filter::FilterSet;
use crate::index::IndexMaintainer;
use crate::query::Query;
use crate::record::{FieldChanges, Record};
use crate::schema::{Schema, SchemaRegistry};
use crate::types::PrimaryKey;
use crate::verify::{self, VerifyReport};
use kvdex_codec::Value;
use kvdex_store::{InMemoryStore, KeyValueStore};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// The main database handle.
///
/// `Database` ties together:
/// - The backing store
/// - The schema registry
/// - The engine cache
///
/// Cloning is cheap; clones share everything.
///
/// # Example
///
/// ```rust
/// use kvdex_codec::Field;
/// use kvdex_core::{Database, Schema};
///
/// let db = Database::in_memory();
/// let scores = db
///     .register(
///         Schema::builder("scores")
///             .field(Field::text("name"))
///             .indexed_field(Field::integer("score"))
///             .build()
///             .unwrap(),
///     )
///     .unwrap();
///
/// let mut record = scores.new_record().with("name", "a").unwrap().with("score", 1).unwrap();
/// let pk = scores.save(&mut record).unwrap();
/// assert_eq!(pk.as_u64(), 1);
/// assert_eq!(scores.filter("score", 1).unwrap().count().unwrap(), 1);
/// ```
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

struct Inner {
    /// Current store. Swapped by `replace_store`.
    store: RwLock<Arc<dyn KeyValueStore>>,
    registry: SchemaRegistry,
    config: Config,
    cache: EngineCache,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("models", &self.inner.registry.namespaces())
            .field("config", &self.inner.config)
            .field("cached_engines", &self.inner.cache.len())
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Creates a database over a store.
    pub fn new(store: Arc<dyn KeyValueStore>, config: Config) -> Self {
        Self {
            inner: Arc::new(Inner {
                store: RwLock::new(store),
                registry: SchemaRegistry::new(),
                config,
                cache: EngineCache::new(),
            }),
        }
    }

    /// Creates a database over a fresh [`InMemoryStore`] with default configuration.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStore::new()), Config::default())
    }

    /// Registers a model and returns its handle.
    ///
    /// Registering an identical schema again returns a handle to the
    /// existing model.
    ///
    /// # Errors
    ///
    /// Fails if another schema is registered under the same namespace.
    pub fn register(&self, schema: Schema) -> CoreResult<Model> {
        let schema = self.inner.registry.register(schema)?;
        Ok(Model {
            db: self.clone(),
            schema,
        })
    }

    /// Returns the handle of a registered model.
    pub fn model(&self, namespace: &str) -> CoreResult<Model> {
        Ok(Model {
            db: self.clone(),
            schema: self.inner.registry.require(namespace)?,
        })
    }

    /// Switches to another store, for example after connection parameters
    /// changed. Every cached engine is dropped.
    pub fn replace_store(&self, store: Arc<dyn KeyValueStore>) {
        *self.inner.store.write() = store;
        self.inner.cache.clear();
        tracing::info!("store replaced, engine cache cleared");
    }

    /// The current store.
    pub fn store(&self) -> Arc<dyn KeyValueStore> {
        self.inner.store.read().clone()
    }

    /// Database configuration.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The schema registry.
    pub fn registry(&self) -> &SchemaRegistry {
        &self.inner.registry
    }

    /// The engine cache.
    pub fn cache(&self) -> &EngineCache {
        &self.inner.cache
    }

    fn engines(&self, namespace: &str) -> Arc<Engines> {
        self.inner.cache.get_or_insert_with(namespace, || {
            Engines::new(&self.inner.store.read(), &self.inner.config)
        })
    }
}

/// Handle to one registered model.
#[derive(Clone)]
pub struct Model {
    db: Database,
    schema: Arc<Schema>,
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("namespace", &self.schema.namespace())
            .finish_non_exhaustive()
    }
}

impl Model {
    /// The model namespace.
    pub fn namespace(&self) -> &str {
        self.schema.namespace()
    }

    /// The model schema.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The database this model belongs to.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// A new transient record holding field defaults.
    pub fn new_record(&self) -> Record {
        Record::new(Arc::clone(&self.schema))
    }

    fn engines(&self) -> Arc<Engines> {
        self.db.engines(self.namespace())
    }

    fn check_owner(&self, record: &Record) -> CoreResult<()> {
        if record.namespace() == self.namespace() {
            Ok(())
        } else {
            Err(CoreError::ModelMismatch {
                expected: self.namespace().to_string(),
                found: record.namespace().to_string(),
            })
        }
    }

    // Queries

    /// A query matching every record.
    pub fn query(&self) -> Query {
        Query::new(
            self.db.store(),
            FilterSet::new(Arc::clone(&self.schema)),
            self.db.config().clone(),
        )
    }

    /// A query with one equality clause.
    pub fn filter(&self, field: &str, value: impl Into<Value>) -> CoreResult<Query> {
        self.query().filter(field, value)
    }

    /// A query with one inequality clause.
    pub fn exclude(&self, field: &str, value: impl Into<Value>) -> CoreResult<Query> {
        self.query().exclude(field, value)
    }

    /// Every record, ordered by primary key.
    pub fn all(&self) -> CoreResult<Vec<Record>> {
        self.query().all()
    }

    /// Number of records.
    pub fn count(&self) -> CoreResult<usize> {
        self.query().count()
    }

    /// All primary keys, ascending.
    pub fn primary_keys(&self) -> CoreResult<Vec<PrimaryKey>> {
        self.query().primary_keys()
    }

    /// Loads one record.
    pub fn get(&self, pk: PrimaryKey) -> CoreResult<Option<Record>> {
        self.query().get(pk)
    }

    /// Loads several records, keeping the input order.
    pub fn get_many(&self, pks: &[PrimaryKey]) -> CoreResult<Vec<Option<Record>>> {
        self.query().get_many(pks)
    }

    /// Whether a record exists.
    pub fn exists(&self, pk: PrimaryKey) -> CoreResult<bool> {
        self.query().exists(pk)
    }

    /// The record with the lowest primary key.
    pub fn first(&self) -> CoreResult<Option<Record>> {
        self.query().first()
    }

    /// The record with the highest primary key.
    pub fn last(&self) -> CoreResult<Option<Record>> {
        self.query().last()
    }

    /// One record chosen uniformly at random.
    pub fn random(&self) -> CoreResult<Option<Record>> {
        self.query().random()
    }

    /// Primary keys in the bucket of `value` for an indexed field.
    pub fn lookup(&self, field: &str, value: impl Into<Value>) -> CoreResult<BTreeSet<PrimaryKey>> {
        IndexMaintainer::new(Arc::clone(&self.schema)).lookup(
            self.db.store().as_read(),
            field,
            &value.into(),
        )
    }

    // Writes

    /// Saves a record, cascading to linked records per configuration.
    pub fn save(&self, record: &mut Record) -> CoreResult<PrimaryKey> {
        self.save_with(record, self.db.config().cascade_save)
    }

    /// Saves a record with an explicit cascade choice.
    pub fn save_with(&self, record: &mut Record, cascade: bool) -> CoreResult<PrimaryKey> {
        self.check_owner(record)?;
        self.engines().save.save(record, cascade)
    }

    /// Saves several records of this model in one atomic unit.
    pub fn save_many(&self, records: &mut [Record]) -> CoreResult<Vec<PrimaryKey>> {
        for record in records.iter() {
            self.check_owner(record)?;
        }
        self.engines()
            .save
            .save_many(records, self.db.config().cascade_save)
    }

    /// Deletes a record and turns it back into a transient one.
    pub fn delete_record(&self, record: &mut Record) -> CoreResult<bool> {
        self.check_owner(record)?;
        self.engines().delete.delete_record(record)
    }

    /// Deletes one record by primary key. Returns whether it existed.
    pub fn delete_by_pk(&self, pk: PrimaryKey) -> CoreResult<bool> {
        self.engines().delete.delete_by_pk(&self.schema, pk)
    }

    /// Deletes several records in one atomic unit.
    pub fn delete_by_pks(&self, pks: &[PrimaryKey]) -> CoreResult<usize> {
        self.engines().delete.delete_by_pks(&self.schema, pks)
    }

    /// Deletes every record matching a filter set in one atomic unit.
    pub fn delete_by_filter(&self, filter: &FilterSet) -> CoreResult<usize> {
        if filter.schema().namespace() != self.namespace() {
            return Err(CoreError::ModelMismatch {
                expected: self.namespace().to_string(),
                found: filter.schema().namespace().to_string(),
            });
        }
        self.engines().delete.delete_by_filter(filter)
    }

    /// Replaces the whole dataset in one atomic unit.
    pub fn reset(&self, records: &mut [Record]) -> CoreResult<Vec<PrimaryKey>> {
        self.engines().reset.reset(&self.schema, records)
    }

    /// Drops every key of the model.
    pub fn destroy(&self) -> CoreResult<()> {
        self.engines().delete.destroy(&self.schema)
    }

    // Maintenance

    /// Rebuilds every bucket from the stored records.
    pub fn reindex(&self) -> CoreResult<usize> {
        verify::reindex(&*self.db.store(), &self.schema)
    }

    /// Reports inconsistencies between records and buckets.
    pub fn verify(&self) -> CoreResult<VerifyReport> {
        verify::verify(self.db.store().as_ref(), &self.schema)
    }

    /// Refreshes a record from the store; see [`fetch::reload`].
    pub fn reload(&self, record: &mut Record) -> CoreResult<Option<FieldChanges>> {
        self.check_owner(record)?;
        fetch::reload(self.db.store().as_read(), record)
    }

    /// Loads linked records `depth` levels deep; see [`fetch::load_links`].
    pub fn load_links(&self, record: &mut Record, depth: usize) -> CoreResult<usize> {
        self.check_owner(record)?;
        fetch::load_links(self.db.store().as_read(), self.db.registry(), record, depth)
    }
}

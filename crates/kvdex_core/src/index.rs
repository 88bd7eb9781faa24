//! Index maintenance.
//!
//! Every indexed field keeps one bucket (a set of primary keys) per distinct
//! stored value, plus one bucket for records where the field is unset. The
//! maintainer turns record changes into [`IndexUpdate`] deltas and queues them
//! on the same [`Batch`] as the record write, so both land in one atomic unit.

use crate::error::{CoreError, CoreResult};
use crate::record::StoredFields;
use crate::schema::Schema;
use crate::types::PrimaryKey;
use kvdex_codec::Value;
use kvdex_store::{Batch, StoreRead};
use std::collections::BTreeSet;
use std::sync::Arc;

/// A single change to an index bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexUpdate {
    /// Add a primary key to a bucket.
    Insert {
        /// Bucket key.
        bucket: String,
        /// Primary key.
        pk: PrimaryKey,
    },
    /// Remove a primary key from a bucket.
    Remove {
        /// Bucket key.
        bucket: String,
        /// Primary key.
        pk: PrimaryKey,
    },
}

impl IndexUpdate {
    /// The bucket this update touches.
    pub fn bucket(&self) -> &str {
        match self {
            IndexUpdate::Insert { bucket, .. } | IndexUpdate::Remove { bucket, .. } => bucket,
        }
    }

    /// Queues the update on a batch.
    pub fn apply(self, batch: &mut Batch) {
        match self {
            IndexUpdate::Insert { bucket, pk } => batch.sadd(bucket, vec![pk.to_string()]),
            IndexUpdate::Remove { bucket, pk } => batch.srem(bucket, vec![pk.to_string()]),
        }
    }
}

/// Computes and applies index deltas for one model.
#[derive(Debug, Clone)]
pub struct IndexMaintainer {
    schema: Arc<Schema>,
}

impl IndexMaintainer {
    /// Creates a maintainer for a schema.
    pub fn new(schema: Arc<Schema>) -> Self {
        Self { schema }
    }

    /// Bucket key a stored field value belongs to.
    fn bucket_of(&self, field: &str, stored: &StoredFields) -> String {
        let token = self
            .schema
            .field(field)
            .and_then(|f| f.token_for_stored(stored.get(field).map(Vec::as_slice)));
        self.schema.keys().bucket_for(field, token.as_deref())
    }

    /// Deltas adding `pk` to the bucket of every indexed field.
    pub fn insert_deltas(&self, pk: PrimaryKey, record: &StoredFields) -> Vec<IndexUpdate> {
        self.schema
            .indexed_fields()
            .map(|field| IndexUpdate::Insert {
                bucket: self.bucket_of(field.name(), record),
                pk,
            })
            .collect()
    }

    /// Deltas removing `pk` from every bucket it occupies according to `record`,
    /// which must be the current stored state.
    pub fn remove_deltas(&self, pk: PrimaryKey, record: &StoredFields) -> Vec<IndexUpdate> {
        self.schema
            .indexed_fields()
            .map(|field| IndexUpdate::Remove {
                bucket: self.bucket_of(field.name(), record),
                pk,
            })
            .collect()
    }

    /// Deltas moving `pk` between buckets for the indexed fields whose
    /// bucket changed. Unchanged fields produce nothing.
    pub fn update_deltas(
        &self,
        pk: PrimaryKey,
        old: &StoredFields,
        new: &StoredFields,
    ) -> Vec<IndexUpdate> {
        let mut deltas = Vec::new();
        for field in self.schema.indexed_fields() {
            let before = self.bucket_of(field.name(), old);
            let after = self.bucket_of(field.name(), new);
            if before != after {
                deltas.push(IndexUpdate::Remove { bucket: before, pk });
                deltas.push(IndexUpdate::Insert { bucket: after, pk });
            }
        }
        deltas
    }

    /// Queues `insert_deltas` on a batch.
    pub fn index_insert(&self, batch: &mut Batch, pk: PrimaryKey, record: &StoredFields) {
        self.queue(batch, self.insert_deltas(pk, record));
    }

    /// Queues `remove_deltas` on a batch.
    pub fn index_remove(&self, batch: &mut Batch, pk: PrimaryKey, record: &StoredFields) {
        self.queue(batch, self.remove_deltas(pk, record));
    }

    /// Queues `update_deltas` on a batch.
    pub fn index_update(
        &self,
        batch: &mut Batch,
        pk: PrimaryKey,
        old: &StoredFields,
        new: &StoredFields,
    ) {
        self.queue(batch, self.update_deltas(pk, old, new));
    }

    fn queue(&self, batch: &mut Batch, deltas: Vec<IndexUpdate>) {
        for delta in deltas {
            tracing::trace!(namespace = self.schema.namespace(), ?delta, "index delta");
            delta.apply(batch);
        }
    }

    /// Bucket key holding `value` for an indexed field.
    ///
    /// # Errors
    ///
    /// Fails if the field is unknown or not indexed, or the value cannot be
    /// converted to the field type.
    pub fn bucket_key(&self, field: &str, value: &Value) -> CoreResult<String> {
        let declared = self.schema.require_field(field)?;
        if !self.schema.is_indexed(field) {
            return Err(CoreError::filter(format!(
                "field {field:?} of {:?} is not indexed",
                self.schema.namespace()
            )));
        }
        let value = declared.input(value.clone())?;
        let token = declared.index_token(&value)?;
        Ok(self.schema.keys().bucket_for(field, token.as_deref()))
    }

    /// Reads the primary keys holding `value` in an indexed field.
    pub fn lookup(
        &self,
        store: &dyn StoreRead,
        field: &str,
        value: &Value,
    ) -> CoreResult<BTreeSet<PrimaryKey>> {
        let bucket = self.bucket_key(field, value)?;
        read_pk_set(store, &bucket)
    }
}

/// Reads a set of primary keys, rejecting members that are not primary keys.
pub(crate) fn read_pk_set(store: &dyn StoreRead, key: &str) -> CoreResult<BTreeSet<PrimaryKey>> {
    store
        .smembers(key)?
        .into_iter()
        .map(|member| {
            member
                .parse::<PrimaryKey>()
                .map_err(|message| CoreError::corrupt(key, message))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvdex_codec::Field;
    use kvdex_store::{InMemoryStore, KeyValueStore};

    fn maintainer() -> IndexMaintainer {
        IndexMaintainer::new(Arc::new(
            Schema::builder("items")
                .field(Field::text("note"))
                .indexed_field(Field::text("color"))
                .indexed_field(Field::text("title").hashed())
                .build()
                .unwrap(),
        ))
    }

    fn stored(pairs: &[(&str, &str)]) -> StoredFields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
            .collect()
    }

    fn pk(n: u64) -> PrimaryKey {
        PrimaryKey::new(n).unwrap()
    }

    #[test]
    fn insert_covers_every_indexed_field() {
        let deltas = maintainer().insert_deltas(pk(1), &stored(&[("color", "red")]));
        let buckets: Vec<&str> = deltas.iter().map(IndexUpdate::bucket).collect();
        assert_eq!(buckets, vec!["items:idx:color:red", "items:nullidx:title"]);
    }

    #[test]
    fn empty_string_and_unset_use_different_buckets() {
        let m = maintainer();
        let empty = m.insert_deltas(pk(1), &stored(&[("color", "")]));
        let unset = m.insert_deltas(pk(1), &stored(&[]));
        assert_eq!(empty[0].bucket(), "items:idx:color:");
        assert_eq!(unset[0].bucket(), "items:nullidx:color");
    }

    #[test]
    fn update_touches_only_changed_fields() {
        let m = maintainer();
        let old = stored(&[("color", "red"), ("title", "t"), ("note", "a")]);
        let new = stored(&[("color", "blue"), ("title", "t"), ("note", "b")]);
        let deltas = m.update_deltas(pk(3), &old, &new);
        assert_eq!(
            deltas,
            vec![
                IndexUpdate::Remove {
                    bucket: "items:idx:color:red".into(),
                    pk: pk(3)
                },
                IndexUpdate::Insert {
                    bucket: "items:idx:color:blue".into(),
                    pk: pk(3)
                },
            ]
        );
        assert!(m.update_deltas(pk(3), &old, &old).is_empty());
    }

    #[test]
    fn hashed_fields_use_digest_tokens() {
        let m = maintainer();
        let key = m.bucket_key("title", &Value::from("abc")).unwrap();
        assert!(key.starts_with("items:idx:title:ba7816bf"));
        assert!(m.bucket_key("note", &Value::from("abc")).is_err());
        assert!(m.bucket_key("nope", &Value::from("abc")).is_err());
    }

    #[test]
    fn lookup_reads_bucket_and_empty_buckets_vanish() {
        let m = maintainer();
        let store = InMemoryStore::new();
        let record = stored(&[("color", "red")]);

        let mut batch = Batch::new();
        m.index_insert(&mut batch, pk(1), &record);
        m.index_insert(&mut batch, pk(2), &record);
        store.commit(batch).unwrap();
        let found = m.lookup(&store, "color", &Value::from("red")).unwrap();
        assert_eq!(found, [pk(1), pk(2)].into_iter().collect());

        let mut batch = Batch::new();
        m.index_remove(&mut batch, pk(1), &record);
        m.index_remove(&mut batch, pk(2), &record);
        store.commit(batch).unwrap();
        assert!(m.lookup(&store, "color", &Value::from("red")).unwrap().is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn corrupt_bucket_members_are_reported() {
        let store = InMemoryStore::new();
        let mut batch = Batch::new();
        batch.sadd("items:idx:color:red", vec!["x".into()]);
        store.commit(batch).unwrap();
        let err = maintainer()
            .lookup(&store, "color", &Value::from("red"))
            .unwrap_err();
        assert!(matches!(err, CoreError::Corrupt { .. }));
    }
}

//! Reset engine: atomic replacement of a model's whole dataset.

use crate::error::{CoreError, CoreResult};
use crate::index::IndexMaintainer;
use crate::record::{Record, StoredFields};
use crate::schema::{Schema, RECORD_MARKER};
use crate::types::PrimaryKey;
use kvdex_store::{Batch, KeyValueStore};
use std::sync::Arc;

/// Replaces every record of a model in one atomic unit.
///
/// The unit first drops every key under the model's namespace (records,
/// buckets, counter and key set) with a server-side pattern delete, then
/// writes the new records under primary keys `1..=n` in input order with
/// their bucket memberships, and finally sets the counter to `n`. Readers see
/// either the old dataset or the new one.
#[derive(Clone)]
pub struct ResetEngine {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for ResetEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResetEngine").finish_non_exhaustive()
    }
}

impl ResetEngine {
    /// Creates a reset engine over a store.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Replaces the dataset of `schema` with `records`.
    ///
    /// On success every record holds its new primary key and counts as saved.
    /// Linked records are not saved by a reset; every link must already point
    /// at a saved record.
    ///
    /// # Errors
    ///
    /// Fails without touching the store if a record belongs to another model,
    /// links to an unsaved record or cannot be encoded.
    pub fn reset(&self, schema: &Arc<Schema>, records: &mut [Record]) -> CoreResult<Vec<PrimaryKey>> {
        let keys = schema.keys();
        let maintainer = IndexMaintainer::new(Arc::clone(schema));
        let mut batch = Batch::new();
        batch.del_pattern(keys.all_pattern());

        let mut planned: Vec<(PrimaryKey, StoredFields)> = Vec::with_capacity(records.len());
        for (position, record) in records.iter_mut().enumerate() {
            if record.namespace() != schema.namespace() {
                return Err(CoreError::ModelMismatch {
                    expected: schema.namespace().to_string(),
                    found: record.namespace().to_string(),
                });
            }
            record.refresh_link_values();
            if let Some(field) = record.unsaved_link() {
                return Err(CoreError::UnsavedLink {
                    namespace: schema.namespace().to_string(),
                    field: field.to_string(),
                });
            }
            let pk = PrimaryKey::new(position as u64 + 1)
                .ok_or_else(|| CoreError::schema("primary key space exhausted"))?;
            let stored = record.to_stored()?;

            let mut fields: Vec<(String, Vec<u8>)> =
                stored.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            fields.push((RECORD_MARKER.to_string(), pk.to_string().into_bytes()));
            batch.hset(keys.record(pk), fields);
            maintainer.index_insert(&mut batch, pk, &stored);
            planned.push((pk, stored));
        }

        if !planned.is_empty() {
            batch.sadd(
                keys.live_keys(),
                planned.iter().map(|(pk, _)| pk.to_string()).collect(),
            );
            batch.set(keys.counter(), planned.len().to_string());
        }

        let commands = batch.len();
        self.store.commit(batch)?;
        tracing::info!(
            namespace = schema.namespace(),
            records = planned.len(),
            commands,
            "reset dataset"
        );

        let mut pks = Vec::with_capacity(planned.len());
        for (record, (pk, stored)) in records.iter_mut().zip(planned) {
            record.assign_pk(pk);
            record.mark_stored(stored);
            pks.push(pk);
        }
        Ok(pks)
    }
}

//! Delete engine.
//!
//! Every delete, whether of one key, a list of keys or a whole filter set, is
//! submitted as one atomic unit watching the affected record keys. Each
//! record is read inside the unit so its index memberships are removed using
//! the values actually stored.

use crate::config::Config;
use crate::error::{CoreResult, UnitError};
use crate::filter::FilterSet;
use crate::index::IndexMaintainer;
use crate::record::{Record, StoredFields};
use crate::schema::Schema;
use crate::types::PrimaryKey;
use kvdex_store::{Batch, KeyValueStore};
use std::sync::Arc;

/// Removes records together with their index memberships.
#[derive(Clone)]
pub struct DeleteEngine {
    store: Arc<dyn KeyValueStore>,
    config: Config,
}

impl std::fmt::Debug for DeleteEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeleteEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DeleteEngine {
    /// Creates a delete engine over a store.
    pub fn new(store: Arc<dyn KeyValueStore>, config: Config) -> Self {
        Self { store, config }
    }

    /// Deletes one record. Returns whether it existed.
    pub fn delete_by_pk(&self, schema: &Arc<Schema>, pk: PrimaryKey) -> CoreResult<bool> {
        Ok(self.delete_matching(schema, &[pk], None)? == 1)
    }

    /// Deletes several records in one atomic unit. Returns how many existed.
    pub fn delete_by_pks(&self, schema: &Arc<Schema>, pks: &[PrimaryKey]) -> CoreResult<usize> {
        self.delete_matching(schema, pks, None)
    }

    /// Deletes every record matching a filter set in one atomic unit.
    ///
    /// Candidates are resolved first, then each one is checked again against
    /// the filter inside the unit, so a record changed in between is left
    /// alone. Returns how many records were deleted.
    pub fn delete_by_filter(&self, filter: &FilterSet) -> CoreResult<usize> {
        let candidates = filter.resolve(
            self.store.as_read(),
            self.config.allow_full_scan,
            self.config.scan_warning_threshold,
        )?;
        if candidates.is_empty() {
            return Ok(0);
        }
        let recheck = (!filter.is_empty()).then_some(filter);
        self.delete_matching(filter.schema(), &candidates, recheck)
    }

    /// Deletes a persisted record and turns it back into a transient one.
    ///
    /// A transient record is left untouched and `false` is returned.
    pub fn delete_record(&self, record: &mut Record) -> CoreResult<bool> {
        let Some(pk) = record.pk() else {
            return Ok(false);
        };
        let existed = self.delete_by_pk(record.schema(), pk)?;
        record.mark_deleted();
        Ok(existed)
    }

    /// Drops every key of the model: records, buckets, counter and key set.
    pub fn destroy(&self, schema: &Schema) -> CoreResult<()> {
        let mut batch = Batch::new();
        batch.del_pattern(schema.keys().all_pattern());
        self.store.commit(batch)?;
        tracing::info!(namespace = schema.namespace(), "destroyed model data");
        Ok(())
    }

    fn delete_matching(
        &self,
        schema: &Arc<Schema>,
        pks: &[PrimaryKey],
        recheck: Option<&FilterSet>,
    ) -> CoreResult<usize> {
        if pks.is_empty() {
            return Ok(0);
        }
        let keys = schema.keys();
        let maintainer = IndexMaintainer::new(Arc::clone(schema));
        let watch: Vec<String> = pks.iter().map(|pk| keys.record(*pk)).collect();

        let mut unit = UnitError::default();
        let mut deleted = 0;
        let result = self.store.atomic(&watch, &mut |reader| {
            deleted = 0;
            let mut batch = Batch::new();
            let mut gone = Vec::new();
            for (&pk, record_key) in pks.iter().zip(&watch) {
                let Some(stored) = reader.hgetall(record_key)? else {
                    // Only an explicit key delete cleans up a stale live-key entry.
                    if recheck.is_none() {
                        gone.push(pk.to_string());
                    }
                    continue;
                };
                let stored: StoredFields = stored
                    .into_iter()
                    .filter(|(name, _)| schema.field(name).is_some())
                    .collect();
                if let Some(filter) = recheck {
                    match filter.matches_stored(&stored) {
                        Ok(true) => {}
                        Ok(false) => continue,
                        Err(err) => return Err(unit.stash(err)),
                    }
                }
                batch.del(record_key.clone());
                maintainer.index_remove(&mut batch, pk, &stored);
                gone.push(pk.to_string());
                deleted += 1;
            }
            batch.srem(keys.live_keys(), gone);
            Ok(batch)
        });
        unit.finish(result)?;
        tracing::debug!(namespace = schema.namespace(), deleted, "deleted records");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CoreError, ErrorKind};
    use crate::save::SaveEngine;
    use kvdex_codec::{Field, Value};
    use kvdex_store::{InMemoryStore, StoreRead};

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::builder("scores")
                .field(Field::text("name"))
                .indexed_field(Field::integer("score"))
                .build()
                .unwrap(),
        )
    }

    fn seeded(scores: &[i64]) -> (Arc<InMemoryStore>, DeleteEngine, Vec<PrimaryKey>) {
        let store = Arc::new(InMemoryStore::new());
        let saver = SaveEngine::new(store.clone());
        let mut records: Vec<Record> = scores
            .iter()
            .enumerate()
            .map(|(i, score)| {
                Record::new(schema())
                    .with("name", format!("r{i}"))
                    .unwrap()
                    .with("score", *score)
                    .unwrap()
            })
            .collect();
        let pks = saver.save_many(&mut records, false).unwrap();
        let engine = DeleteEngine::new(store.clone(), Config::default());
        (store, engine, pks)
    }

    #[test]
    fn delete_by_pk_removes_record_and_memberships() {
        let (store, engine, pks) = seeded(&[1, 1]);
        assert!(engine.delete_by_pk(&schema(), pks[0]).unwrap());
        assert!(!store.exists("scores:data:1").unwrap());
        assert_eq!(
            store.smembers("scores:idx:score:1").unwrap(),
            ["2".to_string()].into_iter().collect()
        );
        assert_eq!(store.scard("scores:keys").unwrap(), 1);

        assert!(!engine.delete_by_pk(&schema(), pks[0]).unwrap());
    }

    #[test]
    fn emptied_buckets_disappear() {
        let (store, engine, pks) = seeded(&[7]);
        engine.delete_by_pks(&schema(), &pks).unwrap();
        assert_eq!(store.keys(), vec!["scores:next".to_string()]);
    }

    #[test]
    fn delete_by_filter_deletes_only_matches() {
        let (store, engine, _) = seeded(&[1, 2, 2, 3]);
        let filter = FilterSet::new(schema()).filter("score", 2).unwrap();
        assert_eq!(engine.delete_by_filter(&filter).unwrap(), 2);
        assert_eq!(store.scard("scores:keys").unwrap(), 2);
        assert!(!store.exists("scores:idx:score:2").unwrap());
    }

    #[test]
    fn delete_by_filter_rechecks_residual_clauses() {
        let (store, engine, _) = seeded(&[5, 5, 5]);
        let filter = FilterSet::new(schema())
            .filter("score", 5)
            .unwrap()
            .exclude("name", "r1")
            .unwrap();
        assert_eq!(engine.delete_by_filter(&filter).unwrap(), 2);
        let left = store.hgetall("scores:data:2").unwrap().unwrap();
        assert_eq!(left.get("name"), Some(&b"r1".to_vec()));
    }

    #[test]
    fn unindexed_filter_needs_full_scan() {
        let (_, engine, _) = seeded(&[1]);
        let filter = FilterSet::new(schema()).filter("name", "r0").unwrap();
        let err = engine.delete_by_filter(&filter).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Filter);

        let filter = filter.allow_full_scan(true);
        assert_eq!(engine.delete_by_filter(&filter).unwrap(), 1);
    }

    #[test]
    fn failed_unit_deletes_nothing() {
        let (store, engine, pks) = seeded(&[1, 2]);
        let before = store.keys();
        store.fail_next_commit();
        let err = engine.delete_by_pks(&schema(), &pks).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transaction);
        assert_eq!(store.keys(), before);
    }

    #[test]
    fn delete_record_makes_it_transient() {
        let (_, engine, pks) = seeded(&[4]);
        let mut record = Record::new(schema()).with("score", 4).unwrap();
        assert!(!engine.delete_record(&mut record).unwrap());

        record.assign_pk(pks[0]);
        assert!(engine.delete_record(&mut record).unwrap());
        assert!(record.pk().is_none());
        assert_eq!(record.get("score"), Some(&Value::Integer(4)));
    }

    #[test]
    fn destroy_drops_every_key() {
        let (store, engine, _) = seeded(&[1, 2, 3]);
        store
            .commit({
                let mut batch = Batch::new();
                batch.set("other:next", b"9".to_vec());
                batch
            })
            .unwrap();
        engine.destroy(&schema()).unwrap();
        assert_eq!(store.keys(), vec!["other:next".to_string()]);
    }

    #[test]
    fn conflict_is_reported_as_transaction_error() {
        let (store, engine, pks) = seeded(&[1]);
        store.inject_fault(kvdex_store::Fault::Conflict);
        let err = engine.delete_by_pk(&schema(), pks[0]).unwrap_err();
        assert!(err.is_conflict());
        assert!(matches!(err, CoreError::Store(_)));
    }
}

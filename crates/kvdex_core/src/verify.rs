//! Index verification and rebuilding.

use crate::error::CoreResult;
use crate::fetch::read_snapshot;
use crate::index::{read_pk_set, IndexMaintainer, IndexUpdate};
use crate::record::StoredFields;
use crate::schema::Schema;
use crate::types::PrimaryKey;
use kvdex_store::{Batch, KeyValueStore, StoreRead};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Differences between a model's records and its bookkeeping keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Number of record hashes examined.
    pub checked: usize,
    /// `(bucket, pk)` memberships implied by a record but absent.
    pub missing_entries: Vec<(String, PrimaryKey)>,
    /// `(bucket, pk)` memberships no record accounts for.
    pub stray_entries: Vec<(String, PrimaryKey)>,
    /// Live primary keys without a record hash.
    pub dangling_keys: Vec<PrimaryKey>,
    /// Record hashes missing from the live key set.
    pub unlisted_records: Vec<PrimaryKey>,
}

impl VerifyReport {
    /// Whether no inconsistency was found.
    pub fn is_consistent(&self) -> bool {
        self.missing_entries.is_empty()
            && self.stray_entries.is_empty()
            && self.dangling_keys.is_empty()
            && self.unlisted_records.is_empty()
    }
}

type Memberships = BTreeMap<String, BTreeSet<PrimaryKey>>;

/// Reads every record hash of a model, keyed by primary key.
fn read_records(
    store: &dyn StoreRead,
    schema: &Schema,
) -> kvdex_store::StoreResult<BTreeMap<PrimaryKey, StoredFields>> {
    let keys = schema.keys();
    let mut records = BTreeMap::new();
    for key in store.scan_keys(&keys.record_pattern())? {
        let Some(pk) = keys.pk_of_record(&key) else {
            continue;
        };
        if let Some(stored) = store.hgetall(&key)? {
            let stored = stored
                .into_iter()
                .filter(|(name, _)| schema.field(name).is_some())
                .collect();
            records.insert(pk, stored);
        }
    }
    Ok(records)
}

fn expected_memberships(
    maintainer: &IndexMaintainer,
    records: &BTreeMap<PrimaryKey, StoredFields>,
) -> Memberships {
    let mut expected = Memberships::new();
    for (pk, stored) in records {
        for delta in maintainer.insert_deltas(*pk, stored) {
            if let IndexUpdate::Insert { bucket, pk } = delta {
                expected.entry(bucket).or_default().insert(pk);
            }
        }
    }
    expected
}

fn bucket_keys(store: &dyn StoreRead, schema: &Schema) -> kvdex_store::StoreResult<Vec<String>> {
    let mut buckets = Vec::new();
    for pattern in schema.keys().index_patterns() {
        buckets.extend(store.scan_keys(&pattern)?);
    }
    buckets.sort();
    Ok(buckets)
}

/// Compares every record of a model with its buckets and live key set.
///
/// Everything is read from one snapshot (see [`read_snapshot`]). On a
/// server, updates that leave the live key set alone are not watched, so
/// run it against a quiet dataset for an exact answer.
pub fn verify(store: &dyn KeyValueStore, schema: &Arc<Schema>) -> CoreResult<VerifyReport> {
    let maintainer = IndexMaintainer::new(Arc::clone(schema));
    let (records, actual, live) = read_snapshot(store, schema, |reader| {
        let records = read_records(reader, schema)?;
        let mut actual = Memberships::new();
        for bucket in bucket_keys(reader, schema)? {
            let members = read_pk_set(reader, &bucket)?;
            actual.insert(bucket, members);
        }
        let live = read_pk_set(reader, &schema.keys().live_keys())?;
        Ok((records, actual, live))
    })?;
    let expected = expected_memberships(&maintainer, &records);

    let mut report = VerifyReport {
        checked: records.len(),
        ..VerifyReport::default()
    };
    let empty = BTreeSet::new();
    for (bucket, pks) in &expected {
        let present = actual.get(bucket).unwrap_or(&empty);
        for pk in pks.difference(present) {
            report.missing_entries.push((bucket.clone(), *pk));
        }
    }
    for (bucket, pks) in &actual {
        let wanted = expected.get(bucket).unwrap_or(&empty);
        for pk in pks.difference(wanted) {
            report.stray_entries.push((bucket.clone(), *pk));
        }
    }

    report.dangling_keys = live
        .iter()
        .filter(|pk| !records.contains_key(pk))
        .copied()
        .collect();
    report.unlisted_records = records
        .keys()
        .filter(|pk| !live.contains(pk))
        .copied()
        .collect();

    if !report.is_consistent() {
        tracing::warn!(
            namespace = schema.namespace(),
            missing = report.missing_entries.len(),
            stray = report.stray_entries.len(),
            dangling = report.dangling_keys.len(),
            unlisted = report.unlisted_records.len(),
            "index inconsistencies found"
        );
    }
    Ok(report)
}

/// Rebuilds every bucket and the live key set of a model from its records,
/// in one atomic unit. Returns the number of records indexed.
pub fn reindex(store: &dyn KeyValueStore, schema: &Arc<Schema>) -> CoreResult<usize> {
    let keys = schema.keys();
    let maintainer = IndexMaintainer::new(Arc::clone(schema));
    let mut indexed = 0;
    store.atomic(&[keys.live_keys()], &mut |reader| {
        let records = read_records(reader, schema)?;
        let mut batch = Batch::new();
        for bucket in bucket_keys(reader, schema)? {
            batch.del(bucket);
        }
        batch.del(keys.live_keys());
        for (pk, stored) in &records {
            maintainer.index_insert(&mut batch, *pk, stored);
        }
        batch.sadd(
            keys.live_keys(),
            records.keys().map(PrimaryKey::to_string).collect(),
        );
        indexed = records.len();
        Ok(batch)
    })?;
    tracing::info!(namespace = schema.namespace(), records = indexed, "reindexed");
    Ok(indexed)
}

//! Reading records back: single loads, projections, reloads and link loading.

use crate::error::{CoreError, CoreResult, UnitError};
use crate::record::{FieldChanges, Record};
use crate::schema::{Schema, SchemaRegistry};
use crate::types::PrimaryKey;
use kvdex_store::{KeyValueStore, StoreError, StoreRead};
use std::sync::Arc;

/// Times a snapshot read starts over after a concurrent write.
const SNAPSHOT_ATTEMPTS: usize = 5;

/// Runs `read` against one consistent state of a model's data.
///
/// The model's live-key set is watched; every insert, delete and reset
/// touches it. A write that commits while `read` runs makes the read start
/// over, up to [`SNAPSHOT_ATTEMPTS`] times, after which the conflict is
/// returned. Reads have no effects, so starting over is invisible.
pub fn read_snapshot<T>(
    store: &dyn KeyValueStore,
    schema: &Schema,
    mut read: impl FnMut(&dyn StoreRead) -> CoreResult<T>,
) -> CoreResult<T> {
    let watch = [schema.keys().live_keys()];
    for attempt in 1..=SNAPSHOT_ATTEMPTS {
        let mut unit = UnitError::default();
        let mut output = None;
        let result = store.snapshot(&watch, &mut |reader| {
            output = Some(read(reader).map_err(|err| unit.stash(err))?);
            Ok(())
        });
        match unit.finish(result) {
            Ok(()) => {
                if let Some(value) = output {
                    return Ok(value);
                }
            }
            Err(err) if err.is_conflict() => tracing::debug!(
                namespace = schema.namespace(),
                attempt,
                "records changed while reading, starting over"
            ),
            Err(err) => return Err(err),
        }
    }
    Err(StoreError::Conflict.into())
}

/// Loads one record, or `None` if it does not exist.
pub fn load_record(
    store: &dyn StoreRead,
    schema: &Arc<Schema>,
    pk: PrimaryKey,
) -> CoreResult<Option<Record>> {
    match store.hgetall(&schema.keys().record(pk))? {
        Some(stored) => Ok(Some(Record::from_stored(Arc::clone(schema), pk, stored)?)),
        None => Ok(None),
    }
}

/// Loads several records from one snapshot, keeping the input order.
/// Missing records are `None`.
pub fn load_records(
    store: &dyn KeyValueStore,
    schema: &Arc<Schema>,
    pks: &[PrimaryKey],
) -> CoreResult<Vec<Option<Record>>> {
    read_snapshot(store, schema, |reader| {
        pks.iter().map(|pk| load_record(reader, schema, *pk)).collect()
    })
}

/// Loads the named fields of one record; the other fields read as missing.
///
/// The result carries no stored snapshot, so saving it rewrites every field.
pub fn load_projection(
    store: &dyn StoreRead,
    schema: &Arc<Schema>,
    pk: PrimaryKey,
    only: &[String],
) -> CoreResult<Option<Record>> {
    for name in only {
        schema.require_field(name)?;
    }
    match store.hgetall(&schema.keys().record(pk))? {
        Some(stored) => Ok(Some(Record::from_stored_partial(
            Arc::clone(schema),
            pk,
            stored,
            only,
        )?)),
        None => Ok(None),
    }
}

/// Refreshes a persisted record from the store.
///
/// Returns the fields whose value changed as `(before, after)`, or `None`
/// if the record no longer exists (the record is left as it was).
///
/// # Errors
///
/// Fails with a schema error for a transient record.
pub fn reload(store: &dyn StoreRead, record: &mut Record) -> CoreResult<Option<FieldChanges>> {
    let pk = record.pk().ok_or_else(|| {
        CoreError::schema(format!(
            "cannot reload a record of {:?} that was never saved",
            record.namespace()
        ))
    })?;
    let schema = Arc::clone(record.schema());
    let Some(fresh) = load_record(store, &schema, pk)? else {
        return Ok(None);
    };
    Ok(Some(record.replace_from(fresh)))
}

/// Loads the records linked from `record`, `depth` levels deep.
///
/// Linked records are attached to the link fields (see [`Record::linked`]).
/// Links to records that no longer exist are skipped. Returns the number of
/// records loaded.
///
/// # Errors
///
/// Fails if a link target model is not registered.
pub fn load_links(
    store: &dyn StoreRead,
    registry: &SchemaRegistry,
    record: &mut Record,
    depth: usize,
) -> CoreResult<usize> {
    if depth == 0 {
        return Ok(0);
    }
    let mut wanted = Vec::new();
    for field in record.schema().link_fields() {
        let Some(target) = field.kind().linked_model() else {
            continue;
        };
        let pks: Vec<PrimaryKey> = record
            .get(field.name())
            .map(|value| value.linked_keys())
            .unwrap_or_default()
            .into_iter()
            .filter_map(PrimaryKey::new)
            .collect();
        wanted.push((field.name().to_string(), registry.require(target)?, pks));
    }

    let mut loaded = 0;
    for (field, target, pks) in wanted {
        let mut children = Vec::with_capacity(pks.len());
        for pk in pks {
            match load_record(store, &target, pk)? {
                Some(child) => children.push(child),
                None => tracing::debug!(
                    namespace = record.namespace(),
                    field = %field,
                    target = target.namespace(),
                    %pk,
                    "skipping link to a missing record"
                ),
            }
        }
        loaded += children.len();
        record.attach_loaded(&field, children);
        if let Some(children) = record.linked_mut(&field) {
            for child in children.iter_mut() {
                loaded += load_links(store, registry, child, depth - 1)?;
            }
        }
    }
    Ok(loaded)
}

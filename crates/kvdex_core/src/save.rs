//! Save engine.
//!
//! A save runs in three steps:
//!
//! 1. Primary keys are allocated (`INCR`) for every transient record, linked
//!    records first, and link values are filled in from them.
//! 2. A [`SavePlan`] lists every record to write, linked records before the
//!    records that link to them, each stored record once.
//! 3. The plan is written as one atomic unit: each record's prior state is
//!    read inside the unit, only changed fields are written, and the index
//!    deltas go into the same unit.
//!
//! If any step fails, primary keys allocated in step 1 are taken back from
//! the records (the counter itself is never rewound) and nothing is written.

use crate::error::{CoreError, CoreResult};
use crate::index::IndexMaintainer;
use crate::record::{Record, StoredFields};
use crate::schema::{Schema, RECORD_MARKER};
use crate::types::PrimaryKey;
use kvdex_store::{Batch, KeyValueStore, StoreRead};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

type RecordId = (String, PrimaryKey);

/// One record write in a [`SavePlan`].
#[derive(Debug, Clone)]
pub struct PlanStep {
    schema: Arc<Schema>,
    pk: PrimaryKey,
    stored: StoredFields,
}

impl PlanStep {
    /// Namespace of the record.
    pub fn namespace(&self) -> &str {
        self.schema.namespace()
    }

    /// Primary key of the record.
    pub fn pk(&self) -> PrimaryKey {
        self.pk
    }

    /// Encoded fields to store.
    pub fn stored(&self) -> &StoredFields {
        &self.stored
    }

    fn id(&self) -> RecordId {
        (self.namespace().to_string(), self.pk)
    }
}

/// Dependency-ordered list of record writes.
///
/// Linked records come before the records linking to them (post-order over
/// the link graph) and each stored record appears once.
#[derive(Debug, Clone, Default)]
pub struct SavePlan {
    steps: Vec<PlanStep>,
}

impl SavePlan {
    /// Plans the save of `roots`, following links when `cascade` is set.
    ///
    /// Every record in the plan must already have a primary key.
    ///
    /// # Errors
    ///
    /// Fails if a record cannot be encoded, lacks a primary key, or the same
    /// stored record appears twice with different values.
    pub fn build(roots: &[Record], cascade: bool) -> CoreResult<Self> {
        let mut planner = Planner::default();
        for record in roots {
            planner.visit(record, cascade)?;
        }
        Ok(Self {
            steps: planner.steps,
        })
    }

    /// The writes in execution order.
    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    /// Number of records written.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the plan writes nothing.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[derive(Default)]
struct Planner<'r> {
    seen: HashMap<RecordId, &'r Record>,
    steps: Vec<PlanStep>,
}

impl<'r> Planner<'r> {
    fn visit(&mut self, record: &'r Record, cascade: bool) -> CoreResult<()> {
        if cascade {
            for child in record.linked_records() {
                self.visit(child, cascade)?;
            }
        }
        let pk = record.pk().ok_or_else(|| {
            CoreError::schema(format!(
                "record of {:?} has no primary key to save under",
                record.namespace()
            ))
        })?;
        let id = (record.namespace().to_string(), pk);
        if let Some(previous) = self.seen.get(&id) {
            if previous.has_same_values(record) {
                return Ok(());
            }
            return Err(CoreError::DuplicateRecord {
                namespace: id.0,
                pk: pk.as_u64(),
            });
        }
        self.steps.push(PlanStep {
            schema: Arc::clone(record.schema()),
            pk,
            stored: record.to_stored()?,
        });
        self.seen.insert(id, record);
        Ok(())
    }
}

/// Persists records and keeps their indexes consistent.
#[derive(Clone)]
pub struct SaveEngine {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for SaveEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaveEngine").finish_non_exhaustive()
    }
}

impl SaveEngine {
    /// Creates a save engine over a store.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Saves one record and returns its primary key.
    ///
    /// With `cascade`, linked records with changes are saved first, in the
    /// same atomic unit. Without it, every linked record must already have a
    /// primary key.
    pub fn save(&self, record: &mut Record, cascade: bool) -> CoreResult<PrimaryKey> {
        let pks = self.save_many(std::slice::from_mut(record), cascade)?;
        pks.into_iter()
            .next()
            .ok_or_else(|| CoreError::schema("save produced no primary key"))
    }

    /// Saves several records in one atomic unit, returning their primary keys
    /// in input order.
    pub fn save_many(&self, records: &mut [Record], cascade: bool) -> CoreResult<Vec<PrimaryKey>> {
        let mut fresh = HashSet::new();
        let outcome = self.save_prepared(records, cascade, &mut fresh);
        if outcome.is_err() && !fresh.is_empty() {
            for record in records.iter_mut() {
                release(record, &fresh);
            }
        }
        outcome
    }

    fn save_prepared(
        &self,
        records: &mut [Record],
        cascade: bool,
        fresh: &mut HashSet<RecordId>,
    ) -> CoreResult<Vec<PrimaryKey>> {
        for record in records.iter_mut() {
            self.prepare(record, cascade, fresh)?;
        }
        let plan = SavePlan::build(records, cascade)?;
        self.submit(&plan)?;

        let written: HashMap<RecordId, StoredFields> = plan
            .steps
            .into_iter()
            .map(|step| (step.id(), step.stored))
            .collect();
        let mut pks = Vec::with_capacity(records.len());
        for record in records.iter_mut() {
            mark_written(record, cascade, &written);
            pks.push(
                record
                    .pk()
                    .ok_or_else(|| CoreError::schema("saved record lost its primary key"))?,
            );
        }
        Ok(pks)
    }

    /// Allocates primary keys depth-first and fills in link values.
    fn prepare(
        &self,
        record: &mut Record,
        cascade: bool,
        fresh: &mut HashSet<RecordId>,
    ) -> CoreResult<()> {
        if cascade {
            for child in record.linked_records_mut() {
                self.prepare(child, cascade, fresh)?;
            }
        } else if let Some(field) = record.unsaved_link() {
            return Err(CoreError::UnsavedLink {
                namespace: record.namespace().to_string(),
                field: field.to_string(),
            });
        }
        record.refresh_link_values();

        if record.pk().is_none() {
            let pk = self.allocate(record.schema())?;
            record.assign_pk(pk);
            fresh.insert((record.namespace().to_string(), pk));
        }
        Ok(())
    }

    /// Takes the next primary key from the model's counter.
    pub fn allocate(&self, schema: &Schema) -> CoreResult<PrimaryKey> {
        let key = schema.counter_key();
        let next = self.store.incr(&key)?;
        u64::try_from(next)
            .ok()
            .and_then(PrimaryKey::new)
            .ok_or_else(|| CoreError::corrupt(key, format!("counter yielded {next}")))
    }

    fn submit(&self, plan: &SavePlan) -> CoreResult<()> {
        if plan.is_empty() {
            return Ok(());
        }
        let watch: Vec<String> = plan
            .steps
            .iter()
            .map(|step| step.schema.keys().record(step.pk))
            .collect();
        let mut commands = 0;
        self.store.atomic(&watch, &mut |reader| {
            let mut batch = Batch::new();
            for step in &plan.steps {
                write_step(reader, &mut batch, step)?;
            }
            commands = batch.len();
            Ok(batch)
        })?;
        tracing::debug!(
            namespace = plan.steps[plan.steps.len() - 1].namespace(),
            records = plan.len(),
            commands,
            "saved"
        );
        Ok(())
    }
}

/// Queues one record write and its index deltas.
fn write_step(
    reader: &dyn StoreRead,
    batch: &mut Batch,
    step: &PlanStep,
) -> kvdex_store::StoreResult<()> {
    let keys = step.schema.keys();
    let record_key = keys.record(step.pk);
    let maintainer = IndexMaintainer::new(Arc::clone(&step.schema));

    match reader.hgetall(&record_key)? {
        None => {
            let mut fields: Vec<(String, Vec<u8>)> = step
                .stored
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            fields.push((RECORD_MARKER.to_string(), step.pk.to_string().into_bytes()));
            batch.hset(record_key, fields);
            batch.sadd(keys.live_keys(), vec![step.pk.to_string()]);
            maintainer.index_insert(batch, step.pk, &step.stored);
        }
        Some(prior) => {
            let changed: Vec<(String, Vec<u8>)> = step
                .stored
                .iter()
                .filter(|(name, bytes)| prior.get(*name) != Some(*bytes))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let removed: Vec<String> = prior
                .keys()
                .filter(|name| step.schema.field(name).is_some())
                .filter(|name| !step.stored.contains_key(*name))
                .cloned()
                .collect();
            if changed.is_empty() && removed.is_empty() {
                return Ok(());
            }
            batch.hset(record_key.clone(), changed);
            batch.hdel(record_key, removed);
            batch.sadd(keys.live_keys(), vec![step.pk.to_string()]);
            maintainer.index_update(batch, step.pk, &prior, &step.stored);
        }
    }
    Ok(())
}

fn mark_written(record: &mut Record, cascade: bool, written: &HashMap<RecordId, StoredFields>) {
    if cascade {
        for child in record.linked_records_mut() {
            mark_written(child, cascade, written);
        }
    }
    if let Some(pk) = record.pk() {
        if let Some(stored) = written.get(&(record.namespace().to_string(), pk)) {
            record.mark_stored(stored.clone());
        }
    }
}

/// Takes back primary keys allocated during a failed save.
fn release(record: &mut Record, fresh: &HashSet<RecordId>) {
    for child in record.linked_records_mut() {
        release(child, fresh);
    }
    if let Some(pk) = record.pk() {
        if fresh.contains(&(record.namespace().to_string(), pk)) {
            record.clear_pk();
        }
    }
    record.refresh_link_values();
}

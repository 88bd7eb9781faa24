//! Records: one persisted or transient instance of a model.

use crate::error::{CoreError, CoreResult};
use crate::schema::Schema;
use crate::types::PrimaryKey;
use kvdex_codec::{FieldType, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Stored representation of a record: field name to stored bytes.
///
/// Unset fields are absent.
pub type StoredFields = BTreeMap<String, Vec<u8>>;

/// Per-field difference reported by a reload: `(before, after)`.
pub type FieldChanges = BTreeMap<String, (Value, Value)>;

/// One instance of a model.
///
/// A record starts transient (no primary key). Saving assigns a primary key,
/// which never changes afterwards. The record keeps a snapshot of what it
/// last read from or wrote to the store, which is what
/// [`Record::updated_fields`] compares against.
#[derive(Debug, Clone)]
pub struct Record {
    schema: Arc<Schema>,
    pk: Option<PrimaryKey>,
    values: BTreeMap<String, Value>,
    snapshot: StoredFields,
    links: BTreeMap<String, Vec<Record>>,
}

impl Record {
    /// Creates a transient record holding every field's default.
    pub fn new(schema: Arc<Schema>) -> Self {
        let values = schema
            .fields()
            .iter()
            .map(|f| (f.name().to_string(), f.default_value()))
            .collect();
        Self {
            schema,
            pk: None,
            values,
            snapshot: StoredFields::new(),
            links: BTreeMap::new(),
        }
    }

    /// Decodes a stored record.
    ///
    /// # Errors
    ///
    /// Returns a decode error if any stored field is malformed.
    pub fn from_stored(
        schema: Arc<Schema>,
        pk: PrimaryKey,
        stored: StoredFields,
    ) -> CoreResult<Self> {
        let mut values = BTreeMap::new();
        for field in schema.fields() {
            let raw = stored.get(field.name()).map(Vec::as_slice);
            values.insert(field.name().to_string(), field.decode(raw)?);
        }
        let snapshot = stored
            .into_iter()
            .filter(|(name, _)| schema.field(name).is_some())
            .collect();
        Ok(Self {
            schema,
            pk: Some(pk),
            values,
            snapshot,
            links: BTreeMap::new(),
        })
    }

    /// Decodes only the named fields; the others hold their missing value.
    pub(crate) fn from_stored_partial(
        schema: Arc<Schema>,
        pk: PrimaryKey,
        stored: StoredFields,
        only: &[String],
    ) -> CoreResult<Self> {
        let mut record = Self::from_stored(
            Arc::clone(&schema),
            pk,
            stored
                .into_iter()
                .filter(|(name, _)| only.contains(name))
                .collect(),
        )?;
        // A partial snapshot must never be mistaken for the stored state.
        record.snapshot.clear();
        Ok(record)
    }

    /// The model schema.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The model namespace.
    pub fn namespace(&self) -> &str {
        self.schema.namespace()
    }

    /// The primary key, if the record has been saved.
    pub fn pk(&self) -> Option<PrimaryKey> {
        self.pk
    }

    /// Whether the record has a primary key.
    pub fn is_persisted(&self) -> bool {
        self.pk.is_some()
    }

    /// Returns a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Iterates over `(field, value)` in field name order.
    pub fn values(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Assigns a field, converting the input to the field type.
    ///
    /// Assigning a link field drops any linked record attached to it.
    ///
    /// # Errors
    ///
    /// Fails for unknown fields and inputs the field type cannot accept.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> CoreResult<()> {
        let converted = self.schema.require_field(field)?.input(value.into())?;
        self.links.remove(field);
        self.values.insert(field.to_string(), converted);
        Ok(())
    }

    /// Builder-style [`Record::set`].
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> CoreResult<Self> {
        self.set(field, value)?;
        Ok(self)
    }

    /// Resets a field to the unset sentinel (the empty string for classic fields).
    pub fn unset(&mut self, field: &str) -> CoreResult<()> {
        self.set(field, Value::Unset)
    }

    /// Attaches linked records to a link field.
    ///
    /// Saved records contribute their primary key immediately; unsaved ones
    /// are saved first by a cascading save.
    ///
    /// # Errors
    ///
    /// Fails if the field is not a link field, the records belong to another
    /// model, or several records are attached to a single link.
    pub fn set_linked(&mut self, field: &str, records: Vec<Record>) -> CoreResult<()> {
        let kind = self.schema.require_field(field)?.kind().clone();
        let target = kind.linked_model().ok_or_else(|| {
            CoreError::schema(format!("field {field:?} is not a link field"))
        })?;
        if let Some(other) = records.iter().find(|r| r.namespace() != target) {
            return Err(CoreError::ModelMismatch {
                expected: target.to_string(),
                found: other.namespace().to_string(),
            });
        }
        let value = match kind {
            FieldType::Link { .. } => match records.as_slice() {
                [] => Value::Unset,
                [one] => one.pk.map_or(Value::Unset, |pk| Value::Link(pk.as_u64())),
                _ => {
                    return Err(CoreError::schema(format!(
                        "field {field:?} links to a single record"
                    )))
                }
            },
            _ => Value::Links(
                records
                    .iter()
                    .filter_map(|r| r.pk.map(PrimaryKey::as_u64))
                    .collect(),
            ),
        };
        self.values.insert(field.to_string(), value);
        if records.is_empty() {
            self.links.remove(field);
        } else {
            self.links.insert(field.to_string(), records);
        }
        Ok(())
    }

    /// Attaches one linked record.
    pub fn set_link(&mut self, field: &str, record: Record) -> CoreResult<()> {
        self.set_linked(field, vec![record])
    }

    /// Linked records attached to a field.
    pub fn linked(&self, field: &str) -> &[Record] {
        self.links.get(field).map_or(&[], Vec::as_slice)
    }

    /// Mutable access to the linked records of a field.
    pub fn linked_mut(&mut self, field: &str) -> Option<&mut Vec<Record>> {
        self.links.get_mut(field)
    }

    pub(crate) fn linked_records(&self) -> impl Iterator<Item = &Record> {
        self.links.values().flatten()
    }

    pub(crate) fn linked_records_mut(&mut self) -> impl Iterator<Item = &mut Record> {
        self.links.values_mut().flatten()
    }

    /// Attaches records read from the store without touching the link value.
    pub(crate) fn attach_loaded(&mut self, field: &str, records: Vec<Record>) {
        self.links.insert(field.to_string(), records);
    }

    /// Recomputes link values from the primary keys of attached records.
    pub(crate) fn refresh_link_values(&mut self) {
        for (field, records) in &self.links {
            let Some(declared) = self.schema.field(field) else {
                continue;
            };
            let value = match declared.kind() {
                FieldType::Link { .. } => records
                    .first()
                    .and_then(|r| r.pk)
                    .map_or(Value::Unset, |pk| Value::Link(pk.as_u64())),
                _ => Value::Links(
                    records
                        .iter()
                        .filter_map(|r| r.pk.map(PrimaryKey::as_u64))
                        .collect(),
                ),
            };
            self.values.insert(field.clone(), value);
        }
    }

    /// Name of the first link field holding a record without a primary key.
    pub(crate) fn unsaved_link(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|(_, records)| records.iter().any(|r| r.pk.is_none()))
            .map(|(field, _)| field.as_str())
    }

    /// Encodes every assigned field.
    pub fn to_stored(&self) -> CoreResult<StoredFields> {
        let mut stored = StoredFields::new();
        for field in self.schema.fields() {
            let value = self.values.get(field.name()).unwrap_or(&Value::Unset);
            if let Some(bytes) = field.encode(value)? {
                stored.insert(field.name().to_string(), bytes);
            }
        }
        Ok(stored)
    }

    /// Fields whose stored bytes differ from the last snapshot.
    ///
    /// Every assigned field of a transient record counts as updated.
    pub fn updated_fields(&self) -> CoreResult<Vec<String>> {
        let stored = self.to_stored()?;
        Ok(self
            .schema
            .fields()
            .iter()
            .map(|f| f.name())
            .filter(|name| stored.get(*name) != self.snapshot.get(*name))
            .map(str::to_string)
            .collect())
    }

    /// Whether any field differs from the last snapshot.
    pub fn has_unsaved_changes(&self) -> CoreResult<bool> {
        Ok(self.pk.is_none() || !self.updated_fields()?.is_empty())
    }

    /// Compares field values with another record of the same model,
    /// ignoring primary keys.
    pub fn has_same_values(&self, other: &Record) -> bool {
        self.namespace() == other.namespace() && self.values == other.values
    }

    /// The last stored state this record knows of.
    pub fn snapshot(&self) -> &StoredFields {
        &self.snapshot
    }

    pub(crate) fn assign_pk(&mut self, pk: PrimaryKey) {
        self.pk = Some(pk);
    }

    pub(crate) fn clear_pk(&mut self) {
        self.pk = None;
    }

    /// Records a successful write or read of `stored`.
    pub(crate) fn mark_stored(&mut self, stored: StoredFields) {
        self.snapshot = stored;
    }

    /// Forgets the stored state after a delete.
    pub(crate) fn mark_deleted(&mut self) {
        self.pk = None;
        self.snapshot.clear();
    }

    /// Replaces values and snapshot from a fresh copy, returning what changed.
    pub(crate) fn replace_from(&mut self, fresh: Record) -> FieldChanges {
        let mut changes = FieldChanges::new();
        for (name, after) in &fresh.values {
            let before = self.values.get(name).cloned().unwrap_or_default();
            if &before != after {
                changes.insert(name.clone(), (before, after.clone()));
            }
        }
        self.values = fresh.values;
        self.snapshot = fresh.snapshot;
        changes
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.pk == other.pk && self.has_same_values(other)
    }
}

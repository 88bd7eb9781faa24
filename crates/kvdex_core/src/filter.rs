//! Filter sets and their resolution to primary keys.

use crate::error::{CoreError, CoreResult};
use crate::index::{read_pk_set, IndexMaintainer};
use crate::record::StoredFields;
use crate::schema::Schema;
use crate::types::PrimaryKey;
use kvdex_codec::Value;
use kvdex_store::StoreRead;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Comparison applied by a [`Clause`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// Field equals the value.
    Equals,
    /// Field differs from the value.
    NotEquals,
}

/// One `(field, operator, value)` condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    field: String,
    op: Operator,
    value: Value,
}

impl Clause {
    /// The field compared.
    pub fn field(&self) -> &str {
        &self.field
    }

    /// The comparison.
    pub fn op(&self) -> Operator {
        self.op
    }

    /// The value compared against, already converted to the field type.
    pub fn value(&self) -> &Value {
        &self.value
    }

    fn matches(&self, actual: &Value) -> bool {
        match self.op {
            Operator::Equals => actual == &self.value,
            Operator::NotEquals => actual != &self.value,
        }
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.op {
            Operator::Equals => "==",
            Operator::NotEquals => "!=",
        };
        write!(f, "{} {} {}", self.field, op, self.value)
    }
}

/// An ordered, implicitly AND-ed sequence of clauses for one model.
///
/// [`FilterSet::filter`] and [`FilterSet::exclude`] return a new set and
/// leave the receiver untouched; the `_inline` variants add to the receiver.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterSet {
    schema: Arc<Schema>,
    clauses: Vec<Clause>,
    full_scan: Option<bool>,
}

/// How a filter set was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// No clauses: every live primary key.
    Everything,
    /// Intersection of index buckets only.
    IndexOnly,
    /// Index buckets narrowed by re-checking fetched records.
    IndexThenCheck,
    /// Every live record fetched and checked.
    FullScan,
}

impl FilterSet {
    /// Creates an empty filter set, which matches every record.
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            clauses: Vec::new(),
            full_scan: None,
        }
    }

    /// The model schema.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The clauses in the order they were added.
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Whether the set has no clauses.
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    fn clause(&self, field: &str, op: Operator, value: Value) -> CoreResult<Clause> {
        let declared = self.schema.field(field).ok_or_else(|| {
            CoreError::filter(format!(
                "model {:?} has no field {field:?}",
                self.schema.namespace()
            ))
        })?;
        let value = declared
            .input(value)
            .map_err(|e| CoreError::filter(format!("invalid value for {field:?}: {e}")))?;
        Ok(Clause {
            field: field.to_string(),
            op,
            value,
        })
    }

    /// Returns a new set with an added equality clause.
    pub fn filter(&self, field: &str, value: impl Into<Value>) -> CoreResult<Self> {
        let mut next = self.clone();
        next.filter_inline(field, value)?;
        Ok(next)
    }

    /// Adds an equality clause to this set.
    pub fn filter_inline(&mut self, field: &str, value: impl Into<Value>) -> CoreResult<&mut Self> {
        let clause = self.clause(field, Operator::Equals, value.into())?;
        self.clauses.push(clause);
        Ok(self)
    }

    /// Returns a new set with an added inequality clause.
    pub fn exclude(&self, field: &str, value: impl Into<Value>) -> CoreResult<Self> {
        let mut next = self.clone();
        next.exclude_inline(field, value)?;
        Ok(next)
    }

    /// Adds an inequality clause to this set.
    pub fn exclude_inline(
        &mut self,
        field: &str,
        value: impl Into<Value>,
    ) -> CoreResult<&mut Self> {
        let clause = self.clause(field, Operator::NotEquals, value.into())?;
        self.clauses.push(clause);
        Ok(self)
    }

    /// Overrides the configured full-scan policy for this set.
    #[must_use]
    pub fn allow_full_scan(mut self, allow: bool) -> Self {
        self.full_scan = Some(allow);
        self
    }

    /// The explicit full-scan choice, if any.
    pub fn full_scan(&self) -> Option<bool> {
        self.full_scan
    }

    fn is_index_clause(&self, clause: &Clause) -> bool {
        clause.op == Operator::Equals && self.schema.is_indexed(&clause.field)
    }

    /// Picks the resolution strategy without touching the store.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Filter`] when clauses exist but none is an
    /// equality on an indexed field and full scans are not allowed.
    pub fn strategy(&self, allow_full_scan: bool) -> CoreResult<Strategy> {
        if self.clauses.is_empty() {
            return Ok(Strategy::Everything);
        }
        let indexed = self.clauses.iter().any(|c| self.is_index_clause(c));
        let residual = self.clauses.iter().any(|c| !self.is_index_clause(c));
        match (indexed, residual) {
            (true, false) => Ok(Strategy::IndexOnly),
            (true, true) => Ok(Strategy::IndexThenCheck),
            (false, _) if self.full_scan.unwrap_or(allow_full_scan) => Ok(Strategy::FullScan),
            (false, _) => Err(CoreError::filter(format!(
                "filter on {:?} needs at least one equality clause on an indexed field \
                 (or an explicit full scan)",
                self.schema.namespace()
            ))),
        }
    }

    /// Checks a stored record against every clause.
    pub fn matches_stored(&self, stored: &StoredFields) -> CoreResult<bool> {
        for clause in &self.clauses {
            let field = self.schema.require_field(&clause.field)?;
            let actual = field.decode(stored.get(&clause.field).map(Vec::as_slice))?;
            if !clause.matches(&actual) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Resolves the set to matching primary keys, ascending.
    pub fn resolve(
        &self,
        store: &dyn StoreRead,
        allow_full_scan: bool,
        scan_warning_threshold: usize,
    ) -> CoreResult<Vec<PrimaryKey>> {
        let strategy = self.strategy(allow_full_scan)?;
        let keys = self.schema.keys();

        let candidates = match strategy {
            Strategy::Everything | Strategy::FullScan => read_pk_set(store, &keys.live_keys())?,
            Strategy::IndexOnly | Strategy::IndexThenCheck => {
                let maintainer = IndexMaintainer::new(Arc::clone(&self.schema));
                let mut result: Option<BTreeSet<PrimaryKey>> = None;
                for clause in self.clauses.iter().filter(|c| self.is_index_clause(c)) {
                    let bucket = maintainer.lookup(store, &clause.field, &clause.value)?;
                    let narrowed = match result {
                        None => bucket,
                        Some(current) => current.intersection(&bucket).copied().collect(),
                    };
                    if narrowed.is_empty() {
                        tracing::trace!(clause = %clause, "empty intersection");
                        return Ok(Vec::new());
                    }
                    result = Some(narrowed);
                }
                result.unwrap_or_default()
            }
        };

        if matches!(strategy, Strategy::Everything | Strategy::IndexOnly) {
            return Ok(candidates.into_iter().collect());
        }

        if strategy == Strategy::FullScan && candidates.len() > scan_warning_threshold {
            tracing::warn!(
                namespace = self.schema.namespace(),
                candidates = candidates.len(),
                "filter falls back to a full scan"
            );
        }

        let mut matched = Vec::new();
        for pk in candidates {
            // Records deleted since the index read simply drop out.
            let Some(stored) = store.hgetall(&keys.record(pk))? else {
                continue;
            };
            if self.matches_stored(&stored)? {
                matched.push(pk);
            }
        }
        Ok(matched)
    }
}

impl fmt::Display for FilterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.clauses.is_empty() {
            return write!(f, "{}: all", self.schema.namespace());
        }
        let parts: Vec<String> = self.clauses.iter().map(Clause::to_string).collect();
        write!(f, "{}: {}", self.schema.namespace(), parts.join(" AND "))
    }
}

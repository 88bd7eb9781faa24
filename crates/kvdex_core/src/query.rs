//! Query: a filter set bound to a store, with the fetch operations.

use crate::config::Config;
use crate::delete::DeleteEngine;
use crate::error::CoreResult;
use crate::fetch::{load_projection, load_record, read_snapshot};
use crate::filter::{FilterSet, Strategy};
use crate::index::IndexMaintainer;
use crate::record::Record;
use crate::types::PrimaryKey;
use kvdex_codec::Value;
use kvdex_store::{KeyValueStore, StoreRead};
use rand::seq::SliceRandom;
use std::fmt;
use std::sync::Arc;

/// A filter set ready to run against a store.
///
/// Every fetch resolves the filter again; nothing is cached between calls.
/// Fetches that resolve keys and then load records do both against one
/// snapshot, so a concurrent reset is seen entirely or not at all.
#[derive(Clone)]
pub struct Query {
    store: Arc<dyn KeyValueStore>,
    filter: FilterSet,
    config: Config,
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("filter", &self.filter.to_string())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.filter, f)
    }
}

impl Query {
    /// Binds a filter set to a store.
    pub fn new(store: Arc<dyn KeyValueStore>, filter: FilterSet, config: Config) -> Self {
        Self {
            store,
            filter,
            config,
        }
    }

    /// The filter set.
    pub fn filter_set(&self) -> &FilterSet {
        &self.filter
    }

    /// Adds an equality clause.
    pub fn filter(mut self, field: &str, value: impl Into<Value>) -> CoreResult<Self> {
        self.filter.filter_inline(field, value)?;
        Ok(self)
    }

    /// Adds an inequality clause.
    pub fn exclude(mut self, field: &str, value: impl Into<Value>) -> CoreResult<Self> {
        self.filter.exclude_inline(field, value)?;
        Ok(self)
    }

    /// Adds an equality clause in place.
    pub fn filter_inline(&mut self, field: &str, value: impl Into<Value>) -> CoreResult<&mut Self> {
        self.filter.filter_inline(field, value)?;
        Ok(self)
    }

    /// Adds an inequality clause in place.
    pub fn exclude_inline(
        &mut self,
        field: &str,
        value: impl Into<Value>,
    ) -> CoreResult<&mut Self> {
        self.filter.exclude_inline(field, value)?;
        Ok(self)
    }

    /// Allows or forbids a full scan for this query, overriding the config.
    #[must_use]
    pub fn allow_full_scan(mut self, allow: bool) -> Self {
        self.filter = self.filter.allow_full_scan(allow);
        self
    }

    /// How the filter will be resolved.
    pub fn strategy(&self) -> CoreResult<Strategy> {
        self.filter.strategy(self.config.allow_full_scan)
    }

    /// Matching primary keys, ascending.
    pub fn primary_keys(&self) -> CoreResult<Vec<PrimaryKey>> {
        self.snapshot(|reader| self.resolve(reader))
    }

    /// Number of matching records.
    ///
    /// An empty filter or a single indexed equality is answered from one set
    /// cardinality without reading members.
    pub fn count(&self) -> CoreResult<usize> {
        let schema = self.filter.schema();
        let fast_key = match (self.strategy()?, self.filter.clauses()) {
            (Strategy::Everything, _) => Some(schema.keys().live_keys()),
            (Strategy::IndexOnly, [clause]) => Some(
                IndexMaintainer::new(Arc::clone(schema))
                    .bucket_key(clause.field(), clause.value())?,
            ),
            _ => None,
        };
        match fast_key {
            Some(key) => Ok(usize::try_from(self.store.scard(&key)?).unwrap_or(usize::MAX)),
            None => Ok(self.primary_keys()?.len()),
        }
    }

    /// Whether the record `pk` exists and matches the filter.
    ///
    /// Only that one record is read, so no indexed clause is required.
    pub fn exists(&self, pk: PrimaryKey) -> CoreResult<bool> {
        let key = self.filter.schema().keys().record(pk);
        if self.filter.is_empty() {
            return Ok(self.store.exists(&key)?);
        }
        match self.store.hgetall(&key)? {
            Some(stored) => self.filter.matches_stored(&stored),
            None => Ok(false),
        }
    }

    /// Every matching record, ordered by primary key.
    pub fn all(&self) -> CoreResult<Vec<Record>> {
        let schema = self.filter.schema();
        self.snapshot(|reader| {
            let mut records = Vec::new();
            for pk in self.resolve(reader)? {
                if let Some(record) = load_record(reader, schema, pk)? {
                    records.push(record);
                }
            }
            Ok(records)
        })
    }

    /// Every matching record with only the named fields decoded.
    ///
    /// The other fields read as missing and the records carry no stored
    /// snapshot.
    pub fn all_only_fields(&self, fields: &[&str]) -> CoreResult<Vec<Record>> {
        let only: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        let schema = self.filter.schema();
        self.snapshot(|reader| {
            let mut records = Vec::new();
            for pk in self.resolve(reader)? {
                if let Some(record) = load_projection(reader, schema, pk, &only)? {
                    records.push(record);
                }
            }
            Ok(records)
        })
    }

    /// The matching record with the lowest primary key.
    pub fn first(&self) -> CoreResult<Option<Record>> {
        self.snapshot(|reader| {
            let pks = self.resolve(reader)?;
            self.first_existing(reader, pks)
        })
    }

    /// The matching record with the highest primary key.
    pub fn last(&self) -> CoreResult<Option<Record>> {
        self.snapshot(|reader| {
            let mut pks = self.resolve(reader)?;
            pks.reverse();
            self.first_existing(reader, pks)
        })
    }

    /// One matching record chosen uniformly at random.
    pub fn random(&self) -> CoreResult<Option<Record>> {
        self.snapshot(|reader| {
            let mut pks = self.resolve(reader)?;
            pks.shuffle(&mut rand::thread_rng());
            self.first_existing(reader, pks)
        })
    }

    /// The record `pk`, if it exists and matches the filter.
    pub fn get(&self, pk: PrimaryKey) -> CoreResult<Option<Record>> {
        self.get_from(self.store.as_read(), pk)
    }

    /// Looks up several primary keys in one snapshot, keeping the input order.
    pub fn get_many(&self, pks: &[PrimaryKey]) -> CoreResult<Vec<Option<Record>>> {
        self.snapshot(|reader| pks.iter().map(|pk| self.get_from(reader, *pk)).collect())
    }

    /// Deletes every matching record in one atomic unit.
    ///
    /// Returns the number of records deleted.
    pub fn delete(&self) -> CoreResult<usize> {
        DeleteEngine::new(Arc::clone(&self.store), self.config.clone()).delete_by_filter(&self.filter)
    }

    fn snapshot<T>(&self, read: impl FnMut(&dyn StoreRead) -> CoreResult<T>) -> CoreResult<T> {
        read_snapshot(self.store.as_ref(), self.filter.schema(), read)
    }

    fn resolve(&self, reader: &dyn StoreRead) -> CoreResult<Vec<PrimaryKey>> {
        self.filter.resolve(
            reader,
            self.config.allow_full_scan,
            self.config.scan_warning_threshold,
        )
    }

    fn get_from(&self, reader: &dyn StoreRead, pk: PrimaryKey) -> CoreResult<Option<Record>> {
        let Some(record) = load_record(reader, self.filter.schema(), pk)? else {
            return Ok(None);
        };
        if self.filter.is_empty() || self.filter.matches_stored(record.snapshot())? {
            Ok(Some(record))
        } else {
            Ok(None)
        }
    }

    fn first_existing(
        &self,
        reader: &dyn StoreRead,
        pks: Vec<PrimaryKey>,
    ) -> CoreResult<Option<Record>> {
        let schema = self.filter.schema();
        for pk in pks {
            if let Some(record) = load_record(reader, schema, pk)? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::save::SaveEngine;
    use crate::schema::Schema;
    use kvdex_codec::Field;
    use kvdex_store::InMemoryStore;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::builder("scores")
                .field(Field::text("name"))
                .field(Field::text("team"))
                .indexed_field(Field::integer("score"))
                .build()
                .unwrap(),
        )
    }

    fn seeded(rows: &[(&str, &str, i64)]) -> Query {
        let store = Arc::new(InMemoryStore::new());
        let mut records: Vec<Record> = rows
            .iter()
            .map(|(name, team, score)| {
                Record::new(schema())
                    .with("name", *name)
                    .unwrap()
                    .with("team", *team)
                    .unwrap()
                    .with("score", *score)
                    .unwrap()
            })
            .collect();
        SaveEngine::new(store.clone())
            .save_many(&mut records, false)
            .unwrap();
        Query::new(store, FilterSet::new(schema()), Config::default())
    }

    fn pks(values: &[u64]) -> Vec<PrimaryKey> {
        values.iter().map(|v| PrimaryKey::new(*v).unwrap()).collect()
    }

    fn names(records: &[Record]) -> Vec<String> {
        records
            .iter()
            .map(|r| r.get("name").and_then(Value::as_text).unwrap_or("").to_string())
            .collect()
    }

    fn sample() -> Query {
        seeded(&[
            ("a", "red", 1),
            ("b", "blue", 1),
            ("c", "red", 2),
            ("d", "red", 1),
        ])
    }

    #[test]
    fn fetch_operations_share_one_key_set() {
        let query = sample().filter("score", 1).unwrap();
        assert_eq!(query.primary_keys().unwrap(), pks(&[1, 2, 4]));
        assert_eq!(query.count().unwrap(), 3);
        assert_eq!(names(&query.all().unwrap()), vec!["a", "b", "d"]);
        assert_eq!(names(&[query.first().unwrap().unwrap()]), vec!["a"]);
        assert_eq!(names(&[query.last().unwrap().unwrap()]), vec!["d"]);

        let picked = query.random().unwrap().unwrap();
        assert!(pks(&[1, 2, 4]).contains(&picked.pk().unwrap()));
    }

    #[test]
    fn residual_clauses_narrow_the_index_result() {
        let query = sample()
            .filter("score", 1)
            .unwrap()
            .exclude("team", "blue")
            .unwrap();
        assert_eq!(query.strategy().unwrap(), Strategy::IndexThenCheck);
        assert_eq!(query.count().unwrap(), 2);
        assert_eq!(query.to_string(), "scores: score == 1 AND team != blue");
    }

    #[test]
    fn empty_query_counts_everything() {
        let query = sample();
        assert_eq!(query.count().unwrap(), 4);
        assert_eq!(query.all().unwrap().len(), 4);
    }

    #[test]
    fn no_match_yields_nothing() {
        let query = sample().filter("score", 99).unwrap();
        assert_eq!(query.count().unwrap(), 0);
        assert!(query.first().unwrap().is_none());
        assert!(query.last().unwrap().is_none());
        assert!(query.random().unwrap().is_none());
    }

    #[test]
    fn full_scan_requires_opt_in() {
        let query = sample().filter("team", "red").unwrap();
        assert_eq!(query.count().unwrap_err().kind(), ErrorKind::Filter);
        assert_eq!(query.all().unwrap_err().kind(), ErrorKind::Filter);

        let query = query.allow_full_scan(true);
        assert_eq!(query.primary_keys().unwrap(), pks(&[1, 3, 4]));
    }

    #[test]
    fn get_and_exists_respect_the_filter() {
        let query = sample().filter("score", 2).unwrap();
        let three = PrimaryKey::new(3).unwrap();
        let one = PrimaryKey::new(1).unwrap();
        assert!(query.exists(three).unwrap());
        assert!(!query.exists(one).unwrap());
        assert!(query.get(one).unwrap().is_none());

        let found = query.get_many(&[three, one]).unwrap();
        assert!(found[0].is_some());
        assert!(found[1].is_none());
    }

    #[test]
    fn projection_loads_requested_fields() {
        let query = sample().filter("score", 2).unwrap();
        let records = query.all_only_fields(&["team"]).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("team"), Some(&Value::from("red")));
        assert_eq!(records[0].get("name"), Some(&Value::Unset));
    }

    #[test]
    fn delete_removes_matches() {
        let query = sample().filter("score", 1).unwrap();
        assert_eq!(query.delete().unwrap(), 3);
        assert_eq!(query.count().unwrap(), 0);
        let everything = Query::new(
            Arc::clone(&query.store),
            FilterSet::new(schema()),
            Config::default(),
        );
        assert_eq!(everything.count().unwrap(), 1);
    }
}

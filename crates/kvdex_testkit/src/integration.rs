//! Cross-crate integration test helpers.
//!
//! [`ScoresHarness`] drives the `scores` sample model while keeping a shadow
//! copy of what the model should contain, and checks the two against each
//! other, including every index bucket.

use crate::generators::ScoreOperation;
use kvdex_core::{Model, PrimaryKey, Record, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Panics unless the model's buckets and live key set match its records.
pub fn assert_index_consistent(model: &Model) {
    let report = model.verify().expect("Failed to verify model");
    assert!(
        report.is_consistent(),
        "index of {:?} is inconsistent: {report:?}",
        model.namespace()
    );
}

/// Saves `record`, loads it back and asserts every field survived the trip.
///
/// Unset fields read back as the field's missing value.
pub fn assert_round_trip(model: &Model, record: &mut Record) -> PrimaryKey {
    let pk = model.save(record).expect("Failed to save record");
    let loaded = model
        .get(pk)
        .expect("Failed to load record")
        .expect("Saved record is missing");
    for field in model.schema().fields() {
        let expected = record.get(field.name()).cloned().unwrap_or_default();
        let expected = if expected.is_unset() {
            field.kind().missing_value()
        } else {
            expected
        };
        assert_eq!(
            loaded.get(field.name()),
            Some(&expected),
            "field {:?} did not round-trip",
            field.name()
        );
    }
    pk
}

/// A test harness shadowing the `scores` sample model.
pub struct ScoresHarness {
    model: Model,
    /// Live records in insertion order.
    records: Vec<Record>,
    /// Expected score of every live record.
    expected: BTreeMap<PrimaryKey, Option<i64>>,
}

impl ScoresHarness {
    /// Creates a harness over a model registered with the `scores` schema.
    pub fn new(model: Model) -> Self {
        Self {
            model,
            records: Vec::new(),
            expected: BTreeMap::new(),
        }
    }

    /// The model under test.
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Applies one operation to the model and to the shadow copy.
    pub fn apply(&mut self, op: &ScoreOperation) {
        match op {
            ScoreOperation::Insert { name, score } => {
                let mut record = self
                    .model
                    .new_record()
                    .with("name", name.as_str())
                    .and_then(|r| r.with("score", *score))
                    .expect("Failed to build record");
                let pk = self.model.save(&mut record).expect("Failed to save");
                self.expected.insert(pk, *score);
                self.records.push(record);
            }
            ScoreOperation::Update { slot, score } => {
                let Some(index) = self.slot(*slot) else {
                    return;
                };
                let record = &mut self.records[index];
                record.set("score", *score).expect("Failed to set score");
                let pk = self.model.save(record).expect("Failed to save");
                self.expected.insert(pk, *score);
            }
            ScoreOperation::Delete { slot } => {
                let Some(index) = self.slot(*slot) else {
                    return;
                };
                let mut record = self.records.remove(index);
                let pk = record.pk().expect("Live record without primary key");
                assert!(self.model.delete_record(&mut record).expect("Failed to delete"));
                self.expected.remove(&pk);
            }
            ScoreOperation::DeleteWhere { score } => {
                let deleted = self
                    .model
                    .filter("score", *score)
                    .and_then(|q| q.delete())
                    .expect("Failed to delete by filter");
                let before = self.expected.len();
                self.expected.retain(|_, s| *s != Some(*score));
                self.records
                    .retain(|r| r.get("score") != Some(&Value::Integer(*score)));
                assert_eq!(deleted, before - self.expected.len());
            }
        }
    }

    fn slot(&self, slot: usize) -> Option<usize> {
        (!self.records.is_empty()).then(|| slot % self.records.len())
    }

    /// Checks the model against the shadow copy.
    pub fn verify_all(&self) {
        let pks: Vec<PrimaryKey> = self.expected.keys().copied().collect();
        assert_eq!(self.model.primary_keys().expect("keys"), pks);
        assert_eq!(self.model.count().expect("count"), pks.len());

        let scores: BTreeSet<Option<i64>> = self.expected.values().copied().collect();
        for score in scores {
            let wanted: Vec<PrimaryKey> = self
                .expected
                .iter()
                .filter(|(_, s)| **s == score)
                .map(|(pk, _)| *pk)
                .collect();
            let value = score.map_or(Value::Unset, Value::Integer);
            let found = self
                .model
                .lookup("score", value)
                .expect("lookup")
                .into_iter()
                .collect::<Vec<_>>();
            assert_eq!(found, wanted, "bucket for score {score:?}");
        }

        for record in &self.records {
            let pk = record.pk().expect("Live record without primary key");
            let loaded = self.model.get(pk).expect("get").expect("record missing");
            assert!(loaded.has_same_values(record), "record {pk} differs");
        }
        assert_index_consistent(&self.model);
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.expected.len()
    }

    /// Whether the model should be empty.
    pub fn is_empty(&self) -> bool {
        self.expected.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{schemas, with_temp_db};
    use crate::generators::{score_operation_sequence, PropTestConfig};
    use proptest::prelude::*;

    #[test]
    fn harness_tracks_a_fixed_sequence() {
        with_temp_db(|db| {
            let mut harness = ScoresHarness::new(db.register(schemas::scores()).unwrap());
            let ops = [
                ScoreOperation::Insert {
                    name: "a".into(),
                    score: Some(1),
                },
                ScoreOperation::Insert {
                    name: "b".into(),
                    score: Some(1),
                },
                ScoreOperation::Update {
                    slot: 0,
                    score: Some(2),
                },
                ScoreOperation::DeleteWhere { score: 2 },
                ScoreOperation::Insert {
                    name: "c".into(),
                    score: None,
                },
            ];
            for op in &ops {
                harness.apply(op);
                harness.verify_all();
            }
            assert_eq!(harness.len(), 2);
        });
    }

    #[test]
    fn every_type_round_trips() {
        with_temp_db(|db| {
            let model = db.register(schemas::all_types()).unwrap();
            let mut record = model
                .new_record()
                .with("text", "héllo")
                .and_then(|r| r.with("integer", -7))
                .and_then(|r| r.with("float", 2.5))
                .and_then(|r| r.with("flag", true))
                .and_then(|r| r.with("raw", vec![0u8, 255, 1]))
                .and_then(|r| r.with("encoded", b"bytes".as_slice()))
                .and_then(|r| r.with("price", 9.999))
                .and_then(|r| r.with("doc", serde_json::json!({"a": [1, 2]})))
                .and_then(|r| r.with("when", "2024-02-29T12:00:00Z"))
                .and_then(|r| r.with("blob", "compress me ".repeat(20)))
                .and_then(|r| r.with("small", "lz4"))
                .and_then(|r| r.with("archived", "zlib ".repeat(30)))
                .and_then(|r| r.with("packed", b"bz2".as_slice()))
                .and_then(|r| r.with("title", "a long title"))
                .unwrap();
            assert_round_trip(&model, &mut record);
            assert_eq!(record.get("classic"), Some(&Value::Text(String::new())));
            assert_index_consistent(&model);
        });
    }

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn random_sequences_keep_indexes_consistent(ops in score_operation_sequence(1, 40)) {
            with_temp_db(|db| {
                let mut harness = ScoresHarness::new(db.register(schemas::scores()).unwrap());
                for op in &ops {
                    harness.apply(op);
                }
                harness.verify_all();
            });
        }
    }
}

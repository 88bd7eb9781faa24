//! Random operation sequences never leave the indexes out of step with the records.

use std::collections::{BTreeMap, BTreeSet};

use kvdex_core::{Database, Field, Model, PrimaryKey, Schema, Value};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Insert(Option<i64>),
    Update(usize, Option<i64>),
    Delete(usize),
    DeleteWhere(i64),
    Reset(Vec<i64>),
}

fn score() -> impl Strategy<Value = Option<i64>> {
    proptest::option::weighted(0.8, 0..4i64)
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => score().prop_map(Op::Insert),
        3 => (any::<usize>(), score()).prop_map(|(i, s)| Op::Update(i, s)),
        2 => any::<usize>().prop_map(Op::Delete),
        1 => (0..4i64).prop_map(Op::DeleteWhere),
        1 => proptest::collection::vec(0..4i64, 0..4).prop_map(Op::Reset),
    ]
}

fn model() -> Model {
    Database::in_memory()
        .register(
            Schema::builder("scores")
                .indexed_field(Field::integer("score"))
                .build()
                .unwrap(),
        )
        .unwrap()
}

fn score_value(score: Option<i64>) -> Value {
    score.map_or(Value::Unset, Value::Integer)
}

fn nth_key(expected: &BTreeMap<u64, Option<i64>>, i: usize) -> Option<u64> {
    if expected.is_empty() {
        return None;
    }
    expected.keys().nth(i % expected.len()).copied()
}

fn apply(model: &Model, expected: &mut BTreeMap<u64, Option<i64>>, op: Op) {
    match op {
        Op::Insert(score) => {
            let mut record = model.new_record().with("score", score_value(score)).unwrap();
            let pk = model.save(&mut record).unwrap();
            expected.insert(pk.as_u64(), score);
        }
        Op::Update(i, score) => {
            if let Some(pk) = nth_key(expected, i) {
                let mut record = model.get(PrimaryKey::new(pk).unwrap()).unwrap().unwrap();
                record.set("score", score_value(score)).unwrap();
                model.save(&mut record).unwrap();
                expected.insert(pk, score);
            }
        }
        Op::Delete(i) => {
            if let Some(pk) = nth_key(expected, i) {
                assert!(model.delete_by_pk(PrimaryKey::new(pk).unwrap()).unwrap());
                expected.remove(&pk);
            }
        }
        Op::DeleteWhere(score) => {
            let filter = model.filter("score", score).unwrap().filter_set().clone();
            let before = expected.len();
            expected.retain(|_, s| *s != Some(score));
            assert_eq!(model.delete_by_filter(&filter).unwrap(), before - expected.len());
        }
        Op::Reset(scores) => {
            let mut records: Vec<_> = scores
                .iter()
                .map(|s| model.new_record().with("score", *s).unwrap())
                .collect();
            let pks = model.reset(&mut records).unwrap();
            expected.clear();
            for (pk, score) in pks.into_iter().zip(scores) {
                expected.insert(pk.as_u64(), Some(score));
            }
        }
    }
}

fn check(model: &Model, expected: &BTreeMap<u64, Option<i64>>) {
    assert!(model.verify().unwrap().is_consistent());
    assert_eq!(model.count().unwrap(), expected.len());
    for score in (0..4).map(Some).chain([None]) {
        let want: BTreeSet<u64> = expected
            .iter()
            .filter(|(_, s)| **s == score)
            .map(|(pk, _)| *pk)
            .collect();
        let got: BTreeSet<u64> = model
            .lookup("score", score_value(score))
            .unwrap()
            .into_iter()
            .map(PrimaryKey::as_u64)
            .collect();
        assert_eq!(got, want, "bucket {score:?}");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn indexes_follow_records(ops in proptest::collection::vec(op(), 1..40)) {
        let model = model();
        let mut expected = BTreeMap::new();
        for op in ops {
            apply(&model, &mut expected, op);
            check(&model, &expected);
        }
    }
}

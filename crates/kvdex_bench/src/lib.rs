//! Benchmark utilities.

#![warn(missing_docs)]

use kvdex_core::{Database, Field, Model, Record, Schema};
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Random alphanumeric text of the specified length.
pub fn random_text(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Registers the benchmark model on a fresh in-memory database.
///
/// `bench`: `name` (text), `team` (text, indexed), `score` (integer, indexed),
/// `note` (text).
pub fn bench_model() -> (Database, Model) {
    let db = Database::in_memory();
    let schema = Schema::builder("bench")
        .field(Field::text("name"))
        .indexed_field(Field::text("team"))
        .indexed_field(Field::integer("score"))
        .field(Field::text("note"))
        .build()
        .expect("Invalid bench schema");
    let model = db.register(schema).expect("Failed to register bench model");
    (db, model)
}

/// Generates `count` transient records spread over `buckets` scores and
/// four teams.
pub fn generate_records(model: &Model, count: usize, buckets: i64) -> Vec<Record> {
    let teams = ["red", "blue", "green", "gold"];
    (0..count)
        .map(|i| {
            model
                .new_record()
                .with("name", random_text(12))
                .and_then(|r| r.with("team", teams[i % teams.len()]))
                .and_then(|r| r.with("score", i as i64 % buckets.max(1)))
                .and_then(|r| r.with("note", random_text(64)))
                .expect("Failed to build record")
        })
        .collect()
}

/// A model already holding `count` saved records.
pub fn populated(count: usize, buckets: i64) -> (Database, Model) {
    let (db, model) = bench_model();
    let mut records = generate_records(&model, count, buckets);
    model.save_many(&mut records).expect("Failed to populate");
    (db, model)
}

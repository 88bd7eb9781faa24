//! End-to-end behaviour of saving, filtering, deleting and resetting.

use std::collections::BTreeSet;
use std::sync::Arc;

use kvdex_core::{
    Config, CoreError, Database, ErrorKind, Field, FieldType, Model, PrimaryKey, Schema, Value,
};
use kvdex_store::{Fault, InMemoryStore};

fn scores_schema() -> Schema {
    Schema::builder("scores")
        .field(Field::text("name"))
        .indexed_field(Field::integer("score"))
        .build()
        .unwrap()
}

fn setup() -> (Arc<InMemoryStore>, Database, Model) {
    let store = Arc::new(InMemoryStore::new());
    let db = Database::new(store.clone(), Config::default());
    let model = db.register(scores_schema()).unwrap();
    (store, db, model)
}

fn pks(keys: impl IntoIterator<Item = PrimaryKey>) -> BTreeSet<u64> {
    keys.into_iter().map(PrimaryKey::as_u64).collect()
}

fn filtered(model: &Model, score: i64) -> BTreeSet<u64> {
    pks(model.filter("score", score).unwrap().primary_keys().unwrap())
}

#[test]
fn worked_example() {
    let (_store, _db, model) = setup();

    let mut a = model.new_record().with("name", "a").unwrap().with("score", 1).unwrap();
    let mut b = model.new_record().with("name", "b").unwrap().with("score", 1).unwrap();
    assert_eq!(model.save(&mut a).unwrap().as_u64(), 1);
    assert_eq!(model.save(&mut b).unwrap().as_u64(), 2);
    assert_eq!(filtered(&model, 1), BTreeSet::from([1, 2]));

    a.set("score", 2).unwrap();
    model.save(&mut a).unwrap();
    assert_eq!(filtered(&model, 1), BTreeSet::from([2]));
    assert_eq!(filtered(&model, 2), BTreeSet::from([1]));

    let filter = model.filter("score", 2).unwrap().filter_set().clone();
    assert_eq!(model.delete_by_filter(&filter).unwrap(), 1);
    assert_eq!(model.count().unwrap(), 1);
    assert!(model.get(PrimaryKey::new(1).unwrap()).unwrap().is_none());
    assert!(model.verify().unwrap().is_consistent());
}

#[test]
fn saved_values_read_back_unchanged() {
    let (_store, db, _model) = setup();
    let model = db
        .register(
            Schema::builder("mixed")
                .field(Field::text("text"))
                .field(Field::new("classic", FieldType::Classic))
                .field(Field::new("flag", FieldType::Bool))
                .field(Field::new("ratio", FieldType::Float))
                .field(Field::new("doc", FieldType::Json))
                .build()
                .unwrap(),
        )
        .unwrap();

    let mut record = model
        .new_record()
        .with("flag", true)
        .unwrap()
        .with("ratio", 0.25)
        .unwrap()
        .with("doc", 3)
        .unwrap();
    let pk = model.save(&mut record).unwrap();

    let fetched = model.get(pk).unwrap().unwrap();
    assert_eq!(fetched.get("flag"), Some(&Value::Bool(true)));
    assert_eq!(fetched.get("ratio"), Some(&Value::Float(0.25)));
    assert_eq!(fetched.get("doc"), record.get("doc"));
    assert_eq!(fetched.get("text"), Some(&Value::Unset));
    assert_eq!(fetched.get("classic"), Some(&Value::Text(String::new())));
}

#[test]
fn lookup_tracks_saves_and_deletes() {
    let (_store, _db, model) = setup();
    let mut records: Vec<_> = (0..5)
        .map(|_| model.new_record().with("score", 7).unwrap())
        .collect();
    let saved = model.save_many(&mut records).unwrap();
    assert_eq!(pks(model.lookup("score", 7).unwrap()), pks(saved.clone()));

    assert!(model.delete_by_pk(saved[2]).unwrap());
    let remaining = pks(model.lookup("score", 7).unwrap());
    assert_eq!(remaining.len(), 4);
    assert!(!remaining.contains(&saved[2].as_u64()));
}

#[test]
fn unset_values_have_their_own_bucket() {
    let (_store, _db, model) = setup();
    let mut unset = model.new_record().with("name", "u").unwrap();
    let mut zero = model.new_record().with("score", 0).unwrap();
    model.save(&mut unset).unwrap();
    model.save(&mut zero).unwrap();

    assert_eq!(pks(model.lookup("score", Value::Unset).unwrap()), BTreeSet::from([1]));
    assert_eq!(filtered(&model, 0), BTreeSet::from([2]));
    assert_eq!(
        pks(model.exclude("score", Value::Unset).unwrap().primary_keys().unwrap()),
        BTreeSet::from([2])
    );
}

#[test]
fn reset_replaces_the_dataset() {
    let (store, _db, model) = setup();
    let mut old: Vec<_> = (0..4)
        .map(|i| model.new_record().with("score", i).unwrap())
        .collect();
    model.save_many(&mut old).unwrap();

    let mut new = vec![
        model.new_record().with("name", "x").unwrap().with("score", 9).unwrap(),
        model.new_record().with("name", "y").unwrap().with("score", 9).unwrap(),
    ];
    let assigned = model.reset(&mut new).unwrap();
    assert_eq!(pks(assigned), BTreeSet::from([1, 2]));
    assert_eq!(model.count().unwrap(), 2);
    assert_eq!(filtered(&model, 9), BTreeSet::from([1, 2]));
    assert!(filtered(&model, 0).is_empty());

    model.reset(&mut []).unwrap();
    assert_eq!(model.count().unwrap(), 0);
    assert!(store.keys().iter().all(|key| !key.starts_with("scores:")));
}

#[test]
fn failed_save_leaves_no_trace() {
    let (store, _db, model) = setup();
    let mut kept = model.new_record().with("score", 1).unwrap();
    model.save(&mut kept).unwrap();
    let before = store.keys();

    kept.set("score", 2).unwrap();
    store.inject_fault(Fault::AfterCommands(2));
    let err = model.save(&mut kept).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transaction);
    assert_eq!(store.keys(), before);
    assert_eq!(filtered(&model, 1), BTreeSet::from([1]));
    assert!(model.verify().unwrap().is_consistent());
}

#[test]
fn conflicting_delete_is_reported() {
    let (store, _db, model) = setup();
    let mut record = model.new_record().with("score", 1).unwrap();
    model.save(&mut record).unwrap();

    store.inject_fault(Fault::Conflict);
    let filter = model.filter("score", 1).unwrap().filter_set().clone();
    let err = model.delete_by_filter(&filter).unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(model.count().unwrap(), 1);
}

#[test]
fn cascade_saves_links_first() {
    let (_store, db, _model) = setup();
    let people = db
        .register(
            Schema::builder("people")
                .indexed_field(Field::text("name"))
                .build()
                .unwrap(),
        )
        .unwrap();
    let pets = db
        .register(
            Schema::builder("pets")
                .field(Field::text("name"))
                .indexed_field(Field::link("owner", "people"))
                .build()
                .unwrap(),
        )
        .unwrap();

    let owner = people.new_record().with("name", "ann").unwrap();
    let mut pet = pets.new_record().with("name", "rex").unwrap();
    pet.set_link("owner", owner).unwrap();

    assert!(matches!(
        pets.save_with(&mut pet, false),
        Err(CoreError::UnsavedLink { .. })
    ));
    assert_eq!(people.count().unwrap(), 0);

    let pet_pk = pets.save_with(&mut pet, true).unwrap();
    let owner_pk = pet.linked("owner")[0].pk().unwrap();
    assert_eq!(people.count().unwrap(), 1);
    assert_eq!(
        pks(pets.lookup("owner", Value::Link(owner_pk.as_u64())).unwrap()),
        BTreeSet::from([pet_pk.as_u64()])
    );

    let mut loaded = pets.get(pet_pk).unwrap().unwrap();
    assert_eq!(pets.load_links(&mut loaded, 1).unwrap(), 1);
    assert_eq!(loaded.linked("owner")[0].get("name"), Some(&Value::Text("ann".into())));
}

#[test]
fn error_kinds_classify_failures() {
    let (_store, _db, model) = setup();
    assert_eq!(model.filter("missing", 1).unwrap_err().kind(), ErrorKind::Filter);
    assert_eq!(
        model.new_record().with("missing", 1).unwrap_err().kind(),
        ErrorKind::Schema
    );
    assert_eq!(model.filter("name", "a").unwrap().count().unwrap_err().kind(), ErrorKind::Filter);
    assert_eq!(
        model.new_record().with("score", "nope").unwrap_err().kind(),
        ErrorKind::Decode
    );
    assert_eq!(
        Schema::builder("bad").index("ghost").build().unwrap_err().kind(),
        ErrorKind::Schema
    );
}

#[test]
fn full_scan_must_be_requested() {
    let (_store, _db, model) = setup();
    let mut records = vec![
        model.new_record().with("name", "a").unwrap().with("score", 1).unwrap(),
        model.new_record().with("name", "b").unwrap().with("score", 2).unwrap(),
    ];
    model.save_many(&mut records).unwrap();

    let query = model.filter("name", "b").unwrap();
    assert_eq!(query.primary_keys().unwrap_err().kind(), ErrorKind::Filter);
    assert_eq!(
        pks(query.allow_full_scan(true).primary_keys().unwrap()),
        BTreeSet::from([2])
    );
}

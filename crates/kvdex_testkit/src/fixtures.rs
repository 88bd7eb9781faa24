//! Test fixtures and database helpers.
//!
//! Provides convenience functions for setting up test databases, sample
//! schemas and common test scenarios.

use kvdex_core::{Config, Database, Model};
use kvdex_store::{InMemoryStore, RedisStore};
use std::sync::Arc;

/// Environment variable naming a live server for tests, e.g.
/// `redis://127.0.0.1:6379/15`. Live tests are skipped when it is unset.
pub const REDIS_URL_ENV: &str = "KVDEX_REDIS_URL";

/// A test database together with its in-memory store, when it has one.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    memory: Option<Arc<InMemoryStore>>,
}

impl TestDatabase {
    /// Creates a database over a fresh in-memory store.
    pub fn memory() -> Self {
        Self::memory_with_config(Config::default())
    }

    /// Creates an in-memory database with a custom configuration.
    pub fn memory_with_config(config: Config) -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self {
            db: Database::new(store.clone(), config),
            memory: Some(store),
        }
    }

    /// Connects to the server named by [`REDIS_URL_ENV`], or returns `None`
    /// when the variable is unset.
    ///
    /// # Panics
    ///
    /// Panics if the variable is set but the server cannot be reached.
    pub fn redis() -> Option<Self> {
        let url = std::env::var(REDIS_URL_ENV).ok()?;
        let store = RedisStore::from_url(&url).expect("Failed to connect to test server");
        Some(Self {
            db: Database::new(Arc::new(store), Config::default()),
            memory: None,
        })
    }

    /// The in-memory store, for fault injection and key inspection.
    pub fn memory_store(&self) -> Option<&Arc<InMemoryStore>> {
        self.memory.as_ref()
    }

    /// Every key of the in-memory store, sorted. Empty for other stores.
    pub fn keys(&self) -> Vec<String> {
        self.memory.as_ref().map(|m| m.keys()).unwrap_or_default()
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a temporary in-memory database.
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::memory();
    f(&test_db.db)
}

/// Runs a test against the server named by [`REDIS_URL_ENV`].
///
/// Every registered model is destroyed before and after the test. Returns
/// `None` without running `f` when no server is configured.
pub fn with_redis_db<F, R>(models: &[kvdex_core::Schema], f: F) -> Option<R>
where
    F: FnOnce(&Database, &[Model]) -> R,
{
    let test_db = TestDatabase::redis()?;
    let handles: Vec<Model> = models
        .iter()
        .map(|schema| {
            let model = test_db.db.register(schema.clone()).expect("Failed to register model");
            model.destroy().expect("Failed to clear model");
            model
        })
        .collect();
    let result = f(&test_db.db, &handles);
    for model in &handles {
        model.destroy().expect("Failed to clear model");
    }
    Some(result)
}

/// Sample schemas used across tests and benchmarks.
pub mod schemas {
    use kvdex_codec::{Compression, Field, FieldType};
    use kvdex_core::Schema;

    /// `scores`: `name` (text), `team` (text), `score` (integer, indexed).
    pub fn scores() -> Schema {
        Schema::builder("scores")
            .field(Field::text("name"))
            .field(Field::text("team"))
            .indexed_field(Field::integer("score"))
            .build()
            .expect("Invalid scores schema")
    }

    /// `people`: `name` (text, indexed), `age` (integer), `mentor` (link to people).
    pub fn people() -> Schema {
        Schema::builder("people")
            .indexed_field(Field::text("name"))
            .field(Field::integer("age"))
            .field(Field::link("mentor", "people"))
            .build()
            .expect("Invalid people schema")
    }

    /// `pets`: `name` (text), `owner` (link to people, indexed), `friends`
    /// (multi-link to pets).
    pub fn pets() -> Schema {
        Schema::builder("pets")
            .field(Field::text("name"))
            .indexed_field(Field::link("owner", "people"))
            .field(Field::new(
                "friends",
                FieldType::MultiLink {
                    model: "pets".to_string(),
                },
            ))
            .build()
            .expect("Invalid pets schema")
    }

    /// `samples`: one field of every type; every indexable one is indexed.
    pub fn all_types() -> Schema {
        Schema::builder("samples")
            .indexed_field(Field::text("text"))
            .indexed_field(Field::new("classic", FieldType::Classic))
            .indexed_field(Field::integer("integer"))
            .field(Field::new("float", FieldType::Float))
            .indexed_field(Field::new("flag", FieldType::Bool))
            .field(Field::new("raw", FieldType::Bytes))
            .indexed_field(Field::new("encoded", FieldType::Base64))
            .indexed_field(Field::new("price", FieldType::FixedPoint { places: 2 }))
            .indexed_field(Field::new("doc", FieldType::Json))
            .indexed_field(Field::new("when", FieldType::Datetime))
            .indexed_field(Field::new(
                "blob",
                FieldType::Compressed {
                    mode: Compression::Zstd,
                },
            ))
            .indexed_field(Field::new(
                "small",
                FieldType::Compressed {
                    mode: Compression::Lz4,
                },
            ))
            .field(Field::new(
                "archived",
                FieldType::Compressed {
                    mode: Compression::Zlib,
                },
            ))
            .field(Field::new(
                "packed",
                FieldType::Compressed {
                    mode: Compression::Bz2,
                },
            ))
            .indexed_field(Field::text("title").hashed())
            .build()
            .expect("Invalid all-types schema")
    }
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Teams assigned round-robin by [`populated_scores`].
    pub const TEAMS: [&str; 3] = ["red", "blue", "green"];

    /// A database whose `scores` model holds `count` records: record `i`
    /// (pk `i + 1`) is named `r{i}`, plays for `TEAMS[i % 3]` and scores `i % buckets`.
    pub fn populated_scores(count: usize, buckets: i64) -> (TestDatabase, Model) {
        let test_db = TestDatabase::memory();
        let model = test_db
            .db
            .register(schemas::scores())
            .expect("Failed to register scores");
        let mut records: Vec<_> = (0..count)
            .map(|i| {
                model
                    .new_record()
                    .with("name", format!("r{i}"))
                    .and_then(|r| r.with("team", TEAMS[i % TEAMS.len()]))
                    .and_then(|r| r.with("score", i as i64 % buckets.max(1)))
                    .expect("Failed to build record")
            })
            .collect();
        model.save_many(&mut records).expect("Failed to save records");
        (test_db, model)
    }

    /// A database with `people` and `pets` registered.
    pub fn people_and_pets() -> (TestDatabase, Model, Model) {
        let test_db = TestDatabase::memory();
        let people = test_db.db.register(schemas::people()).expect("people");
        let pets = test_db.db.register(schemas::pets()).expect("pets");
        (test_db, people, pets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_database() {
        let test_db = TestDatabase::memory();
        assert!(test_db.memory_store().is_some());
        assert!(test_db.keys().is_empty());
    }

    #[test]
    fn test_sample_schemas_register() {
        with_temp_db(|db| {
            for schema in [
                schemas::scores(),
                schemas::people(),
                schemas::pets(),
                schemas::all_types(),
            ] {
                db.register(schema).unwrap();
            }
            assert!(db.registry().dangling_links().is_empty());
        });
    }

    #[test]
    fn test_populated_scenario() {
        let (_db, model) = scenarios::populated_scores(10, 3);
        assert_eq!(model.count().unwrap(), 10);
        assert_eq!(model.filter("score", 0).unwrap().count().unwrap(), 4);
    }
}

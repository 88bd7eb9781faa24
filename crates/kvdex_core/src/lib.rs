//! # kvdex Core
//!
//! Secondary indexes, filtering and atomic persistence for records kept in a
//! Redis-like key-value store.
//!
//! This crate provides:
//! - Schema registry and key layout
//! - Index maintenance (one set of primary keys per indexed value)
//! - Filter sets and queries (`all`, `count`, `first`, `last`, `random`, keys)
//! - Save engine with dependency-ordered cascade saves
//! - Delete and reset engines
//! - Index verification and rebuilding
//!
//! Every write is submitted to the store as one all-or-nothing unit; the
//! engines never lock anything in process.
//!
//! ## Example
//!
//! ```rust
//! use kvdex_codec::Field;
//! use kvdex_core::{Database, Schema};
//!
//! let db = Database::in_memory();
//! let scores = db
//!     .register(
//!         Schema::builder("scores")
//!             .field(Field::text("name"))
//!             .indexed_field(Field::integer("score"))
//!             .build()
//!             .unwrap(),
//!     )
//!     .unwrap();
//!
//! let mut a = scores.new_record().with("name", "a").unwrap().with("score", 1).unwrap();
//! let mut b = scores.new_record().with("name", "b").unwrap().with("score", 1).unwrap();
//! scores.save(&mut a).unwrap();
//! scores.save(&mut b).unwrap();
//!
//! a.set("score", 2).unwrap();
//! scores.save(&mut a).unwrap();
//!
//! let ones = scores.filter("score", 1).unwrap();
//! assert_eq!(ones.primary_keys().unwrap().len(), 1);
//! assert_eq!(scores.filter("score", 2).unwrap().delete().unwrap(), 1);
//! assert_eq!(scores.count().unwrap(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod database;
mod delete;
mod error;
pub mod fetch;
mod filter;
mod index;
mod query;
mod record;
mod reset;
mod save;
mod schema;
mod types;
pub mod verify;

pub use cache::{EngineCache, Engines};
pub use config::Config;
pub use database::{Database, Model};
pub use delete::DeleteEngine;
pub use error::{CoreError, CoreResult, ErrorKind};
pub use filter::{Clause, FilterSet, Operator, Strategy};
pub use index::{IndexMaintainer, IndexUpdate};
pub use query::Query;
pub use record::{FieldChanges, Record, StoredFields};
pub use reset::ResetEngine;
pub use save::{PlanStep, SaveEngine, SavePlan};
pub use schema::{KeyLayout, Schema, SchemaBuilder, SchemaRegistry, RECORD_MARKER};
pub use types::PrimaryKey;
pub use verify::VerifyReport;

pub use kvdex_codec::{Field, FieldType, Value};

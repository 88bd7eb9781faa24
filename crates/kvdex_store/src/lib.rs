//! # kvdex Store
//!
//! Backing key-value store abstraction for kvdex.
//!
//! This crate provides the lowest-level storage abstraction. Stores are
//! **opaque key-value servers** - they know about strings, hashes, sets and
//! counters, but nothing about records, schemas or indexes.
//!
//! ## Design Principles
//!
//! - Reads are single round trips ([`StoreRead`])
//! - Every mutation is submitted as one all-or-nothing [`Batch`]
//!   through [`KeyValueStore::atomic`]
//! - Watched keys turn concurrent modification into a rejected unit
//!   ([`StoreError::Conflict`]); nothing is retried internally
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral data
//! - [`RedisStore`] - RESP2 client for a Redis-compatible server
//!
//! ## Example
//!
//! ```rust
//! use kvdex_store::{Batch, InMemoryStore, KeyValueStore, StoreRead};
//!
//! let store = InMemoryStore::new();
//! let mut batch = Batch::new();
//! batch.hset("users:data:1", vec![("name".to_string(), b"alice".to_vec())]);
//! batch.sadd("users:keys", vec!["1".to_string()]);
//! store.commit(batch).unwrap();
//!
//! assert!(store.exists("users:data:1").unwrap());
//! assert_eq!(store.scard("users:keys").unwrap(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod batch;
mod config;
mod error;
mod memory;
mod pattern;
mod redis;
pub mod resp;

pub use backend::{KeyValueStore, StoreRead};
pub use batch::{Batch, Command};
pub use config::RedisConfig;
pub use error::{StoreError, StoreResult};
pub use memory::{Fault, InMemoryStore};
pub use pattern::{escape_glob, glob_match};
pub use redis::RedisStore;

//! # kvdex Testkit
//!
//! Test utilities for kvdex.
//!
//! This crate provides:
//! - Test fixtures, sample schemas and database helpers
//! - Property-based test generators using proptest
//! - An integration harness that shadows a model and checks its indexes
//! - Concurrent stress helpers
//!
//! ## Usage
//!
//! ```rust
//! use kvdex_testkit::prelude::*;
//!
//! with_temp_db(|db| {
//!     let scores = db.register(schemas::scores()).unwrap();
//!     let mut record = scores.new_record().with("score", 1).unwrap();
//!     scores.save(&mut record).unwrap();
//!     assert_index_consistent(&scores);
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;

use std::sync::Once;
use tracing_subscriber::EnvFilter;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_tracing;
    pub use crate::integration::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;

/// Installs a test-friendly `tracing` subscriber once per process.
///
/// The filter comes from `RUST_LOG` and defaults to `warn`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        // Another subscriber may already be installed by the test binary.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

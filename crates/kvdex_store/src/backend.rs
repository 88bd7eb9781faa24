//! Store trait definitions.

use crate::batch::Batch;
use crate::error::StoreResult;
use std::collections::{BTreeMap, BTreeSet};

/// Read access to a key-value store.
///
/// Every method is a single round trip. Missing keys are never an error:
/// they read back as `None`, an empty set or zero.
pub trait StoreRead {
    /// Returns the value of a string key.
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Returns every field of a hash key, or `None` if the key does not exist.
    fn hgetall(&self, key: &str) -> StoreResult<Option<BTreeMap<String, Vec<u8>>>>;

    /// Returns a single field of a hash key.
    fn hget(&self, key: &str, field: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Returns the members of a set key.
    fn smembers(&self, key: &str) -> StoreResult<BTreeSet<String>>;

    /// Returns the cardinality of a set key.
    fn scard(&self, key: &str) -> StoreResult<u64>;

    /// Checks whether a key exists.
    fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Enumerates the keys matching a glob pattern (`*`, `?`, `[...]`, `\`).
    ///
    /// The result is sorted and free of duplicates.
    fn scan_keys(&self, pattern: &str) -> StoreResult<Vec<String>>;
}

/// A key-value store that accepts atomic units.
///
/// # Invariants
///
/// - A [`Batch`] passed to the store is applied entirely or not at all
/// - If any watched key is modified between the watch and the submission,
///   the unit is rejected with [`crate::StoreError::Conflict`]
/// - A hash or set whose last member is removed ceases to exist
/// - Stores must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`crate::InMemoryStore`] - For testing
/// - [`crate::RedisStore`] - For a Redis-compatible server
pub trait KeyValueStore: StoreRead + Send + Sync {
    /// This store seen through its read half.
    fn as_read(&self) -> &dyn StoreRead;

    /// Atomically increments a counter key and returns the new value.
    ///
    /// A missing key counts as zero.
    fn incr(&self, key: &str) -> StoreResult<i64>;

    /// Runs one atomic unit.
    ///
    /// The store watches `watch`, then calls `build` with a reader bound to
    /// the same session. The batch returned by `build` is submitted as one
    /// all-or-nothing operation. If `build` fails, nothing is submitted and
    /// its error is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::Conflict`] if a watched key changed,
    /// or the transport / server error that prevented submission.
    fn atomic(
        &self,
        watch: &[String],
        build: &mut dyn FnMut(&dyn StoreRead) -> StoreResult<Batch>,
    ) -> StoreResult<()>;

    /// Runs `read` against one consistent state of the store.
    ///
    /// Nothing is written. The store either keeps writers out while `read`
    /// runs, or watches `watch` and rejects the unit if any of those keys
    /// changed before `read` returned.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::Conflict`] if a watched key changed,
    /// or the error `read` failed with.
    fn snapshot(
        &self,
        watch: &[String],
        read: &mut dyn FnMut(&dyn StoreRead) -> StoreResult<()>,
    ) -> StoreResult<()>;

    /// Submits a prebuilt batch as one atomic unit.
    fn commit(&self, batch: Batch) -> StoreResult<()> {
        let mut pending = Some(batch);
        self.atomic(&[], &mut |_| Ok(pending.take().unwrap_or_default()))
    }
}

//! In-memory store for testing.

use crate::backend::{KeyValueStore, StoreRead};
use crate::batch::{Batch, Command};
use crate::error::{StoreError, StoreResult};
use crate::pattern::glob_match;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A value held under one key.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    Str(Vec<u8>),
    Hash(BTreeMap<String, Vec<u8>>),
    Set(BTreeSet<String>),
}

/// A one-shot failure injected into the next atomic unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Reject the unit as if a watched key had changed.
    Conflict,
    /// Fail after applying this many commands; the applied ones are rolled back.
    AfterCommands(usize),
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
    fault: Option<Fault>,
}

/// An in-memory store with the key semantics of a Redis server.
///
/// This store is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral datasets that don't need a server
///
/// # Atomicity
///
/// Each atomic unit runs under a single lock, from the watch through the
/// last command. Commands are applied with an undo log, so a unit that
/// fails part way leaves the store exactly as it was.
///
/// # Example
///
/// ```rust
/// use kvdex_store::{InMemoryStore, KeyValueStore};
///
/// let store = InMemoryStore::new();
/// assert_eq!(store.incr("users:next").unwrap(), 1);
/// assert_eq!(store.incr("users:next").unwrap(), 2);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a failure for the next atomic unit that carries commands.
    pub fn inject_fault(&self, fault: Fault) {
        self.state.lock().fault = Some(fault);
    }

    /// Makes the next atomic unit fail before any of its commands apply.
    pub fn fail_next_commit(&self) {
        self.inject_fault(Fault::AfterCommands(0));
    }

    /// Returns every key currently held, sorted.
    ///
    /// Useful for testing and debugging.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut keys: Vec<String> = state.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Returns the number of keys held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns true if the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Removes every key.
    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }
}

impl State {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(Entry::Str(value)) => Ok(Some(value.clone())),
            Some(_) => Err(wrong_type(key, "string")),
        }
    }

    fn hash(&self, key: &str) -> StoreResult<Option<&BTreeMap<String, Vec<u8>>>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(Entry::Hash(fields)) => Ok(Some(fields)),
            Some(_) => Err(wrong_type(key, "hash")),
        }
    }

    fn set(&self, key: &str) -> StoreResult<Option<&BTreeSet<String>>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(Entry::Set(members)) => Ok(Some(members)),
            Some(_) => Err(wrong_type(key, "set")),
        }
    }

    fn scan_keys(&self, pattern: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    fn incr(&mut self, key: &str) -> StoreResult<i64> {
        let current = match self.get(key)? {
            None => 0,
            Some(raw) => std::str::from_utf8(&raw)
                .ok()
                .and_then(|text| text.parse::<i64>().ok())
                .ok_or_else(|| StoreError::InvalidValue {
                    key: key.to_string(),
                    message: "value is not an integer".into(),
                })?,
        };
        let next = current.checked_add(1).ok_or_else(|| StoreError::InvalidValue {
            key: key.to_string(),
            message: "increment would overflow".into(),
        })?;
        self.entries
            .insert(key.to_string(), Entry::Str(next.to_string().into_bytes()));
        Ok(next)
    }

    /// Applies a batch, rolling everything back if any command fails.
    fn apply(&mut self, batch: Batch) -> StoreResult<()> {
        let fault = self.fault.take();
        if fault == Some(Fault::Conflict) {
            return Err(StoreError::Conflict);
        }

        let mut undo: HashMap<String, Option<Entry>> = HashMap::new();
        for (applied, command) in batch.into_commands().into_iter().enumerate() {
            let result = match fault {
                Some(Fault::AfterCommands(limit)) if applied >= limit => Err(StoreError::server(
                    format!("injected failure after {limit} commands"),
                )),
                _ => self.apply_one(command, &mut undo),
            };
            if let Err(err) = result {
                for (key, previous) in undo {
                    match previous {
                        Some(entry) => {
                            self.entries.insert(key, entry);
                        }
                        None => {
                            self.entries.remove(&key);
                        }
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn remember(&self, key: &str, undo: &mut HashMap<String, Option<Entry>>) {
        if !undo.contains_key(key) {
            undo.insert(key.to_string(), self.entries.get(key).cloned());
        }
    }

    fn apply_one(
        &mut self,
        command: Command,
        undo: &mut HashMap<String, Option<Entry>>,
    ) -> StoreResult<()> {
        match command {
            Command::Set { key, value } => {
                self.remember(&key, undo);
                self.entries.insert(key, Entry::Str(value));
            }
            Command::Del { key } => {
                self.remember(&key, undo);
                self.entries.remove(&key);
            }
            Command::HSet { key, fields } => {
                self.remember(&key, undo);
                let entry = self
                    .entries
                    .entry(key.clone())
                    .or_insert_with(|| Entry::Hash(BTreeMap::new()));
                match entry {
                    Entry::Hash(existing) => existing.extend(fields),
                    _ => return Err(wrong_type(&key, "hash")),
                }
            }
            Command::HDel { key, fields } => {
                self.remember(&key, undo);
                let now_empty = match self.entries.get_mut(&key) {
                    None => false,
                    Some(Entry::Hash(existing)) => {
                        for field in &fields {
                            existing.remove(field);
                        }
                        existing.is_empty()
                    }
                    Some(_) => return Err(wrong_type(&key, "hash")),
                };
                if now_empty {
                    self.entries.remove(&key);
                }
            }
            Command::SAdd { key, members } => {
                self.remember(&key, undo);
                let entry = self
                    .entries
                    .entry(key.clone())
                    .or_insert_with(|| Entry::Set(BTreeSet::new()));
                match entry {
                    Entry::Set(existing) => existing.extend(members),
                    _ => return Err(wrong_type(&key, "set")),
                }
            }
            Command::SRem { key, members } => {
                self.remember(&key, undo);
                let now_empty = match self.entries.get_mut(&key) {
                    None => false,
                    Some(Entry::Set(existing)) => {
                        for member in &members {
                            existing.remove(member);
                        }
                        existing.is_empty()
                    }
                    Some(_) => return Err(wrong_type(&key, "set")),
                };
                if now_empty {
                    self.entries.remove(&key);
                }
            }
            Command::DelPattern { pattern } => {
                for key in self.scan_keys(&pattern) {
                    self.remember(&key, undo);
                    self.entries.remove(&key);
                }
            }
        }
        Ok(())
    }
}

fn wrong_type(key: &str, expected: &'static str) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
        expected,
    }
}

/// Reader bound to a locked state, handed to atomic-unit builders.
struct LockedReader<'a> {
    state: &'a State,
}

macro_rules! impl_reads {
    ($ty:ty, $state:ident => $access:expr) => {
        impl StoreRead for $ty {
            fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
                let $state = self;
                $access.get(key)
            }

            fn hgetall(&self, key: &str) -> StoreResult<Option<BTreeMap<String, Vec<u8>>>> {
                let $state = self;
                Ok($access.hash(key)?.cloned())
            }

            fn hget(&self, key: &str, field: &str) -> StoreResult<Option<Vec<u8>>> {
                let $state = self;
                Ok($access.hash(key)?.and_then(|fields| fields.get(field).cloned()))
            }

            fn smembers(&self, key: &str) -> StoreResult<BTreeSet<String>> {
                let $state = self;
                Ok($access.set(key)?.cloned().unwrap_or_default())
            }

            fn scard(&self, key: &str) -> StoreResult<u64> {
                let $state = self;
                Ok($access.set(key)?.map_or(0, |members| members.len() as u64))
            }

            fn exists(&self, key: &str) -> StoreResult<bool> {
                let $state = self;
                Ok($access.entries.contains_key(key))
            }

            fn scan_keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
                let $state = self;
                Ok($access.scan_keys(pattern))
            }
        }
    };
}

impl_reads!(LockedReader<'_>, reader => reader.state);
impl_reads!(InMemoryStore, store => store.state.lock());

impl KeyValueStore for InMemoryStore {
    fn as_read(&self) -> &dyn StoreRead {
        self
    }

    fn incr(&self, key: &str) -> StoreResult<i64> {
        self.state.lock().incr(key)
    }

    fn atomic(
        &self,
        _watch: &[String],
        build: &mut dyn FnMut(&dyn StoreRead) -> StoreResult<Batch>,
    ) -> StoreResult<()> {
        // Holding the lock from build to apply means no watched key can change.
        let mut state = self.state.lock();
        let batch = build(&LockedReader { state: &state })?;
        if batch.is_empty() {
            return Ok(());
        }
        let commands = batch.len();
        state.apply(batch)?;
        tracing::trace!(commands, "applied atomic unit");
        Ok(())
    }

    fn snapshot(
        &self,
        _watch: &[String],
        read: &mut dyn FnMut(&dyn StoreRead) -> StoreResult<()>,
    ) -> StoreResult<()> {
        let state = self.state.lock();
        read(&LockedReader { state: &state })
    }
}

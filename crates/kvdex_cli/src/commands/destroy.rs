//! Destroy command implementation.

use crate::error::{CliError, CliResult};
use kvdex_core::KeyLayout;
use kvdex_store::{Batch, KeyValueStore};
use std::io::{self, BufRead, Write};

/// Deletes every key of a namespace in one atomic unit.
///
/// Returns the number of keys that existed before the delete.
pub fn destroy(store: &dyn KeyValueStore, namespace: &str) -> CliResult<usize> {
    let keys = KeyLayout::checked(namespace)?;
    let existing = store.scan_keys(&keys.all_pattern())?.len();
    let mut batch = Batch::new();
    batch.del_pattern(keys.all_pattern());
    store.commit(batch)?;
    tracing::info!(namespace, keys = existing, "destroyed namespace");
    Ok(existing)
}

/// Runs the destroy command, asking for confirmation unless `yes` is set.
pub fn run(store: &dyn KeyValueStore, namespace: &str, yes: bool) -> CliResult<()> {
    KeyLayout::checked(namespace)?;
    if !yes && !confirm(namespace)? {
        return Err(CliError::Aborted);
    }
    let removed = destroy(store, namespace)?;
    println!("Deleted {removed} key(s) of {namespace:?}");
    Ok(())
}

fn confirm(namespace: &str) -> CliResult<bool> {
    print!("Delete every key of {namespace:?}? [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

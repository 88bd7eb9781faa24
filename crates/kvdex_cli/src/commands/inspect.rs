//! Inspect command implementation.

use super::Format;
use crate::error::CliResult;
use kvdex_core::KeyLayout;
use kvdex_store::StoreRead;
use serde::Serialize;
use std::collections::BTreeMap;

/// Namespace inspection result.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct InspectResult {
    /// Inspected namespace.
    pub namespace: String,
    /// Members of the live primary-key set.
    pub live_records: u64,
    /// Record hashes found by scanning.
    pub record_hashes: usize,
    /// Last allocated primary key, if the counter exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_primary_key: Option<String>,
    /// Bucket count per indexed field, unset buckets included.
    pub buckets: BTreeMap<String, usize>,
}

/// Collects statistics for a namespace.
pub fn inspect(store: &dyn StoreRead, namespace: &str) -> CliResult<InspectResult> {
    let keys = KeyLayout::checked(namespace)?;
    let counter = store
        .get(&keys.counter())?
        .map(|raw| String::from_utf8_lossy(&raw).into_owned());

    let value_prefix = format!("{namespace}:idx:");
    let null_prefix = format!("{namespace}:nullidx:");
    let mut buckets: BTreeMap<String, usize> = BTreeMap::new();
    for pattern in keys.index_patterns() {
        for key in store.scan_keys(&pattern)? {
            let field = if let Some(rest) = key.strip_prefix(&value_prefix) {
                rest.split(':').next().unwrap_or(rest)
            } else if let Some(rest) = key.strip_prefix(&null_prefix) {
                rest
            } else {
                continue;
            };
            *buckets.entry(field.to_string()).or_default() += 1;
        }
    }

    Ok(InspectResult {
        namespace: namespace.to_string(),
        live_records: store.scard(&keys.live_keys())?,
        record_hashes: store.scan_keys(&keys.record_pattern())?.len(),
        last_primary_key: counter,
        buckets,
    })
}

/// Runs the inspect command.
pub fn run(store: &dyn StoreRead, namespace: &str, format: &str) -> CliResult<()> {
    let format = Format::parse(format)?;
    let result = inspect(store, namespace)?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Namespace:        {}", result.namespace);
    println!("Live records:     {}", result.live_records);
    println!("Record hashes:    {}", result.record_hashes);
    println!(
        "Last primary key: {}",
        result.last_primary_key.as_deref().unwrap_or("-")
    );
    if result.buckets.is_empty() {
        println!("Index buckets:    none");
    } else {
        println!("Index buckets:");
        for (field, count) in &result.buckets {
            println!("  {field:<16} {count}");
        }
    }
    if result.live_records != result.record_hashes as u64 {
        println!("warning: live key set and record hashes disagree");
    }
}

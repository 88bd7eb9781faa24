//! Dump command implementation.

use super::Format;
use crate::error::CliResult;
use base64::Engine as _;
use kvdex_core::{KeyLayout, PrimaryKey, RECORD_MARKER};
use kvdex_store::StoreRead;
use serde::Serialize;
use std::collections::BTreeMap;

/// One record as printed by `dump`.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct DumpedRecord {
    /// Primary key.
    pub pk: u64,
    /// Stored fields. Values that are not UTF-8 are shown as `base64:<data>`.
    pub fields: BTreeMap<String, String>,
}

/// Reads up to `limit` records of a namespace, ordered by primary key.
pub fn dump(
    store: &dyn StoreRead,
    namespace: &str,
    limit: Option<usize>,
) -> CliResult<Vec<DumpedRecord>> {
    let keys = KeyLayout::checked(namespace)?;
    let mut pks: Vec<PrimaryKey> = Vec::new();
    for member in store.smembers(&keys.live_keys())? {
        match member.parse() {
            Ok(pk) => pks.push(pk),
            Err(message) => tracing::warn!(%member, %message, "skipping live key"),
        }
    }
    pks.sort();

    let mut records = Vec::new();
    for pk in pks.into_iter().take(limit.unwrap_or(usize::MAX)) {
        let Some(stored) = store.hgetall(&keys.record(pk))? else {
            tracing::warn!(%pk, "live key without record");
            continue;
        };
        let fields = stored
            .into_iter()
            .filter(|(name, _)| name != RECORD_MARKER)
            .map(|(name, raw)| (name, render(raw)))
            .collect();
        records.push(DumpedRecord {
            pk: pk.as_u64(),
            fields,
        });
    }
    Ok(records)
}

fn render(raw: Vec<u8>) -> String {
    match String::from_utf8(raw) {
        Ok(text) => text,
        Err(err) => format!(
            "base64:{}",
            base64::engine::general_purpose::STANDARD.encode(err.into_bytes())
        ),
    }
}

/// Runs the dump command.
pub fn run(
    store: &dyn StoreRead,
    namespace: &str,
    limit: Option<usize>,
    format: &str,
) -> CliResult<()> {
    let format = Format::parse(format)?;
    let records = dump(store, namespace, limit)?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&records)?),
        Format::Text => {
            for record in &records {
                println!("{namespace}:{}", record.pk);
                for (name, value) in &record.fields {
                    println!("  {name} = {value}");
                }
            }
            println!("{} record(s)", records.len());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvdex_core::{Database, Field, FieldType, Schema};

    fn seeded() -> Database {
        let db = Database::in_memory();
        let model = db
            .register(
                Schema::builder("files")
                    .field(Field::text("name"))
                    .field(Field::new("raw", FieldType::Bytes))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let mut records = vec![
            model.new_record().with("name", "a").unwrap(),
            model
                .new_record()
                .with("raw", vec![0xffu8, 0xfe])
                .unwrap(),
            model.new_record().with("name", "c").unwrap(),
        ];
        model.save_many(&mut records).unwrap();
        db
    }

    #[test]
    fn dumps_in_primary_key_order() {
        let db = seeded();
        let store = db.store();
        let records = dump(store.as_read(), "files", None).unwrap();
        let pks: Vec<u64> = records.iter().map(|r| r.pk).collect();
        assert_eq!(pks, vec![1, 2, 3]);
        assert_eq!(records[0].fields.get("name").map(String::as_str), Some("a"));
        assert!(!records[0].fields.contains_key(RECORD_MARKER));
        assert_eq!(
            records[1].fields.get("raw").map(String::as_str),
            Some("base64://4=")
        );
    }

    #[test]
    fn limit_truncates() {
        let db = seeded();
        let store = db.store();
        assert_eq!(dump(store.as_read(), "files", Some(2)).unwrap().len(), 2);
    }
}

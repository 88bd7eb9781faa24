//! Property-based test generators using proptest.
//!
//! Provides strategies for generating field values, records and operation
//! sequences that maintain the invariants the engines expect.

use chrono::{TimeZone, Utc};
use kvdex_codec::{FieldType, Value};
use proptest::prelude::*;

/// Strategy for generating valid namespaces and field names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for generating text, including empty and non-ASCII strings.
pub fn text_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        "[a-z]{1,8}",
        "\\PC{0,24}",
    ]
}

/// Strategy for generating input values accepted by a field type.
///
/// About one value in eight is [`Value::Unset`].
pub fn value_strategy(kind: &FieldType) -> BoxedStrategy<Value> {
    let assigned = match kind {
        FieldType::Text | FieldType::Classic => text_strategy().prop_map(Value::Text).boxed(),
        FieldType::Integer => any::<i64>().prop_map(Value::Integer).boxed(),
        FieldType::Float => (-1.0e9f64..1.0e9).prop_map(Value::Float).boxed(),
        FieldType::Bool => any::<bool>().prop_map(Value::Bool).boxed(),
        FieldType::Bytes | FieldType::Base64 | FieldType::Compressed { .. } => {
            prop::collection::vec(any::<u8>(), 0..256)
                .prop_map(Value::Bytes)
                .boxed()
        }
        FieldType::FixedPoint { places } => {
            let scale = 10f64.powi(i32::from(*places));
            (-1_000_000i64..1_000_000)
                .prop_map(move |units| Value::Float(units as f64 / scale))
                .boxed()
        }
        FieldType::Json => json_strategy().prop_map(Value::Json).boxed(),
        FieldType::Datetime => (0i64..4_102_444_800)
            .prop_map(|secs| {
                Utc.timestamp_opt(secs, 0)
                    .single()
                    .map_or(Value::Unset, Value::Datetime)
            })
            .boxed(),
        FieldType::Link { .. } => (1u64..10_000).prop_map(Value::Link).boxed(),
        FieldType::MultiLink { .. } => prop::collection::vec(1u64..10_000, 0..6)
            .prop_map(Value::Links)
            .boxed(),
    };
    prop_oneof![1 => Just(Value::Unset), 7 => assigned].boxed()
}

/// Strategy for generating small JSON documents.
pub fn json_strategy() -> impl Strategy<Value = serde_json::Value> {
    let leaf = prop_oneof![
        Just(serde_json::Value::Null),
        any::<bool>().prop_map(serde_json::Value::Bool),
        any::<i32>().prop_map(serde_json::Value::from),
        "[a-z ]{0,12}".prop_map(serde_json::Value::String),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(serde_json::Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|map| serde_json::Value::Object(map.into_iter().collect())),
        ]
    })
}

/// One step against the `scores` sample model.
///
/// Slots refer to the records saved so far, modulo their number, so every
/// generated sequence is applicable.
#[derive(Debug, Clone)]
pub enum ScoreOperation {
    /// Save a new record.
    Insert {
        /// Record name.
        name: String,
        /// Indexed score; `None` leaves it unset.
        score: Option<i64>,
    },
    /// Change the score of an existing record.
    Update {
        /// Record slot.
        slot: usize,
        /// New score; `None` unsets it.
        score: Option<i64>,
    },
    /// Delete one record by primary key.
    Delete {
        /// Record slot.
        slot: usize,
    },
    /// Delete every record holding a score.
    DeleteWhere {
        /// Score to delete.
        score: i64,
    },
}

fn score_strategy() -> impl Strategy<Value = Option<i64>> {
    prop_oneof![1 => Just(None), 5 => (0i64..4).prop_map(Some)]
}

/// Strategy for generating score operations.
pub fn score_operation_strategy() -> impl Strategy<Value = ScoreOperation> {
    prop_oneof![
        4 => ("[a-z]{1,6}", score_strategy())
            .prop_map(|(name, score)| ScoreOperation::Insert { name, score }),
        3 => (any::<usize>(), score_strategy())
            .prop_map(|(slot, score)| ScoreOperation::Update { slot, score }),
        2 => any::<usize>().prop_map(|slot| ScoreOperation::Delete { slot }),
        1 => (0i64..4).prop_map(|score| ScoreOperation::DeleteWhere { score }),
    ]
}

/// Strategy for generating a sequence of score operations.
pub fn score_operation_sequence(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<ScoreOperation>> {
    prop::collection::vec(score_operation_strategy(), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::schemas;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn generated_names_are_valid_namespaces(name in name_strategy()) {
            let schema = kvdex_core::Schema::builder(name.clone())
                .field(kvdex_codec::Field::text(name))
                .build();
            prop_assert!(schema.is_ok());
        }

        #[test]
        fn generated_values_are_accepted(value in value_strategy(&FieldType::Json)) {
            let field = kvdex_codec::Field::new("doc", FieldType::Json);
            prop_assert!(field.input(value).is_ok());
        }
    }

    #[test]
    fn every_sample_type_has_a_strategy() {
        let schema = schemas::all_types();
        for field in schema.fields() {
            // Building the strategy must not panic for any type.
            let _ = value_strategy(field.kind());
        }
    }
}

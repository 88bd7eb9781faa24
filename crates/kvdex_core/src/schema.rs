//! Schema registry and persisted key layout.

use crate::error::{CoreError, CoreResult};
use crate::types::PrimaryKey;
use kvdex_codec::Field;
use kvdex_store::escape_glob;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Hash field present in every record hash, holding its primary key.
///
/// It contains `:`, which field names may not, so it never collides with a
/// declared field. It keeps the hash alive when every declared field is unset.
pub const RECORD_MARKER: &str = ":pk";

/// Characters never allowed in namespaces and field names.
const RESERVED_CHARS: &[char] = &[':', '*', '?', '[', ']', '\\', ' ', '\t', '\r', '\n'];

/// Persisted key names for one namespace.
///
/// | Key | Shape | Content |
/// |-----|-------|---------|
/// | `ns:data:<pk>` | hash | field name to stored bytes, plus [`RECORD_MARKER`] |
/// | `ns:idx:<field>:<token>` | set | primary keys holding a value |
/// | `ns:nullidx:<field>` | set | primary keys whose field is unset |
/// | `ns:next` | string | primary-key counter |
/// | `ns:keys` | set | live primary keys |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    namespace: String,
}

impl KeyLayout {
    /// Creates the layout for a (validated) namespace.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Creates the layout for an untrusted namespace, validating it first.
    pub fn checked(namespace: &str) -> CoreResult<Self> {
        validate_name("namespace", namespace)?;
        Ok(Self::new(namespace))
    }

    /// The namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Hash holding one record.
    pub fn record(&self, pk: PrimaryKey) -> String {
        format!("{}:data:{}", self.namespace, pk)
    }

    /// Bucket of primary keys holding `token` in `field`.
    pub fn bucket(&self, field: &str, token: &str) -> String {
        format!("{}:idx:{}:{}", self.namespace, field, token)
    }

    /// Bucket of primary keys whose `field` is unset.
    pub fn null_bucket(&self, field: &str) -> String {
        format!("{}:nullidx:{}", self.namespace, field)
    }

    /// Bucket for an optional token.
    pub fn bucket_for(&self, field: &str, token: Option<&str>) -> String {
        match token {
            Some(token) => self.bucket(field, token),
            None => self.null_bucket(field),
        }
    }

    /// Primary-key counter.
    pub fn counter(&self) -> String {
        format!("{}:next", self.namespace)
    }

    /// Set of live primary keys.
    pub fn live_keys(&self) -> String {
        format!("{}:keys", self.namespace)
    }

    /// Pattern matching every key of the namespace.
    pub fn all_pattern(&self) -> String {
        format!("{}:*", escape_glob(&self.namespace))
    }

    /// Pattern matching every record hash.
    pub fn record_pattern(&self) -> String {
        format!("{}:data:*", escape_glob(&self.namespace))
    }

    /// Pattern matching every index bucket, including unset buckets.
    pub fn index_patterns(&self) -> [String; 2] {
        let ns = escape_glob(&self.namespace);
        [format!("{ns}:idx:*"), format!("{ns}:nullidx:*")]
    }

    /// Parses the primary key out of a record key.
    pub fn pk_of_record(&self, key: &str) -> Option<PrimaryKey> {
        key.strip_prefix(&self.namespace)?
            .strip_prefix(":data:")?
            .parse()
            .ok()
    }
}

/// Immutable description of one model.
///
/// # Invariants
///
/// - Field names are unique and free of `:`, glob characters and whitespace
/// - Every indexed field exists and its type can be indexed
/// - The namespace obeys the same character rules, so `ns:*` covers one model only
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    namespace: String,
    fields: Vec<Field>,
    indexed: BTreeSet<String>,
    keys: KeyLayout,
}

impl Schema {
    /// Starts building a schema for `namespace`.
    pub fn builder(namespace: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            namespace: namespace.into(),
            fields: Vec::new(),
            indexed: Vec::new(),
        }
    }

    /// The model namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Looks up a field by name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name() == name)
    }

    /// Looks up a field, failing with [`CoreError::UnknownField`].
    pub fn require_field(&self, name: &str) -> CoreResult<&Field> {
        self.field(name).ok_or_else(|| CoreError::UnknownField {
            namespace: self.namespace.clone(),
            field: name.to_string(),
        })
    }

    /// Indexed fields in declaration order.
    pub fn indexed_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields
            .iter()
            .filter(move |f| self.indexed.contains(f.name()))
    }

    /// Checks whether a field is indexed.
    pub fn is_indexed(&self, name: &str) -> bool {
        self.indexed.contains(name)
    }

    /// Fields that link to other models.
    pub fn link_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields
            .iter()
            .filter(|f| f.kind().linked_model().is_some())
    }

    /// Persisted key names.
    pub fn keys(&self) -> &KeyLayout {
        &self.keys
    }

    /// Name of the primary-key counter key.
    pub fn counter_key(&self) -> String {
        self.keys.counter()
    }
}

/// Builder for [`Schema`].
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    namespace: String,
    fields: Vec<Field>,
    indexed: Vec<String>,
}

impl SchemaBuilder {
    /// Adds a field.
    #[must_use]
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Adds a field and indexes it.
    #[must_use]
    pub fn indexed_field(mut self, field: Field) -> Self {
        self.indexed.push(field.name().to_string());
        self.fields.push(field);
        self
    }

    /// Marks an already declared field as indexed.
    #[must_use]
    pub fn index(mut self, name: impl Into<String>) -> Self {
        self.indexed.push(name.into());
        self
    }

    /// Validates and builds the schema.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Schema`] if the namespace or a field name is
    /// invalid, a field name repeats, an indexed field is undeclared or its
    /// type cannot be indexed.
    pub fn build(self) -> CoreResult<Schema> {
        validate_name("namespace", &self.namespace)?;

        let mut seen = BTreeSet::new();
        for field in &self.fields {
            validate_name("field name", field.name())?;
            if !seen.insert(field.name()) {
                return Err(CoreError::schema(format!(
                    "field {:?} declared twice in {:?}",
                    field.name(),
                    self.namespace
                )));
            }
            field.validate().map_err(|e| CoreError::schema(e.to_string()))?;
        }

        let mut indexed = BTreeSet::new();
        for name in self.indexed {
            let field = self
                .fields
                .iter()
                .find(|f| f.name() == name)
                .ok_or_else(|| {
                    CoreError::schema(format!(
                        "indexed field {name:?} is not declared in {:?}",
                        self.namespace
                    ))
                })?;
            if !field.can_index() {
                return Err(CoreError::schema(format!(
                    "field {name:?} of type {} cannot be indexed",
                    field.kind().name()
                )));
            }
            indexed.insert(name);
        }

        Ok(Schema {
            keys: KeyLayout::new(self.namespace.clone()),
            namespace: self.namespace,
            fields: self.fields,
            indexed,
        })
    }
}

fn validate_name(what: &str, name: &str) -> CoreResult<()> {
    if name.is_empty() {
        return Err(CoreError::schema(format!("{what} must not be empty")));
    }
    if let Some(bad) = name.chars().find(|c| RESERVED_CHARS.contains(c)) {
        return Err(CoreError::schema(format!(
            "{what} {name:?} contains reserved character {bad:?}"
        )));
    }
    Ok(())
}

/// Registered schemas, keyed by namespace.
///
/// Read-only after registration; safe to share between threads.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: RwLock<BTreeMap<String, Arc<Schema>>>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a schema.
    ///
    /// Registering an identical schema twice returns the existing one.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Schema`] if a different schema already uses the namespace.
    pub fn register(&self, schema: Schema) -> CoreResult<Arc<Schema>> {
        let mut schemas = self.schemas.write();
        if let Some(existing) = schemas.get(schema.namespace()) {
            if **existing == schema {
                return Ok(Arc::clone(existing));
            }
            return Err(CoreError::schema(format!(
                "namespace {:?} is already registered with a different schema",
                schema.namespace()
            )));
        }
        let schema = Arc::new(schema);
        schemas.insert(schema.namespace().to_string(), Arc::clone(&schema));
        tracing::debug!(namespace = schema.namespace(), "registered schema");
        Ok(schema)
    }

    /// Returns the schema for a namespace.
    pub fn get(&self, namespace: &str) -> Option<Arc<Schema>> {
        self.schemas.read().get(namespace).cloned()
    }

    /// Returns the schema for a namespace, failing with [`CoreError::UnknownModel`].
    pub fn require(&self, namespace: &str) -> CoreResult<Arc<Schema>> {
        self.get(namespace).ok_or_else(|| CoreError::UnknownModel {
            namespace: namespace.to_string(),
        })
    }

    /// Registered namespaces, sorted.
    pub fn namespaces(&self) -> Vec<String> {
        self.schemas.read().keys().cloned().collect()
    }

    /// Link targets that are not registered, as `(namespace, field, target)`.
    pub fn dangling_links(&self) -> Vec<(String, String, String)> {
        let schemas = self.schemas.read();
        let mut dangling = Vec::new();
        for schema in schemas.values() {
            for field in schema.link_fields() {
                if let Some(target) = field.kind().linked_model() {
                    if !schemas.contains_key(target) {
                        dangling.push((
                            schema.namespace().to_string(),
                            field.name().to_string(),
                            target.to_string(),
                        ));
                    }
                }
            }
        }
        dangling
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvdex_codec::FieldType;

    fn pk(n: u64) -> PrimaryKey {
        PrimaryKey::new(n).unwrap()
    }

    #[test]
    fn key_layout() {
        let keys = KeyLayout::new("users");
        assert_eq!(keys.record(pk(7)), "users:data:7");
        assert_eq!(keys.bucket("age", "30"), "users:idx:age:30");
        assert_eq!(keys.null_bucket("age"), "users:nullidx:age");
        assert_eq!(keys.bucket_for("age", None), "users:nullidx:age");
        assert_eq!(keys.counter(), "users:next");
        assert_eq!(keys.live_keys(), "users:keys");
        assert_eq!(keys.all_pattern(), "users:*");
        assert_eq!(keys.pk_of_record("users:data:12"), Some(pk(12)));
        assert_eq!(keys.pk_of_record("userz:data:12"), None);
        assert_eq!(keys.pk_of_record("users:data:x"), None);

        assert!(KeyLayout::checked("users").is_ok());
        assert!(KeyLayout::checked("a:b").is_err());
        assert!(KeyLayout::checked("").is_err());
    }

    #[test]
    fn build_valid_schema() {
        let schema = Schema::builder("people")
            .field(Field::text("name"))
            .indexed_field(Field::integer("age"))
            .build()
            .unwrap();
        assert_eq!(schema.namespace(), "people");
        assert!(schema.is_indexed("age"));
        assert!(!schema.is_indexed("name"));
        assert_eq!(schema.indexed_fields().count(), 1);
        assert!(schema.require_field("nope").is_err());
        assert_eq!(schema.counter_key(), "people:next");
    }

    #[test]
    fn indexed_fields_must_be_declared() {
        let err = Schema::builder("people")
            .field(Field::text("name"))
            .index("age")
            .build()
            .unwrap_err();
        assert!(matches!(err, CoreError::Schema { .. }));
    }

    #[test]
    fn unindexable_types_are_rejected() {
        let result = Schema::builder("m")
            .indexed_field(Field::new("ratio", FieldType::Float))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn names_are_validated() {
        assert!(Schema::builder("a:b").build().is_err());
        assert!(Schema::builder("a*").build().is_err());
        assert!(Schema::builder("").build().is_err());
        assert!(Schema::builder("ok").field(Field::text("x:y")).build().is_err());
        assert!(Schema::builder("ok")
            .field(Field::text("x"))
            .field(Field::integer("x"))
            .build()
            .is_err());
    }

    #[test]
    fn registry_rejects_conflicting_schema() {
        let registry = SchemaRegistry::new();
        let first = Schema::builder("m").field(Field::text("a")).build().unwrap();
        let same = first.clone();
        let other = Schema::builder("m").field(Field::text("b")).build().unwrap();

        registry.register(first).unwrap();
        registry.register(same).unwrap();
        assert!(registry.register(other).is_err());
        assert_eq!(registry.namespaces(), vec!["m".to_string()]);
        assert!(registry.require("zzz").is_err());
    }

    #[test]
    fn dangling_links_are_reported() {
        let registry = SchemaRegistry::new();
        let posts = Schema::builder("posts")
            .field(Field::link("author", "authors"))
            .build()
            .unwrap();
        registry.register(posts).unwrap();
        assert_eq!(registry.dangling_links().len(), 1);

        let authors = Schema::builder("authors").field(Field::text("name")).build().unwrap();
        registry.register(authors).unwrap();
        assert!(registry.dangling_links().is_empty());
    }
}

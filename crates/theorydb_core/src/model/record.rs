//! The record trait and its field bag.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{CoreError, CoreResult};
use crate::model::ModelDefinition;
use crate::types::{Number, Value};

/// Trait for types that can be stored as items in a TheoryDB table.
///
/// Implementors provide:
/// - `definition()`: the model, declared once with the builder
/// - `to_fields()`: the record's field values, keyed by field name
/// - `from_fields()`: rebuild the record from decoded fields
///
/// # Example
///
/// ```rust
/// use theorydb_core::{AttributeDefinition, CoreResult, Fields, ModelDefinition, Record};
///
/// struct Note {
///     pk: String,
///     sk: String,
///     value: i64,
/// }
///
/// impl Record for Note {
///     fn definition() -> CoreResult<ModelDefinition> {
///         ModelDefinition::builder("Note")
///             .table_name("notes")
///             .attribute(AttributeDefinition::new("pk").partition_key())
///             .attribute(AttributeDefinition::new("sk").sort_key())
///             .attribute(AttributeDefinition::new("value"))
///             .build()
///     }
///
///     fn to_fields(&self) -> Fields {
///         Fields::new()
///             .with("pk", self.pk.as_str())
///             .with("sk", self.sk.as_str())
///             .with("value", self.value)
///     }
///
///     fn from_fields(mut fields: Fields) -> CoreResult<Self> {
///         Ok(Note {
///             pk: fields.take_string("pk")?,
///             sk: fields.take_string("sk")?,
///             value: fields.take_i64("value")?,
///         })
///     }
/// }
/// ```
pub trait Record: Sized + Send + 'static {
    /// Declare the model. Called once per registry; the result is cached.
    fn definition() -> CoreResult<ModelDefinition>;

    /// The record's field values, keyed by field name.
    fn to_fields(&self) -> Fields;

    /// Rebuild a record from decoded field values.
    ///
    /// Fields missing from the stored item (or left out of a projection)
    /// are absent from `fields`.
    fn from_fields(fields: Fields) -> CoreResult<Self>;
}

/// Field values keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields {
    values: BTreeMap<String, Value>,
}

impl Fields {
    /// Create an empty field bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert a value, replacing any previous one.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    /// Borrow a value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if there are no fields.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate in field-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    /// Remove and return a value; null values count as absent.
    pub fn take(&mut self, name: &str) -> Option<Value> {
        self.values.remove(name).filter(|v| !v.is_null())
    }

    /// Remove a value that must be present.
    pub fn take_required(&mut self, name: &str) -> CoreResult<Value> {
        self.take(name)
            .ok_or_else(|| CoreError::validation(format!("missing field: {name}")))
    }

    /// Take a string.
    pub fn take_string(&mut self, name: &str) -> CoreResult<String> {
        match self.take_required(name)? {
            Value::String(s) => Ok(s),
            other => Err(mismatch(name, "string", &other)),
        }
    }

    /// Take an optional string.
    pub fn take_opt_string(&mut self, name: &str) -> CoreResult<Option<String>> {
        match self.take(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(mismatch(name, "string", &other)),
        }
    }

    /// Take an exact integer.
    pub fn take_i64(&mut self, name: &str) -> CoreResult<i64> {
        let value = self.take_required(name)?;
        value
            .as_i64()
            .ok_or_else(|| mismatch(name, "integer", &value))
    }

    /// Take an optional exact integer.
    pub fn take_opt_i64(&mut self, name: &str) -> CoreResult<Option<i64>> {
        match self.take(name) {
            None => Ok(None),
            Some(value) => value
                .as_i64()
                .map(Some)
                .ok_or_else(|| mismatch(name, "integer", &value)),
        }
    }

    /// Take an approximate float.
    pub fn take_f64(&mut self, name: &str) -> CoreResult<f64> {
        let value = self.take_required(name)?;
        value
            .as_number()
            .and_then(Number::as_f64)
            .ok_or_else(|| mismatch(name, "number", &value))
    }

    /// Take a boolean; absent means false.
    pub fn take_bool(&mut self, name: &str) -> CoreResult<bool> {
        match self.take(name) {
            None => Ok(false),
            Some(Value::Bool(b)) => Ok(b),
            Some(other) => Err(mismatch(name, "bool", &other)),
        }
    }

    /// Take bytes; absent means empty.
    pub fn take_bytes(&mut self, name: &str) -> CoreResult<Vec<u8>> {
        match self.take(name) {
            None => Ok(Vec::new()),
            Some(Value::Bytes(b)) => Ok(b),
            Some(other) => Err(mismatch(name, "bytes", &other)),
        }
    }

    /// Take a string set; absent or null means empty.
    pub fn take_string_set(&mut self, name: &str) -> CoreResult<BTreeSet<String>> {
        match self.take(name) {
            None => Ok(BTreeSet::new()),
            Some(Value::StringSet(s)) => Ok(s),
            Some(Value::List(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s),
                    other => Err(mismatch(name, "string", &other)),
                })
                .collect(),
            Some(other) => Err(mismatch(name, "string set", &other)),
        }
    }

    /// Take a list; absent means empty.
    pub fn take_list(&mut self, name: &str) -> CoreResult<Vec<Value>> {
        match self.take(name) {
            None => Ok(Vec::new()),
            Some(Value::List(items)) => Ok(items),
            Some(other) => Err(mismatch(name, "list", &other)),
        }
    }

    /// Take a map; absent means empty.
    pub fn take_map(&mut self, name: &str) -> CoreResult<BTreeMap<String, Value>> {
        match self.take(name) {
            None => Ok(BTreeMap::new()),
            Some(Value::Map(m)) => Ok(m),
            Some(other) => Err(mismatch(name, "map", &other)),
        }
    }
}

fn mismatch(name: &str, expected: &str, found: &Value) -> CoreError {
    CoreError::validation(format!(
        "field {name}: expected {expected}, found {}",
        found.kind()
    ))
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Fields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl IntoIterator for Fields {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_takes() {
        let mut fields = Fields::new()
            .with("name", "alice")
            .with("age", 30)
            .with("ratio", 0.5)
            .with("active", true)
            .with("tags", Value::string_set(["a", "b"]))
            .with("nickname", Value::Null);

        assert_eq!(fields.take_string("name").unwrap(), "alice");
        assert_eq!(fields.take_i64("age").unwrap(), 30);
        assert_eq!(fields.take_f64("ratio").unwrap(), 0.5);
        assert!(fields.take_bool("active").unwrap());
        assert_eq!(fields.take_string_set("tags").unwrap().len(), 2);
        assert_eq!(fields.take_opt_string("nickname").unwrap(), None);
        assert!(fields.is_empty());
    }

    #[test]
    fn missing_and_mismatched() {
        let mut fields = Fields::new().with("age", "thirty").with("n", Value::from(1.5));

        assert!(matches!(
            fields.take_string("missing"),
            Err(CoreError::Validation { message }) if message == "missing field: missing"
        ));
        assert!(matches!(
            fields.take_i64("age"),
            Err(CoreError::Validation { message }) if message == "field age: expected integer, found string"
        ));
        assert!(fields.take_i64("n").is_err());
    }

    #[test]
    fn defaults_for_absent_collections() {
        let mut fields = Fields::new();
        assert!(fields.take_string_set("tags").unwrap().is_empty());
        assert!(fields.take_list("items").unwrap().is_empty());
        assert!(fields.take_map("doc").unwrap().is_empty());
        assert!(!fields.take_bool("flag").unwrap());
        assert_eq!(fields.take_opt_i64("count").unwrap(), None);
    }
}

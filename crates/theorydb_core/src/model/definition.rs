//! Attribute, index and model definitions.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::types::Value;

/// Custom conversion between a record field and its stored form.
///
/// `to_store` runs before any other encoding step; `from_store` runs after
/// decryption and JSON parsing on the way back.
pub trait AttributeConverter: Send + Sync {
    /// Convert a record value into the value to store.
    fn to_store(&self, value: Value) -> CoreResult<Value>;

    /// Convert a stored value back into the record value.
    fn from_store(&self, value: Value) -> CoreResult<Value>;
}

/// A key role an attribute can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Table partition key.
    PartitionKey,
    /// Table sort key.
    SortKey,
    /// Optimistic-locking version counter.
    Version,
}

/// One declared attribute of a model.
#[derive(Clone)]
pub struct AttributeDefinition {
    field_name: String,
    attribute_name: String,
    roles: Vec<Role>,
    omit_empty: bool,
    set: bool,
    json: bool,
    binary: bool,
    encrypted: bool,
    required: bool,
    converter: Option<Arc<dyn AttributeConverter>>,
}

impl AttributeDefinition {
    /// Declare a field stored under the same attribute name.
    pub fn new(field_name: impl Into<String>) -> Self {
        let field_name = field_name.into();
        Self {
            attribute_name: field_name.clone(),
            field_name,
            roles: Vec::new(),
            omit_empty: false,
            set: false,
            json: false,
            binary: false,
            encrypted: false,
            required: false,
            converter: None,
        }
    }

    /// Store under a different attribute name.
    #[must_use]
    pub fn named(mut self, attribute_name: impl Into<String>) -> Self {
        self.attribute_name = attribute_name.into();
        self
    }

    /// Mark as the partition key.
    #[must_use]
    pub fn partition_key(self) -> Self {
        self.role(Role::PartitionKey)
    }

    /// Mark as the sort key.
    #[must_use]
    pub fn sort_key(self) -> Self {
        self.role(Role::SortKey)
    }

    /// Mark as the version counter.
    #[must_use]
    pub fn version(self) -> Self {
        self.role(Role::Version)
    }

    /// Add a role.
    #[must_use]
    pub fn role(mut self, role: Role) -> Self {
        if !self.roles.contains(&role) {
            self.roles.push(role);
        }
        self
    }

    /// Skip the attribute on write when its value is empty.
    #[must_use]
    pub fn omit_empty(mut self) -> Self {
        self.omit_empty = true;
        self
    }

    /// Store a list value as a typed set; an empty set is stored as NULL.
    #[must_use]
    pub fn set(mut self) -> Self {
        self.set = true;
        self
    }

    /// Store as a canonical JSON string.
    #[must_use]
    pub fn json(mut self) -> Self {
        self.json = true;
        self
    }

    /// Store as binary.
    #[must_use]
    pub fn binary(mut self) -> Self {
        self.binary = true;
        self
    }

    /// Seal the stored value in an encryption envelope.
    #[must_use]
    pub fn encrypted(mut self) -> Self {
        self.encrypted = true;
        self
    }

    /// Always include the attribute in projections.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Attach a custom converter.
    #[must_use]
    pub fn converter(mut self, converter: Arc<dyn AttributeConverter>) -> Self {
        self.converter = Some(converter);
        self
    }

    /// Field name on the record.
    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// Attribute name on the wire.
    pub fn attribute_name(&self) -> &str {
        &self.attribute_name
    }

    /// Declared roles.
    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    /// Check for a role.
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// True for the table partition or sort key.
    pub fn is_key(&self) -> bool {
        self.has_role(Role::PartitionKey) || self.has_role(Role::SortKey)
    }

    /// Omit-if-empty flag.
    pub fn is_omit_empty(&self) -> bool {
        self.omit_empty
    }

    /// Set flag.
    pub fn is_set(&self) -> bool {
        self.set
    }

    /// JSON flag.
    pub fn is_json(&self) -> bool {
        self.json
    }

    /// Binary flag.
    pub fn is_binary(&self) -> bool {
        self.binary
    }

    /// Encrypted flag.
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Required flag. Keys are always required.
    pub fn is_required(&self) -> bool {
        self.required || self.is_key()
    }

    /// The custom converter, if any.
    pub fn converter_ref(&self) -> Option<&dyn AttributeConverter> {
        self.converter.as_deref()
    }
}

impl fmt::Debug for AttributeDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeDefinition")
            .field("field_name", &self.field_name)
            .field("attribute_name", &self.attribute_name)
            .field("roles", &self.roles)
            .field("omit_empty", &self.omit_empty)
            .field("set", &self.set)
            .field("json", &self.json)
            .field("binary", &self.binary)
            .field("encrypted", &self.encrypted)
            .field("required", &self.required)
            .field("converter", &self.converter.is_some())
            .finish()
    }
}

/// Global or local secondary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Repartitions items by its own partition key.
    Global,
    /// Shares the table partition key with a different sort key.
    Local,
}

impl IndexKind {
    /// Short wire-style name.
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexKind::Global => "GSI",
            IndexKind::Local => "LSI",
        }
    }
}

/// Attributes projected into an index.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Projection {
    /// Every attribute.
    #[default]
    All,
    /// Only table and index keys.
    KeysOnly,
    /// Keys plus the named attributes.
    Include(Vec<String>),
}

/// An index as declared by the caller, referring to fields by field name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    name: String,
    kind: IndexKind,
    partition: Option<String>,
    sort: Option<String>,
    projection: Projection,
}

impl IndexSpec {
    /// A global index partitioned by `partition`.
    pub fn global(name: impl Into<String>, partition: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: IndexKind::Global,
            partition: Some(partition.into()),
            sort: None,
            projection: Projection::All,
        }
    }

    /// A local index sorted by `sort`; the partition is the table pk.
    pub fn local(name: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: IndexKind::Local,
            partition: None,
            sort: Some(sort.into()),
            projection: Projection::All,
        }
    }

    /// Set the sort field.
    #[must_use]
    pub fn sort(mut self, field: impl Into<String>) -> Self {
        self.sort = Some(field.into());
        self
    }

    /// Set an explicit partition field. Only meaningful for local indexes,
    /// where it must name the table pk.
    #[must_use]
    pub fn partition(mut self, field: impl Into<String>) -> Self {
        self.partition = Some(field.into());
        self
    }

    /// Set the projection.
    #[must_use]
    pub fn projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }
}

/// A validated index, referring to attributes by wire name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    /// Index name.
    pub name: String,
    /// Global or local.
    pub kind: IndexKind,
    /// Partition attribute (wire name).
    pub partition: String,
    /// Sort attribute (wire name).
    pub sort: Option<String>,
    /// Projected attributes.
    pub projection: Projection,
}

/// A validated, immutable model.
#[derive(Debug, Clone)]
pub struct ModelDefinition {
    name: String,
    table_name: Option<String>,
    attributes: Vec<AttributeDefinition>,
    by_field: BTreeMap<String, usize>,
    by_attribute: BTreeMap<String, usize>,
    pk: usize,
    sk: Option<usize>,
    version: Option<usize>,
    indexes: Vec<IndexDefinition>,
}

impl ModelDefinition {
    /// Start declaring a model.
    pub fn builder(name: impl Into<String>) -> ModelBuilder {
        ModelBuilder {
            name: name.into(),
            table_name: None,
            attributes: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// Model name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Default table name, if declared.
    pub fn table_name(&self) -> Option<&str> {
        self.table_name.as_deref()
    }

    /// All attributes in declaration order.
    pub fn attributes(&self) -> &[AttributeDefinition] {
        &self.attributes
    }

    /// The partition key attribute.
    pub fn partition_key(&self) -> &AttributeDefinition {
        &self.attributes[self.pk]
    }

    /// The sort key attribute, if the model has one.
    pub fn sort_key(&self) -> Option<&AttributeDefinition> {
        self.sk.map(|i| &self.attributes[i])
    }

    /// The version attribute, if the model has one.
    pub fn version_attribute(&self) -> Option<&AttributeDefinition> {
        self.version.map(|i| &self.attributes[i])
    }

    /// Look up an attribute by field name.
    pub fn field(&self, field_name: &str) -> Option<&AttributeDefinition> {
        self.by_field.get(field_name).map(|&i| &self.attributes[i])
    }

    /// Look up an attribute by field name, failing with "unknown field".
    pub fn require_field(&self, field_name: &str) -> CoreResult<&AttributeDefinition> {
        self.field(field_name)
            .ok_or_else(|| CoreError::validation(format!("unknown field: {field_name}")))
    }

    /// Look up an attribute by wire name.
    pub fn attribute(&self, attribute_name: &str) -> Option<&AttributeDefinition> {
        self.by_attribute
            .get(attribute_name)
            .map(|&i| &self.attributes[i])
    }

    /// Declared indexes.
    pub fn indexes(&self) -> &[IndexDefinition] {
        &self.indexes
    }

    /// Look up an index by name.
    pub fn index(&self, name: &str) -> Option<&IndexDefinition> {
        self.indexes.iter().find(|idx| idx.name == name)
    }

    /// True if any attribute is encrypted.
    pub fn has_encrypted(&self) -> bool {
        self.attributes.iter().any(AttributeDefinition::is_encrypted)
    }

    /// Wire names of the table key attributes.
    pub fn key_attribute_names(&self) -> Vec<&str> {
        let mut names = vec![self.partition_key().attribute_name()];
        if let Some(sk) = self.sort_key() {
            names.push(sk.attribute_name());
        }
        names
    }
}

/// Builder for [`ModelDefinition`]; validation happens in [`ModelBuilder::build`].
#[derive(Debug, Clone)]
pub struct ModelBuilder {
    name: String,
    table_name: Option<String>,
    attributes: Vec<AttributeDefinition>,
    indexes: Vec<IndexSpec>,
}

impl ModelBuilder {
    /// Set the default table name.
    #[must_use]
    pub fn table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    /// Declare an attribute.
    #[must_use]
    pub fn attribute(mut self, attribute: AttributeDefinition) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Declare an index.
    #[must_use]
    pub fn index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    /// Validate and freeze the model.
    pub fn build(self) -> CoreResult<ModelDefinition> {
        let invalid = |message: String| CoreError::validation(message);

        let mut by_field = BTreeMap::new();
        let mut by_attribute = BTreeMap::new();
        let mut pk_fields = Vec::new();
        let mut sk_fields = Vec::new();
        let mut version = None;

        for (i, attr) in self.attributes.iter().enumerate() {
            if !is_identifier(&attr.field_name) {
                return Err(invalid(format!("invalid field name: {:?}", attr.field_name)));
            }
            if attr.attribute_name.is_empty() {
                return Err(invalid(format!("empty attribute name for field {}", attr.field_name)));
            }
            if by_field.insert(attr.field_name.clone(), i).is_some() {
                return Err(invalid(format!("duplicate field: {}", attr.field_name)));
            }
            if by_attribute.insert(attr.attribute_name.clone(), i).is_some() {
                return Err(invalid(format!("duplicate attribute name: {}", attr.attribute_name)));
            }
            if attr.has_role(Role::PartitionKey) {
                pk_fields.push(i);
            }
            if attr.has_role(Role::SortKey) {
                sk_fields.push(i);
            }
            if attr.has_role(Role::Version) {
                if version.is_some() {
                    return Err(invalid("model must define at most one version field".into()));
                }
                version = Some(i);
            }
            if attr.encrypted && attr.is_key() {
                return Err(invalid(format!("encrypted field cannot be a key: {}", attr.field_name)));
            }
        }

        if pk_fields.len() != 1 {
            return Err(invalid(format!(
                "model must define exactly one pk field (found {})",
                pk_fields.len()
            )));
        }
        if sk_fields.len() > 1 {
            return Err(invalid(format!(
                "model must define at most one sk field (found {})",
                sk_fields.len()
            )));
        }
        let pk = pk_fields[0];
        let sk = sk_fields.first().copied();

        let mut seen = BTreeSet::new();
        let mut indexes = Vec::with_capacity(self.indexes.len());
        for spec in self.indexes {
            if !seen.insert(spec.name.clone()) {
                return Err(invalid(format!("duplicate index name: {}", spec.name)));
            }

            let pk_field = &self.attributes[pk].field_name;
            let partition_field = match (spec.kind, &spec.partition) {
                (IndexKind::Local, None) => pk_field.clone(),
                (_, Some(field)) => field.clone(),
                (IndexKind::Global, None) => {
                    return Err(invalid(format!("index {}: missing partition field", spec.name)))
                }
            };
            let partition = by_field
                .get(&partition_field)
                .map(|&i| &self.attributes[i])
                .ok_or_else(|| {
                    invalid(format!(
                        "index {}: unknown partition field: {partition_field}",
                        spec.name
                    ))
                })?;
            if partition.encrypted {
                return Err(invalid(format!(
                    "index {}: encrypted partition field is not allowed: {partition_field}",
                    spec.name
                )));
            }
            if spec.kind == IndexKind::Local && &partition_field != pk_field {
                return Err(invalid(format!(
                    "index {}: LSI partition must be the table pk ({pk_field})",
                    spec.name
                )));
            }

            let sort = match &spec.sort {
                None if spec.kind == IndexKind::Local => {
                    return Err(invalid(format!("index {}: LSI requires a sort field", spec.name)))
                }
                None => None,
                Some(sort_field) => {
                    let attr = by_field
                        .get(sort_field)
                        .map(|&i| &self.attributes[i])
                        .ok_or_else(|| {
                            invalid(format!("index {}: unknown sort field: {sort_field}", spec.name))
                        })?;
                    if attr.encrypted {
                        return Err(invalid(format!(
                            "index {}: encrypted sort field is not allowed: {sort_field}",
                            spec.name
                        )));
                    }
                    Some(attr.attribute_name.clone())
                }
            };

            let projection = match spec.projection {
                Projection::Include(fields) => Projection::Include(
                    fields
                        .iter()
                        .map(|f| {
                            by_field
                                .get(f)
                                .map(|&i| self.attributes[i].attribute_name.clone())
                                .ok_or_else(|| {
                                    invalid(format!("index {}: unknown projected field: {f}", spec.name))
                                })
                        })
                        .collect::<CoreResult<Vec<_>>>()?,
                ),
                other => other,
            };

            indexes.push(IndexDefinition {
                name: spec.name,
                kind: spec.kind,
                partition: partition.attribute_name.clone(),
                sort,
                projection,
            });
        }

        Ok(ModelDefinition {
            name: self.name,
            table_name: self.table_name,
            attributes: self.attributes,
            by_field,
            by_attribute,
            pk,
            sk,
            version,
            indexes,
        })
    }
}

/// Field names double as placeholder suffixes (`#f_<field>`), so they must
/// be plain identifiers.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

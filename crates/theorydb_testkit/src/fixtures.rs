//! Sample records and a ready-made table harness.
//!
//! The harness wires a [`Table`] to a fresh [`MemoryBackend`], a
//! [`ManualClock`] and a [`StubKms`], so tests can drive time and inspect
//! stored items directly.

use std::collections::BTreeSet;
use std::sync::Arc;

use theorydb_core::{
    AttributeDefinition, CoreResult, EncryptionConfig, Fields, IndexSpec, ModelDefinition, Record,
    Table, TableBuilder, TableConfig, Value,
};

use crate::fakes::{CountingRandom, ManualClock, StubKms};
use crate::memory::{MemoryBackend, TableSchema};

/// Master key id used by the harness.
pub const MASTER_KEY_ID: &str = "alias/theorydb-test";

/// Epoch seconds the harness clock starts at.
pub const START_TIME: f64 = 1_000.0;

/// `{pk, sk, value}` in table `notes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    /// Partition key.
    pub pk: String,
    /// Sort key.
    pub sk: String,
    /// Payload.
    pub value: i64,
}

impl Note {
    /// Build a note.
    pub fn new(pk: &str, sk: &str, value: i64) -> Self {
        Self {
            pk: pk.to_string(),
            sk: sk.to_string(),
            value,
        }
    }
}

impl Record for Note {
    fn definition() -> CoreResult<ModelDefinition> {
        ModelDefinition::builder("Note")
            .table_name("notes")
            .attribute(AttributeDefinition::new("pk").partition_key())
            .attribute(AttributeDefinition::new("sk").sort_key())
            .attribute(AttributeDefinition::new("value"))
            .index(IndexSpec::global("byValue", "value").sort("sk"))
            .build()
    }

    fn to_fields(&self) -> Fields {
        Fields::new()
            .with("pk", self.pk.as_str())
            .with("sk", self.sk.as_str())
            .with("value", self.value)
    }

    fn from_fields(mut fields: Fields) -> CoreResult<Self> {
        Ok(Self {
            pk: fields.take_string("pk")?,
            sk: fields.take_string("sk")?,
            value: fields.take_i64("value")?,
        })
    }
}

/// A versioned document in table `docs` exercising sets, lists, JSON and
/// a renamed attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Doc {
    /// Partition key.
    pub pk: String,
    /// Sort key.
    pub sk: String,
    /// Name, stored as `title`.
    pub name: String,
    /// Optimistic-lock version.
    pub version: i64,
    /// String set; omitted when empty.
    pub tags: BTreeSet<String>,
    /// Free-form list.
    pub history: Vec<Value>,
    /// JSON-encoded metadata.
    pub meta: Option<Value>,
}

impl Doc {
    /// A document at version 0 with no tags, history or metadata.
    pub fn new(pk: &str, sk: &str, name: &str) -> Self {
        Self {
            pk: pk.to_string(),
            sk: sk.to_string(),
            name: name.to_string(),
            version: 0,
            tags: BTreeSet::new(),
            history: Vec::new(),
            meta: None,
        }
    }
}

impl Record for Doc {
    fn definition() -> CoreResult<ModelDefinition> {
        ModelDefinition::builder("Doc")
            .table_name("docs")
            .attribute(AttributeDefinition::new("pk").partition_key())
            .attribute(AttributeDefinition::new("sk").sort_key())
            .attribute(AttributeDefinition::new("name").named("title").required())
            .attribute(AttributeDefinition::new("version").version())
            .attribute(AttributeDefinition::new("tags").set().omit_empty())
            .attribute(AttributeDefinition::new("history").omit_empty())
            .attribute(AttributeDefinition::new("meta").json().omit_empty())
            .index(IndexSpec::global("byName", "name"))
            .build()
    }

    fn to_fields(&self) -> Fields {
        Fields::new()
            .with("pk", self.pk.as_str())
            .with("sk", self.sk.as_str())
            .with("name", self.name.as_str())
            .with("version", self.version)
            .with("tags", self.tags.clone())
            .with("history", self.history.clone())
            .with("meta", self.meta.clone())
    }

    fn from_fields(mut fields: Fields) -> CoreResult<Self> {
        Ok(Self {
            pk: fields.take_string("pk")?,
            sk: fields.take_string("sk")?,
            name: fields.take_string("name")?,
            version: fields.take_opt_i64("version")?.unwrap_or_default(),
            tags: fields.take_string_set("tags")?,
            history: fields.take_list("history")?,
            meta: fields.take("meta"),
        })
    }
}

/// A record with one encrypted attribute, in table `secrets`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Secret {
    /// Partition key.
    pub pk: String,
    /// Encrypted payload.
    pub secret: String,
}

impl Secret {
    /// Build a secret.
    pub fn new(pk: &str, secret: &str) -> Self {
        Self {
            pk: pk.to_string(),
            secret: secret.to_string(),
        }
    }
}

impl Record for Secret {
    fn definition() -> CoreResult<ModelDefinition> {
        ModelDefinition::builder("Secret")
            .table_name("secrets")
            .attribute(AttributeDefinition::new("pk").partition_key())
            .attribute(AttributeDefinition::new("secret").encrypted())
            .build()
    }

    fn to_fields(&self) -> Fields {
        Fields::new()
            .with("pk", self.pk.as_str())
            .with("secret", self.secret.as_str())
    }

    fn from_fields(mut fields: Fields) -> CoreResult<Self> {
        Ok(Self {
            pk: fields.take_string("pk")?,
            secret: fields.take_string("secret")?,
        })
    }
}

/// A table over an in-memory store with controllable time and keys.
pub struct Harness<T: Record> {
    /// The store.
    pub backend: Arc<MemoryBackend>,
    /// The clock shared by the table.
    pub clock: Arc<ManualClock>,
    /// The key service.
    pub kms: Arc<StubKms>,
    /// The table under test.
    pub table: Table<T>,
}

impl<T: Record> Harness<T> {
    /// Default configuration.
    ///
    /// # Panics
    ///
    /// If the model is invalid.
    pub fn new() -> Self {
        Self::customized(|builder| builder)
    }

    /// Custom limits and retry settings.
    pub fn with_config(config: TableConfig) -> Self {
        Self::customized(|builder| builder.config(config))
    }

    /// Adjust the table builder before it is built.
    ///
    /// # Panics
    ///
    /// If the model is invalid or the table cannot be built.
    pub fn customized(adjust: impl FnOnce(TableBuilder<T>) -> TableBuilder<T>) -> Self {
        let model = T::definition().expect("invalid model");
        let backend = Arc::new(MemoryBackend::new().with_table(TableSchema::from_model(&model)));
        let clock = Arc::new(ManualClock::at(START_TIME));
        let kms = Arc::new(StubKms::new());
        let encryption = EncryptionConfig::new(kms.clone(), MASTER_KEY_ID)
            .with_random(Arc::new(CountingRandom::default()));

        let builder = Table::<T>::builder(backend.clone())
            .clock(clock.clone())
            .encryption(encryption);
        let table = adjust(builder).build().expect("failed to build table");

        Self {
            backend,
            clock,
            kms,
            table,
        }
    }

    /// Every stored item of the table, in key order.
    pub fn stored(&self) -> Vec<theorydb_core::Item> {
        self.backend.items(self.table.table_name())
    }
}

impl<T: Record> Default for Harness<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Record> std::ops::Deref for Harness<T> {
    type Target = Table<T>;

    fn deref(&self) -> &Self::Target {
        &self.table
    }
}

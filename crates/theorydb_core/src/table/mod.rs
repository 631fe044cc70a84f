//! The execution engine: typed operations on one table.
//!
//! A [`Table`] binds a record type to a table name, a [`TableBackend`] and
//! the attribute codec. Every operation compiles its expressions, makes one
//! or more backend calls and maps failures into [`CoreError`] exactly once.

mod batch;
mod query;
mod transact;
mod update_builder;

use std::marker::PhantomData;
use std::sync::Arc;

use theorydb_codec::Item;
use tracing::debug;

use crate::backend::{
    DeleteItemRequest, GetItemRequest, PutItemRequest, ReturnValues, TableBackend,
    UpdateItemRequest,
};
use crate::codec::ItemCodec;
use crate::config::{EncryptionConfig, TableConfig};
use crate::error::{CoreError, CoreResult};
use crate::expr::{compile_field_updates, compile_projection, Placeholders, WriteCondition};
use crate::model::{Fields, ModelDefinition, ModelRegistry, Record};
use crate::retry::{CancellationToken, Clock, SystemClock};
use crate::types::Value;

pub use query::{Page, QueryOptions, ScanOptions};
pub use transact::{TransactAction, TransactionBuilder};
pub use update_builder::UpdateBuilder;

/// A primary key: partition value and, for composite models, sort value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    /// Partition key value.
    pub pk: Value,
    /// Sort key value; `None` for partition-only models.
    pub sk: Option<Value>,
}

impl Key {
    /// A composite key. A null `sk` is treated as absent.
    pub fn new(pk: impl Into<Value>, sk: impl Into<Value>) -> Self {
        let sk = sk.into();
        Self {
            pk: pk.into(),
            sk: (!sk.is_null()).then_some(sk),
        }
    }

    /// A partition-only key.
    pub fn partition(pk: impl Into<Value>) -> Self {
        Self {
            pk: pk.into(),
            sk: None,
        }
    }
}

impl<P: Into<Value>, S: Into<Value>> From<(P, S)> for Key {
    fn from((pk, sk): (P, S)) -> Self {
        Key::new(pk, sk)
    }
}

/// Options for a single-item read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// Request a strongly consistent read.
    pub consistent_read: bool,
    /// Fields to return; keys and required fields are always included.
    pub projection: Option<Vec<String>>,
}

impl GetOptions {
    /// Default options: eventually consistent, every attribute.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a strongly consistent read.
    #[must_use]
    pub fn consistent_read(mut self, value: bool) -> Self {
        self.consistent_read = value;
        self
    }

    /// Return only these fields.
    #[must_use]
    pub fn projection<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(fields.into_iter().map(Into::into).collect());
        self
    }
}

/// Builds a [`Table`].
pub struct TableBuilder<T: Record> {
    backend: Arc<dyn TableBackend>,
    table_name: Option<String>,
    model: Option<Arc<ModelDefinition>>,
    encryption: Option<EncryptionConfig>,
    config: TableConfig,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> TableBuilder<T> {
    /// Override the model's table name.
    #[must_use]
    pub fn table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    /// Resolve the model through `registry` instead of calling
    /// `T::definition()` directly.
    pub fn registry(mut self, registry: &ModelRegistry) -> CoreResult<Self> {
        self.model = Some(registry.resolve::<T>()?);
        Ok(self)
    }

    /// Enable encrypted attributes.
    #[must_use]
    pub fn encryption(mut self, encryption: EncryptionConfig) -> Self {
        self.encryption = Some(encryption);
        self
    }

    /// Set limits and retry settings.
    #[must_use]
    pub fn config(mut self, config: TableConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the clock used for backoff sleeps.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Observe `token` in every retry and pagination loop.
    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// A config limit outside the store's per-call caps;
    /// `table_name is required` when neither the builder nor the model names
    /// a table; `EncryptionNotConfigured` when the model has encrypted
    /// attributes and no encryption was configured.
    pub fn build(self) -> CoreResult<Table<T>> {
        self.config.validate()?;
        let model = match self.model {
            Some(model) => model,
            None => Arc::new(T::definition()?),
        };
        let table_name = self
            .table_name
            .or_else(|| model.table_name().map(str::to_string))
            .filter(|name| !name.is_empty())
            .ok_or_else(|| CoreError::validation("table_name is required"))?;
        let cipher = self.encryption.as_ref().map(EncryptionConfig::cipher);
        let codec = ItemCodec::new(model, cipher)?;

        Ok(Table {
            backend: self.backend,
            table_name,
            codec,
            config: self.config,
            clock: self.clock,
            cancel: self.cancel,
            _record: PhantomData,
        })
    }
}

/// Typed access to one table for record type `T`.
pub struct Table<T: Record> {
    backend: Arc<dyn TableBackend>,
    table_name: String,
    codec: ItemCodec,
    config: TableConfig,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> Table<T> {
    /// Start building a table over `backend`.
    pub fn builder(backend: Arc<dyn TableBackend>) -> TableBuilder<T> {
        TableBuilder {
            backend,
            table_name: None,
            model: None,
            encryption: None,
            config: TableConfig::default(),
            clock: Arc::new(SystemClock),
            cancel: CancellationToken::default(),
            _record: PhantomData,
        }
    }

    /// A table named by the model, with default settings.
    pub fn new(backend: Arc<dyn TableBackend>) -> CoreResult<Self> {
        Self::builder(backend).build()
    }

    /// The table name requests are sent to.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// The record model.
    pub fn model(&self) -> &ModelDefinition {
        self.codec.model()
    }

    /// The table configuration.
    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    /// The cancellation token observed by retry loops.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Read one record.
    ///
    /// # Errors
    ///
    /// `NotFound` when no item has this key.
    pub fn get(&self, key: impl Into<Key>) -> CoreResult<T> {
        self.get_with(key, &GetOptions::default())
    }

    /// Read one record with a strongly consistent read.
    pub fn get_consistent(&self, key: impl Into<Key>) -> CoreResult<T> {
        self.get_with(key, &GetOptions::new().consistent_read(true))
    }

    /// Read one record with explicit options.
    pub fn get_with(&self, key: impl Into<Key>, options: &GetOptions) -> CoreResult<T> {
        let key = self.encode_key(key.into())?;
        let mut placeholders = Placeholders::new();
        let projection_expression = options
            .projection
            .as_deref()
            .map(|fields| compile_projection(fields, self.model(), &mut placeholders))
            .transpose()?;
        let (names, _) = placeholders.into_parts();

        let request = GetItemRequest {
            table_name: self.table_name.clone(),
            key,
            consistent_read: options.consistent_read,
            projection_expression,
            expression_attribute_names: names,
        };
        debug!(table = %self.table_name, operation = "get_item", "sending request");

        let response = self.backend.get_item(&request)?;
        match response.item {
            Some(item) if !item.is_empty() => self.decode(&item),
            _ => Err(CoreError::NotFound),
        }
    }

    /// Write a whole record, replacing any existing item.
    pub fn put(&self, record: &T) -> CoreResult<()> {
        self.put_with(record, &WriteCondition::new())
    }

    /// Write a whole record if `condition` holds.
    ///
    /// # Errors
    ///
    /// `ConditionFailed` when the condition is false.
    pub fn put_with(&self, record: &T, condition: &WriteCondition) -> CoreResult<()> {
        let request = self.put_request(record, condition)?;
        debug!(table = %self.table_name, operation = "put_item", "sending request");
        self.backend.put_item(&request)?;
        Ok(())
    }

    /// Delete an item. Deleting a missing item is not an error.
    pub fn delete(&self, key: impl Into<Key>) -> CoreResult<()> {
        self.delete_with(key, &WriteCondition::new())
    }

    /// Delete an item if `condition` holds.
    pub fn delete_with(&self, key: impl Into<Key>, condition: &WriteCondition) -> CoreResult<()> {
        let request = self.delete_request(key.into(), condition)?;
        debug!(table = %self.table_name, operation = "delete_item", "sending request");
        self.backend.delete_item(&request)?;
        Ok(())
    }

    /// Apply a field map: null values remove attributes, everything else is
    /// set. Returns the item after the update.
    ///
    /// # Errors
    ///
    /// `NoAttributesReturned` when the store returns no item.
    pub fn update(
        &self,
        key: impl Into<Key>,
        updates: &Fields,
        condition: Option<&WriteCondition>,
    ) -> CoreResult<T> {
        let request = self.update_request(key.into(), updates, condition, ReturnValues::AllNew)?;
        debug!(table = %self.table_name, operation = "update_item", "sending request");

        let response = self.backend.update_item(&request)?;
        match response.attributes {
            Some(item) if !item.is_empty() => self.decode(&item),
            _ => Err(CoreError::NoAttributesReturned {
                operation: "update",
            }),
        }
    }

    /// Start a fluent update of one item.
    pub fn update_builder(&self, key: impl Into<Key>) -> UpdateBuilder<'_, T> {
        UpdateBuilder::new(self, key.into())
    }

    /// Start a transaction against this table.
    pub fn transaction(&self) -> TransactionBuilder<'_, T> {
        TransactionBuilder::new(self)
    }

    pub(crate) fn codec(&self) -> &ItemCodec {
        &self.codec
    }

    pub(crate) fn backend(&self) -> &dyn TableBackend {
        self.backend.as_ref()
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub(crate) fn decode(&self, item: &Item) -> CoreResult<T> {
        T::from_fields(self.codec.decode_item(item)?)
    }

    pub(crate) fn encode_key(&self, key: Key) -> CoreResult<Item> {
        self.codec.encode_key(key.pk, key.sk)
    }

    /// Sleep through the table clock unless cancelled first.
    pub(crate) fn backoff(&self, delay: std::time::Duration) -> CoreResult<()> {
        self.cancel.check()?;
        if !delay.is_zero() {
            self.clock.sleep(delay);
        }
        Ok(())
    }

    pub(crate) fn put_request(
        &self,
        record: &T,
        condition: &WriteCondition,
    ) -> CoreResult<PutItemRequest> {
        let item = self.codec.encode_item(record.to_fields())?;
        let mut placeholders = Placeholders::new();
        let condition_expression = condition.compile(&self.codec, &mut placeholders)?;
        let (names, values) = placeholders.into_parts();
        Ok(PutItemRequest {
            table_name: self.table_name.clone(),
            item,
            condition_expression,
            expression_attribute_names: names,
            expression_attribute_values: values,
        })
    }

    pub(crate) fn delete_request(
        &self,
        key: Key,
        condition: &WriteCondition,
    ) -> CoreResult<DeleteItemRequest> {
        let key = self.encode_key(key)?;
        let mut placeholders = Placeholders::new();
        let condition_expression = condition.compile(&self.codec, &mut placeholders)?;
        let (names, values) = placeholders.into_parts();
        Ok(DeleteItemRequest {
            table_name: self.table_name.clone(),
            key,
            condition_expression,
            expression_attribute_names: names,
            expression_attribute_values: values,
        })
    }

    pub(crate) fn update_request(
        &self,
        key: Key,
        updates: &Fields,
        condition: Option<&WriteCondition>,
        return_values: ReturnValues,
    ) -> CoreResult<UpdateItemRequest> {
        let key = self.encode_key(key)?;
        let mut placeholders = Placeholders::new();
        let update_expression = compile_field_updates(updates, &self.codec, &mut placeholders)?;
        let condition_expression = match condition {
            Some(condition) => condition.compile(&self.codec, &mut placeholders)?,
            None => None,
        };
        let (names, values) = placeholders.into_parts();
        Ok(UpdateItemRequest {
            table_name: self.table_name.clone(),
            key,
            update_expression,
            condition_expression,
            expression_attribute_names: names,
            expression_attribute_values: values,
            return_values,
        })
    }
}

impl<T: Record> std::fmt::Debug for Table<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("table_name", &self.table_name)
            .field("model", &self.codec.model().name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::model::AttributeDefinition;

    /// `{pk, sk, value, tags(set), note}` in table `notes`, with a global
    /// index on `value`.
    #[derive(Debug, Clone, PartialEq)]
    pub(crate) struct Note {
        pub(crate) pk: String,
        pub(crate) sk: String,
        pub(crate) value: i64,
        pub(crate) note: Option<String>,
    }

    impl Note {
        pub(crate) fn new(pk: &str, sk: &str, value: i64) -> Self {
            Self {
                pk: pk.into(),
                sk: sk.into(),
                value,
                note: None,
            }
        }
    }

    impl Record for Note {
        fn definition() -> CoreResult<ModelDefinition> {
            ModelDefinition::builder("Note")
                .table_name("notes")
                .attribute(AttributeDefinition::new("pk").partition_key())
                .attribute(AttributeDefinition::new("sk").sort_key())
                .attribute(AttributeDefinition::new("value").version())
                .attribute(AttributeDefinition::new("tags").set())
                .attribute(AttributeDefinition::new("note").omit_empty())
                .index(crate::model::IndexSpec::global("byValue", "value"))
                .index(crate::model::IndexSpec::local("byNote", "note"))
                .build()
        }

        fn to_fields(&self) -> Fields {
            Fields::new()
                .with("pk", self.pk.as_str())
                .with("sk", self.sk.as_str())
                .with("value", self.value)
                .with("note", self.note.clone())
        }

        fn from_fields(mut fields: Fields) -> CoreResult<Self> {
            Ok(Self {
                pk: fields.take_string("pk")?,
                sk: fields.take_string("sk")?,
                value: fields.take_opt_i64("value")?.unwrap_or_default(),
                note: fields.take_opt_string("note")?,
            })
        }
    }

    pub(crate) fn stored(pk: &str, sk: &str, value: i64) -> Item {
        Item::from([
            ("pk".to_string(), theorydb_codec::AttributeValue::from(pk)),
            ("sk".to_string(), theorydb_codec::AttributeValue::from(sk)),
            ("value".to_string(), theorydb_codec::AttributeValue::number(value)),
        ])
    }
}

//! An in-memory document store implementing [`TableBackend`].
//!
//! Tables are declared up front with a [`TableSchema`], usually derived from
//! a model. Items are kept in primary-key order; queries and scans page
//! through that order (or index order) honouring `Limit` and
//! `ExclusiveStartKey` like the real store: the limit counts items read
//! before the filter runs.
//!
//! Faults can be injected per operation, and batch calls can be told to
//! leave their work unprocessed.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, VecDeque};

use parking_lot::Mutex;
use theorydb_codec::{AttributeValue, Item};
use theorydb_core::backend::{
    codes, BackendError, BackendResult, BatchGetItemRequest, BatchGetItemResponse,
    BatchWriteItemRequest, BatchWriteItemResponse, CancellationReason, DeleteItemRequest,
    GetItemRequest, GetItemResponse, NameMap, PageResponse, PutItemRequest,
    QueryRequest, ReturnValues, ScanRequest, TableBackend, TransactWriteItem,
    TransactWriteItemsRequest, UpdateItemRequest, UpdateItemResponse, ValueMap, WriteRequest,
};
use theorydb_core::{IndexKind, ModelDefinition};

use crate::eval::{apply_update, compare, evaluate_condition, project, projected_attributes};

/// Backend operations, for fault injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `GetItem`.
    GetItem,
    /// `PutItem`.
    PutItem,
    /// `DeleteItem`.
    DeleteItem,
    /// `UpdateItem`.
    UpdateItem,
    /// `Query`.
    Query,
    /// `Scan`.
    Scan,
    /// `BatchGetItem`.
    BatchGetItem,
    /// `BatchWriteItem`.
    BatchWriteItem,
    /// `TransactWriteItems`.
    TransactWriteItems,
}

/// Key layout of a secondary index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    /// Index name.
    pub name: String,
    /// Global or local.
    pub kind: IndexKind,
    /// Partition attribute.
    pub partition: String,
    /// Sort attribute.
    pub sort: Option<String>,
}

/// Key layout of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Partition key attribute.
    pub partition: String,
    /// Sort key attribute.
    pub sort: Option<String>,
    /// Secondary indexes.
    pub indexes: Vec<IndexSchema>,
}

impl TableSchema {
    /// A table keyed by `partition` and optionally `sort`.
    pub fn new(name: impl Into<String>, partition: impl Into<String>, sort: Option<&str>) -> Self {
        Self {
            name: name.into(),
            partition: partition.into(),
            sort: sort.map(str::to_string),
            indexes: Vec::new(),
        }
    }

    /// The table a model describes. Falls back to the model name when the
    /// model has no table name.
    pub fn from_model(model: &ModelDefinition) -> Self {
        Self {
            name: model.table_name().unwrap_or(model.name()).to_string(),
            partition: model.partition_key().attribute_name().to_string(),
            sort: model.sort_key().map(|a| a.attribute_name().to_string()),
            indexes: model
                .indexes()
                .iter()
                .map(|index| IndexSchema {
                    name: index.name.clone(),
                    kind: index.kind,
                    partition: index.partition.clone(),
                    sort: index.sort.clone(),
                })
                .collect(),
        }
    }

    /// Add a global index.
    #[must_use]
    pub fn global_index(mut self, name: &str, partition: &str, sort: Option<&str>) -> Self {
        self.indexes.push(IndexSchema {
            name: name.to_string(),
            kind: IndexKind::Global,
            partition: partition.to_string(),
            sort: sort.map(str::to_string),
        });
        self
    }

    fn key_of(&self, item: &Item) -> BackendResult<Item> {
        let mut key = Item::new();
        for attribute in std::iter::once(&self.partition).chain(self.sort.as_ref()) {
            let value = item.get(attribute).ok_or_else(|| {
                BackendError::validation(format!(
                    "One of the required keys was not given a value: {attribute}"
                ))
            })?;
            if !matches!(value, AttributeValue::S(_) | AttributeValue::N(_) | AttributeValue::B(_)) {
                return Err(BackendError::validation(format!(
                    "Key attribute {attribute} must be S, N or B, not {}",
                    value.tag()
                )));
            }
            key.insert(attribute.clone(), value.clone());
        }
        Ok(key)
    }

    fn index(&self, name: &str) -> BackendResult<&IndexSchema> {
        self.indexes.iter().find(|i| i.name == name).ok_or_else(|| {
            BackendError::validation(format!(
                "The table does not have the specified index: {name}"
            ))
        })
    }

    /// Attributes that order a read: the index keys (if any) then the table
    /// keys.
    fn order_attributes(&self, index: Option<&IndexSchema>) -> Vec<String> {
        let mut attributes = Vec::new();
        if let Some(index) = index {
            attributes.push(index.partition.clone());
            attributes.extend(index.sort.clone());
        }
        for attribute in std::iter::once(&self.partition).chain(self.sort.as_ref()) {
            if !attributes.contains(attribute) {
                attributes.push(attribute.clone());
            }
        }
        attributes
    }
}

/// A primary key made comparable.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StoredKey(Vec<AttributeValue>);

impl Ord for StoredKey {
    fn cmp(&self, other: &Self) -> Ordering {
        order_values(&self.0, &other.0)
    }
}

impl PartialOrd for StoredKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn order_values(a: &[AttributeValue], b: &[AttributeValue]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        let ordering = compare(Some(x), Some(y)).unwrap_or_else(|| x.tag().cmp(y.tag()));
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.len().cmp(&b.len())
}

#[derive(Debug)]
struct MemoryTable {
    schema: TableSchema,
    items: BTreeMap<StoredKey, Item>,
}

impl MemoryTable {
    fn stored_key(&self, key: &Item) -> BackendResult<StoredKey> {
        let mut key = self.schema.key_of(key)?;
        Ok(StoredKey(
            self.sort_order()
                .iter()
                .filter_map(|attribute| key.remove(attribute))
                .collect(),
        ))
    }

    fn sort_order(&self) -> Vec<String> {
        std::iter::once(self.schema.partition.clone())
            .chain(self.schema.sort.clone())
            .collect()
    }
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<String, MemoryTable>,
    faults: HashMap<Operation, VecDeque<BackendError>>,
    calls: HashMap<Operation, usize>,
    unprocessed_calls: usize,
}

impl State {
    fn enter(&mut self, operation: Operation) -> BackendResult<()> {
        *self.calls.entry(operation).or_default() += 1;
        match self.faults.get_mut(&operation).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn table(&self, name: &str) -> BackendResult<&MemoryTable> {
        self.tables.get(name).ok_or_else(not_found)
    }

    fn table_mut(&mut self, name: &str) -> BackendResult<&mut MemoryTable> {
        self.tables.get_mut(name).ok_or_else(not_found)
    }

    fn take_unprocessed(&mut self) -> bool {
        match self.unprocessed_calls {
            0 => false,
            usize::MAX => true,
            _ => {
                self.unprocessed_calls -= 1;
                true
            }
        }
    }
}

fn not_found() -> BackendError {
    BackendError::new(codes::RESOURCE_NOT_FOUND, "Requested resource not found")
}

fn check(
    expression: Option<&str>,
    names: &NameMap,
    values: &ValueMap,
    current: Option<&Item>,
) -> BackendResult<bool> {
    match expression {
        None => Ok(true),
        Some(expression) => {
            let empty = Item::new();
            evaluate_condition(expression, names, values, current.unwrap_or(&empty))
        }
    }
}

fn projection(expression: Option<&str>, names: &NameMap) -> BackendResult<Option<Vec<String>>> {
    expression
        .map(|expression| projected_attributes(expression, names))
        .transpose()
}

fn shaped(item: &Item, attributes: Option<&[String]>) -> Item {
    match attributes {
        Some(attributes) => project(item, attributes),
        None => item.clone(),
    }
}

/// An in-memory [`TableBackend`].
///
/// # Example
///
/// ```ignore
/// let backend = Arc::new(MemoryBackend::new().with_model::<Note>()?);
/// let notes: Table<Note> = Table::new(backend.clone())?;
/// ```
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    /// A backend with no tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a table.
    #[must_use]
    pub fn with_table(self, schema: TableSchema) -> Self {
        self.create_table(schema);
        self
    }

    /// Declare the table described by `T`'s model.
    pub fn with_model<T: theorydb_core::Record>(self) -> theorydb_core::CoreResult<Self> {
        let model = T::definition()?;
        Ok(self.with_table(TableSchema::from_model(&model)))
    }

    /// Declare (or reset) a table.
    pub fn create_table(&self, schema: TableSchema) {
        let name = schema.name.clone();
        self.state.lock().tables.insert(
            name,
            MemoryTable {
                schema,
                items: BTreeMap::new(),
            },
        );
    }

    /// Make the next call of `operation` fail with `error`. Faults queue up.
    pub fn fail_next(&self, operation: Operation, error: BackendError) {
        self.state
            .lock()
            .faults
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Leave every key or write of the next `calls` batch calls unprocessed.
    /// `usize::MAX` means always.
    pub fn leave_unprocessed(&self, calls: usize) {
        self.state.lock().unprocessed_calls = calls;
    }

    /// How many times `operation` was called, including failed calls.
    pub fn call_count(&self, operation: Operation) -> usize {
        self.state.lock().calls.get(&operation).copied().unwrap_or(0)
    }

    /// Every item of a table in key order.
    pub fn items(&self, table: &str) -> Vec<Item> {
        self.state
            .lock()
            .tables
            .get(table)
            .map(|t| t.items.values().cloned().collect())
            .unwrap_or_default()
    }

    /// One stored item by primary key.
    pub fn item(&self, table: &str, key: &Item) -> Option<Item> {
        let state = self.state.lock();
        let table = state.tables.get(table)?;
        let stored = table.stored_key(key).ok()?;
        table.items.get(&stored).cloned()
    }

    /// Store an item directly, bypassing conditions.
    pub fn insert(&self, table: &str, item: Item) -> BackendResult<()> {
        let mut state = self.state.lock();
        let table = state.table_mut(table)?;
        let stored = table.stored_key(&item)?;
        table.items.insert(stored, item);
        Ok(())
    }

    fn read_page(
        table: &MemoryTable,
        index: Option<&str>,
        mut candidates: Vec<Item>,
        forward: bool,
        limit: Option<u32>,
        start: Option<&Item>,
    ) -> BackendResult<(Vec<Item>, Option<Item>)> {
        let index = index.map(|name| table.schema.index(name)).transpose()?;
        if let Some(index) = index {
            candidates.retain(|item| {
                item.contains_key(&index.partition)
                    && index.sort.as_ref().map_or(true, |s| item.contains_key(s))
            });
        }

        let order = match index {
            Some(_) => table.schema.order_attributes(index),
            None => table.sort_order(),
        };
        let sort_key = |item: &Item| -> Vec<AttributeValue> {
            order
                .iter()
                .map(|a| item.get(a).cloned().unwrap_or(AttributeValue::Null))
                .collect()
        };
        candidates.sort_by(|a, b| order_values(&sort_key(a), &sort_key(b)));
        if !forward {
            candidates.reverse();
        }

        if let Some(start) = start {
            let start = sort_key(start);
            candidates.retain(|item| {
                let ordering = order_values(&sort_key(item), &start);
                if forward {
                    ordering == Ordering::Greater
                } else {
                    ordering == Ordering::Less
                }
            });
        }

        let limit = limit.map_or(usize::MAX, |l| l as usize);
        let more = candidates.len() > limit;
        candidates.truncate(limit);
        let last_key = match (more, candidates.last()) {
            (true, Some(last)) => Some(project(last, &order)),
            _ => None,
        };
        Ok((candidates, last_key))
    }

    fn finish_page(
        items: Vec<Item>,
        last_evaluated_key: Option<Item>,
        filter: Option<&str>,
        projection_expression: Option<&str>,
        names: &NameMap,
        values: &ValueMap,
    ) -> BackendResult<PageResponse> {
        let attributes = projection(projection_expression, names)?;
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            if check(filter, names, values, Some(&item))? {
                out.push(shaped(&item, attributes.as_deref()));
            }
        }
        Ok(PageResponse {
            items: out,
            last_evaluated_key,
        })
    }
}

fn segment_of(item: &Item, partition: &str, total: u32) -> u32 {
    let bytes: Vec<u8> = match item.get(partition) {
        Some(AttributeValue::S(s)) => s.as_bytes().to_vec(),
        Some(AttributeValue::N(n)) => n.as_bytes().to_vec(),
        Some(AttributeValue::B(b)) => b.clone(),
        _ => Vec::new(),
    };
    // FNV-1a keeps the assignment stable across runs.
    let hash = bytes.iter().fold(0x811c_9dc5_u32, |h, b| {
        (h ^ u32::from(*b)).wrapping_mul(0x0100_0193)
    });
    hash % total.max(1)
}

impl TableBackend for MemoryBackend {
    fn get_item(&self, request: &GetItemRequest) -> BackendResult<GetItemResponse> {
        let mut state = self.state.lock();
        state.enter(Operation::GetItem)?;
        let table = state.table(&request.table_name)?;
        let stored = table.stored_key(&request.key)?;
        let attributes = projection(
            request.projection_expression.as_deref(),
            &request.expression_attribute_names,
        )?;
        Ok(GetItemResponse {
            item: table
                .items
                .get(&stored)
                .map(|item| shaped(item, attributes.as_deref())),
        })
    }

    fn put_item(&self, request: &PutItemRequest) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.enter(Operation::PutItem)?;
        let table = state.table_mut(&request.table_name)?;
        let stored = table.stored_key(&request.item)?;
        if !check(
            request.condition_expression.as_deref(),
            &request.expression_attribute_names,
            &request.expression_attribute_values,
            table.items.get(&stored),
        )? {
            return Err(BackendError::conditional_check_failed());
        }
        table.items.insert(stored, request.item.clone());
        Ok(())
    }

    fn delete_item(&self, request: &DeleteItemRequest) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.enter(Operation::DeleteItem)?;
        let table = state.table_mut(&request.table_name)?;
        let stored = table.stored_key(&request.key)?;
        if !check(
            request.condition_expression.as_deref(),
            &request.expression_attribute_names,
            &request.expression_attribute_values,
            table.items.get(&stored),
        )? {
            return Err(BackendError::conditional_check_failed());
        }
        table.items.remove(&stored);
        Ok(())
    }

    fn update_item(&self, request: &UpdateItemRequest) -> BackendResult<UpdateItemResponse> {
        let mut state = self.state.lock();
        state.enter(Operation::UpdateItem)?;
        let table = state.table_mut(&request.table_name)?;
        let attributes = apply_update_request(table, request)?;
        Ok(UpdateItemResponse { attributes })
    }

    fn query(&self, request: &QueryRequest) -> BackendResult<PageResponse> {
        let mut state = self.state.lock();
        state.enter(Operation::Query)?;
        let table = state.table(&request.table_name)?;
        let mut candidates = Vec::new();
        for item in table.items.values() {
            if evaluate_condition(
                &request.key_condition_expression,
                &request.expression_attribute_names,
                &request.expression_attribute_values,
                item,
            )? {
                candidates.push(item.clone());
            }
        }
        let (items, last_key) = Self::read_page(
            table,
            request.index_name.as_deref(),
            candidates,
            request.scan_index_forward,
            request.limit,
            request.exclusive_start_key.as_ref(),
        )?;
        Self::finish_page(
            items,
            last_key,
            request.filter_expression.as_deref(),
            request.projection_expression.as_deref(),
            &request.expression_attribute_names,
            &request.expression_attribute_values,
        )
    }

    fn scan(&self, request: &ScanRequest) -> BackendResult<PageResponse> {
        let mut state = self.state.lock();
        state.enter(Operation::Scan)?;
        let table = state.table(&request.table_name)?;
        let candidates: Vec<Item> = table
            .items
            .values()
            .filter(|item| match (request.segment, request.total_segments) {
                (Some(segment), Some(total)) => {
                    segment_of(item, &table.schema.partition, total) == segment
                }
                _ => true,
            })
            .cloned()
            .collect();
        let (items, last_key) = Self::read_page(
            table,
            request.index_name.as_deref(),
            candidates,
            true,
            request.limit,
            request.exclusive_start_key.as_ref(),
        )?;
        Self::finish_page(
            items,
            last_key,
            request.filter_expression.as_deref(),
            request.projection_expression.as_deref(),
            &request.expression_attribute_names,
            &request.expression_attribute_values,
        )
    }

    fn batch_get_item(&self, request: &BatchGetItemRequest) -> BackendResult<BatchGetItemResponse> {
        let mut state = self.state.lock();
        state.enter(Operation::BatchGetItem)?;
        let mut response = BatchGetItemResponse::default();
        if state.take_unprocessed() {
            response.unprocessed_keys = request.request_items.clone();
            return Ok(response);
        }
        for (name, keys) in &request.request_items {
            let table = state.table(name)?;
            let attributes = projection(
                keys.projection_expression.as_deref(),
                &keys.expression_attribute_names,
            )?;
            let mut found = Vec::new();
            for key in &keys.keys {
                if let Some(item) = table.items.get(&table.stored_key(key)?) {
                    found.push(shaped(item, attributes.as_deref()));
                }
            }
            response.responses.insert(name.clone(), found);
        }
        Ok(response)
    }

    fn batch_write_item(
        &self,
        request: &BatchWriteItemRequest,
    ) -> BackendResult<BatchWriteItemResponse> {
        let mut state = self.state.lock();
        state.enter(Operation::BatchWriteItem)?;
        let mut response = BatchWriteItemResponse::default();
        if state.take_unprocessed() {
            response.unprocessed_items = request.request_items.clone();
            return Ok(response);
        }
        for (name, writes) in &request.request_items {
            let table = state.table_mut(name)?;
            for write in writes {
                match write {
                    WriteRequest::Put { item } => {
                        let stored = table.stored_key(item)?;
                        table.items.insert(stored, item.clone());
                    }
                    WriteRequest::Delete { key } => {
                        let stored = table.stored_key(key)?;
                        table.items.remove(&stored);
                    }
                }
            }
        }
        Ok(response)
    }

    fn transact_write_items(&self, request: &TransactWriteItemsRequest) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.enter(Operation::TransactWriteItems)?;

        // Check every condition against the state before any write.
        let mut reasons = Vec::with_capacity(request.transact_items.len());
        let mut failed = false;
        for action in &request.transact_items {
            let (table_name, key, condition, names, values) = match action {
                TransactWriteItem::Put(r) => (
                    &r.table_name,
                    &r.item,
                    r.condition_expression.as_deref(),
                    &r.expression_attribute_names,
                    &r.expression_attribute_values,
                ),
                TransactWriteItem::Delete(r) => (
                    &r.table_name,
                    &r.key,
                    r.condition_expression.as_deref(),
                    &r.expression_attribute_names,
                    &r.expression_attribute_values,
                ),
                TransactWriteItem::Update(r) => (
                    &r.table_name,
                    &r.key,
                    r.condition_expression.as_deref(),
                    &r.expression_attribute_names,
                    &r.expression_attribute_values,
                ),
                TransactWriteItem::ConditionCheck(r) => (
                    &r.table_name,
                    &r.key,
                    Some(r.condition_expression.as_str()),
                    &r.expression_attribute_names,
                    &r.expression_attribute_values,
                ),
            };
            let table = state.table(table_name)?;
            let current = table.items.get(&table.stored_key(key)?);
            if check(condition, names, values, current)? {
                reasons.push(CancellationReason::new(codes::REASON_NONE));
            } else {
                failed = true;
                reasons.push(CancellationReason::new(codes::REASON_CONDITIONAL_CHECK_FAILED));
            }
        }
        if failed {
            return Err(BackendError::transaction_canceled(reasons));
        }

        for action in &request.transact_items {
            match action {
                TransactWriteItem::Put(r) => {
                    let table = state.table_mut(&r.table_name)?;
                    let stored = table.stored_key(&r.item)?;
                    table.items.insert(stored, r.item.clone());
                }
                TransactWriteItem::Delete(r) => {
                    let table = state.table_mut(&r.table_name)?;
                    let stored = table.stored_key(&r.key)?;
                    table.items.remove(&stored);
                }
                TransactWriteItem::Update(r) => {
                    let table = state.table_mut(&r.table_name)?;
                    let unconditional = UpdateItemRequest {
                        condition_expression: None,
                        return_values: ReturnValues::None,
                        ..r.clone()
                    };
                    apply_update_request(table, &unconditional)?;
                }
                TransactWriteItem::ConditionCheck(_) => {}
            }
        }
        Ok(())
    }
}

fn apply_update_request(
    table: &mut MemoryTable,
    request: &UpdateItemRequest,
) -> BackendResult<Option<Item>> {
    let key = table.schema.key_of(&request.key)?;
    let stored = table.stored_key(&key)?;
    let old = table.items.get(&stored).cloned();
    if !check(
        request.condition_expression.as_deref(),
        &request.expression_attribute_names,
        &request.expression_attribute_values,
        old.as_ref(),
    )? {
        return Err(BackendError::conditional_check_failed());
    }

    let base = old.clone().unwrap_or_else(|| key.clone());
    let applied = apply_update(
        &request.update_expression,
        &request.expression_attribute_names,
        &request.expression_attribute_values,
        &base,
    )?;
    for (attribute, value) in &key {
        if applied.item.get(attribute) != Some(value) {
            return Err(BackendError::validation(format!(
                "Cannot update attribute {attribute}. This attribute is part of the key"
            )));
        }
    }
    let new = applied.item;
    table.items.insert(stored, new.clone());

    let touched: Vec<String> = applied.touched.into_iter().collect();
    Ok(match request.return_values {
        ReturnValues::None => None,
        ReturnValues::AllNew => Some(new),
        ReturnValues::AllOld => old,
        ReturnValues::UpdatedNew => Some(project(&new, &touched)),
        ReturnValues::UpdatedOld => old.map(|old| project(&old, &touched)),
    })
}

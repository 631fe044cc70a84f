//! The database client seam.
//!
//! `TableBackend` is the one place a TheoryDB table talks to the store. The
//! request and response types mirror the store's document API field for
//! field so an adapter over a real client is a mechanical translation.
//! Expressions arrive fully compiled: every user value is behind a `:value`
//! placeholder and every attribute name behind a `#name` placeholder.

use std::collections::BTreeMap;
use std::fmt;

use theorydb_codec::Item;

/// Result type for backend calls.
pub type BackendResult<T> = Result<T, BackendError>;

/// Placeholder name map: `#name` to attribute name.
pub type NameMap = BTreeMap<String, String>;

/// Placeholder value map: `:value` to attribute value.
pub type ValueMap = Item;

/// Well-known error codes returned by the store.
pub mod codes {
    /// A condition expression evaluated to false.
    pub const CONDITIONAL_CHECK_FAILED: &str = "ConditionalCheckFailedException";
    /// The request was malformed.
    pub const VALIDATION: &str = "ValidationException";
    /// The table or index does not exist.
    pub const RESOURCE_NOT_FOUND: &str = "ResourceNotFoundException";
    /// A transaction was cancelled; see the cancellation reasons.
    pub const TRANSACTION_CANCELED: &str = "TransactionCanceledException";
    /// Request rate exceeded provisioned throughput.
    pub const THROUGHPUT_EXCEEDED: &str = "ProvisionedThroughputExceededException";
    /// Generic throttling.
    pub const THROTTLING: &str = "ThrottlingException";
    /// Server-side failure.
    pub const INTERNAL_SERVER_ERROR: &str = "InternalServerError";
    /// The service is temporarily unavailable.
    pub const SERVICE_UNAVAILABLE: &str = "ServiceUnavailable";
    /// Account-level request rate exceeded.
    pub const REQUEST_LIMIT_EXCEEDED: &str = "RequestLimitExceeded";
    /// Placeholder for a failure that carried no code.
    pub const UNKNOWN: &str = "UnknownError";
    /// Reason code for a failed condition inside a transaction.
    pub const REASON_CONDITIONAL_CHECK_FAILED: &str = "ConditionalCheckFailed";
    /// Reason code for a transaction action that did not fail.
    pub const REASON_NONE: &str = "None";

    /// Throttling and server-side codes that may succeed on another attempt.
    pub fn is_transient(code: &str) -> bool {
        matches!(
            code,
            THROUGHPUT_EXCEEDED
                | THROTTLING
                | REQUEST_LIMIT_EXCEEDED
                | INTERNAL_SERVER_ERROR
                | SERVICE_UNAVAILABLE
        )
    }
}

/// Error returned by a backend call: the store's `{code, message}` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    /// Error code (for example `ConditionalCheckFailedException`).
    pub code: String,
    /// Human readable message.
    pub message: String,
    /// Per-action reasons, populated for cancelled transactions.
    pub cancellation_reasons: Vec<CancellationReason>,
}

impl BackendError {
    /// Create an error with a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            cancellation_reasons: Vec::new(),
        }
    }

    /// A failed condition expression.
    pub fn conditional_check_failed() -> Self {
        Self::new(
            codes::CONDITIONAL_CHECK_FAILED,
            "The conditional request failed",
        )
    }

    /// A store-side validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(codes::VALIDATION, message)
    }

    /// A cancelled transaction with one reason per action.
    pub fn transaction_canceled(reasons: Vec<CancellationReason>) -> Self {
        let listed: Vec<&str> = reasons.iter().map(|r| r.code.as_str()).collect();
        Self {
            code: codes::TRANSACTION_CANCELED.to_string(),
            message: format!(
                "Transaction cancelled, please refer cancellation reasons for specific reasons [{}]",
                listed.join(", ")
            ),
            cancellation_reasons: reasons,
        }
    }

    /// A throttling error.
    pub fn throttled() -> Self {
        Self::new(codes::THROUGHPUT_EXCEEDED, "Rate of requests exceeds the allowed throughput")
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for BackendError {}

/// Why one action of a cancelled transaction failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancellationReason {
    /// Reason code (`None`, `ConditionalCheckFailed`, ...).
    pub code: String,
    /// Optional message.
    pub message: Option<String>,
}

impl CancellationReason {
    /// Create a reason with just a code.
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: None,
        }
    }
}

/// Which attributes an update returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnValues {
    /// Nothing.
    #[default]
    None,
    /// The whole item after the update.
    AllNew,
    /// The whole item before the update.
    AllOld,
    /// Only updated attributes, after the update.
    UpdatedNew,
    /// Only updated attributes, before the update.
    UpdatedOld,
}

impl ReturnValues {
    /// The wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::AllNew => "ALL_NEW",
            Self::AllOld => "ALL_OLD",
            Self::UpdatedNew => "UPDATED_NEW",
            Self::UpdatedOld => "UPDATED_OLD",
        }
    }
}

impl fmt::Display for ReturnValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read a single item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetItemRequest {
    /// Table name.
    pub table_name: String,
    /// Primary key.
    pub key: Item,
    /// Request a strongly consistent read.
    pub consistent_read: bool,
    /// Attributes to return.
    pub projection_expression: Option<String>,
    /// Name placeholders.
    pub expression_attribute_names: NameMap,
}

/// Response to [`GetItemRequest`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetItemResponse {
    /// The item, if it exists.
    pub item: Option<Item>,
}

/// Write a whole item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PutItemRequest {
    /// Table name.
    pub table_name: String,
    /// The full item.
    pub item: Item,
    /// Condition that must hold for the write to apply.
    pub condition_expression: Option<String>,
    /// Name placeholders.
    pub expression_attribute_names: NameMap,
    /// Value placeholders.
    pub expression_attribute_values: ValueMap,
}

/// Delete a single item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteItemRequest {
    /// Table name.
    pub table_name: String,
    /// Primary key.
    pub key: Item,
    /// Condition that must hold for the delete to apply.
    pub condition_expression: Option<String>,
    /// Name placeholders.
    pub expression_attribute_names: NameMap,
    /// Value placeholders.
    pub expression_attribute_values: ValueMap,
}

/// Update attributes of a single item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateItemRequest {
    /// Table name.
    pub table_name: String,
    /// Primary key.
    pub key: Item,
    /// `SET .. REMOVE .. ADD .. DELETE ..`
    pub update_expression: String,
    /// Condition that must hold for the update to apply.
    pub condition_expression: Option<String>,
    /// Name placeholders.
    pub expression_attribute_names: NameMap,
    /// Value placeholders.
    pub expression_attribute_values: ValueMap,
    /// Which attributes to return.
    pub return_values: ReturnValues,
}

/// Response to [`UpdateItemRequest`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateItemResponse {
    /// Attributes selected by `return_values`.
    pub attributes: Option<Item>,
}

/// Read one page of a partition.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    /// Table name.
    pub table_name: String,
    /// Secondary index to read, if any.
    pub index_name: Option<String>,
    /// Partition (and optional sort) key condition.
    pub key_condition_expression: String,
    /// Post-read filter.
    pub filter_expression: Option<String>,
    /// Attributes to return.
    pub projection_expression: Option<String>,
    /// Name placeholders.
    pub expression_attribute_names: NameMap,
    /// Value placeholders.
    pub expression_attribute_values: ValueMap,
    /// Maximum number of items to evaluate.
    pub limit: Option<u32>,
    /// Resume after this key.
    pub exclusive_start_key: Option<Item>,
    /// Ascending (`true`) or descending sort key order.
    pub scan_index_forward: bool,
    /// Request a strongly consistent read.
    pub consistent_read: bool,
}

/// Read one page of a whole table or index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanRequest {
    /// Table name.
    pub table_name: String,
    /// Secondary index to read, if any.
    pub index_name: Option<String>,
    /// Post-read filter.
    pub filter_expression: Option<String>,
    /// Attributes to return.
    pub projection_expression: Option<String>,
    /// Name placeholders.
    pub expression_attribute_names: NameMap,
    /// Value placeholders.
    pub expression_attribute_values: ValueMap,
    /// Maximum number of items to evaluate.
    pub limit: Option<u32>,
    /// Resume after this key.
    pub exclusive_start_key: Option<Item>,
    /// Request a strongly consistent read.
    pub consistent_read: bool,
    /// Segment to read in a parallel scan.
    pub segment: Option<u32>,
    /// Total segments in a parallel scan.
    pub total_segments: Option<u32>,
}

/// One page of items from a query or scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageResponse {
    /// Items on this page.
    pub items: Vec<Item>,
    /// Key to resume from, absent on the last page.
    pub last_evaluated_key: Option<Item>,
}

/// Keys to read from one table in a batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeysAndAttributes {
    /// Primary keys.
    pub keys: Vec<Item>,
    /// Request strongly consistent reads.
    pub consistent_read: bool,
    /// Attributes to return.
    pub projection_expression: Option<String>,
    /// Name placeholders.
    pub expression_attribute_names: NameMap,
}

/// Read many items by key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchGetItemRequest {
    /// Keys per table.
    pub request_items: BTreeMap<String, KeysAndAttributes>,
}

/// Response to [`BatchGetItemRequest`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchGetItemResponse {
    /// Items found per table.
    pub responses: BTreeMap<String, Vec<Item>>,
    /// Keys the store did not get to.
    pub unprocessed_keys: BTreeMap<String, KeysAndAttributes>,
}

/// One write in a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteRequest {
    /// Write a whole item.
    Put {
        /// The item.
        item: Item,
    },
    /// Delete by key.
    Delete {
        /// The key.
        key: Item,
    },
}

/// Write or delete many items, without conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchWriteItemRequest {
    /// Writes per table.
    pub request_items: BTreeMap<String, Vec<WriteRequest>>,
}

/// Response to [`BatchWriteItemRequest`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchWriteItemResponse {
    /// Writes the store did not get to.
    pub unprocessed_items: BTreeMap<String, Vec<WriteRequest>>,
}

/// Assert a condition on an item inside a transaction without writing it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionCheckRequest {
    /// Table name.
    pub table_name: String,
    /// Primary key.
    pub key: Item,
    /// The condition.
    pub condition_expression: String,
    /// Name placeholders.
    pub expression_attribute_names: NameMap,
    /// Value placeholders.
    pub expression_attribute_values: ValueMap,
}

/// One action of a write transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactWriteItem {
    /// Conditional put.
    Put(PutItemRequest),
    /// Conditional delete.
    Delete(DeleteItemRequest),
    /// Conditional update; `return_values` is ignored.
    Update(UpdateItemRequest),
    /// Condition only.
    ConditionCheck(ConditionCheckRequest),
}

/// An all-or-nothing group of writes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactWriteItemsRequest {
    /// Actions, applied atomically.
    pub transact_items: Vec<TransactWriteItem>,
    /// Idempotency token.
    pub client_request_token: Option<String>,
}

/// A client for the document store.
///
/// Implementations must be thread-safe; a segmented scan calls `scan`
/// from several worker threads at once.
pub trait TableBackend: Send + Sync {
    /// Read a single item.
    fn get_item(&self, request: &GetItemRequest) -> BackendResult<GetItemResponse>;

    /// Write a whole item, subject to its condition.
    ///
    /// # Errors
    ///
    /// `ConditionalCheckFailedException` when the condition is false.
    fn put_item(&self, request: &PutItemRequest) -> BackendResult<()>;

    /// Delete a single item, subject to its condition.
    fn delete_item(&self, request: &DeleteItemRequest) -> BackendResult<()>;

    /// Update a single item, subject to its condition.
    fn update_item(&self, request: &UpdateItemRequest) -> BackendResult<UpdateItemResponse>;

    /// Read one page of a partition.
    fn query(&self, request: &QueryRequest) -> BackendResult<PageResponse>;

    /// Read one page of a table or segment.
    fn scan(&self, request: &ScanRequest) -> BackendResult<PageResponse>;

    /// Read up to 100 items by key. Some keys may come back unprocessed.
    fn batch_get_item(&self, request: &BatchGetItemRequest) -> BackendResult<BatchGetItemResponse>;

    /// Apply up to 25 puts/deletes. Some writes may come back unprocessed.
    fn batch_write_item(
        &self,
        request: &BatchWriteItemRequest,
    ) -> BackendResult<BatchWriteItemResponse>;

    /// Apply up to 100 actions atomically.
    ///
    /// # Errors
    ///
    /// `TransactionCanceledException` with one reason per action when any
    /// condition fails.
    fn transact_write_items(&self, request: &TransactWriteItemsRequest) -> BackendResult<()>;
}

//! # TheoryDB Core
//!
//! Typed data access for DynamoDB-style key-value stores.
//!
//! This crate provides:
//! - A model registry that resolves record types into attribute maps, key
//!   roles and index lists
//! - An attribute codec between domain values and wire attribute values
//! - An expression compiler for key conditions, filters, updates,
//!   conditions and projections
//! - Opaque pagination cursors
//! - AES-256-GCM envelope encryption of individual attributes
//! - A lease manager for distributed locks
//! - An execution engine over a pluggable [`TableBackend`], with batching,
//!   transactions, retries and segmented scans
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use theorydb_core::{QueryOptions, SortKeyCondition, Table};
//!
//! let notes: Table<Note> = Table::new(Arc::new(backend))?;
//! notes.put(&note)?;
//! let page = notes.query("A", &QueryOptions::new().sort(SortKeyCondition::begins_with("2024-")))?;
//! let next = notes.query("A", &QueryOptions::new().cursor(page.next_cursor.unwrap()))?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
mod codec;
mod config;
pub mod crypto;
mod cursor;
mod error;
pub mod expr;
mod lease;
pub mod model;
mod protection;
mod retry;
mod table;
mod types;

#[cfg(test)]
mod test_support;

pub use backend::{BackendError, BackendResult, ReturnValues, TableBackend};
pub use codec::{canonical_json, parse_json, value_to_wire, wire_to_value, ItemCodec};
pub use config::{EncryptionConfig, TableConfig};
pub use crypto::{EnvelopeCipher, KeyManagement, RandomSource, SystemRandom};
pub use cursor::{decode_cursor, encode_cursor, Cursor, SortDirection};
pub use error::{CoreError, CoreResult};
pub use expr::{
    Condition, Filter, Operator, Placeholders, RawExpression, SortKeyCondition, UpdateAction,
    WriteCondition,
};
pub use lease::{Lease, LeaseConfig, LeaseKey, LeaseManager, TokenGenerator};
pub use model::{
    AttributeConverter, AttributeDefinition, Fields, IndexDefinition, IndexKind, IndexSpec,
    ModelDefinition, ModelRegistry, Projection, Record, Role,
};
pub use protection::{ConcurrencyLimiter, Permit, RateLimiter};
pub use retry::{BatchRetryPolicy, CancellationToken, Clock, RetryConfig, SystemClock};
pub use table::{
    GetOptions, Key, Page, QueryOptions, ScanOptions, Table, TableBuilder, TransactAction,
    TransactionBuilder, UpdateBuilder,
};
pub use theorydb_codec::{AttributeValue, Item};
pub use types::{Number, Value};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

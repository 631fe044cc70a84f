//! Batch reads and writes with resubmission of unprocessed work.

use std::collections::BTreeMap;

use theorydb_codec::Item;
use tracing::{debug, warn};

use super::{GetOptions, Key, Table};
use crate::backend::{BatchGetItemRequest, BatchWriteItemRequest, KeysAndAttributes, WriteRequest};
use crate::error::{CoreError, CoreResult};
use crate::expr::{compile_projection, Placeholders};
use crate::model::Record;

impl<T: Record> Table<T> {
    /// Read many records by key.
    ///
    /// Keys are sent in chunks of `batch_get_chunk_size`. Missing items are
    /// skipped; results come back in store order, not key order.
    ///
    /// # Errors
    ///
    /// `BatchRetryExceeded` when a chunk still has unprocessed keys after
    /// the retry budget.
    pub fn batch_get(&self, keys: &[Key]) -> CoreResult<Vec<T>> {
        self.batch_get_with(keys, &GetOptions::default())
    }

    /// [`batch_get`](Self::batch_get) with consistency and projection.
    pub fn batch_get_with(&self, keys: &[Key], options: &GetOptions) -> CoreResult<Vec<T>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let chunk_size = self.config.batch_get_chunk_size;
        let keys = keys
            .iter()
            .map(|key| self.batch_key(key))
            .collect::<CoreResult<Vec<_>>>()?;

        let mut placeholders = Placeholders::new();
        let projection_expression = options
            .projection
            .as_deref()
            .map(|fields| compile_projection(fields, self.model(), &mut placeholders))
            .transpose()?;
        let (names, _) = placeholders.into_parts();

        let mut out = Vec::new();
        for chunk in keys.chunks(chunk_size) {
            let mut pending = chunk.to_vec();
            let mut attempts = 0;

            while !pending.is_empty() {
                self.cancel.check()?;
                let request = BatchGetItemRequest {
                    request_items: BTreeMap::from([(
                        self.table_name.clone(),
                        KeysAndAttributes {
                            keys: pending,
                            consistent_read: options.consistent_read,
                            projection_expression: projection_expression.clone(),
                            expression_attribute_names: names.clone(),
                        },
                    )]),
                };
                debug!(table = %self.table_name, operation = "batch_get_item", "sending request");
                let mut response = self.backend.batch_get_item(&request)?;

                for item in response.responses.remove(&self.table_name).unwrap_or_default() {
                    out.push(self.decode(&item)?);
                }
                pending = response
                    .unprocessed_keys
                    .remove(&self.table_name)
                    .map(|unprocessed| unprocessed.keys)
                    .unwrap_or_default();
                if !pending.is_empty() {
                    attempts = self.next_batch_attempt("batch_get", attempts, pending.len())?;
                }
            }
        }
        Ok(out)
    }

    /// Put and delete many items without conditions.
    ///
    /// Writes are sent in chunks of `batch_write_chunk_size`, puts first.
    ///
    /// # Errors
    ///
    /// `BatchRetryExceeded` when a chunk still has unprocessed writes after
    /// the retry budget.
    pub fn batch_write(&self, puts: &[T], deletes: &[Key]) -> CoreResult<()> {
        let chunk_size = self.config.batch_write_chunk_size;

        let mut requests = Vec::with_capacity(puts.len() + deletes.len());
        for record in puts {
            requests.push(WriteRequest::Put {
                item: self.codec.encode_item(record.to_fields())?,
            });
        }
        for key in deletes {
            requests.push(WriteRequest::Delete {
                key: self.batch_key(key)?,
            });
        }

        for chunk in requests.chunks(chunk_size) {
            let mut pending = chunk.to_vec();
            let mut attempts = 0;

            while !pending.is_empty() {
                self.cancel.check()?;
                let request = BatchWriteItemRequest {
                    request_items: BTreeMap::from([(self.table_name.clone(), pending)]),
                };
                debug!(table = %self.table_name, operation = "batch_write_item", "sending request");
                let mut response = self.backend.batch_write_item(&request)?;

                pending = response
                    .unprocessed_items
                    .remove(&self.table_name)
                    .unwrap_or_default();
                if !pending.is_empty() {
                    attempts = self.next_batch_attempt("batch_write", attempts, pending.len())?;
                }
            }
        }
        Ok(())
    }

    /// Count a resubmission and back off, or fail once the budget is spent.
    fn next_batch_attempt(
        &self,
        operation: &'static str,
        attempts: u32,
        unprocessed: usize,
    ) -> CoreResult<u32> {
        let policy = self.config.batch_retry;
        if attempts >= policy.max_retries {
            return Err(CoreError::BatchRetryExceeded {
                operation,
                unprocessed,
            });
        }
        let attempts = attempts + 1;
        warn!(
            table = %self.table_name,
            operation,
            attempt = attempts,
            unprocessed,
            "resubmitting unprocessed batch work"
        );
        self.backoff(policy.delay(attempts))?;
        Ok(attempts)
    }

    fn batch_key(&self, key: &Key) -> CoreResult<Item> {
        match (self.model().sort_key(), &key.sk) {
            (Some(_), None) => Err(CoreError::validation("expected key tuple (pk, sk)")),
            (None, Some(_)) => Err(CoreError::validation("sk must be None for pk-only models")),
            _ => self.encode_key(key.clone()),
        }
    }
}

//! All-or-nothing write transactions.

use tracing::debug;

use super::{Key, Table, UpdateBuilder};
use crate::backend::{
    ConditionCheckRequest, ReturnValues, TransactWriteItem, TransactWriteItemsRequest,
};
use crate::error::{CoreError, CoreResult};
use crate::expr::{Placeholders, WriteCondition};
use crate::model::{Fields, Record};

/// One action of a transaction.
#[derive(Debug, Clone)]
pub enum TransactAction<T> {
    /// Write a whole record.
    Put {
        /// The record.
        record: T,
        /// Condition; empty for none.
        condition: WriteCondition,
    },
    /// Delete by key.
    Delete {
        /// The key.
        key: Key,
        /// Condition; empty for none.
        condition: WriteCondition,
    },
    /// Apply a field map (null removes).
    Update {
        /// The key.
        key: Key,
        /// Field values.
        updates: Fields,
        /// Condition; empty for none.
        condition: WriteCondition,
    },
    /// Assert a condition without writing.
    ConditionCheck {
        /// The key.
        key: Key,
        /// The condition; must not be empty.
        condition: WriteCondition,
    },
}

impl<T: Record> Table<T> {
    /// Apply `actions` atomically.
    ///
    /// # Errors
    ///
    /// `ConditionFailed` when any action's condition fails;
    /// `TransactionCanceled` with every reason code for other cancellations.
    pub fn transact_write(&self, actions: Vec<TransactAction<T>>) -> CoreResult<()> {
        self.check_transaction_size(actions.len())?;
        let items = actions
            .into_iter()
            .map(|action| self.transact_item(action))
            .collect::<CoreResult<Vec<_>>>()?;
        self.send_transaction(items, None)
    }

    fn check_transaction_size(&self, len: usize) -> CoreResult<()> {
        if len == 0 {
            return Err(CoreError::validation("actions is required"));
        }
        if len > self.config.max_transaction_actions {
            return Err(CoreError::validation(format!(
                "a transaction supports at most {} actions",
                self.config.max_transaction_actions
            )));
        }
        Ok(())
    }

    fn transact_item(&self, action: TransactAction<T>) -> CoreResult<TransactWriteItem> {
        Ok(match action {
            TransactAction::Put { record, condition } => {
                TransactWriteItem::Put(self.put_request(&record, &condition)?)
            }
            TransactAction::Delete { key, condition } => {
                TransactWriteItem::Delete(self.delete_request(key, &condition)?)
            }
            TransactAction::Update {
                key,
                updates,
                condition,
            } => TransactWriteItem::Update(self.update_request(
                key,
                &updates,
                Some(&condition),
                ReturnValues::None,
            )?),
            TransactAction::ConditionCheck { key, condition } => {
                TransactWriteItem::ConditionCheck(self.condition_check(key, &condition)?)
            }
        })
    }

    fn condition_check(&self, key: Key, condition: &WriteCondition) -> CoreResult<ConditionCheckRequest> {
        let key = self.encode_key(key)?;
        let mut placeholders = Placeholders::new();
        let condition_expression = condition
            .compile(&self.codec, &mut placeholders)?
            .ok_or_else(|| CoreError::validation("condition check requires a condition expression"))?;
        let (names, values) = placeholders.into_parts();
        Ok(ConditionCheckRequest {
            table_name: self.table_name.clone(),
            key,
            condition_expression,
            expression_attribute_names: names,
            expression_attribute_values: values,
        })
    }

    fn send_transaction(
        &self,
        transact_items: Vec<TransactWriteItem>,
        client_request_token: Option<String>,
    ) -> CoreResult<()> {
        let request = TransactWriteItemsRequest {
            transact_items,
            client_request_token,
        };
        debug!(
            table = %self.table_name,
            operation = "transact_write_items",
            actions = request.transact_items.len(),
            "sending request"
        );
        self.backend.transact_write_items(&request)?;
        Ok(())
    }
}

/// Accumulates actions for one transaction.
///
/// Actions are compiled as they are added; the first compile error is
/// reported by [`execute`](Self::execute).
#[must_use = "a transaction does nothing until executed"]
pub struct TransactionBuilder<'t, T: Record> {
    table: &'t Table<T>,
    items: Vec<TransactWriteItem>,
    error: Option<CoreError>,
    client_request_token: Option<String>,
}

impl<'t, T: Record> TransactionBuilder<'t, T> {
    pub(crate) fn new(table: &'t Table<T>) -> Self {
        Self {
            table,
            items: Vec::new(),
            error: None,
            client_request_token: None,
        }
    }

    fn push(mut self, item: CoreResult<TransactWriteItem>) -> Self {
        match item {
            Ok(item) => self.items.push(item),
            Err(err) => {
                self.error.get_or_insert(err);
            }
        }
        self
    }

    /// Add a put.
    pub fn put(self, record: &T, condition: WriteCondition) -> Self {
        let item = self
            .table
            .put_request(record, &condition)
            .map(TransactWriteItem::Put);
        self.push(item)
    }

    /// Add a delete.
    pub fn delete(self, key: impl Into<Key>, condition: WriteCondition) -> Self {
        let item = self
            .table
            .delete_request(key.into(), &condition)
            .map(TransactWriteItem::Delete);
        self.push(item)
    }

    /// Add a field-map update.
    pub fn update(self, key: impl Into<Key>, updates: &Fields, condition: WriteCondition) -> Self {
        let item = self
            .table
            .update_request(key.into(), updates, Some(&condition), ReturnValues::None)
            .map(TransactWriteItem::Update);
        self.push(item)
    }

    /// Add an update built with [`Table::update_builder`].
    pub fn update_with(self, builder: UpdateBuilder<'_, T>) -> Self {
        let item = builder.build_request().map(|mut request| {
            request.return_values = ReturnValues::None;
            TransactWriteItem::Update(request)
        });
        self.push(item)
    }

    /// Add a condition check.
    pub fn condition_check(self, key: impl Into<Key>, condition: WriteCondition) -> Self {
        let item = self
            .table
            .condition_check(key.into(), &condition)
            .map(TransactWriteItem::ConditionCheck);
        self.push(item)
    }

    /// Set an idempotency token.
    pub fn client_request_token(mut self, token: impl Into<String>) -> Self {
        self.client_request_token = Some(token.into());
        self
    }

    /// Number of actions added so far.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True if no action was added.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Send the transaction.
    pub fn execute(self) -> CoreResult<()> {
        if let Some(err) = self.error {
            return Err(err);
        }
        self.table.check_transaction_size(self.items.len())?;
        self.table.send_transaction(self.items, self.client_request_token)
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::Note;
    use super::*;
    use crate::backend::{codes, BackendError, CancellationReason};
    use crate::config::TableConfig;
    use crate::expr::Condition;
    use crate::test_support::{Call, Recorder, Reply};
    use std::sync::Arc;

    fn table(recorder: &Arc<Recorder>) -> Table<Note> {
        Table::new(recorder.clone()).unwrap()
    }

    #[test]
    fn mixed_actions() {
        let recorder = Arc::new(Recorder::new());
        let notes = table(&recorder);
        notes
            .transact_write(vec![
                TransactAction::Put {
                    record: Note::new("A", "1", 1),
                    condition: WriteCondition::new().if_not_exists(),
                },
                TransactAction::Delete {
                    key: Key::new("A", "2"),
                    condition: WriteCondition::new(),
                },
                TransactAction::Update {
                    key: Key::new("A", "3"),
                    updates: Fields::new().with("value", 4),
                    condition: WriteCondition::new().at_version(3),
                },
                TransactAction::ConditionCheck {
                    key: Key::new("A", "4"),
                    condition: WriteCondition::new().field(Condition::exists("note")),
                },
            ])
            .unwrap();

        let calls = recorder.calls();

        let Call::Transact(request) = &calls[0] else {
            panic!("expected transaction");
        };
        assert_eq!(request.transact_items.len(), 4);
        let TransactWriteItem::Update(update) = &request.transact_items[2] else {
            panic!("expected update");
        };
        assert_eq!(update.update_expression, "SET #d_value = :d_value");
        assert_eq!(update.condition_expression.as_deref(), Some("#w_value = :w1"));
        let TransactWriteItem::ConditionCheck(check) = &request.transact_items[3] else {
            panic!("expected condition check");
        };
        assert_eq!(check.condition_expression, "attribute_exists(#w_note)");
    }

    #[test]
    fn size_limits() {
        let recorder = Arc::new(Recorder::new());
        let notes = table(&recorder);
        let err = notes.transact_write(Vec::new()).unwrap_err();
        assert_eq!(err.to_string(), "validation error: actions is required");

        let small = Table::<Note>::builder(recorder.clone())
            .config(TableConfig::new().max_transaction_actions(1))
            .build()
            .unwrap();
        let err = small
            .transaction()
            .delete(("A", "1"), WriteCondition::new())
            .delete(("A", "2"), WriteCondition::new())
            .execute()
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "validation error: a transaction supports at most 1 actions"
        );
        assert!(recorder.calls().is_empty());
    }

    #[test]
    fn condition_check_needs_condition() {
        let recorder = Arc::new(Recorder::new());
        let err = table(&recorder)
            .transaction()
            .condition_check(("A", "1"), WriteCondition::new())
            .execute()
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "validation error: condition check requires a condition expression"
        );
    }

    #[test]
    fn cancellation_mapping() {
        let recorder = Arc::new(Recorder::new());
        recorder.reply(Reply::Fail(BackendError::transaction_canceled(vec![
            CancellationReason::new(codes::REASON_NONE),
            CancellationReason::new(codes::REASON_CONDITIONAL_CHECK_FAILED),
        ])));
        recorder.reply(Reply::Fail(BackendError::transaction_canceled(vec![
            CancellationReason::new("TransactionConflict"),
        ])));
        let notes = table(&recorder);
        let tx = || notes.transaction().delete(("A", "1"), WriteCondition::new());

        assert!(tx().execute().unwrap_err().is_condition_failed());
        let err = tx().execute().unwrap_err();
        assert!(matches!(
            err,
            CoreError::TransactionCanceled { ref reason_codes, .. } if reason_codes == &["TransactionConflict"]
        ));
    }

    #[test]
    fn builder_update_joins_transaction() {
        let recorder = Arc::new(Recorder::new());
        let notes = table(&recorder);
        notes
            .transaction()
            .update_with(notes.update_builder(("A", "1")).add("value", 1))
            .client_request_token("tok")
            .execute()
            .unwrap();
        let calls = recorder.calls();
        let Call::Transact(request) = &calls[0] else {
            panic!("expected transaction");
        };
        assert_eq!(request.client_request_token.as_deref(), Some("tok"));
        let TransactWriteItem::Update(update) = &request.transact_items[0] else {
            panic!("expected update");
        };
        assert_eq!(update.update_expression, "ADD #u_value :u1");
        assert_eq!(update.return_values, ReturnValues::None);
    }
}

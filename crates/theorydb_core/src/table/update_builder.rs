//! Fluent single-item updates.

use tracing::debug;

use super::{Key, Table};
use crate::backend::{ReturnValues, UpdateItemRequest};
use crate::error::{CoreError, CoreResult};
use crate::expr::{
    compile_chain, compile_update, version_field, Joiner, PendingCondition, Placeholders,
    UpdateAction,
};
use crate::model::{Fields, Record};
use crate::types::Value;

/// Records update operations and conditions for one item, then sends them
/// as a single `UpdateItem` call.
///
/// Operations compile with `#u_`/`:uN` placeholders and conditions with
/// `#c_`/`:cN`. Conditions chain left to right:
///
/// ```text
/// .condition("a", "=", 1).condition("b", ">", 2).or_condition("c", "<", 3)
///     => (#c_a = :c1 AND #c_b > :c2) OR #c_c < :c3
/// ```
#[must_use = "an update does nothing until executed"]
pub struct UpdateBuilder<'t, T: Record> {
    table: &'t Table<T>,
    key: Key,
    actions: Vec<UpdateAction>,
    conditions: Vec<PendingCondition>,
    return_values: ReturnValues,
    error: Option<CoreError>,
}

impl<'t, T: Record> UpdateBuilder<'t, T> {
    pub(crate) fn new(table: &'t Table<T>, key: Key) -> Self {
        Self {
            table,
            key,
            actions: Vec::new(),
            conditions: Vec::new(),
            return_values: ReturnValues::AllNew,
            error: None,
        }
    }

    fn action(mut self, action: UpdateAction) -> Self {
        self.actions.push(action);
        self
    }

    /// `SET field = value`.
    pub fn set(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.action(UpdateAction::Set {
            field: field.into(),
            value: value.into(),
        })
    }

    /// `SET field = if_not_exists(field, value)`.
    pub fn set_if_not_exists(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.action(UpdateAction::SetIfNotExists {
            field: field.into(),
            default: value.into(),
        })
    }

    /// `ADD field value`: numeric increment, or union for set fields.
    pub fn add(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.action(UpdateAction::Add {
            field: field.into(),
            value: value.into(),
        })
    }

    /// `ADD field 1`.
    pub fn increment(self, field: impl Into<String>) -> Self {
        self.add(field, 1)
    }

    /// `ADD field -1`.
    pub fn decrement(self, field: impl Into<String>) -> Self {
        self.add(field, -1)
    }

    /// `REMOVE field`.
    pub fn remove(self, field: impl Into<String>) -> Self {
        self.action(UpdateAction::Remove {
            field: field.into(),
        })
    }

    /// `DELETE field value`: set difference.
    pub fn delete(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.action(UpdateAction::Delete {
            field: field.into(),
            value: value.into(),
        })
    }

    /// Append to a list attribute.
    pub fn append_to_list(self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.action(UpdateAction::AppendList {
            field: field.into(),
            values,
        })
    }

    /// Prepend to a list attribute.
    pub fn prepend_to_list(self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.action(UpdateAction::PrependList {
            field: field.into(),
            values,
        })
    }

    /// Remove one list element.
    pub fn remove_from_list_at(self, field: impl Into<String>, index: usize) -> Self {
        self.action(UpdateAction::RemoveListAt {
            field: field.into(),
            index,
        })
    }

    /// Replace one list element.
    pub fn set_list_element(self, field: impl Into<String>, index: usize, value: impl Into<Value>) -> Self {
        self.action(UpdateAction::SetListElement {
            field: field.into(),
            index,
            value: value.into(),
        })
    }

    fn chain(mut self, joiner: Joiner, field: String, op: &str, value: Value) -> Self {
        self.conditions.push(PendingCondition {
            joiner,
            field,
            op: op.to_string(),
            value,
        });
        self
    }

    /// AND a condition. `op` is an operator such as `=`, `<>`, `BETWEEN`
    /// (two-element list), `IN` (list) or `attribute_exists` (null value).
    pub fn condition(self, field: impl Into<String>, op: &str, value: impl Into<Value>) -> Self {
        self.chain(Joiner::And, field.into(), op, value.into())
    }

    /// OR a condition.
    pub fn or_condition(self, field: impl Into<String>, op: &str, value: impl Into<Value>) -> Self {
        self.chain(Joiner::Or, field.into(), op, value.into())
    }

    /// AND `attribute_exists(field)`.
    pub fn condition_exists(self, field: impl Into<String>) -> Self {
        self.condition(field, "attribute_exists", Value::Null)
    }

    /// AND `attribute_not_exists(field)`.
    pub fn condition_not_exists(self, field: impl Into<String>) -> Self {
        self.condition(field, "attribute_not_exists", Value::Null)
    }

    /// AND `version = expected`, on the version field (or a field named
    /// `version`).
    pub fn condition_version(mut self, expected: impl Into<Value>) -> Self {
        match version_field(self.table.codec()) {
            Ok(field) => self.condition(field, "=", expected),
            Err(err) => {
                self.error.get_or_insert(err);
                self
            }
        }
    }

    /// Which attributes the store returns. Defaults to `ALL_NEW`.
    pub fn return_values(mut self, return_values: ReturnValues) -> Self {
        self.return_values = return_values;
        self
    }

    /// Compile the request without sending it.
    pub fn build_request(&self) -> CoreResult<UpdateItemRequest> {
        if let Some(err) = &self.error {
            return Err(CoreError::validation(match err {
                CoreError::Validation { message } => message.clone(),
                other => other.to_string(),
            }));
        }
        if self.actions.is_empty() {
            return Err(CoreError::validation("no updates provided"));
        }

        let codec = self.table.codec();
        let key = self.table.encode_key(self.key.clone())?;
        let mut placeholders = Placeholders::new();
        let update_expression = compile_update(&self.actions, codec, &mut placeholders)?;
        let condition_expression = compile_chain(&self.conditions, codec, &mut placeholders)?;
        let (names, values) = placeholders.into_parts();

        Ok(UpdateItemRequest {
            table_name: self.table.table_name().to_string(),
            key,
            update_expression,
            condition_expression,
            expression_attribute_names: names,
            expression_attribute_values: values,
            return_values: self.return_values,
        })
    }

    /// Send the update and decode the returned attributes.
    ///
    /// Returns `None` when `return_values` is `NONE`, or when an `*_OLD`
    /// option finds no previous item. Partial `UPDATED_*` results must
    /// still satisfy `T::from_fields`; use
    /// [`execute_fields`](Self::execute_fields) otherwise.
    ///
    /// # Errors
    ///
    /// `ConditionFailed` when a condition is false; `NoAttributesReturned`
    /// when an `*_NEW` option returns nothing.
    pub fn execute(self) -> CoreResult<Option<T>> {
        self.execute_fields()?.map(T::from_fields).transpose()
    }

    /// Send the update and return the decoded attributes as fields.
    pub fn execute_fields(self) -> CoreResult<Option<Fields>> {
        let request = self.build_request()?;
        debug!(table = %self.table.table_name(), operation = "update_item", "sending request");
        let response = self.table.backend().update_item(&request)?;

        match (response.attributes, self.return_values) {
            (_, ReturnValues::None) => Ok(None),
            (Some(item), _) if !item.is_empty() => Ok(Some(self.table.codec().decode_item(&item)?)),
            (_, ReturnValues::AllNew | ReturnValues::UpdatedNew) => {
                Err(CoreError::NoAttributesReturned {
                    operation: "update_builder",
                })
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{stored, Note};
    use super::*;
    use crate::backend::{BackendError, UpdateItemResponse};
    use crate::test_support::{Call, Recorder, Reply};
    use std::sync::Arc;
    use theorydb_codec::AttributeValue;

    fn table(recorder: &Arc<Recorder>) -> Table<Note> {
        Table::new(recorder.clone()).unwrap()
    }

    #[test]
    fn set_add_and_condition() {
        let recorder = Arc::new(Recorder::new());
        let notes = table(&recorder);
        let request = notes
            .update_builder(("A", "B"))
            .set("note", "v1")
            .add("value", 1)
            .condition("note", "=", "v0")
            .build_request()
            .unwrap();
        assert_eq!(request.update_expression, "SET #u_note = :u1 ADD #u_value :u2");
        assert_eq!(request.condition_expression.as_deref(), Some("#c_note = :c1"));
        assert_eq!(request.expression_attribute_values[":c1"], AttributeValue::from("v0"));
        assert_eq!(request.return_values, ReturnValues::AllNew);
    }

    #[test]
    fn condition_chain_groups_on_joiner_change() {
        let recorder = Arc::new(Recorder::new());
        let request = table(&recorder)
            .update_builder(("A", "B"))
            .increment("value")
            .condition_exists("pk")
            .condition("value", "<", 10)
            .or_condition("note", "begins_with", "x")
            .build_request()
            .unwrap();
        assert_eq!(
            request.condition_expression.as_deref(),
            Some("(attribute_exists(#c_pk) AND #c_value < :c1) OR begins_with(#c_note, :c2)")
        );
    }

    #[test]
    fn version_condition_uses_version_role() {
        let recorder = Arc::new(Recorder::new());
        let request = table(&recorder)
            .update_builder(("A", "B"))
            .set("note", "x")
            .condition_version(4)
            .build_request()
            .unwrap();
        assert_eq!(request.condition_expression.as_deref(), Some("#c_value = :c1"));
    }

    #[test]
    fn empty_builder_is_rejected() {
        let recorder = Arc::new(Recorder::new());
        let err = table(&recorder).update_builder(("A", "B")).execute().unwrap_err();
        assert_eq!(err.to_string(), "validation error: no updates provided");
        assert!(recorder.calls().is_empty());
    }

    #[test]
    fn execute_decodes_new_state() {
        let recorder = Arc::new(Recorder::new());
        recorder.reply(Reply::Update(UpdateItemResponse {
            attributes: Some(stored("A", "B", 2)),
        }));
        let notes = table(&recorder);
        let updated = notes.update_builder(("A", "B")).increment("value").execute().unwrap();
        assert_eq!(updated.map(|n| n.value), Some(2));

        let err = notes
            .update_builder(("A", "B"))
            .increment("value")
            .execute()
            .unwrap_err();
        assert!(matches!(err, CoreError::NoAttributesReturned { .. }));

        let none = notes
            .update_builder(("A", "B"))
            .decrement("value")
            .return_values(ReturnValues::None)
            .execute()
            .unwrap();
        assert!(none.is_none());
        let calls = recorder.calls();
        let Call::Update(request) = &calls[2] else {
            panic!("expected update");
        };
        assert_eq!(request.expression_attribute_values[":u1"], AttributeValue::number(-1));
    }

    #[test]
    fn condition_failure_maps() {
        let recorder = Arc::new(Recorder::new());
        recorder.reply(Reply::Fail(BackendError::conditional_check_failed()));
        let err = table(&recorder)
            .update_builder(("A", "B"))
            .set("note", "x")
            .condition_not_exists("pk")
            .execute()
            .unwrap_err();
        assert!(err.is_condition_failed());
    }

    #[test]
    fn set_operations_require_set_fields() {
        let recorder = Arc::new(Recorder::new());
        let notes = table(&recorder);
        let err = notes
            .update_builder(("A", "B"))
            .delete("note", Value::string_set(["x"]))
            .build_request()
            .unwrap_err();
        assert_eq!(err.to_string(), "validation error: DELETE requires a set field");

        let request = notes
            .update_builder(("A", "B"))
            .add("tags", Value::string_set(["x", "y"]))
            .build_request()
            .unwrap();
        assert_eq!(
            request.expression_attribute_values[":u1"],
            AttributeValue::Ss(vec!["x".into(), "y".into()])
        );
    }
}

//! Key condition expressions for queries.

use tracing::trace;

use crate::codec::{value_to_wire, ItemCodec};
use crate::error::{CoreError, CoreResult};
use crate::expr::placeholders::Placeholders;
use crate::types::Value;
use theorydb_codec::AttributeValue;

/// A condition on the sort key of a query.
///
/// Only the operators a key condition accepts are representable.
#[derive(Debug, Clone, PartialEq)]
pub enum SortKeyCondition {
    /// `#sk = :sk`
    Eq(Value),
    /// `#sk < :sk`
    Lt(Value),
    /// `#sk <= :sk`
    Le(Value),
    /// `#sk > :sk`
    Gt(Value),
    /// `#sk >= :sk`
    Ge(Value),
    /// `#sk BETWEEN :sk1 AND :sk2`
    Between(Value, Value),
    /// `begins_with(#sk, :sk)`
    BeginsWith(Value),
}

impl SortKeyCondition {
    /// Equal to `value`.
    pub fn eq(value: impl Into<Value>) -> Self {
        Self::Eq(value.into())
    }

    /// Less than `value`.
    pub fn lt(value: impl Into<Value>) -> Self {
        Self::Lt(value.into())
    }

    /// Less than or equal to `value`.
    pub fn le(value: impl Into<Value>) -> Self {
        Self::Le(value.into())
    }

    /// Greater than `value`.
    pub fn gt(value: impl Into<Value>) -> Self {
        Self::Gt(value.into())
    }

    /// Greater than or equal to `value`.
    pub fn ge(value: impl Into<Value>) -> Self {
        Self::Ge(value.into())
    }

    /// Between `low` and `high`, inclusive.
    pub fn between(low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Self::Between(low.into(), high.into())
    }

    /// Starts with `prefix`.
    pub fn begins_with(prefix: impl Into<Value>) -> Self {
        Self::BeginsWith(prefix.into())
    }

    /// Append this condition to `prefix`, binding `:sk` (or `:sk1`/`:sk2`).
    ///
    /// The caller binds `#sk`.
    pub fn apply(
        &self,
        prefix: &str,
        encode: impl Fn(&Value) -> CoreResult<AttributeValue>,
        placeholders: &mut Placeholders,
    ) -> CoreResult<String> {
        let comparison = |op: &str, value: &Value, placeholders: &mut Placeholders| {
            placeholders.bind_value(":sk", encode(value)?)?;
            Ok::<_, CoreError>(format!("{prefix} AND #sk {op} :sk"))
        };

        match self {
            Self::Eq(v) => comparison("=", v, placeholders),
            Self::Lt(v) => comparison("<", v, placeholders),
            Self::Le(v) => comparison("<=", v, placeholders),
            Self::Gt(v) => comparison(">", v, placeholders),
            Self::Ge(v) => comparison(">=", v, placeholders),
            Self::Between(low, high) => {
                placeholders.bind_value(":sk1", encode(low)?)?;
                placeholders.bind_value(":sk2", encode(high)?)?;
                Ok(format!("{prefix} AND #sk BETWEEN :sk1 AND :sk2"))
            }
            Self::BeginsWith(v) => {
                placeholders.bind_value(":sk", encode(v)?)?;
                Ok(format!("{prefix} AND begins_with(#sk, :sk)"))
            }
        }
    }
}

/// Compile `#pk = :pk [AND <sort condition>]`.
///
/// `partition_attr` and `sort_attr` are wire attribute names; values are
/// encoded with the matching declared attribute when there is one.
pub fn compile_key_condition(
    codec: &ItemCodec,
    partition_attr: &str,
    partition: &Value,
    sort: Option<(&str, &SortKeyCondition)>,
    placeholders: &mut Placeholders,
) -> CoreResult<String> {
    let encode_for = |attribute_name: &str, value: &Value| match codec.model().attribute(attribute_name) {
        Some(attr) => codec.encode_plain(attr, value.clone()),
        None => value_to_wire(value),
    };

    placeholders.bind_name("#pk", partition_attr)?;
    placeholders.bind_value(":pk", encode_for(partition_attr, partition)?)?;
    let mut expression = "#pk = :pk".to_string();

    if let Some((sort_attr, condition)) = sort {
        placeholders.bind_name("#sk", sort_attr)?;
        expression = condition.apply(&expression, |v| encode_for(sort_attr, v), placeholders)?;
    }

    trace!(expression = %expression, "compiled key condition");
    Ok(expression)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttributeDefinition, ModelDefinition};
    use std::sync::Arc;

    fn codec() -> ItemCodec {
        let model = ModelDefinition::builder("Event")
            .attribute(AttributeDefinition::new("pk").partition_key())
            .attribute(AttributeDefinition::new("sk").sort_key())
            .build()
            .unwrap();
        ItemCodec::new(Arc::new(model), None).unwrap()
    }

    #[test]
    fn partition_only() {
        let mut p = Placeholders::new();
        let expr = compile_key_condition(&codec(), "pk", &Value::from("A"), None, &mut p).unwrap();
        assert_eq!(expr, "#pk = :pk");
        assert_eq!(p.values()[":pk"], AttributeValue::from("A"));
    }

    #[test]
    fn sort_conditions() {
        let cases = [
            (SortKeyCondition::eq("x"), "#pk = :pk AND #sk = :sk"),
            (SortKeyCondition::ge("x"), "#pk = :pk AND #sk >= :sk"),
            (
                SortKeyCondition::between("a", "b"),
                "#pk = :pk AND #sk BETWEEN :sk1 AND :sk2",
            ),
            (
                SortKeyCondition::begins_with("0"),
                "#pk = :pk AND begins_with(#sk, :sk)",
            ),
        ];
        for (condition, expected) in cases {
            let mut p = Placeholders::new();
            let expr = compile_key_condition(
                &codec(),
                "pk",
                &Value::from("A"),
                Some(("sk", &condition)),
                &mut p,
            )
            .unwrap();
            assert_eq!(expr, expected);
            assert_eq!(p.names()["#sk"], "sk");
        }
    }
}

//! Filter and condition expressions.
//!
//! Filters, update-builder conditions and write conditions share one term
//! grammar and differ only in their placeholder family and in how they join
//! terms.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use tracing::trace;

use crate::backend::NameMap;
use crate::codec::ItemCodec;
use crate::error::{CoreError, CoreResult};
use crate::expr::placeholders::{Placeholders, Scope};
use crate::model::AttributeDefinition;
use crate::types::Value;

/// Maximum number of operands of an `IN` comparison.
pub const MAX_IN_VALUES: usize = 100;

/// Comparison operator of a condition term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `BETWEEN low AND high`
    Between,
    /// `IN (..)`
    In,
    /// `begins_with(..)`
    BeginsWith,
    /// `contains(..)`
    Contains,
    /// `attribute_exists(..)`
    Exists,
    /// `attribute_not_exists(..)`
    NotExists,
}

impl Operator {
    /// Canonical spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "<>",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Between => "BETWEEN",
            Operator::In => "IN",
            Operator::BeginsWith => "BEGINS_WITH",
            Operator::Contains => "CONTAINS",
            Operator::Exists => "EXISTS",
            Operator::NotExists => "NOT_EXISTS",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = CoreError;

    /// Case-insensitive; accepts the `EQ`/`NE`/`LT`/`LE`/`GT`/`GE` aliases,
    /// `!=` and the `ATTRIBUTE_` forms of the existence checks.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op = match s.trim().to_ascii_uppercase().as_str() {
            "=" | "EQ" => Operator::Eq,
            "!=" | "<>" | "NE" => Operator::Ne,
            "<" | "LT" => Operator::Lt,
            "<=" | "LE" => Operator::Le,
            ">" | "GT" => Operator::Gt,
            ">=" | "GE" => Operator::Ge,
            "BETWEEN" => Operator::Between,
            "IN" => Operator::In,
            "BEGINS_WITH" => Operator::BeginsWith,
            "CONTAINS" => Operator::Contains,
            "EXISTS" | "ATTRIBUTE_EXISTS" => Operator::Exists,
            "NOT_EXISTS" | "ATTRIBUTE_NOT_EXISTS" => Operator::NotExists,
            _ => {
                return Err(CoreError::validation(format!(
                    "unsupported condition operator: {s}"
                )))
            }
        };
        Ok(op)
    }
}

/// One comparison against a declared field.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    field: String,
    op: Operator,
    values: Vec<Value>,
}

impl Condition {
    fn with(field: impl Into<String>, op: Operator, values: Vec<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            values,
        }
    }

    /// `field = value`
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::with(field, Operator::Eq, vec![value.into()])
    }

    /// `field <> value`
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::with(field, Operator::Ne, vec![value.into()])
    }

    /// `field < value`
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::with(field, Operator::Lt, vec![value.into()])
    }

    /// `field <= value`
    pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::with(field, Operator::Le, vec![value.into()])
    }

    /// `field > value`
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::with(field, Operator::Gt, vec![value.into()])
    }

    /// `field >= value`
    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::with(field, Operator::Ge, vec![value.into()])
    }

    /// `field BETWEEN low AND high`
    pub fn between(field: impl Into<String>, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Self::with(field, Operator::Between, vec![low.into(), high.into()])
    }

    /// `field IN (values..)`
    pub fn is_in<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::with(field, Operator::In, values.into_iter().map(Into::into).collect())
    }

    /// `begins_with(field, prefix)`
    pub fn begins_with(field: impl Into<String>, prefix: impl Into<Value>) -> Self {
        Self::with(field, Operator::BeginsWith, vec![prefix.into()])
    }

    /// `contains(field, value)`
    pub fn contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::with(field, Operator::Contains, vec![value.into()])
    }

    /// `attribute_exists(field)`
    pub fn exists(field: impl Into<String>) -> Self {
        Self::with(field, Operator::Exists, Vec::new())
    }

    /// `attribute_not_exists(field)`
    pub fn not_exists(field: impl Into<String>) -> Self {
        Self::with(field, Operator::NotExists, Vec::new())
    }

    /// Build from an operator string and a single operand.
    ///
    /// `BETWEEN` takes a two-element list and `IN` a list; the existence
    /// checks take no operand (`Value::Null`).
    pub fn from_operator(field: impl Into<String>, op: &str, value: Value) -> CoreResult<Self> {
        let operator: Operator = op.parse()?;
        let values = match operator {
            Operator::Exists | Operator::NotExists => {
                if !value.is_null() {
                    return Err(CoreError::validation(format!(
                        "{operator} does not take a value"
                    )));
                }
                Vec::new()
            }
            Operator::Between => match value {
                Value::List(items) if items.len() == 2 => items,
                _ => return Err(CoreError::validation("BETWEEN requires two values")),
            },
            Operator::In => match value {
                Value::List(items) => items,
                _ => return Err(CoreError::validation("IN requires a sequence of values")),
            },
            _ => {
                if value.is_null() {
                    return Err(CoreError::validation(format!("{op} requires one value")));
                }
                vec![value]
            }
        };
        Ok(Self::with(field, operator, values))
    }

    /// The field name.
    pub fn field(&self) -> &str {
        &self.field
    }

    /// The operator.
    pub fn operator(&self) -> Operator {
        self.op
    }

    /// The operands.
    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

/// A filter tree. Groups always render with explicit parentheses.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// A single comparison.
    Condition(Condition),
    /// All members must match.
    And(Vec<Filter>),
    /// Any member must match.
    Or(Vec<Filter>),
}

impl Filter {
    /// Conjunction of `filters`.
    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    /// Disjunction of `filters`.
    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or(filters)
    }
}

impl From<Condition> for Filter {
    fn from(condition: Condition) -> Self {
        Filter::Condition(condition)
    }
}

/// Logical joiner between chained conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Joiner {
    /// `AND`
    And,
    /// `OR`
    Or,
}

impl Joiner {
    fn as_str(self) -> &'static str {
        match self {
            Joiner::And => "AND",
            Joiner::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Usage {
    Filter,
    Condition,
}

/// Resolves fields and binds operands for one placeholder family.
pub(crate) struct TermCompiler<'a> {
    codec: &'a ItemCodec,
    placeholders: &'a mut Placeholders,
    scope: Scope,
}

impl<'a> TermCompiler<'a> {
    pub(crate) fn new(codec: &'a ItemCodec, placeholders: &'a mut Placeholders, scope: Scope) -> Self {
        Self {
            codec,
            placeholders,
            scope,
        }
    }

    fn name(&mut self, field: &str, usage: Usage) -> CoreResult<(String, &'a AttributeDefinition)> {
        let codec: &'a ItemCodec = self.codec;
        let attr = codec.model().require_field(field)?;
        if attr.is_encrypted() {
            let message = match usage {
                Usage::Filter => format!("encrypted fields cannot be filtered: {field}"),
                Usage::Condition => format!("encrypted fields cannot be used in conditions: {field}"),
            };
            return Err(CoreError::validation(message));
        }
        let placeholder = self.scope.name(field);
        self.placeholders.bind_name(&placeholder, attr.attribute_name())?;
        Ok((placeholder, attr))
    }

    fn value(&mut self, attr: &AttributeDefinition, value: &Value) -> CoreResult<String> {
        let placeholder = self.scope.next_value();
        let wire = self.codec.encode_plain(attr, value.clone())?;
        self.placeholders.bind_value(&placeholder, wire)?;
        Ok(placeholder)
    }

    fn term(&mut self, condition: &Condition, usage: Usage) -> CoreResult<String> {
        let (name, attr) = self.name(&condition.field, usage)?;
        let values = &condition.values;
        let op = condition.op;

        let single = |values: &[Value]| -> CoreResult<()> {
            if values.len() == 1 {
                Ok(())
            } else {
                Err(CoreError::validation(format!("{op} requires one value")))
            }
        };

        let rendered = match op {
            Operator::Eq | Operator::Ne | Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge => {
                single(values)?;
                format!("{name} {} {}", op.as_str(), self.value(attr, &values[0])?)
            }
            Operator::Between => {
                if values.len() != 2 {
                    return Err(CoreError::validation("BETWEEN requires two values"));
                }
                let low = self.value(attr, &values[0])?;
                let high = self.value(attr, &values[1])?;
                format!("{name} BETWEEN {low} AND {high}")
            }
            Operator::In => {
                if values.is_empty() {
                    return Err(CoreError::validation("IN requires a sequence of values"));
                }
                if values.len() > MAX_IN_VALUES {
                    return Err(CoreError::validation(format!(
                        "IN supports maximum {MAX_IN_VALUES} values"
                    )));
                }
                let refs = values
                    .iter()
                    .map(|v| self.value(attr, v))
                    .collect::<CoreResult<Vec<_>>>()?;
                format!("{name} IN ({})", refs.join(", "))
            }
            Operator::BeginsWith => {
                single(values)?;
                format!("begins_with({name}, {})", self.value(attr, &values[0])?)
            }
            Operator::Contains => {
                single(values)?;
                format!("contains({name}, {})", self.value(attr, &values[0])?)
            }
            Operator::Exists | Operator::NotExists => {
                if !values.is_empty() {
                    return Err(CoreError::validation(format!("{op} does not take a value")));
                }
                let function = if op == Operator::Exists {
                    "attribute_exists"
                } else {
                    "attribute_not_exists"
                };
                format!("{function}({name})")
            }
        };
        Ok(rendered)
    }

    fn filter(&mut self, filter: &Filter) -> CoreResult<String> {
        let (joiner, members) = match filter {
            Filter::Condition(condition) => return self.term(condition, Usage::Filter),
            Filter::And(members) => (Joiner::And, members),
            Filter::Or(members) => (Joiner::Or, members),
        };
        let mut parts = Vec::with_capacity(members.len());
        for member in members {
            let part = self.filter(member)?;
            if !part.is_empty() {
                parts.push(part);
            }
        }
        if parts.is_empty() {
            return Ok(String::new());
        }
        Ok(format!("({})", parts.join(&format!(" {} ", joiner.as_str()))))
    }
}

/// Compile a filter tree into a `#f_`/`:fN` expression.
///
/// Empty groups compile to the empty string.
pub fn compile_filter(
    filter: &Filter,
    codec: &ItemCodec,
    placeholders: &mut Placeholders,
) -> CoreResult<String> {
    let expression = TermCompiler::new(codec, placeholders, Scope::filter()).filter(filter)?;
    trace!(expression = %expression, "compiled filter");
    Ok(expression)
}

/// A condition recorded by the update builder; parsed at compile time.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PendingCondition {
    pub(crate) joiner: Joiner,
    pub(crate) field: String,
    pub(crate) op: String,
    pub(crate) value: Value,
}

/// Compile chained builder conditions into a `#c_`/`:cN` expression.
///
/// Terms fold left to right. When the joiner changes, everything so far is
/// wrapped in parentheses, so `a AND b OR c` renders `(a AND b) OR c`.
pub(crate) fn compile_chain(
    chain: &[PendingCondition],
    codec: &ItemCodec,
    placeholders: &mut Placeholders,
) -> CoreResult<Option<String>> {
    let mut compiler = TermCompiler::new(codec, placeholders, Scope::condition());
    let mut out: Option<String> = None;
    let mut previous: Option<Joiner> = None;

    for pending in chain {
        let condition = Condition::from_operator(pending.field.clone(), &pending.op, pending.value.clone())?;
        let term = compiler.term(&condition, Usage::Condition)?;
        out = Some(match out {
            None => term,
            Some(acc) => {
                let acc = match previous {
                    Some(joiner) if joiner != pending.joiner => format!("({acc})"),
                    _ => acc,
                };
                previous = Some(pending.joiner);
                format!("{acc} {} {term}", pending.joiner.as_str())
            }
        });
    }
    Ok(out)
}

/// A caller-written condition with its own placeholders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawExpression {
    /// Expression text.
    pub expression: String,
    /// `#name` placeholders.
    pub names: NameMap,
    /// `:value` placeholders, converted without attribute flags.
    pub values: BTreeMap<String, Value>,
}

impl RawExpression {
    /// An expression with no placeholders.
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            ..Self::default()
        }
    }

    /// Add a name placeholder.
    #[must_use]
    pub fn name(mut self, placeholder: impl Into<String>, attribute_name: impl Into<String>) -> Self {
        self.names.insert(placeholder.into(), attribute_name.into());
        self
    }

    /// Add a value placeholder.
    #[must_use]
    pub fn value(mut self, placeholder: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(placeholder.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
enum WriteTerm {
    NotExists,
    Exists,
    Version(Value),
    Field(Condition),
}

/// Condition attached to a put, delete or transaction action.
///
/// Engine-built terms use `#w_`/`:wN` placeholders and are joined with
/// `AND`; a raw caller expression is appended last and its placeholders are
/// merged with collision detection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteCondition {
    terms: Vec<WriteTerm>,
    raw: Option<RawExpression>,
}

impl WriteCondition {
    /// No condition.
    pub fn new() -> Self {
        Self::default()
    }

    /// The item must not exist yet.
    #[must_use]
    pub fn if_not_exists(mut self) -> Self {
        self.terms.push(WriteTerm::NotExists);
        self
    }

    /// The item must already exist.
    #[must_use]
    pub fn if_exists(mut self) -> Self {
        self.terms.push(WriteTerm::Exists);
        self
    }

    /// The stored version attribute must equal `version`.
    #[must_use]
    pub fn at_version(mut self, version: impl Into<Value>) -> Self {
        self.terms.push(WriteTerm::Version(version.into()));
        self
    }

    /// A field comparison.
    #[must_use]
    pub fn field(mut self, condition: Condition) -> Self {
        self.terms.push(WriteTerm::Field(condition));
        self
    }

    /// A caller-written expression.
    #[must_use]
    pub fn raw(mut self, raw: RawExpression) -> Self {
        self.raw = Some(raw);
        self
    }

    /// True if no term or raw expression was added.
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty() && self.raw.as_ref().map_or(true, |r| r.expression.trim().is_empty())
    }

    /// Compile into an expression, binding into `placeholders`.
    pub fn compile(&self, codec: &ItemCodec, placeholders: &mut Placeholders) -> CoreResult<Option<String>> {
        let model = codec.model();
        let mut parts = Vec::with_capacity(self.terms.len() + 1);
        {
            let mut compiler = TermCompiler::new(codec, placeholders, Scope::write());
            for term in &self.terms {
                let condition = match term {
                    WriteTerm::NotExists => Condition::not_exists(model.partition_key().field_name()),
                    WriteTerm::Exists => Condition::exists(model.partition_key().field_name()),
                    WriteTerm::Version(version) => {
                        let field = version_field(codec)?;
                        Condition::eq(field, version.clone())
                    }
                    WriteTerm::Field(condition) => condition.clone(),
                };
                parts.push(compiler.term(&condition, Usage::Condition)?);
            }
        }

        if let Some(raw) = &self.raw {
            let expression = raw.expression.trim();
            if !expression.is_empty() {
                placeholders.merge_names(&raw.names)?;
                placeholders.merge_values(&raw.values)?;
                if parts.is_empty() {
                    parts.push(expression.to_string());
                } else {
                    parts.push(format!("({expression})"));
                }
            }
        }

        if parts.is_empty() {
            return Ok(None);
        }
        let expression = parts.join(" AND ");
        trace!(expression = %expression, "compiled write condition");
        Ok(Some(expression))
    }
}

/// The field carrying the version role, falling back to a field named
/// `version`.
pub(crate) fn version_field(codec: &ItemCodec) -> CoreResult<String> {
    let model = codec.model();
    model
        .version_attribute()
        .or_else(|| model.field("version"))
        .map(|attr| attr.field_name().to_string())
        .ok_or_else(|| CoreError::validation("model does not define a version field"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttributeDefinition, ModelDefinition};
    use std::sync::Arc;
    use theorydb_codec::AttributeValue;

    fn codec() -> ItemCodec {
        let model = ModelDefinition::builder("Order")
            .attribute(AttributeDefinition::new("pk").partition_key())
            .attribute(AttributeDefinition::new("sk").sort_key())
            .attribute(AttributeDefinition::new("status"))
            .attribute(AttributeDefinition::new("total"))
            .attribute(AttributeDefinition::new("tags").set())
            .attribute(AttributeDefinition::new("rev").named("revision").version())
            .build()
            .unwrap();
        ItemCodec::new(Arc::new(model), None).unwrap()
    }

    #[test]
    fn operator_aliases() {
        for (text, op) in [
            ("eq", Operator::Eq),
            ("!=", Operator::Ne),
            ("Ne", Operator::Ne),
            ("le", Operator::Le),
            ("attribute_exists", Operator::Exists),
            ("NOT_EXISTS", Operator::NotExists),
            ("begins_with", Operator::BeginsWith),
        ] {
            assert_eq!(text.parse::<Operator>().unwrap(), op);
        }
        let err = "LIKE".parse::<Operator>().unwrap_err();
        assert_eq!(err.to_string(), "validation error: unsupported condition operator: LIKE");
    }

    #[test]
    fn filter_groups_are_parenthesised() {
        let codec = codec();
        let mut p = Placeholders::new();
        let filter = Filter::and(vec![
            Condition::eq("status", "open").into(),
            Filter::or(vec![
                Condition::gt("total", 10).into(),
                Condition::exists("tags").into(),
            ]),
        ]);

        let expression = compile_filter(&filter, &codec, &mut p).unwrap();
        assert_eq!(
            expression,
            "(#f_status = :f1 AND (#f_total > :f2 OR attribute_exists(#f_tags)))"
        );
        assert_eq!(p.names()["#f_status"], "status");
        assert_eq!(p.values()[":f2"], AttributeValue::number(10));
    }

    #[test]
    fn filter_is_deterministic() {
        let codec = codec();
        let filter: Filter = Condition::is_in("status", ["a", "b"]).into();
        let mut a = Placeholders::new();
        let mut b = Placeholders::new();
        let first = compile_filter(&filter, &codec, &mut a).unwrap();
        let second = compile_filter(&filter, &codec, &mut b).unwrap();
        assert_eq!(first, "#f_status IN (:f1, :f2)");
        assert_eq!(first, second);
        assert_eq!(a, b);
    }

    #[test]
    fn in_is_bounded() {
        let codec = codec();
        let filter: Filter = Condition::is_in("total", 0..=100).into();
        let err = compile_filter(&filter, &codec, &mut Placeholders::new()).unwrap_err();
        assert_eq!(err.to_string(), "validation error: IN supports maximum 100 values");
    }

    #[test]
    fn empty_groups_vanish() {
        let codec = codec();
        let filter = Filter::and(vec![Filter::or(vec![])]);
        assert_eq!(compile_filter(&filter, &codec, &mut Placeholders::new()).unwrap(), "");
    }

    #[test]
    fn unknown_field() {
        let codec = codec();
        let filter: Filter = Condition::eq("missing", 1).into();
        let err = compile_filter(&filter, &codec, &mut Placeholders::new()).unwrap_err();
        assert_eq!(err.to_string(), "validation error: unknown field: missing");
    }

    #[test]
    fn from_operator_shapes() {
        assert!(Condition::from_operator("a", "=", Value::Null).is_err());
        assert!(Condition::from_operator("a", "exists", Value::from(1)).is_err());
        assert!(Condition::from_operator("a", "between", Value::from(1)).is_err());
        let c = Condition::from_operator("a", "between", Value::List(vec![1.into(), 2.into()])).unwrap();
        assert_eq!(c.values().len(), 2);
    }

    #[test]
    fn chain_parenthesises_on_joiner_change() {
        let codec = codec();
        let pending = |joiner, field: &str, op: &str, value: Value| PendingCondition {
            joiner,
            field: field.to_string(),
            op: op.to_string(),
            value,
        };
        let chain = vec![
            pending(Joiner::And, "status", "=", "a".into()),
            pending(Joiner::And, "total", ">", 1.into()),
            pending(Joiner::Or, "tags", "attribute_not_exists", Value::Null),
        ];
        let mut p = Placeholders::new();
        let expression = compile_chain(&chain, &codec, &mut p).unwrap().unwrap();
        assert_eq!(
            expression,
            "(#c_status = :c1 AND #c_total > :c2) OR attribute_not_exists(#c_tags)"
        );
    }

    #[test]
    fn write_condition_merges_raw() {
        let codec = codec();
        let condition = WriteCondition::new()
            .if_not_exists()
            .at_version(3)
            .raw(RawExpression::new("#s <> :s").name("#s", "status").value(":s", "closed"));

        let mut p = Placeholders::new();
        let expression = condition.compile(&codec, &mut p).unwrap().unwrap();
        assert_eq!(
            expression,
            "attribute_not_exists(#w_pk) AND #w_rev = :w1 AND (#s <> :s)"
        );
        assert_eq!(p.names()["#w_rev"], "revision");
        assert_eq!(p.values()[":s"], AttributeValue::from("closed"));

        let clash = WriteCondition::new()
            .at_version(1)
            .raw(RawExpression::new("#w_rev = :x").name("#w_rev", "revision"));
        let err = clash.compile(&codec, &mut Placeholders::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "validation error: expression attribute name collision: #w_rev"
        );
    }

    #[test]
    fn empty_write_condition() {
        let codec = codec();
        let condition = WriteCondition::new();
        assert!(condition.is_empty());
        assert_eq!(condition.compile(&codec, &mut Placeholders::new()).unwrap(), None);
    }
}

//! Update expressions.
//!
//! Clauses always render in the order `SET, REMOVE, ADD, DELETE`, each with
//! its actions in the order they were recorded.

use theorydb_codec::AttributeValue;
use tracing::trace;

use crate::codec::{value_to_wire, ItemCodec};
use crate::error::{CoreError, CoreResult};
use crate::expr::placeholders::{Placeholders, Scope};
use crate::model::{AttributeDefinition, Fields, ModelDefinition};
use crate::types::Value;

/// One recorded update operation.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateAction {
    /// `SET #f = :v`
    Set {
        /// Field name.
        field: String,
        /// New value.
        value: Value,
    },
    /// `SET #f = if_not_exists(#f, :v)`
    SetIfNotExists {
        /// Field name.
        field: String,
        /// Value used when the attribute is absent.
        default: Value,
    },
    /// `REMOVE #f`
    Remove {
        /// Field name.
        field: String,
    },
    /// `ADD #f :v`, numeric increment or set union.
    Add {
        /// Field name.
        field: String,
        /// Number, or set elements for a set field.
        value: Value,
    },
    /// `DELETE #f :v`, set difference.
    Delete {
        /// Field name.
        field: String,
        /// Elements to remove.
        value: Value,
    },
    /// `SET #f = list_append(#f, :v)`
    AppendList {
        /// Field name.
        field: String,
        /// Elements to append.
        values: Vec<Value>,
    },
    /// `SET #f = list_append(:v, #f)`
    PrependList {
        /// Field name.
        field: String,
        /// Elements to prepend.
        values: Vec<Value>,
    },
    /// `REMOVE #f[i]`
    RemoveListAt {
        /// Field name.
        field: String,
        /// Element index.
        index: usize,
    },
    /// `SET #f[i] = :v`
    SetListElement {
        /// Field name.
        field: String,
        /// Element index.
        index: usize,
        /// New element.
        value: Value,
    },
}

#[derive(Debug, Default)]
struct Clauses {
    set: Vec<String>,
    remove: Vec<String>,
    add: Vec<String>,
    delete: Vec<String>,
}

impl Clauses {
    fn render(self) -> CoreResult<String> {
        let mut parts = Vec::with_capacity(4);
        for (keyword, items) in [
            ("SET", self.set),
            ("REMOVE", self.remove),
            ("ADD", self.add),
            ("DELETE", self.delete),
        ] {
            if !items.is_empty() {
                parts.push(format!("{keyword} {}", items.join(", ")));
            }
        }
        if parts.is_empty() {
            return Err(CoreError::validation("no updates provided"));
        }
        Ok(parts.join(" "))
    }
}

/// Resolve an updatable field: declared and not a table key.
fn updatable<'m>(model: &'m ModelDefinition, field: &str) -> CoreResult<&'m AttributeDefinition> {
    let attr = model.require_field(field)?;
    let is_table_key = attr.field_name() == model.partition_key().field_name()
        || model.sort_key().is_some_and(|sk| sk.field_name() == field);
    if is_table_key {
        return Err(CoreError::validation(format!("cannot update key field: {field}")));
    }
    Ok(attr)
}

fn reject_encrypted(attr: &AttributeDefinition, operation: &str) -> CoreResult<()> {
    if attr.is_encrypted() {
        return Err(CoreError::validation(format!(
            "encrypted fields cannot be used in {operation}: {}",
            attr.field_name()
        )));
    }
    Ok(())
}

fn require_plain_list(attr: &AttributeDefinition) -> CoreResult<()> {
    reject_encrypted(attr, "list operations")?;
    if attr.is_set() || attr.is_json() || attr.is_binary() {
        return Err(CoreError::validation("list operations require a plain list attribute"));
    }
    Ok(())
}

/// Wrap a scalar into a one-element list so the set codec sees a collection.
fn as_set_operand(value: Value) -> Value {
    match value {
        Value::StringSet(_) | Value::NumberSet(_) | Value::BytesSet(_) | Value::List(_) => value,
        scalar => Value::List(vec![scalar]),
    }
}

fn name<'m>(
    model: &'m ModelDefinition,
    scope: &Scope,
    field: &str,
    placeholders: &mut Placeholders,
) -> CoreResult<(String, &'m AttributeDefinition)> {
    let attr = updatable(model, field)?;
    let placeholder = scope.name(field);
    placeholders.bind_name(&placeholder, attr.attribute_name())?;
    Ok((placeholder, attr))
}

fn bind(scope: &mut Scope, wire: AttributeValue, placeholders: &mut Placeholders) -> CoreResult<String> {
    let placeholder = scope.next_value();
    placeholders.bind_value(&placeholder, wire)?;
    Ok(placeholder)
}

/// Compile builder actions into a `#u_`/`:uN` update expression.
///
/// SET values go through the full attribute codec, including encryption;
/// list operands and numeric ADD operands are converted without attribute
/// flags.
pub fn compile_update(
    actions: &[UpdateAction],
    codec: &ItemCodec,
    placeholders: &mut Placeholders,
) -> CoreResult<String> {
    let model = codec.model();
    let mut scope = Scope::update();
    let mut clauses = Clauses::default();

    for action in actions {
        match action {
            UpdateAction::Set { field, value } => {
                let (n, attr) = name(model, &scope, field, placeholders)?;
                let v = bind(&mut scope, codec.encode_value(attr, value.clone())?, placeholders)?;
                clauses.set.push(format!("{n} = {v}"));
            }
            UpdateAction::SetIfNotExists { field, default } => {
                let (n, attr) = name(model, &scope, field, placeholders)?;
                let v = bind(&mut scope, codec.encode_value(attr, default.clone())?, placeholders)?;
                clauses.set.push(format!("{n} = if_not_exists({n}, {v})"));
            }
            UpdateAction::Remove { field } => {
                let (n, _) = name(model, &scope, field, placeholders)?;
                clauses.remove.push(n);
            }
            UpdateAction::Add { field, value } => {
                let (n, attr) = name(model, &scope, field, placeholders)?;
                reject_encrypted(attr, "ADD")?;
                let wire = if attr.is_set() {
                    codec.encode_plain(attr, as_set_operand(value.clone()))?
                } else {
                    match value {
                        Value::Number(_) => value_to_wire(value)?,
                        _ => {
                            return Err(CoreError::validation(
                                "ADD requires a numeric value for non-set fields",
                            ))
                        }
                    }
                };
                let v = bind(&mut scope, wire, placeholders)?;
                clauses.add.push(format!("{n} {v}"));
            }
            UpdateAction::Delete { field, value } => {
                let (n, attr) = name(model, &scope, field, placeholders)?;
                reject_encrypted(attr, "DELETE")?;
                if !attr.is_set() {
                    return Err(CoreError::validation("DELETE requires a set field"));
                }
                let v = bind(&mut scope, codec.encode_plain(attr, as_set_operand(value.clone()))?, placeholders)?;
                clauses.delete.push(format!("{n} {v}"));
            }
            UpdateAction::AppendList { field, values } | UpdateAction::PrependList { field, values } => {
                let (n, attr) = name(model, &scope, field, placeholders)?;
                require_plain_list(attr)?;
                let v = bind(&mut scope, value_to_wire(&Value::List(values.clone()))?, placeholders)?;
                if matches!(action, UpdateAction::AppendList { .. }) {
                    clauses.set.push(format!("{n} = list_append({n}, {v})"));
                } else {
                    clauses.set.push(format!("{n} = list_append({v}, {n})"));
                }
            }
            UpdateAction::RemoveListAt { field, index } => {
                let (n, attr) = name(model, &scope, field, placeholders)?;
                require_plain_list(attr)?;
                clauses.remove.push(format!("{n}[{index}]"));
            }
            UpdateAction::SetListElement { field, index, value } => {
                let (n, attr) = name(model, &scope, field, placeholders)?;
                require_plain_list(attr)?;
                let v = bind(&mut scope, value_to_wire(value)?, placeholders)?;
                clauses.set.push(format!("{n}[{index}] = {v}"));
            }
        }
    }

    let expression = clauses.render()?;
    trace!(expression = %expression, "compiled update");
    Ok(expression)
}

/// Compile a field map into a `#d_<field>`/`:d_<field>` update expression.
///
/// Null values remove the attribute; everything else is assigned through the
/// full attribute codec.
pub fn compile_field_updates(
    updates: &Fields,
    codec: &ItemCodec,
    placeholders: &mut Placeholders,
) -> CoreResult<String> {
    let model = codec.model();
    let mut clauses = Clauses::default();

    for (field, value) in updates.iter() {
        let attr = updatable(model, field)?;
        let name = format!("#d_{field}");
        placeholders.bind_name(&name, attr.attribute_name())?;

        if value.is_null() {
            clauses.remove.push(name);
            continue;
        }
        let placeholder = format!(":d_{field}");
        placeholders.bind_value(&placeholder, codec.encode_value(attr, value.clone())?)?;
        clauses.set.push(format!("{name} = {placeholder}"));
    }

    let expression = clauses.render()?;
    trace!(expression = %expression, "compiled field updates");
    Ok(expression)
}

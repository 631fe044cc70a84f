//! Projection expressions.

use tracing::trace;

use crate::error::CoreResult;
use crate::expr::placeholders::Placeholders;
use crate::model::ModelDefinition;

/// Compile selected fields into a `#p_<field>` projection list.
///
/// Key attributes and required attributes are always projected so the
/// result can be decoded into a record; they are appended after the caller's
/// fields when missing. Duplicates are dropped.
pub fn compile_projection(
    fields: &[String],
    model: &ModelDefinition,
    placeholders: &mut Placeholders,
) -> CoreResult<String> {
    let mut selected: Vec<&str> = Vec::with_capacity(fields.len());
    for field in fields {
        model.require_field(field)?;
        if !selected.contains(&field.as_str()) {
            selected.push(field);
        }
    }
    for attr in model.attributes() {
        if attr.is_required() && !selected.contains(&attr.field_name()) {
            selected.push(attr.field_name());
        }
    }

    let mut refs = Vec::with_capacity(selected.len());
    for field in selected {
        let attr = model.require_field(field)?;
        let placeholder = format!("#p_{field}");
        placeholders.bind_name(&placeholder, attr.attribute_name())?;
        refs.push(placeholder);
    }

    let expression = refs.join(", ");
    trace!(expression = %expression, "compiled projection");
    Ok(expression)
}

//! Expression attribute name and value maps.

use std::collections::BTreeMap;

use theorydb_codec::AttributeValue;

use crate::backend::{NameMap, ValueMap};
use crate::codec::value_to_wire;
use crate::error::{CoreError, CoreResult};
use crate::types::Value;

/// Placeholder maps accumulated while compiling one request.
///
/// Names map `#x` to a real attribute name; values map `:x` to a wire value.
/// Rebinding a name to the same attribute is a no-op; rebinding it to a
/// different attribute, or binding any value placeholder twice, is a
/// validation error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Placeholders {
    names: NameMap,
    values: ValueMap,
}

impl Placeholders {
    /// Create empty maps.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `placeholder` to `attribute_name`.
    pub fn bind_name(&mut self, placeholder: &str, attribute_name: &str) -> CoreResult<()> {
        match self.names.get(placeholder) {
            Some(existing) if existing != attribute_name => Err(CoreError::validation(format!(
                "expression attribute name collision: {placeholder}"
            ))),
            Some(_) => Ok(()),
            None => {
                self.names
                    .insert(placeholder.to_string(), attribute_name.to_string());
                Ok(())
            }
        }
    }

    /// Bind `placeholder` to a wire value.
    pub fn bind_value(&mut self, placeholder: &str, value: AttributeValue) -> CoreResult<()> {
        if self.values.contains_key(placeholder) {
            return Err(CoreError::validation(format!(
                "expression attribute value collision: {placeholder}"
            )));
        }
        self.values.insert(placeholder.to_string(), value);
        Ok(())
    }

    /// Merge caller-supplied names. Any key already bound is a collision,
    /// even when it maps to the same attribute.
    pub fn merge_names(&mut self, names: &NameMap) -> CoreResult<()> {
        for (placeholder, attribute_name) in names {
            if self.names.contains_key(placeholder) {
                return Err(CoreError::validation(format!(
                    "expression attribute name collision: {placeholder}"
                )));
            }
            self.names.insert(placeholder.clone(), attribute_name.clone());
        }
        Ok(())
    }

    /// Merge caller-supplied domain values, converted without any attribute
    /// flags.
    pub fn merge_values(&mut self, values: &BTreeMap<String, Value>) -> CoreResult<()> {
        for (placeholder, value) in values {
            self.bind_value(placeholder, value_to_wire(value)?)?;
        }
        Ok(())
    }

    /// Bound names.
    pub fn names(&self) -> &NameMap {
        &self.names
    }

    /// Bound values.
    pub fn values(&self) -> &ValueMap {
        &self.values
    }

    /// True if nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.values.is_empty()
    }

    /// Split into the name and value maps.
    pub fn into_parts(self) -> (NameMap, ValueMap) {
        (self.names, self.values)
    }
}

/// One placeholder family: a name prefix and a numbered value prefix.
///
/// Each compilation owns its own scope, so counters start at 1.
#[derive(Debug, Clone)]
pub(crate) struct Scope {
    name_prefix: &'static str,
    value_prefix: &'static str,
    counter: usize,
}

impl Scope {
    pub(crate) const fn new(name_prefix: &'static str, value_prefix: &'static str) -> Self {
        Self {
            name_prefix,
            value_prefix,
            counter: 0,
        }
    }

    /// `#f_` filters.
    pub(crate) const fn filter() -> Self {
        Self::new("#f_", ":f")
    }

    /// `#u_` update builder operations.
    pub(crate) const fn update() -> Self {
        Self::new("#u_", ":u")
    }

    /// `#c_` update builder conditions.
    pub(crate) const fn condition() -> Self {
        Self::new("#c_", ":c")
    }

    /// `#w_` write conditions.
    pub(crate) const fn write() -> Self {
        Self::new("#w_", ":w")
    }

    pub(crate) fn name(&self, field_name: &str) -> String {
        format!("{}{field_name}", self.name_prefix)
    }

    pub(crate) fn next_value(&mut self) -> String {
        self.counter += 1;
        format!("{}{}", self.value_prefix, self.counter)
    }
}

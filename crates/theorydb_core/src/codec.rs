//! Attribute codec: domain values to wire attribute values and back.
//!
//! Encoding pipeline for one attribute:
//! converter → set normalization (empty set becomes NULL) → canonical JSON
//! (JSON-flagged) → binary wrap (binary-flagged) → wire value → envelope
//! (encrypted). Decoding runs the same steps in reverse.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value as Json;
use theorydb_codec::{AttributeValue, Item};

use crate::crypto::EnvelopeCipher;
use crate::error::{CoreError, CoreResult};
use crate::model::{AttributeDefinition, Fields, ModelDefinition};
use crate::types::{Number, Value};

/// Convert a domain value to a wire value with no attribute-specific steps.
///
/// Sets must be non-empty; the store has no empty set.
pub fn value_to_wire(value: &Value) -> CoreResult<AttributeValue> {
    let empty_set = || CoreError::validation("empty sets cannot be stored");
    Ok(match value {
        Value::Null => AttributeValue::Null,
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => AttributeValue::N(n.as_str().to_string()),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Bytes(b) => AttributeValue::B(b.clone()),
        Value::StringSet(s) if s.is_empty() => return Err(empty_set()),
        Value::StringSet(s) => AttributeValue::Ss(s.iter().cloned().collect()),
        Value::NumberSet(s) if s.is_empty() => return Err(empty_set()),
        Value::NumberSet(s) => AttributeValue::Ns(s.iter().map(|n| n.as_str().to_string()).collect()),
        Value::BytesSet(s) if s.is_empty() => return Err(empty_set()),
        Value::BytesSet(s) => AttributeValue::Bs(s.iter().cloned().collect()),
        Value::List(items) => AttributeValue::L(items.iter().map(value_to_wire).collect::<CoreResult<_>>()?),
        Value::Map(entries) => AttributeValue::M(
            entries
                .iter()
                .map(|(k, v)| Ok((k.clone(), value_to_wire(v)?)))
                .collect::<CoreResult<_>>()?,
        ),
    })
}

/// Convert a wire value to a domain value.
pub fn wire_to_value(value: &AttributeValue) -> CoreResult<Value> {
    Ok(match value {
        AttributeValue::Null => Value::Null,
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::N(n) => Value::Number(Number::parse(n)?),
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::B(b) => Value::Bytes(b.clone()),
        AttributeValue::Ss(items) => Value::StringSet(items.iter().cloned().collect()),
        AttributeValue::Ns(items) => Value::NumberSet(
            items
                .iter()
                .map(|n| Number::parse(n))
                .collect::<CoreResult<_>>()?,
        ),
        AttributeValue::Bs(items) => Value::BytesSet(items.iter().cloned().collect()),
        AttributeValue::L(items) => Value::List(items.iter().map(wire_to_value).collect::<CoreResult<_>>()?),
        AttributeValue::M(entries) => Value::Map(
            entries
                .iter()
                .map(|(k, v)| Ok((k.clone(), wire_to_value(v)?)))
                .collect::<CoreResult<_>>()?,
        ),
    })
}

/// Serialize a domain value as canonical JSON: sorted keys, no whitespace.
///
/// Bytes and sets have no JSON form and are rejected.
pub fn canonical_json(value: &Value) -> CoreResult<String> {
    let json = to_json(value)?;
    serde_json::to_string(&json).map_err(|e| CoreError::validation(e.to_string()))
}

/// Parse JSON text into a domain value.
pub fn parse_json(text: &str) -> CoreResult<Value> {
    let json: Json = serde_json::from_str(text)
        .map_err(|e| CoreError::validation(format!("invalid JSON attribute: {e}")))?;
    from_json(&json)
}

fn to_json(value: &Value) -> CoreResult<Json> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) => number_to_json(n)?,
        Value::String(s) => Json::String(s.clone()),
        Value::List(items) => Json::Array(items.iter().map(to_json).collect::<CoreResult<_>>()?),
        Value::Map(entries) => Json::Object(
            entries
                .iter()
                .map(|(k, v)| Ok((k.clone(), to_json(v)?)))
                .collect::<CoreResult<_>>()?,
        ),
        other => {
            return Err(CoreError::validation(format!(
                "{} values cannot be stored as JSON",
                other.kind()
            )))
        }
    })
}

fn number_to_json(n: &Number) -> CoreResult<Json> {
    let text = n.as_str();
    let integral = !text.contains(['.', 'e', 'E']);
    if integral {
        if let Ok(i) = text.parse::<i64>() {
            return Ok(Json::from(i));
        }
        if let Ok(u) = text.parse::<u64>() {
            return Ok(Json::from(u));
        }
    }
    n.as_f64()
        .and_then(serde_json::Number::from_f64)
        .map(Json::Number)
        .ok_or_else(|| CoreError::validation(format!("number {text} cannot be stored as JSON")))
}

fn from_json(json: &Json) -> CoreResult<Value> {
    Ok(match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => Value::Number(Number::parse(&n.to_string())?),
        Json::String(s) => Value::String(s.clone()),
        Json::Array(items) => Value::List(items.iter().map(from_json).collect::<CoreResult<_>>()?),
        Json::Object(entries) => Value::Map(
            entries
                .iter()
                .map(|(k, v)| Ok((k.clone(), from_json(v)?)))
                .collect::<CoreResult<BTreeMap<_, _>>>()?,
        ),
    })
}

/// Turn a list into the matching typed set. Scalars pass through so that
/// single elements (`contains` operands) encode as themselves.
fn normalize_set(value: Value) -> CoreResult<Value> {
    let Value::List(items) = value else {
        return Ok(value);
    };
    if items.is_empty() {
        return Ok(Value::StringSet(BTreeSet::new()));
    }
    match &items[0] {
        Value::String(_) => items
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(s),
                other => Err(mixed_set(&other)),
            })
            .collect::<CoreResult<BTreeSet<_>>>()
            .map(Value::StringSet),
        Value::Number(_) => items
            .into_iter()
            .map(|v| match v {
                Value::Number(n) => Ok(n),
                other => Err(mixed_set(&other)),
            })
            .collect::<CoreResult<BTreeSet<_>>>()
            .map(Value::NumberSet),
        Value::Bytes(_) => items
            .into_iter()
            .map(|v| match v {
                Value::Bytes(b) => Ok(b),
                other => Err(mixed_set(&other)),
            })
            .collect::<CoreResult<BTreeSet<_>>>()
            .map(Value::BytesSet),
        other => Err(CoreError::validation(format!(
            "set elements must be strings, numbers or bytes, found {}",
            other.kind()
        ))),
    }
}

fn mixed_set(found: &Value) -> CoreError {
    CoreError::validation(format!("set elements must share one type, found {}", found.kind()))
}

fn is_empty_set(value: &Value) -> bool {
    match value {
        Value::StringSet(s) => s.is_empty(),
        Value::NumberSet(s) => s.is_empty(),
        Value::BytesSet(s) => s.is_empty(),
        _ => false,
    }
}

/// Encodes and decodes items of one model.
#[derive(Debug, Clone)]
pub struct ItemCodec {
    model: Arc<ModelDefinition>,
    cipher: Option<EnvelopeCipher>,
}

impl ItemCodec {
    /// Create a codec for `model`.
    ///
    /// # Errors
    ///
    /// [`CoreError::EncryptionNotConfigured`] if the model has encrypted
    /// attributes and no cipher is supplied.
    pub fn new(model: Arc<ModelDefinition>, cipher: Option<EnvelopeCipher>) -> CoreResult<Self> {
        if model.has_encrypted() && cipher.is_none() {
            return Err(CoreError::EncryptionNotConfigured);
        }
        Ok(Self { model, cipher })
    }

    /// The model.
    pub fn model(&self) -> &ModelDefinition {
        &self.model
    }

    /// The shared model handle.
    pub fn model_arc(&self) -> &Arc<ModelDefinition> {
        &self.model
    }

    /// Encode one attribute value without encrypting it.
    ///
    /// Used for expression operands, where encrypted attributes are never
    /// allowed.
    pub fn encode_plain(&self, attr: &AttributeDefinition, value: Value) -> CoreResult<AttributeValue> {
        let mut value = value;
        if let Some(converter) = attr.converter_ref() {
            if !value.is_null() {
                value = converter.to_store(value)?;
            }
        }

        if attr.is_set() {
            value = normalize_set(value)?;
            if is_empty_set(&value) {
                return Ok(AttributeValue::Null);
            }
        }

        if attr.is_json() && !value.is_null() {
            return Ok(AttributeValue::S(canonical_json(&value)?));
        }

        if attr.is_binary() {
            return match value {
                Value::Null => Ok(AttributeValue::Null),
                Value::Bytes(b) => Ok(AttributeValue::B(b)),
                Value::String(s) => Ok(AttributeValue::B(s.into_bytes())),
                other => Err(CoreError::validation(format!(
                    "binary field {} requires bytes, found {}",
                    attr.field_name(),
                    other.kind()
                ))),
            };
        }

        value_to_wire(&value)
    }

    /// Encode one attribute value, sealing it if the attribute is encrypted.
    pub fn encode_value(&self, attr: &AttributeDefinition, value: Value) -> CoreResult<AttributeValue> {
        let av = self.encode_plain(attr, value)?;
        if !attr.is_encrypted() {
            return Ok(av);
        }
        let cipher = self.cipher.as_ref().ok_or(CoreError::EncryptionNotConfigured)?;
        cipher.encrypt(&av, attr.attribute_name())
    }

    /// Decode one attribute value, opening it first if encrypted.
    pub fn decode_value(&self, attr: &AttributeDefinition, av: &AttributeValue) -> CoreResult<Value> {
        let opened;
        let av = if attr.is_encrypted() {
            let cipher = self.cipher.as_ref().ok_or(CoreError::EncryptionNotConfigured)?;
            opened = cipher.decrypt(av, attr.attribute_name())?;
            &opened
        } else {
            av
        };

        let mut value = wire_to_value(av)?;

        if attr.is_json() {
            if let Value::String(text) = &value {
                value = parse_json(text)?;
            }
        }

        if let Some(converter) = attr.converter_ref() {
            if !value.is_null() {
                value = converter.from_store(value)?;
            }
        }

        Ok(value)
    }

    /// Encode a whole record.
    ///
    /// Omit-if-empty attributes with empty values are skipped; absent fields
    /// are stored as NULL unless omitted.
    pub fn encode_item(&self, mut fields: Fields) -> CoreResult<Item> {
        let mut item = Item::new();
        for attr in self.model.attributes() {
            let value = fields.take(attr.field_name()).unwrap_or(Value::Null);
            if attr.is_key() && value.is_null() {
                continue;
            }
            if attr.is_omit_empty() && value.is_empty() {
                continue;
            }
            item.insert(attr.attribute_name().to_string(), self.encode_value(attr, value)?);
        }

        if !item.contains_key(self.model.partition_key().attribute_name()) {
            return Err(CoreError::validation("missing pk"));
        }
        if let Some(sk) = self.model.sort_key() {
            if !item.contains_key(sk.attribute_name()) {
                return Err(CoreError::validation("missing sk"));
            }
        }
        Ok(item)
    }

    /// Encode a primary key.
    pub fn encode_key(&self, pk: Value, sk: Option<Value>) -> CoreResult<Item> {
        if pk.is_null() {
            return Err(CoreError::validation("pk is required"));
        }
        let sk = sk.filter(|v| !v.is_null());
        let mut key = Item::new();
        let pk_attr = self.model.partition_key();
        key.insert(pk_attr.attribute_name().to_string(), self.encode_value(pk_attr, pk)?);

        match (self.model.sort_key(), sk) {
            (None, Some(_)) => return Err(CoreError::validation("model does not define sk")),
            (Some(_), None) => return Err(CoreError::validation("sk is required")),
            (Some(sk_attr), Some(sk)) => {
                key.insert(sk_attr.attribute_name().to_string(), self.encode_value(sk_attr, sk)?);
            }
            (None, None) => {}
        }
        Ok(key)
    }

    /// Decode every declared attribute present in `item`.
    ///
    /// Undeclared attributes are ignored.
    pub fn decode_item(&self, item: &Item) -> CoreResult<Fields> {
        let mut fields = Fields::new();
        for attr in self.model.attributes() {
            if let Some(av) = item.get(attr.attribute_name()) {
                fields.insert(attr.field_name(), self.decode_value(attr, av)?);
            }
        }
        Ok(fields)
    }

    /// The table key attributes of an item.
    pub fn key_of(&self, item: &Item) -> Item {
        self.model
            .key_attribute_names()
            .into_iter()
            .filter_map(|name| item.get(name).map(|v| (name.to_string(), v.clone())))
            .collect()
    }
}

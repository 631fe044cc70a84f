//! The single-key JSON form of attribute values: `{"S":"x"}`, `{"N":"1"}`.
//!
//! This is the shape used for the last-evaluated key inside pagination
//! cursors. Binary payloads are standard base64.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::de::{self, Deserialize, Deserializer};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value as Json};

use crate::error::{CodecError, CodecResult};
use crate::tagged;
use crate::value::AttributeValue;

impl Serialize for AttributeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            Self::S(s) => map.serialize_entry("S", s)?,
            Self::N(n) => map.serialize_entry("N", n)?,
            Self::B(b) => map.serialize_entry("B", &STANDARD.encode(b))?,
            Self::Bool(b) => map.serialize_entry("BOOL", b)?,
            Self::Null => map.serialize_entry("NULL", &true)?,
            Self::Ss(items) => map.serialize_entry("SS", items)?,
            Self::Ns(items) => map.serialize_entry("NS", items)?,
            Self::Bs(items) => {
                let encoded: Vec<String> = items.iter().map(|b| STANDARD.encode(b)).collect();
                map.serialize_entry("BS", &encoded)?;
            }
            Self::L(items) => map.serialize_entry("L", items)?,
            Self::M(entries) => map.serialize_entry("M", entries)?,
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for AttributeValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = Json::deserialize(deserializer)?;
        from_wire_json(&json).map_err(de::Error::custom)
    }
}

/// Render a value in the single-key JSON form.
pub fn to_wire_json(value: &AttributeValue) -> Json {
    // Serializing into serde_json::Value cannot fail for this type.
    serde_json::to_value(value).unwrap_or(Json::Null)
}

/// Parse a value from the single-key JSON form.
///
/// The envelope-plaintext shape (`{"t":"S","s":"x"}`) is accepted as well, so
/// tokens written by either renderer decode the same way.
pub fn from_wire_json(json: &Json) -> CodecResult<AttributeValue> {
    let obj = json
        .as_object()
        .ok_or_else(|| CodecError::invalid_shape("attribute value must be an object"))?;

    if obj.contains_key("t") {
        return tagged::from_tagged_value(json);
    }
    if obj.len() != 1 {
        return Err(CodecError::invalid_shape(format!(
            "attribute value must have exactly one tag (found {})",
            obj.len()
        )));
    }

    let (tag, payload) = obj
        .iter()
        .next()
        .ok_or_else(|| CodecError::invalid_shape("attribute value has no tag"))?;

    match tag.as_str() {
        "S" => Ok(AttributeValue::S(expect_str(payload, tag)?.to_string())),
        "N" => Ok(AttributeValue::N(expect_str(payload, tag)?.to_string())),
        "B" => Ok(AttributeValue::B(decode_b64(expect_str(payload, tag)?, tag)?)),
        "BOOL" => payload
            .as_bool()
            .map(AttributeValue::Bool)
            .ok_or_else(|| CodecError::invalid_shape("BOOL must be a boolean")),
        "NULL" => match payload {
            Json::Bool(true) => Ok(AttributeValue::Null),
            _ => Err(CodecError::invalid_shape("NULL must be true")),
        },
        "SS" => Ok(AttributeValue::Ss(string_list(payload, tag)?)),
        "NS" => Ok(AttributeValue::Ns(string_list(payload, tag)?)),
        "BS" => string_list(payload, tag)?
            .iter()
            .map(|s| decode_b64(s, tag))
            .collect::<CodecResult<Vec<_>>>()
            .map(AttributeValue::Bs),
        "L" => payload
            .as_array()
            .ok_or_else(|| CodecError::invalid_shape("L must be an array"))?
            .iter()
            .map(from_wire_json)
            .collect::<CodecResult<Vec<_>>>()
            .map(AttributeValue::L),
        "M" => from_wire_json_map(
            payload
                .as_object()
                .ok_or_else(|| CodecError::invalid_shape("M must be an object"))?,
        )
        .map(AttributeValue::M),
        other => Err(CodecError::unsupported_tag(other)),
    }
}

/// Parse every entry of a JSON object as a single-key attribute value.
pub fn from_wire_json_map(obj: &Map<String, Json>) -> CodecResult<BTreeMap<String, AttributeValue>> {
    obj.iter()
        .map(|(k, v)| Ok((k.clone(), from_wire_json(v)?)))
        .collect()
}

fn expect_str<'a>(json: &'a Json, tag: &str) -> CodecResult<&'a str> {
    json.as_str()
        .ok_or_else(|| CodecError::invalid_shape(format!("{tag} must be a string")))
}

fn string_list(json: &Json, tag: &str) -> CodecResult<Vec<String>> {
    json.as_array()
        .ok_or_else(|| CodecError::invalid_shape(format!("{tag} must be an array")))?
        .iter()
        .map(|item| expect_str(item, tag).map(str::to_string))
        .collect()
}

pub(crate) fn decode_b64(s: &str, field: &str) -> CodecResult<Vec<u8>> {
    STANDARD
        .decode(s)
        .map_err(|_| CodecError::invalid_base64(field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_single_key_objects() {
        assert_eq!(to_wire_json(&AttributeValue::from("x")), json!({"S": "x"}));
        assert_eq!(to_wire_json(&AttributeValue::Null), json!({"NULL": true}));
        assert_eq!(
            to_wire_json(&AttributeValue::B(vec![1, 2, 3])),
            json!({"B": "AQID"})
        );
    }

    #[test]
    fn parses_nested_values() {
        let json = json!({"M": {"b": {"L": [{"N": "1"}, {"BOOL": false}]}, "a": {"BS": ["AQ=="]}}});
        let value = from_wire_json(&json).unwrap();

        let m = value.as_m().unwrap();
        assert_eq!(m["a"], AttributeValue::Bs(vec![vec![1]]));
        assert_eq!(
            m["b"],
            AttributeValue::L(vec![AttributeValue::number(1), AttributeValue::Bool(false)])
        );
    }

    #[test]
    fn accepts_tagged_shape() {
        let value = from_wire_json(&json!({"t": "S", "s": "x"})).unwrap();
        assert_eq!(value, AttributeValue::from("x"));
    }

    #[test]
    fn rejects_bad_shapes() {
        assert!(from_wire_json(&json!("x")).is_err());
        assert!(from_wire_json(&json!({"S": 1})).is_err());
        assert!(from_wire_json(&json!({"S": "a", "N": "1"})).is_err());
        assert!(from_wire_json(&json!({"NULL": false})).is_err());
        assert!(from_wire_json(&json!({"B": "***"})).is_err());
        assert!(matches!(
            from_wire_json(&json!({"X": "1"})),
            Err(CodecError::UnsupportedTag { .. })
        ));
    }

    #[test]
    fn serde_roundtrip() {
        let value = AttributeValue::L(vec![
            AttributeValue::Ns(vec!["1".into(), "2.5".into()]),
            AttributeValue::Null,
        ]);
        let text = serde_json::to_string(&value).unwrap();
        assert_eq!(text, r#"{"L":[{"NS":["1","2.5"]},{"NULL":true}]}"#);
        let back: AttributeValue = serde_json::from_str(&text).unwrap();
        assert_eq!(back, value);
    }
}

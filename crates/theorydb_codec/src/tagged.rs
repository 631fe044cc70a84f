//! The tagged JSON form of attribute values: `{"t":"S","s":"x"}`.
//!
//! This is the plaintext format sealed inside encryption envelopes. Field
//! order is fixed (`t s n b bool l m ss ns bs null`) and map keys are sorted,
//! so a given value always renders to the same bytes.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Serialize;
use serde_json::Value as Json;

use crate::error::{CodecError, CodecResult};
use crate::value::AttributeValue;
use crate::wire_json::decode_b64;

#[derive(Serialize, Default)]
struct Tagged<'a> {
    t: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    s: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    n: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    b: Option<String>,
    #[serde(rename = "bool", skip_serializing_if = "Option::is_none")]
    flag: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    l: Option<Vec<Tagged<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    m: Option<BTreeMap<&'a str, Tagged<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ss: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ns: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bs: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    null: Option<bool>,
}

impl<'a> Tagged<'a> {
    fn from_value(value: &'a AttributeValue) -> Self {
        let t = value.tag();
        match value {
            AttributeValue::S(s) => Self { t, s: Some(s), ..Self::default() },
            AttributeValue::N(n) => Self { t, n: Some(n), ..Self::default() },
            AttributeValue::B(b) => Self {
                t,
                b: Some(STANDARD.encode(b)),
                ..Self::default()
            },
            AttributeValue::Bool(b) => Self { t, flag: Some(*b), ..Self::default() },
            AttributeValue::Null => Self { t, null: Some(true), ..Self::default() },
            AttributeValue::Ss(items) => Self { t, ss: Some(items), ..Self::default() },
            AttributeValue::Ns(items) => Self { t, ns: Some(items), ..Self::default() },
            AttributeValue::Bs(items) => Self {
                t,
                bs: Some(items.iter().map(|b| STANDARD.encode(b)).collect()),
                ..Self::default()
            },
            AttributeValue::L(items) => Self {
                t,
                l: Some(items.iter().map(Tagged::from_value).collect()),
                ..Self::default()
            },
            AttributeValue::M(entries) => Self {
                t,
                m: Some(
                    entries
                        .iter()
                        .map(|(k, v)| (k.as_str(), Tagged::from_value(v)))
                        .collect(),
                ),
                ..Self::default()
            },
        }
    }
}

/// Render a value as compact tagged JSON bytes.
pub fn to_tagged_json(value: &AttributeValue) -> CodecResult<Vec<u8>> {
    serde_json::to_vec(&Tagged::from_value(value))
        .map_err(|e| CodecError::encoding_failed(e.to_string()))
}

/// Parse compact tagged JSON bytes.
pub fn from_tagged_json(bytes: &[u8]) -> CodecResult<AttributeValue> {
    let json: Json = serde_json::from_slice(bytes)?;
    from_tagged_value(&json)
}

/// Parse an already-decoded tagged JSON object.
///
/// Absent `l`/`m` payloads decode as empty, matching writers that omit
/// empty collections.
pub fn from_tagged_value(json: &Json) -> CodecResult<AttributeValue> {
    let obj = json
        .as_object()
        .ok_or_else(|| CodecError::invalid_shape("tagged value must be an object"))?;
    let tag = obj
        .get("t")
        .and_then(Json::as_str)
        .ok_or_else(|| CodecError::invalid_shape("tagged value is missing t"))?;

    let field = |name: &str| obj.get(name);
    let string = |name: &str| -> CodecResult<String> {
        field(name)
            .and_then(Json::as_str)
            .map(str::to_string)
            .ok_or_else(|| CodecError::invalid_shape(format!("{tag} requires string field {name}")))
    };
    let strings = |name: &str| -> CodecResult<Vec<String>> {
        field(name)
            .and_then(Json::as_array)
            .ok_or_else(|| CodecError::invalid_shape(format!("{tag} requires array field {name}")))?
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| CodecError::invalid_shape(format!("{name} must hold strings")))
            })
            .collect()
    };

    match tag {
        "S" => string("s").map(AttributeValue::S),
        "N" => string("n").map(AttributeValue::N),
        "B" => decode_b64(&string("b")?, "b").map(AttributeValue::B),
        "BOOL" => field("bool")
            .and_then(Json::as_bool)
            .map(AttributeValue::Bool)
            .ok_or_else(|| CodecError::invalid_shape("BOOL requires boolean field bool")),
        "NULL" => Ok(AttributeValue::Null),
        "SS" => strings("ss").map(AttributeValue::Ss),
        "NS" => strings("ns").map(AttributeValue::Ns),
        "BS" => strings("bs")?
            .iter()
            .map(|s| decode_b64(s, "bs"))
            .collect::<CodecResult<Vec<_>>>()
            .map(AttributeValue::Bs),
        "L" => match field("l") {
            None | Some(Json::Null) => Ok(AttributeValue::L(Vec::new())),
            Some(Json::Array(items)) => items
                .iter()
                .map(from_tagged_value)
                .collect::<CodecResult<Vec<_>>>()
                .map(AttributeValue::L),
            Some(_) => Err(CodecError::invalid_shape("L requires array field l")),
        },
        "M" => match field("m") {
            None | Some(Json::Null) => Ok(AttributeValue::M(BTreeMap::new())),
            Some(Json::Object(entries)) => entries
                .iter()
                .map(|(k, v)| Ok((k.clone(), from_tagged_value(v)?)))
                .collect::<CodecResult<BTreeMap<_, _>>>()
                .map(AttributeValue::M),
            Some(_) => Err(CodecError::invalid_shape("M requires object field m")),
        },
        other => Err(CodecError::unsupported_tag(other)),
    }
}

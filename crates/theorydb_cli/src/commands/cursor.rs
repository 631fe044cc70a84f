//! Cursor commands.

use serde_json::{json, Value as Json};
use theorydb_codec::{to_wire_json, Item};
use theorydb_core::{decode_cursor, encode_cursor, SortDirection};
use tracing::debug;

use super::{CliError, CliResult};

/// Decode `token` and render it as pretty JSON.
///
/// `index` and `sort` are printed as `null` when the token has none.
pub fn decode(token: &str) -> CliResult<String> {
    let cursor = decode_cursor(token)?;
    debug!(
        attributes = cursor.last_key.len(),
        index = ?cursor.index,
        "decoded cursor"
    );

    let last_key: serde_json::Map<String, Json> = cursor
        .last_key
        .iter()
        .map(|(name, value)| (name.clone(), to_wire_json(value)))
        .collect();
    let rendered = json!({
        "lastKey": last_key,
        "index": cursor.index,
        "sort": cursor.sort.map(|sort| sort.as_str()),
    });
    serde_json::to_string_pretty(&rendered).map_err(CliError::Render)
}

/// Encode a wire JSON key as a token. An empty key encodes as `""`.
pub fn encode(key: &str, index: Option<&str>, sort: Option<SortDirection>) -> CliResult<String> {
    let last_key: Item = serde_json::from_str(key).map_err(CliError::InvalidKey)?;
    debug!(attributes = last_key.len(), ?index, "encoding cursor");
    Ok(encode_cursor(&last_key, index, sort)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode() {
        let token = encode(r#"{"pk":{"S":"A"},"sk":{"N":"7"}}"#, Some("byName"), Some(SortDirection::Desc)).unwrap();
        let decoded: Json = serde_json::from_str(&decode(&token).unwrap()).unwrap();
        assert_eq!(
            decoded,
            json!({
                "lastKey": {"pk": {"S": "A"}, "sk": {"N": "7"}},
                "index": "byName",
                "sort": "DESC",
            })
        );
    }

    #[test]
    fn absent_fields_render_as_null() {
        let token = encode(r#"{"pk":{"S":"A"}}"#, None, None).unwrap();
        let decoded: Json = serde_json::from_str(&decode(&token).unwrap()).unwrap();
        assert_eq!(decoded["index"], Json::Null);
        assert_eq!(decoded["sort"], Json::Null);
    }

    #[test]
    fn empty_key_is_empty_token() {
        assert_eq!(encode("{}", None, None).unwrap(), "");
    }

    #[test]
    fn bad_input_is_reported() {
        assert!(matches!(encode("[1]", None, None), Err(CliError::InvalidKey(_))));
        let err = decode("not-a-cursor").unwrap_err();
        assert_eq!(err.to_string(), "validation error: invalid cursor");
    }
}

//! Opaque pagination cursors.
//!
//! A cursor is the base64url (unpadded) encoding of compact JSON:
//!
//! ```text
//! {"lastKey":{"pk":{"S":"A"}},"index":"byEmail","sort":"ASC"}
//! ```
//!
//! `index` and `sort` are omitted when absent. Decoding is lenient about
//! them: a non-string `index` or a `sort` other than `ASC`/`DESC` is
//! dropped rather than rejected.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::Serialize;
use serde_json::Value as Json;
use theorydb_codec::{from_wire_json_map, CodecError, Item};

use crate::error::{CoreError, CoreResult};

/// Scan direction recorded in a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
    /// Ascending sort key order.
    Asc,
    /// Descending sort key order.
    Desc,
}

impl SortDirection {
    /// Direction for a query's `scan_index_forward` flag.
    pub fn from_forward(forward: bool) -> Self {
        if forward {
            SortDirection::Asc
        } else {
            SortDirection::Desc
        }
    }

    /// `ASC` or `DESC`.
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }

    fn parse(text: &str) -> Option<Self> {
        match text {
            "ASC" => Some(SortDirection::Asc),
            "DESC" => Some(SortDirection::Desc),
            _ => None,
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded continuation token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cursor {
    /// Last evaluated key of the previous page.
    pub last_key: Item,
    /// Index the page was read from.
    pub index: Option<String>,
    /// Sort direction of the originating query.
    pub sort: Option<SortDirection>,
}

#[derive(Serialize)]
struct Token<'a> {
    #[serde(rename = "lastKey")]
    last_key: &'a Item,
    #[serde(skip_serializing_if = "Option::is_none")]
    index: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sort: Option<&'static str>,
}

impl Cursor {
    /// Create a cursor.
    pub fn new(last_key: Item, index: Option<String>, sort: Option<SortDirection>) -> Self {
        Self {
            last_key,
            index,
            sort,
        }
    }

    /// Encode as a token; an empty last key encodes as `""`.
    pub fn encode(&self) -> CoreResult<String> {
        encode_cursor(&self.last_key, self.index.as_deref(), self.sort)
    }

    /// Check the cursor against the read it continues.
    ///
    /// Only fields the cursor carries are compared. `operation` names the
    /// read in the index mismatch message (`query` or `scan`).
    pub fn ensure_matches(
        &self,
        index: Option<&str>,
        sort: Option<SortDirection>,
        operation: &str,
    ) -> CoreResult<()> {
        if let Some(cursor_index) = &self.index {
            if Some(cursor_index.as_str()) != index {
                return Err(CoreError::validation(format!(
                    "cursor index does not match {operation}"
                )));
            }
        }
        if let (Some(cursor_sort), Some(expected)) = (self.sort, sort) {
            if cursor_sort != expected {
                return Err(CoreError::validation("cursor sort does not match query"));
            }
        }
        Ok(())
    }
}

/// Encode a last-evaluated key with its index and sort direction.
pub fn encode_cursor(
    last_key: &Item,
    index: Option<&str>,
    sort: Option<SortDirection>,
) -> CoreResult<String> {
    if last_key.is_empty() {
        return Ok(String::new());
    }
    let token = Token {
        last_key,
        index,
        sort: sort.map(|s| s.as_str()),
    };
    let json = serde_json::to_vec(&token).map_err(CodecError::from)?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

/// Decode a token produced by [`encode_cursor`].
///
/// # Errors
///
/// `cursor is empty` for a blank token; `invalid cursor` for anything that
/// is not base64url JSON with an object `lastKey` of attribute values.
pub fn decode_cursor(token: &str) -> CoreResult<Cursor> {
    let raw = token.trim();
    if raw.is_empty() {
        return Err(CoreError::validation("cursor is empty"));
    }
    let invalid = || CoreError::validation("invalid cursor");

    let bytes = URL_SAFE_NO_PAD
        .decode(raw.trim_end_matches('='))
        .map_err(|_| invalid())?;
    let parsed: Json = serde_json::from_slice(&bytes).map_err(|_| invalid())?;
    let obj = parsed.as_object().ok_or_else(invalid)?;

    let last_key = obj
        .get("lastKey")
        .and_then(Json::as_object)
        .ok_or_else(invalid)?;
    let last_key = from_wire_json_map(last_key).map_err(|_| invalid())?;

    let index = obj.get("index").and_then(Json::as_str).map(str::to_string);
    let sort = obj
        .get("sort")
        .and_then(Json::as_str)
        .and_then(SortDirection::parse);

    Ok(Cursor {
        last_key,
        index,
        sort,
    })
}

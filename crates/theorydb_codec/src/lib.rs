//! # TheoryDB Codec
//!
//! The wire attribute value union shared by every TheoryDB crate, and its
//! two JSON renderings:
//!
//! - the single-key form (`{"S":"x"}`), used for cursor keys and as the
//!   serde representation of [`AttributeValue`]
//! - the tagged form (`{"t":"S","s":"x"}`), used as envelope plaintext
//!
//! Both renderings are canonical: map keys are sorted, output is compact,
//! and binary payloads are standard base64.
//!
//! ## Usage
//!
//! ```
//! use theorydb_codec::{from_tagged_json, to_tagged_json, AttributeValue};
//!
//! let value = AttributeValue::from("top-secret");
//! let bytes = to_tagged_json(&value).unwrap();
//! assert_eq!(bytes, br#"{"t":"S","s":"top-secret"}"#);
//!
//! let decoded = from_tagged_json(&bytes).unwrap();
//! assert_eq!(value, decoded);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod tagged;
mod value;
mod wire_json;

pub use error::{CodecError, CodecResult};
pub use tagged::{from_tagged_json, from_tagged_value, to_tagged_json};
pub use value::{AttributeValue, Item};
pub use wire_json::{from_wire_json, from_wire_json_map, to_wire_json};

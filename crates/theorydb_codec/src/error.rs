//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while converting attribute values to or from JSON.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to serialize a value to JSON.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to parse JSON input.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// A JSON object did not match any attribute value shape.
    #[error("invalid attribute value shape: {message}")]
    InvalidShape {
        /// Description of the shape mismatch.
        message: String,
    },

    /// A tag was not one of `S N B BOOL NULL SS NS BS L M`.
    #[error("unsupported attribute value tag: {tag}")]
    UnsupportedTag {
        /// The offending tag.
        tag: String,
    },

    /// A binary field was not valid base64.
    #[error("invalid base64 in field {field}")]
    InvalidBase64 {
        /// The field holding the bad payload.
        field: String,
    },
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }

    /// Create an invalid shape error.
    pub fn invalid_shape(message: impl Into<String>) -> Self {
        Self::InvalidShape {
            message: message.into(),
        }
    }

    /// Create an unsupported tag error.
    pub fn unsupported_tag(tag: impl Into<String>) -> Self {
        Self::UnsupportedTag { tag: tag.into() }
    }

    /// Create an invalid base64 error.
    pub fn invalid_base64(field: impl Into<String>) -> Self {
        Self::InvalidBase64 {
            field: field.into(),
        }
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        Self::decoding_failed(err.to_string())
    }
}

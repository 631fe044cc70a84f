//! Error types for TheoryDB core.

use thiserror::Error;

use crate::backend::{codes, BackendError};

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in TheoryDB core operations.
///
/// Backend failures are mapped into this taxonomy exactly once, at the
/// table boundary, through `From<BackendError>`.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Attribute value JSON error.
    #[error("codec error: {0}")]
    Codec(#[from] theorydb_codec::CodecError),

    /// A condition expression evaluated to false.
    #[error("condition failed: {message}")]
    ConditionFailed {
        /// Message from the store.
        message: String,
    },

    /// The requested item does not exist.
    #[error("item not found")]
    NotFound,

    /// Malformed input, expression, cursor or model.
    #[error("validation error: {message}")]
    Validation {
        /// Description of the problem.
        message: String,
    },

    /// A batch call still had unprocessed work after every retry.
    #[error("{operation} exceeded retry budget with {unprocessed} unprocessed")]
    BatchRetryExceeded {
        /// `batch_get` or `batch_write`.
        operation: &'static str,
        /// Keys or writes that were never processed.
        unprocessed: usize,
    },

    /// A transaction was cancelled for reasons other than a failed condition.
    #[error("transaction canceled: {}", reason_codes.join(", "))]
    TransactionCanceled {
        /// One reason code per action.
        reason_codes: Vec<String>,
        /// Message from the store.
        message: String,
    },

    /// The model has encrypted attributes but the table has no key service.
    #[error("encryption is not configured for a model with encrypted attributes")]
    EncryptionNotConfigured,

    /// Another holder owns an unexpired lease.
    #[error("lease is held by another owner")]
    LeaseHeld,

    /// The lease was lost: token mismatch or already expired.
    #[error("lease is not owned by this holder")]
    LeaseNotOwned,

    /// An update succeeded but the store returned no attributes.
    #[error("{operation} did not return attributes")]
    NoAttributesReturned {
        /// The operation that expected attributes.
        operation: &'static str,
    },

    /// The operation was cancelled through its cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// Any other backend failure.
    #[error("backend error {code}: {message}")]
    Backend {
        /// Error code from the store.
        code: String,
        /// Message from the store.
        message: String,
    },
}

impl CoreError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a condition failed error.
    pub fn condition_failed(message: impl Into<String>) -> Self {
        Self::ConditionFailed {
            message: message.into(),
        }
    }

    /// Create a generic backend error.
    pub fn backend(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Returns true for transient backend failures worth another attempt:
    /// throttling and server-side errors.
    ///
    /// Validation errors are local and never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Backend { code, .. } if codes::is_transient(code))
    }

    /// Returns true if this is a failed condition, including one promoted
    /// from a cancelled transaction.
    pub fn is_condition_failed(&self) -> bool {
        matches!(self, CoreError::ConditionFailed { .. })
    }
}

impl From<BackendError> for CoreError {
    fn from(err: BackendError) -> Self {
        match err.code.as_str() {
            codes::CONDITIONAL_CHECK_FAILED => Self::condition_failed(err.message),
            codes::VALIDATION => Self::validation(err.message),
            codes::RESOURCE_NOT_FOUND => Self::NotFound,
            codes::TRANSACTION_CANCELED => {
                let reason_codes: Vec<String> = err
                    .cancellation_reasons
                    .into_iter()
                    .map(|reason| reason.code)
                    .collect();
                let condition_failed = reason_codes
                    .iter()
                    .any(|code| code == codes::REASON_CONDITIONAL_CHECK_FAILED)
                    || err.message.contains(codes::REASON_CONDITIONAL_CHECK_FAILED);
                if condition_failed {
                    Self::condition_failed(err.message)
                } else {
                    Self::TransactionCanceled {
                        reason_codes,
                        message: err.message,
                    }
                }
            }
            "" => Self::backend(codes::UNKNOWN, err.message),
            _ => Self::backend(err.code, err.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CancellationReason;

    #[test]
    fn maps_known_codes() {
        assert!(matches!(
            CoreError::from(BackendError::conditional_check_failed()),
            CoreError::ConditionFailed { .. }
        ));
        assert!(matches!(
            CoreError::from(BackendError::validation("bad")),
            CoreError::Validation { message } if message == "bad"
        ));
        assert!(matches!(
            CoreError::from(BackendError::new(codes::RESOURCE_NOT_FOUND, "no table")),
            CoreError::NotFound
        ));
    }

    #[test]
    fn unknown_code_falls_back() {
        let err = CoreError::from(BackendError::new("", "boom"));
        assert!(matches!(err, CoreError::Backend { ref code, .. } if code == "UnknownError"));
        assert!(!err.is_retryable());

        let err = CoreError::from(BackendError::throttled());
        assert!(matches!(err, CoreError::Backend { ref code, .. } if code == codes::THROUGHPUT_EXCEEDED));
        assert!(err.is_retryable());
    }

    #[test]
    fn only_transient_codes_are_retryable() {
        for code in [
            codes::THROTTLING,
            codes::REQUEST_LIMIT_EXCEEDED,
            codes::INTERNAL_SERVER_ERROR,
            codes::SERVICE_UNAVAILABLE,
        ] {
            assert!(CoreError::from(BackendError::new(code, "try again")).is_retryable(), "{code}");
        }
        for code in ["AccessDeniedException", "ItemCollectionSizeLimitExceededException"] {
            assert!(!CoreError::from(BackendError::new(code, "no")).is_retryable(), "{code}");
        }
    }

    #[test]
    fn cancelled_transaction_promotes_condition_failure() {
        let err = CoreError::from(BackendError::transaction_canceled(vec![
            CancellationReason::new(codes::REASON_NONE),
            CancellationReason::new(codes::REASON_CONDITIONAL_CHECK_FAILED),
        ]));
        assert!(err.is_condition_failed());
    }

    #[test]
    fn cancelled_transaction_keeps_reason_codes() {
        let err = CoreError::from(BackendError::transaction_canceled(vec![
            CancellationReason::new("TransactionConflict"),
            CancellationReason::new(codes::REASON_NONE),
        ]));
        match err {
            CoreError::TransactionCanceled { reason_codes, .. } => {
                assert_eq!(reason_codes, vec!["TransactionConflict", "None"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn error_display() {
        let err = CoreError::BatchRetryExceeded {
            operation: "batch_write",
            unprocessed: 3,
        };
        assert_eq!(
            err.to_string(),
            "batch_write exceeded retry budget with 3 unprocessed"
        );
        assert!(!CoreError::validation("x").is_retryable());
        assert!(!CoreError::Cancelled.is_retryable());
    }
}

//! Table configuration.

use std::sync::Arc;

use crate::crypto::{EnvelopeCipher, KeyManagement, RandomSource, SystemRandom};
use crate::error::{CoreError, CoreResult};
use crate::retry::{BatchRetryPolicy, RetryConfig};

/// Most keys the store accepts in one `BatchGetItem` call.
pub const MAX_BATCH_GET_KEYS: usize = 100;

/// Most writes the store accepts in one `BatchWriteItem` call.
pub const MAX_BATCH_WRITE_ITEMS: usize = 25;

/// Most actions the store accepts in one `TransactWriteItems` call.
pub const MAX_TRANSACTION_ACTIONS: usize = 100;

/// Limits and retry settings for a table handle.
#[derive(Debug, Clone)]
pub struct TableConfig {
    /// Keys per `BatchGetItem` call.
    pub batch_get_chunk_size: usize,

    /// Writes per `BatchWriteItem` call.
    pub batch_write_chunk_size: usize,

    /// Resubmission policy for unprocessed batch work.
    pub batch_retry: BatchRetryPolicy,

    /// Settings for `query_with_retry` and `scan_with_retry`.
    pub retry: RetryConfig,

    /// Maximum actions in one transaction.
    pub max_transaction_actions: usize,

    /// Worker threads for a segmented scan when the caller does not say.
    pub scan_workers: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            batch_get_chunk_size: MAX_BATCH_GET_KEYS,
            batch_write_chunk_size: MAX_BATCH_WRITE_ITEMS,
            batch_retry: BatchRetryPolicy::default(),
            retry: RetryConfig::default(),
            max_transaction_actions: MAX_TRANSACTION_ACTIONS,
            scan_workers: 4,
        }
    }
}

impl TableConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the batch get chunk size.
    #[must_use]
    pub const fn batch_get_chunk_size(mut self, size: usize) -> Self {
        self.batch_get_chunk_size = size;
        self
    }

    /// Sets the batch write chunk size.
    #[must_use]
    pub const fn batch_write_chunk_size(mut self, size: usize) -> Self {
        self.batch_write_chunk_size = size;
        self
    }

    /// Sets the batch resubmission policy.
    #[must_use]
    pub const fn batch_retry(mut self, policy: BatchRetryPolicy) -> Self {
        self.batch_retry = policy;
        self
    }

    /// Sets the page retry settings.
    #[must_use]
    pub const fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the transaction size limit.
    #[must_use]
    pub const fn max_transaction_actions(mut self, max: usize) -> Self {
        self.max_transaction_actions = max;
        self
    }

    /// Sets the default segmented scan worker count.
    #[must_use]
    pub const fn scan_workers(mut self, workers: usize) -> Self {
        self.scan_workers = workers;
        self
    }

    /// Check every limit against the store's per-call caps.
    pub fn validate(&self) -> CoreResult<()> {
        check_limit(
            "batch_get_chunk_size",
            self.batch_get_chunk_size,
            MAX_BATCH_GET_KEYS,
        )?;
        check_limit(
            "batch_write_chunk_size",
            self.batch_write_chunk_size,
            MAX_BATCH_WRITE_ITEMS,
        )?;
        check_limit(
            "max_transaction_actions",
            self.max_transaction_actions,
            MAX_TRANSACTION_ACTIONS,
        )?;
        if self.scan_workers == 0 {
            return Err(CoreError::validation("scan_workers must be > 0"));
        }
        self.retry.validate()
    }
}

fn check_limit(name: &str, value: usize, max: usize) -> CoreResult<()> {
    if value == 0 || value > max {
        return Err(CoreError::validation(format!(
            "{name} must be between 1 and {max}"
        )));
    }
    Ok(())
}

/// Key service and master key for encrypted attributes.
#[derive(Clone)]
pub struct EncryptionConfig {
    /// Master key identifier passed to the key service.
    pub master_key_id: String,
    /// The key service.
    pub kms: Arc<dyn KeyManagement>,
    /// Nonce source.
    pub random: Arc<dyn RandomSource>,
}

impl EncryptionConfig {
    /// Encrypt under `master_key_id` with system randomness.
    pub fn new(kms: Arc<dyn KeyManagement>, master_key_id: impl Into<String>) -> Self {
        Self {
            master_key_id: master_key_id.into(),
            kms,
            random: Arc::new(SystemRandom),
        }
    }

    /// Use a different nonce source.
    #[must_use]
    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    pub(crate) fn cipher(&self) -> EnvelopeCipher {
        EnvelopeCipher::new(Arc::clone(&self.kms), self.master_key_id.clone())
            .with_random(Arc::clone(&self.random))
    }
}

impl std::fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionConfig")
            .field("master_key_id", &self.master_key_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn default_config() {
        let config = TableConfig::default();
        assert_eq!(config.batch_get_chunk_size, 100);
        assert_eq!(config.batch_write_chunk_size, 25);
        assert_eq!(config.max_transaction_actions, 100);
        assert_eq!(config.batch_retry.max_retries, 5);
        assert_eq!(config.retry.max_delay, Duration::from_secs(5));
    }

    #[test]
    fn builder_pattern() {
        let config = TableConfig::new()
            .batch_get_chunk_size(10)
            .batch_write_chunk_size(5)
            .scan_workers(2)
            .batch_retry(BatchRetryPolicy::new().max_retries(1));

        assert_eq!(config.batch_get_chunk_size, 10);
        assert_eq!(config.batch_write_chunk_size, 5);
        assert_eq!(config.scan_workers, 2);
        assert_eq!(config.batch_retry.max_retries, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn limits_are_capped_by_the_store() {
        assert!(TableConfig::default().validate().is_ok());

        let err = TableConfig::new().batch_get_chunk_size(200).validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "validation error: batch_get_chunk_size must be between 1 and 100"
        );
        let err = TableConfig::new().batch_write_chunk_size(26).validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "validation error: batch_write_chunk_size must be between 1 and 25"
        );
        let err = TableConfig::new().max_transaction_actions(500).validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "validation error: max_transaction_actions must be between 1 and 100"
        );
        assert!(TableConfig::new().batch_get_chunk_size(0).validate().is_err());
        assert!(TableConfig::new().scan_workers(0).validate().is_err());
        assert!(TableConfig::new()
            .retry(RetryConfig::new().backoff_factor(f64::NAN))
            .validate()
            .is_err());
    }
}

//! Data keys and the collaborators that produce them.

use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CoreError, CoreResult};

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// A plaintext AES-256 data key.
///
/// The key is automatically zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DataKey {
    bytes: [u8; KEY_SIZE],
}

impl DataKey {
    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CoreError::validation(format!(
                "data key must be {KEY_SIZE} bytes, got {}",
                bytes.len()
            )));
        }

        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Returns the key bytes. Never log or persist the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// A freshly generated data key: the plaintext for immediate use and the
/// wrapped form to store next to the ciphertext.
#[derive(Debug, Clone)]
pub struct GeneratedDataKey {
    /// Plaintext key.
    pub plaintext: DataKey,
    /// Key wrapped under the master key.
    pub wrapped: Vec<u8>,
}

/// A key-management service holding master keys.
pub trait KeyManagement: Send + Sync {
    /// Generate a fresh AES-256 data key under `master_key_id`.
    fn generate_data_key(&self, master_key_id: &str) -> CoreResult<GeneratedDataKey>;

    /// Unwrap a data key previously produced by `generate_data_key`.
    fn decrypt_data_key(&self, wrapped: &[u8], master_key_id: &str) -> CoreResult<DataKey>;
}

/// A source of random bytes for nonces.
///
/// Production code uses [`SystemRandom`]; tests inject a deterministic source.
pub trait RandomSource: Send + Sync {
    /// Fill `dest` with random bytes.
    fn fill_bytes(&self, dest: &mut [u8]);
}

/// Cryptographically secure randomness from the thread-local generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRandom;

impl RandomSource for SystemRandom {
    fn fill_bytes(&self, dest: &mut [u8]) {
        rand::thread_rng().fill_bytes(dest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_from_bytes() {
        let key = DataKey::from_bytes(&[7u8; KEY_SIZE]).unwrap();
        assert_eq!(key.as_bytes(), &[7u8; KEY_SIZE]);
        assert!(DataKey::from_bytes(&[0u8; 16]).is_err());
    }

    #[test]
    fn debug_is_redacted() {
        let key = DataKey::from_bytes(&[1u8; KEY_SIZE]).unwrap();
        let shown = format!("{key:?}");
        assert!(shown.contains("REDACTED"));
        assert!(!shown.contains("1, 1"));
    }

    #[test]
    fn system_random_fills() {
        let mut a = [0u8; NONCE_SIZE];
        let mut b = [0u8; NONCE_SIZE];
        SystemRandom.fill_bytes(&mut a);
        SystemRandom.fill_bytes(&mut b);
        assert_ne!(a, b);
    }
}

//! Deterministic stand-ins for the key service, randomness and time.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use theorydb_core::crypto::{DataKey, GeneratedDataKey, KeyManagement, RandomSource, KEY_SIZE};
use theorydb_core::{Clock, CoreError, CoreResult};

/// A key service that "wraps" data keys by prefixing the master key id and
/// XOR-ing the key bytes with a mask derived from it.
///
/// Each generated key is distinct. Unwrapping under a different master key
/// id fails.
#[derive(Debug, Default)]
pub struct StubKms {
    generated: AtomicUsize,
    unwrapped: AtomicUsize,
}

impl StubKms {
    /// A fresh key service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of data keys generated so far.
    pub fn generated(&self) -> usize {
        self.generated.load(Ordering::SeqCst)
    }

    /// Number of successful unwraps so far.
    pub fn unwrapped(&self) -> usize {
        self.unwrapped.load(Ordering::SeqCst)
    }

    fn mask(master_key_id: &str) -> u8 {
        master_key_id.bytes().fold(0x5a, |acc, b| acc.rotate_left(3) ^ b)
    }
}

impl KeyManagement for StubKms {
    fn generate_data_key(&self, master_key_id: &str) -> CoreResult<GeneratedDataKey> {
        let n = self.generated.fetch_add(1, Ordering::SeqCst);
        let key: [u8; KEY_SIZE] = std::array::from_fn(|i| (n as u8).wrapping_mul(31).wrapping_add(i as u8));

        let mask = Self::mask(master_key_id);
        let mut wrapped = Vec::with_capacity(1 + master_key_id.len() + KEY_SIZE);
        wrapped.push(master_key_id.len() as u8);
        wrapped.extend_from_slice(master_key_id.as_bytes());
        wrapped.extend(key.iter().map(|b| b ^ mask));

        Ok(GeneratedDataKey {
            plaintext: DataKey::from_bytes(&key)?,
            wrapped,
        })
    }

    fn decrypt_data_key(&self, wrapped: &[u8], master_key_id: &str) -> CoreResult<DataKey> {
        let invalid = || CoreError::backend("InvalidCiphertextException", "wrapped key rejected");
        let (&len, rest) = wrapped.split_first().ok_or_else(invalid)?;
        let len = usize::from(len);
        if rest.len() != len + KEY_SIZE || &rest[..len] != master_key_id.as_bytes() {
            return Err(invalid());
        }
        let mask = Self::mask(master_key_id);
        let key: Vec<u8> = rest[len..].iter().map(|b| b ^ mask).collect();
        self.unwrapped.fetch_add(1, Ordering::SeqCst);
        DataKey::from_bytes(&key)
    }
}

/// Randomness that fills every request with the same byte.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedRandom(pub u8);

impl RandomSource for FixedRandom {
    fn fill_bytes(&self, dest: &mut [u8]) {
        dest.fill(self.0);
    }
}

/// Randomness that fills each request with the next byte of a counter, so
/// consecutive nonces differ.
#[derive(Debug, Default)]
pub struct CountingRandom(AtomicU8);

impl RandomSource for CountingRandom {
    fn fill_bytes(&self, dest: &mut [u8]) {
        dest.fill(self.0.fetch_add(1, Ordering::SeqCst));
    }
}

/// A clock under test control. `sleep` advances time instead of blocking
/// and records the requested duration.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<f64>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    /// A clock reading `now` seconds since the epoch.
    pub fn at(now: f64) -> Self {
        Self {
            now: Mutex::new(now),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    /// Jump to `now`.
    pub fn set(&self, now: f64) {
        *self.now.lock() = now;
    }

    /// Move forward.
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by.as_secs_f64();
    }

    /// Every sleep requested so far.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

impl Clock for ManualClock {
    fn now_unix(&self) -> f64 {
        *self.now.lock()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_kms_binds_master_key() {
        let kms = StubKms::new();
        let generated = kms.generate_data_key("alias/a").unwrap();
        let unwrapped = kms.decrypt_data_key(&generated.wrapped, "alias/a").unwrap();
        assert_eq!(unwrapped.as_bytes(), generated.plaintext.as_bytes());
        assert!(kms.decrypt_data_key(&generated.wrapped, "alias/b").is_err());
        assert!(kms.decrypt_data_key(&[], "alias/a").is_err());

        let second = kms.generate_data_key("alias/a").unwrap();
        assert_ne!(second.plaintext.as_bytes(), generated.plaintext.as_bytes());
        assert_eq!((kms.generated(), kms.unwrapped()), (2, 1));
    }

    #[test]
    fn manual_clock_sleeps_forward() {
        let clock = ManualClock::at(10.0);
        clock.sleep(Duration::from_millis(1500));
        assert!((clock.now_unix() - 11.5).abs() < 1e-9);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(1500)]);
    }
}

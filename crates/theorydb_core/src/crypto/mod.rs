//! Envelope encryption for individual attributes.
//!
//! ## Security Model
//!
//! - AES-256-GCM with a fresh data key per sealed value
//! - Data keys come from a [`KeyManagement`] service and are stored only in
//!   wrapped form
//! - Unique 12-byte nonce per encryption, from an injectable [`RandomSource`]
//! - Associated data binds each ciphertext to its attribute name
//! - Plaintext keys are zeroized on drop
//! - Every decryption failure surfaces as the same error
//!
//! ## Usage
//!
//! ```ignore
//! use theorydb_core::crypto::EnvelopeCipher;
//!
//! let cipher = EnvelopeCipher::new(kms, "alias/app");
//! let sealed = cipher.encrypt(&AttributeValue::from("top-secret"), "secret")?;
//! let plain = cipher.decrypt(&sealed, "secret")?;
//! ```

mod envelope;
mod keys;

pub use envelope::{associated_data, Envelope, EnvelopeCipher, AAD_PREFIX, ENVELOPE_VERSION};
pub use keys::{
    DataKey, GeneratedDataKey, KeyManagement, RandomSource, SystemRandom, KEY_SIZE, NONCE_SIZE,
    TAG_SIZE,
};

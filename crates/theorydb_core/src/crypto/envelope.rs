//! Per-attribute envelope encryption with AES-256-GCM.

use std::collections::BTreeMap;
use std::sync::Arc;

use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use theorydb_codec::{from_tagged_json, to_tagged_json, AttributeValue};

use crate::crypto::keys::{DataKey, KeyManagement, RandomSource, SystemRandom, NONCE_SIZE};
use crate::error::{CoreError, CoreResult};

/// The only envelope version this crate reads or writes.
pub const ENVELOPE_VERSION: i64 = 1;

/// Fixed prefix of the associated data; the attribute name follows.
pub const AAD_PREFIX: &str = "theorydb:encrypted:v1|attr=";

const DECRYPT_FAILED: &str = "failed to decrypt encrypted envelope";

/// Associated data binding a ciphertext to its attribute.
pub fn associated_data(attribute_name: &str) -> Vec<u8> {
    format!("{AAD_PREFIX}{attribute_name}").into_bytes()
}

fn decrypt_failed() -> CoreError {
    CoreError::validation(DECRYPT_FAILED)
}

/// A sealed attribute value.
///
/// Stored as the wire map `{"v":1,"edk":B,"nonce":B,"ct":B}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Data key wrapped under the master key.
    pub wrapped_key: Vec<u8>,
    /// GCM nonce.
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext followed by the GCM tag.
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    /// Render as a wire map.
    pub fn to_attribute_value(&self) -> AttributeValue {
        let mut m = BTreeMap::new();
        m.insert("v".to_string(), AttributeValue::number(ENVELOPE_VERSION));
        m.insert("edk".to_string(), AttributeValue::B(self.wrapped_key.clone()));
        m.insert("nonce".to_string(), AttributeValue::B(self.nonce.to_vec()));
        m.insert("ct".to_string(), AttributeValue::B(self.ciphertext.clone()));
        AttributeValue::M(m)
    }

    /// Parse a wire map.
    ///
    /// Byte fields may be raw binary or base64 strings. Any shape problem,
    /// including an unsupported version, yields the one generic decryption
    /// error.
    pub fn from_attribute_value(value: &AttributeValue) -> CoreResult<Self> {
        let m = value.as_m().ok_or_else(decrypt_failed)?;

        let version = match m.get("v") {
            Some(AttributeValue::N(n)) | Some(AttributeValue::S(n)) => n.trim().parse::<i64>().ok(),
            _ => None,
        };
        if version != Some(ENVELOPE_VERSION) {
            return Err(decrypt_failed());
        }

        let bytes = |name: &str| -> CoreResult<Vec<u8>> {
            match m.get(name) {
                Some(AttributeValue::B(b)) => Ok(b.clone()),
                Some(AttributeValue::S(s)) => STANDARD.decode(s).map_err(|_| decrypt_failed()),
                _ => Err(decrypt_failed()),
            }
        };

        let nonce: [u8; NONCE_SIZE] = bytes("nonce")?
            .try_into()
            .map_err(|_| decrypt_failed())?;

        Ok(Self {
            wrapped_key: bytes("edk")?,
            nonce,
            ciphertext: bytes("ct")?,
        })
    }
}

/// Encrypts and decrypts attribute values under a master key.
///
/// Every call to [`seal`](Self::seal) asks the key service for a fresh data
/// key and draws a fresh nonce, so sealing the same value twice never
/// produces the same ciphertext.
#[derive(Clone)]
pub struct EnvelopeCipher {
    kms: Arc<dyn KeyManagement>,
    master_key_id: String,
    random: Arc<dyn RandomSource>,
}

impl EnvelopeCipher {
    /// Create a cipher using system randomness for nonces.
    pub fn new(kms: Arc<dyn KeyManagement>, master_key_id: impl Into<String>) -> Self {
        Self {
            kms,
            master_key_id: master_key_id.into(),
            random: Arc::new(SystemRandom),
        }
    }

    /// Replace the nonce source.
    #[must_use]
    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    /// The master key id.
    pub fn master_key_id(&self) -> &str {
        &self.master_key_id
    }

    /// Seal a value for `attribute_name`.
    pub fn seal(&self, value: &AttributeValue, attribute_name: &str) -> CoreResult<Envelope> {
        let data_key = self.kms.generate_data_key(&self.master_key_id)?;
        let plaintext = to_tagged_json(value)?;

        let mut nonce = [0u8; NONCE_SIZE];
        self.random.fill_bytes(&mut nonce);

        let cipher = cipher_for(&data_key.plaintext);
        let aad = associated_data(attribute_name);
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &plaintext,
                    aad: &aad,
                },
            )
            .map_err(|_| CoreError::validation("failed to encrypt attribute"))?;

        Ok(Envelope {
            wrapped_key: data_key.wrapped,
            nonce,
            ciphertext,
        })
    }

    /// Open an envelope sealed for `attribute_name`.
    ///
    /// # Errors
    ///
    /// Authentication failures (wrong attribute name, tampering, wrong key)
    /// and malformed plaintext all yield the same validation error. Errors
    /// from the key service pass through unchanged.
    pub fn open(&self, envelope: &Envelope, attribute_name: &str) -> CoreResult<AttributeValue> {
        let data_key = self
            .kms
            .decrypt_data_key(&envelope.wrapped_key, &self.master_key_id)?;

        let cipher = cipher_for(&data_key);
        let aad = associated_data(attribute_name);
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&envelope.nonce),
                Payload {
                    msg: &envelope.ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| decrypt_failed())?;

        from_tagged_json(&plaintext).map_err(|_| decrypt_failed())
    }

    /// Seal a value and render the envelope as a wire map.
    pub fn encrypt(&self, value: &AttributeValue, attribute_name: &str) -> CoreResult<AttributeValue> {
        Ok(self.seal(value, attribute_name)?.to_attribute_value())
    }

    /// Parse a wire map envelope and open it.
    pub fn decrypt(&self, sealed: &AttributeValue, attribute_name: &str) -> CoreResult<AttributeValue> {
        let envelope = Envelope::from_attribute_value(sealed)?;
        self.open(&envelope, attribute_name)
    }
}

impl std::fmt::Debug for EnvelopeCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeCipher")
            .field("master_key_id", &self.master_key_id)
            .finish_non_exhaustive()
    }
}

fn cipher_for(key: &DataKey) -> Aes256Gcm {
    Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()))
}

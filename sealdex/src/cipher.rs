//! Authenticated encryption of single field values.
//!
//! A value is sealed with an AEAD cipher under a per-field subkey and stored as
//! an *envelope*: a JSON object `{iv, value, mac}` (members base64-encoded) that
//! is itself base64-encoded so it fits any text column.

use crate::context::FieldContext;
use crate::error::{DecryptionError, Error};
use crate::kdf::{derive_field_key, KEY_SIZE};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::aead::{rand_core::RngCore, Aead, KeyInit, OsRng, Payload};
use secrecy::{ExposeSecret, SecretVec};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Nonce size shared by AES-256-GCM and ChaCha20-Poly1305 (96 bits).
const NONCE_SIZE: usize = 12;

/// Authentication tag size shared by both ciphers (128 bits).
const TAG_SIZE: usize = 16;

/// AEAD cipher used for field values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CipherKind {
    /// AES-256-GCM (default).
    #[default]
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
    /// ChaCha20-Poly1305.
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
}

impl CipherKind {
    /// Configuration identifier of the cipher.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Aes256Gcm => "aes-256-gcm",
            Self::ChaCha20Poly1305 => "chacha20-poly1305",
        }
    }
}

impl fmt::Display for CipherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CipherKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aes-256-gcm" => Ok(Self::Aes256Gcm),
            "chacha20-poly1305" => Ok(Self::ChaCha20Poly1305),
            other => Err(Error::Configuration(format!("unsupported cipher `{other}`"))),
        }
    }
}

/// What to do when a stored envelope cannot be opened on the read path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecryptPolicy {
    /// Surface an empty value and keep serving (production).
    #[default]
    Lenient,
    /// Propagate the error to the caller (debug).
    Strict,
}

impl DecryptPolicy {
    /// Policy matching the configured debug flag.
    #[must_use]
    pub const fn for_debug(debug: bool) -> Self {
        if debug {
            Self::Strict
        } else {
            Self::Lenient
        }
    }
}

/// Decoded form of a stored ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Base64 nonce.
    pub iv: String,
    /// Base64 ciphertext without the tag.
    pub value: String,
    /// Base64 authentication tag.
    pub mac: String,
}

impl Envelope {
    /// Encodes the envelope into its stored (base64 JSON) form.
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` if JSON encoding fails.
    pub fn encode(&self) -> Result<String, Error> {
        let json = serde_json::to_vec(self)?;
        Ok(STANDARD.encode(json))
    }

    /// Decodes a stored value into an envelope.
    ///
    /// # Errors
    ///
    /// Returns `DecryptionError::MalformedEnvelope` if the value is not
    /// base64, not JSON, or lacks one of the members.
    pub fn decode(stored: &str) -> Result<Self, DecryptionError> {
        let json = STANDARD
            .decode(stored.trim())
            .map_err(|e| DecryptionError::MalformedEnvelope(format!("base64: {e}")))?;
        serde_json::from_slice(&json)
            .map_err(|e| DecryptionError::MalformedEnvelope(format!("json: {e}")))
    }
}

/// Encrypts and decrypts field values.
///
/// Cheap to clone; the master key is shared behind an `Arc`.
///
/// # Example
///
/// ```
/// use sealdex::cipher::{CipherCodec, CipherKind};
/// use sealdex::context::FieldContext;
/// use secrecy::SecretVec;
///
/// let codec = CipherCodec::new(CipherKind::default(), SecretVec::new(vec![9u8; 32]))?;
/// let ctx = FieldContext::new("user", "email");
///
/// let stored = codec.encrypt("alice@example.com", &ctx)?;
/// assert_eq!(codec.decrypt(&stored, &ctx)?, "alice@example.com");
/// # Ok::<(), sealdex::error::Error>(())
/// ```
#[derive(Clone)]
pub struct CipherCodec {
    master: Arc<SecretVec<u8>>,
    kind: CipherKind,
    policy: DecryptPolicy,
}

impl fmt::Debug for CipherCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherCodec")
            .field("kind", &self.kind)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl CipherCodec {
    /// Creates a codec over the given master key with the lenient read policy.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the key is not 32 bytes.
    pub fn new(kind: CipherKind, master: SecretVec<u8>) -> Result<Self, Error> {
        let len = master.expose_secret().len();
        if len != KEY_SIZE {
            return Err(Error::Configuration(format!(
                "encryption key must be {KEY_SIZE} bytes, got {len}"
            )));
        }
        Ok(Self { master: Arc::new(master), kind, policy: DecryptPolicy::default() })
    }

    /// Sets the read-path decryption policy.
    #[must_use]
    pub fn with_policy(mut self, policy: DecryptPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns the cipher in use.
    #[must_use]
    pub const fn kind(&self) -> CipherKind {
        self.kind
    }

    /// Returns the read-path decryption policy.
    #[must_use]
    pub const fn policy(&self) -> DecryptPolicy {
        self.policy
    }

    /// Encrypts one value into a stored envelope.
    ///
    /// A fresh nonce is drawn for every call, so encrypting the same value
    /// twice yields two different envelopes.
    ///
    /// # Errors
    ///
    /// Returns `Error::Encryption` if key derivation or sealing fails.
    pub fn encrypt(&self, plaintext: &str, context: &FieldContext) -> Result<String, Error> {
        let key = derive_field_key(&self.master, context)?;

        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        // Context is bound as associated data
        let aad = context.to_string();
        let payload = Payload { msg: plaintext.as_bytes(), aad: aad.as_bytes() };

        let sealed = match self.kind {
            CipherKind::Aes256Gcm => {
                let cipher = aes_gcm::Aes256Gcm::new_from_slice(key.expose_secret())
                    .map_err(|e| Error::Encryption(format!("invalid field key: {e}")))?;
                cipher
                    .encrypt(aes_gcm::Nonce::from_slice(&nonce), payload)
                    .map_err(|e| Error::Encryption(format!("AES-256-GCM encryption failed: {e}")))?
            }
            CipherKind::ChaCha20Poly1305 => {
                let cipher = chacha20poly1305::ChaCha20Poly1305::new_from_slice(key.expose_secret())
                    .map_err(|e| Error::Encryption(format!("invalid field key: {e}")))?;
                cipher.encrypt(chacha20poly1305::Nonce::from_slice(&nonce), payload).map_err(
                    |e| Error::Encryption(format!("ChaCha20-Poly1305 encryption failed: {e}")),
                )?
            }
        };

        // Both ciphers append the tag; store it separately as `mac`
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_SIZE);

        Envelope {
            iv: STANDARD.encode(nonce),
            value: STANDARD.encode(ciphertext),
            mac: STANDARD.encode(tag),
        }
        .encode()
    }

    /// Decrypts a stored envelope.
    ///
    /// # Errors
    ///
    /// Returns `DecryptionError::MalformedEnvelope` if the value cannot be
    /// decoded, `DecryptionError::AuthenticationFailed` if the tag does not
    /// verify for this key and context.
    pub fn decrypt(&self, stored: &str, context: &FieldContext) -> Result<String, DecryptionError> {
        let envelope = Envelope::decode(stored)?;

        let nonce = decode_member("iv", &envelope.iv)?;
        if nonce.len() != NONCE_SIZE {
            return Err(DecryptionError::MalformedEnvelope(format!(
                "iv must be {NONCE_SIZE} bytes, got {}",
                nonce.len()
            )));
        }
        let mut sealed = decode_member("value", &envelope.value)?;
        let tag = decode_member("mac", &envelope.mac)?;
        if tag.len() != TAG_SIZE {
            return Err(DecryptionError::AuthenticationFailed);
        }
        sealed.extend_from_slice(&tag);

        let key = derive_field_key(&self.master, context)
            .map_err(|_| DecryptionError::AuthenticationFailed)?;

        let aad = context.to_string();
        let payload = Payload { msg: &sealed, aad: aad.as_bytes() };

        let plaintext = match self.kind {
            CipherKind::Aes256Gcm => aes_gcm::Aes256Gcm::new_from_slice(key.expose_secret())
                .map_err(|_| DecryptionError::AuthenticationFailed)?
                .decrypt(aes_gcm::Nonce::from_slice(&nonce), payload),
            CipherKind::ChaCha20Poly1305 => {
                chacha20poly1305::ChaCha20Poly1305::new_from_slice(key.expose_secret())
                    .map_err(|_| DecryptionError::AuthenticationFailed)?
                    .decrypt(chacha20poly1305::Nonce::from_slice(&nonce), payload)
            }
        }
        .map_err(|_| DecryptionError::AuthenticationFailed)?;

        String::from_utf8(plaintext).map_err(|_| DecryptionError::InvalidUtf8)
    }

    /// Decrypts a stored envelope applying the configured [`DecryptPolicy`].
    ///
    /// With `Lenient`, a failure is logged and surfaced as an empty string.
    ///
    /// # Errors
    ///
    /// With `Strict`, returns the underlying `DecryptionError`.
    pub fn reveal(&self, stored: &str, context: &FieldContext) -> Result<String, DecryptionError> {
        match self.decrypt(stored, context) {
            Ok(plaintext) => Ok(plaintext),
            Err(err) if self.policy == DecryptPolicy::Lenient => {
                tracing::warn!(
                    record_type = context.record_type(),
                    field = context.field(),
                    error = %err,
                    "decryption failed, surfacing empty value"
                );
                Ok(String::new())
            }
            Err(err) => Err(err),
        }
    }
}

fn decode_member(name: &str, value: &str) -> Result<Vec<u8>, DecryptionError> {
    STANDARD
        .decode(value)
        .map_err(|e| DecryptionError::MalformedEnvelope(format!("`{name}` is not base64: {e}")))
}

//! Deterministic fingerprints for exact-match search over encrypted fields.
//!
//! A fingerprint is `hash(salt || value)` rendered as lowercase hex. It is
//! stored in the `<field>_hash` column so that equality lookups never need to
//! decrypt anything.

use crate::error::Error;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

/// Members every stored envelope exposes.
const ENVELOPE_MEMBERS: [&str; 3] = ["iv", "value", "mac"];

/// Hash function behind the fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HashAlgorithm {
    /// `SHA-256(salt || value)`, 64 hex chars (default).
    #[default]
    Sha256,
    /// `SHA-512(salt || value)`, 128 hex chars.
    Sha512,
    /// `HMAC-SHA256(key = salt, value)`, 64 hex chars.
    HmacSha256,
}

impl HashAlgorithm {
    /// Configuration identifier of the algorithm.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
            Self::HmacSha256 => "hmac-sha256",
        }
    }

    /// Length of the hex digest produced by this algorithm.
    #[must_use]
    pub const fn hex_len(self) -> usize {
        match self {
            Self::Sha256 | Self::HmacSha256 => 64,
            Self::Sha512 => 128,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            "hmac-sha256" => Ok(Self::HmacSha256),
            other => Err(Error::Configuration(format!("unsupported hash algorithm `{other}`"))),
        }
    }
}

/// Salted deterministic hasher.
///
/// # Example
///
/// ```
/// use sealdex::fingerprint::{Fingerprint, HashAlgorithm};
/// use secrecy::SecretString;
///
/// let fp = Fingerprint::new(HashAlgorithm::Sha256, SecretString::new("pepper".into()));
/// assert_eq!(fp.digest("alice@example.com"), fp.digest("alice@example.com"));
/// assert_eq!(fp.digest("alice@example.com").len(), 64);
/// ```
#[derive(Clone)]
pub struct Fingerprint {
    algorithm: HashAlgorithm,
    salt: Arc<SecretString>,
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fingerprint").field("algorithm", &self.algorithm).finish_non_exhaustive()
    }
}

impl Fingerprint {
    /// Creates a fingerprint hasher.
    #[must_use]
    pub fn new(algorithm: HashAlgorithm, salt: SecretString) -> Self {
        Self { algorithm, salt: Arc::new(salt) }
    }

    /// Returns the configured algorithm.
    #[must_use]
    pub const fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Computes the hex digest of `value`.
    #[must_use]
    pub fn digest(&self, value: &str) -> String {
        let salt = self.salt.expose_secret().as_bytes();
        match self.algorithm {
            HashAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(salt);
                hasher.update(value.as_bytes());
                hex::encode(hasher.finalize())
            }
            HashAlgorithm::Sha512 => {
                let mut hasher = Sha512::new();
                hasher.update(salt);
                hasher.update(value.as_bytes());
                hex::encode(hasher.finalize())
            }
            HashAlgorithm::HmacSha256 => {
                // HMAC accepts keys of any length
                let mut mac = <HmacSha256 as Mac>::new_from_slice(salt)
                    .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
                mac.update(value.as_bytes());
                hex::encode(mac.finalize().into_bytes())
            }
        }
    }

    /// Returns the first `len` hex characters of the digest.
    ///
    /// Short digests are handy for bucketing; they are not collision resistant.
    #[must_use]
    pub fn digest_prefix(&self, value: &str, len: usize) -> String {
        let mut digest = self.digest(value);
        digest.truncate(len);
        digest
    }
}

/// Reports whether `value` looks like a stored envelope.
///
/// The value must decode as base64, then as a JSON object exposing non-null
/// `iv`, `value` and `mac` members. Nothing is verified cryptographically; a
/// `true` only means "do not encrypt this again".
#[must_use]
pub fn is_envelope(value: &str) -> bool {
    let Ok(json) = STANDARD.decode(value.trim()) else {
        return false;
    };
    let Ok(serde_json::Value::Object(members)) = serde_json::from_slice(&json) else {
        return false;
    };
    ENVELOPE_MEMBERS.iter().all(|name| members.get(*name).is_some_and(|v| !v.is_null()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use crate::cipher::{CipherCodec, CipherKind};
    use crate::context::FieldContext;
    use secrecy::SecretVec;
    use std::collections::HashSet;

    fn fingerprint(algorithm: HashAlgorithm) -> Fingerprint {
        Fingerprint::new(algorithm, SecretString::new("sealdex".to_string()))
    }

    #[test]
    fn test_digest_matches_salted_sha256() {
        let fp = fingerprint(HashAlgorithm::Sha256);

        let mut hasher = Sha256::new();
        hasher.update(b"sealdexa@b.com");
        let expected = hex::encode(hasher.finalize());

        assert_eq!(fp.digest("a@b.com"), expected);
    }

    #[test]
    fn test_digest_deterministic_across_instances() {
        for algorithm in [HashAlgorithm::Sha256, HashAlgorithm::Sha512, HashAlgorithm::HmacSha256] {
            let first = fingerprint(algorithm).digest("alice@example.com");
            let second = fingerprint(algorithm).digest("alice@example.com");
            assert_eq!(first, second);
            assert_eq!(first.len(), algorithm.hex_len());
        }
    }

    #[test]
    fn test_digest_depends_on_salt() {
        let a = Fingerprint::new(HashAlgorithm::Sha256, SecretString::new("one".into()));
        let b = Fingerprint::new(HashAlgorithm::Sha256, SecretString::new("two".into()));
        assert_ne!(a.digest("alice"), b.digest("alice"));
    }

    #[test]
    fn test_no_collisions_on_sample_corpus() {
        let fp = fingerprint(HashAlgorithm::Sha256);
        let digests: HashSet<String> =
            (0..10_000).map(|i| fp.digest(&format!("user{i}@example.com"))).collect();
        assert_eq!(digests.len(), 10_000);
    }

    #[test]
    fn test_digest_prefix() {
        let fp = fingerprint(HashAlgorithm::Sha256);
        let full = fp.digest("5551234567");
        assert_eq!(fp.digest_prefix("5551234567", 8), &full[..8]);
    }

    #[test]
    fn test_is_envelope_on_ciphertext() {
        let codec =
            CipherCodec::new(CipherKind::default(), SecretVec::new(vec![3u8; 32])).unwrap();
        let stored = codec.encrypt("a@b.com", &FieldContext::new("user", "email")).unwrap();
        assert!(is_envelope(&stored));
    }

    #[test]
    fn test_is_envelope_rejects_plaintext() {
        assert!(!is_envelope("a@b.com"));
        assert!(!is_envelope(""));
        assert!(!is_envelope("+1 (555) 123-4567"));
    }

    #[test]
    fn test_is_envelope_requires_all_members() {
        let partial = STANDARD.encode(r#"{"iv":"x","value":"y"}"#);
        assert!(!is_envelope(&partial));

        let null_mac = STANDARD.encode(r#"{"iv":"x","value":"y","mac":null}"#);
        assert!(!is_envelope(&null_mac));

        let foreign = STANDARD.encode(r#"{"iv":"x","value":"y","mac":"deadbeef","tag":""}"#);
        assert!(is_envelope(&foreign));
    }

    #[test]
    fn test_is_envelope_rejects_non_object_json() {
        assert!(!is_envelope(&STANDARD.encode("[1,2,3]")));
        assert!(!is_envelope(&STANDARD.encode("\"iv value mac\"")));
    }

    #[test]
    fn test_algorithm_parse() {
        assert_eq!("SHA256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256);
        assert_eq!("hmac-sha256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::HmacSha256);
        assert!("md5".parse::<HashAlgorithm>().is_err());
    }

    proptest! {
        #[test]
        fn prop_digest_is_deterministic(value in any::<String>()) {
            for algorithm in [HashAlgorithm::Sha256, HashAlgorithm::Sha512, HashAlgorithm::HmacSha256] {
                let first = fingerprint(algorithm).digest(&value);
                let second = fingerprint(algorithm).digest(&value);
                prop_assert_eq!(&first, &second);
                prop_assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
            }
        }
    }
}

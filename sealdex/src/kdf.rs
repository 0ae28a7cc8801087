//! Key handling: parsing configured key material and deriving per-field subkeys.
//!
//! Every field gets its own working key, expanded from the master key with
//! HKDF-SHA256 using the field context as the `info` parameter.

use crate::context::FieldContext;
use crate::error::Error;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hkdf::Hkdf;
use secrecy::{ExposeSecret, SecretString, SecretVec};
use sha2::Sha256;
use zeroize::Zeroizing;

/// Master and derived key size in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// Parses configured key material.
///
/// Accepted forms:
/// - `base64:<standard base64 of 32 bytes>`
/// - 64 hexadecimal characters
///
/// # Errors
///
/// Returns `Error::Configuration` if the material is not in one of the
/// accepted forms or does not decode to exactly 32 bytes.
///
/// # Example
///
/// ```
/// use sealdex::kdf::parse_key;
/// use secrecy::{ExposeSecret, SecretString};
///
/// let key = parse_key(&SecretString::new("00".repeat(32))).expect("valid key");
/// assert_eq!(key.expose_secret().len(), 32);
/// ```
pub fn parse_key(material: &SecretString) -> Result<SecretVec<u8>, Error> {
    let raw = material.expose_secret().trim();

    let bytes = if let Some(encoded) = raw.strip_prefix("base64:") {
        STANDARD
            .decode(encoded)
            .map_err(|e| Error::Configuration(format!("encryption key is not valid base64: {e}")))?
    } else if raw.len() == KEY_SIZE * 2 {
        hex::decode(raw)
            .map_err(|e| Error::Configuration(format!("encryption key is not valid hex: {e}")))?
    } else {
        return Err(Error::Configuration(
            "encryption key must be `base64:<32 bytes>` or 64 hex characters".to_string(),
        ));
    };
    let bytes = Zeroizing::new(bytes);

    if bytes.len() != KEY_SIZE {
        return Err(Error::Configuration(format!(
            "encryption key must be {KEY_SIZE} bytes, got {}",
            bytes.len()
        )));
    }

    Ok(SecretVec::new(bytes.to_vec()))
}

/// Derives the working key for one field from the master key.
///
/// The derivation uses the field context as the `info` parameter:
/// `record_type|field|version`
///
/// # Errors
///
/// Returns `Error::Encryption` if HKDF expansion fails.
pub fn derive_field_key(
    master: &SecretVec<u8>,
    context: &FieldContext,
) -> Result<SecretVec<u8>, Error> {
    let hkdf = Hkdf::<Sha256>::new(None, master.expose_secret());

    let info = context.to_string();

    let mut key = vec![0u8; KEY_SIZE];
    hkdf.expand(info.as_bytes(), &mut key)
        .map_err(|_| Error::Encryption("field key derivation failed".to_string()))?;

    Ok(SecretVec::new(key))
}

/// Generates fresh random key material in the `base64:` form.
#[must_use]
pub fn generate_key() -> SecretString {
    use chacha20poly1305::aead::{rand_core::RngCore, OsRng};

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    OsRng.fill_bytes(&mut key[..]);
    SecretString::new(format!("base64:{}", STANDARD.encode(&key[..])))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn master() -> SecretVec<u8> {
        SecretVec::new(vec![1u8; KEY_SIZE])
    }

    #[test]
    fn test_parse_key_base64() {
        let encoded = format!("base64:{}", STANDARD.encode([7u8; KEY_SIZE]));
        let key = parse_key(&SecretString::new(encoded)).unwrap();
        assert_eq!(key.expose_secret(), &vec![7u8; KEY_SIZE]);
    }

    #[test]
    fn test_parse_key_hex() {
        let key = parse_key(&SecretString::new("ab".repeat(KEY_SIZE))).unwrap();
        assert_eq!(key.expose_secret(), &vec![0xab; KEY_SIZE]);
    }

    #[test]
    fn test_parse_key_wrong_length() {
        let encoded = format!("base64:{}", STANDARD.encode([7u8; 16]));
        let result = parse_key(&SecretString::new(encoded));
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_parse_key_garbage() {
        let result = parse_key(&SecretString::new("not-a-key".to_string()));
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_derive_field_key_deterministic() {
        let context = FieldContext::new("user", "email");

        let key1 = derive_field_key(&master(), &context).unwrap();
        let key2 = derive_field_key(&master(), &context).unwrap();

        assert_eq!(key1.expose_secret(), key2.expose_secret());
        assert_eq!(key1.expose_secret().len(), KEY_SIZE);
    }

    #[test]
    fn test_derive_field_key_different_fields() {
        let key1 = derive_field_key(&master(), &FieldContext::new("user", "email")).unwrap();
        let key2 = derive_field_key(&master(), &FieldContext::new("user", "phone")).unwrap();

        assert_ne!(key1.expose_secret(), key2.expose_secret());
    }

    #[test]
    fn test_derive_field_key_different_versions() {
        let ctx1 = FieldContext::new("user", "email").with_version(1);
        let ctx2 = FieldContext::new("user", "email").with_version(2);

        let key1 = derive_field_key(&master(), &ctx1).unwrap();
        let key2 = derive_field_key(&master(), &ctx2).unwrap();

        assert_ne!(key1.expose_secret(), key2.expose_secret());
    }

    #[test]
    fn test_generate_key_parses() {
        let material = generate_key();
        assert!(material.expose_secret().starts_with("base64:"));

        let key = parse_key(&material).unwrap();
        assert_eq!(key.expose_secret().len(), KEY_SIZE);
        assert_ne!(generate_key().expose_secret(), material.expose_secret());
    }
}

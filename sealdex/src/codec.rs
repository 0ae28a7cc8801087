//! Per-record-type transform of encrypted attributes on save and load.

use crate::cipher::{CipherCodec, DecryptPolicy};
use crate::config::{Config, RecordTypeConfig};
use crate::context::FieldContext;
use crate::error::Error;
use crate::events::{EngineEvent, EventSink, TracingSink};
use crate::fingerprint::{is_envelope, Fingerprint};
use crate::record::{backup_column, hash_column, Record, TableSchema};
use serde_json::Value;
use std::sync::Arc;

/// How encrypted fields are treated when a record is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadMode {
    /// Decrypt every envelope in place.
    #[default]
    Decrypt,
    /// Leave envelopes untouched. Used by credential checks, which compare
    /// against stored ciphertext and hashes.
    SuppressDecryption,
}

/// Outcome of [`FieldCodec::on_save`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveReport {
    /// Fields encrypted by this call.
    pub encrypted: Vec<String>,
    /// Fields already holding an envelope.
    pub already_encrypted: Vec<String>,
    /// Fields whose backup column was filled.
    pub backed_up: Vec<String>,
    /// Fields that were empty.
    pub empty: Vec<String>,
}

impl SaveReport {
    /// True if nothing was encrypted.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.encrypted.is_empty()
    }
}

/// Outcome of [`FieldCodec::on_load`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Fields decrypted in place.
    pub decrypted: Vec<String>,
    /// Fields left encrypted because decryption failed.
    pub failed: Vec<String>,
    /// Fields left encrypted because decryption was suppressed.
    pub suppressed: Vec<String>,
}

/// Encrypts, fingerprints and backs up the configured fields of one record type.
///
/// # Example
///
/// ```
/// use sealdex::cipher::{CipherCodec, CipherKind};
/// use sealdex::codec::{FieldCodec, LoadMode};
/// use sealdex::config::RecordTypeConfig;
/// use sealdex::fingerprint::{is_envelope, Fingerprint, HashAlgorithm};
/// use sealdex::record::{Record, TableSchema};
/// use secrecy::{SecretString, SecretVec};
///
/// let codec = FieldCodec::new(
///     "user",
///     RecordTypeConfig::new(["email"], ["email"]),
///     CipherCodec::new(CipherKind::default(), SecretVec::new(vec![7u8; 32]))?,
///     Fingerprint::new(HashAlgorithm::Sha256, SecretString::new("salt".into())),
///     &TableSchema::new("users", ["id", "email", "email_hash"]),
/// )?;
///
/// let mut record = Record::new("1").with("email", "a@b.com");
/// codec.on_save(&mut record)?;
/// assert!(is_envelope(record.text("email").unwrap()));
///
/// codec.on_load(&mut record, LoadMode::Decrypt)?;
/// assert_eq!(record.text("email"), Some("a@b.com"));
/// # Ok::<(), sealdex::error::Error>(())
/// ```
#[derive(Clone)]
pub struct FieldCodec {
    record_type: String,
    fields: Arc<RecordTypeConfig>,
    backups: Vec<String>,
    cipher: CipherCodec,
    fingerprint: Fingerprint,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for FieldCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldCodec")
            .field("record_type", &self.record_type)
            .field("encrypted_fields", &self.fields.encrypted_fields)
            .field("backups", &self.backups)
            .field("cipher", &self.cipher)
            .finish_non_exhaustive()
    }
}

impl FieldCodec {
    /// Creates a codec for one record type.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the field lists are invalid or the
    /// table lacks a field or its hash column.
    pub fn new(
        record_type: impl Into<String>,
        fields: RecordTypeConfig,
        cipher: CipherCodec,
        fingerprint: Fingerprint,
        schema: &TableSchema,
    ) -> Result<Self, Error> {
        let record_type = record_type.into();
        fields.validate(&record_type)?;

        for field in &fields.encrypted_fields {
            for column in [field.clone(), hash_column(field)] {
                if !schema.has_column(&column) {
                    return Err(Error::Configuration(format!(
                        "table `{}` of `{record_type}` has no column `{column}`",
                        schema.table()
                    )));
                }
            }
        }

        let backups = fields
            .encrypted_fields
            .iter()
            .filter(|field| schema.has_column(&backup_column(field)))
            .cloned()
            .collect();

        Ok(Self {
            record_type,
            fields: Arc::new(fields),
            backups,
            cipher,
            fingerprint,
            events: Arc::new(TracingSink),
        })
    }

    /// Creates a codec from the loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the record type is not provisioned
    /// or its key material or schema is invalid.
    pub fn from_config(config: &Config, record_type: &str, schema: &TableSchema) -> Result<Self, Error> {
        let fields = config.record_type(record_type)?.clone();
        Self::new(record_type, fields, config.cipher_codec()?, config.fingerprint(), schema)
    }

    /// Routes events to `sink` instead of the log.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Record type identifier.
    #[must_use]
    pub fn record_type(&self) -> &str {
        &self.record_type
    }

    /// Field configuration.
    #[must_use]
    pub fn fields(&self) -> &RecordTypeConfig {
        &self.fields
    }

    /// The hasher used for `<field>_hash` columns.
    #[must_use]
    pub const fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// True if the table provisions `<field>_backup`.
    #[must_use]
    pub fn has_backup(&self, field: &str) -> bool {
        self.backups.iter().any(|f| f == field)
    }

    /// Key derivation and associated-data context of a field.
    #[must_use]
    pub fn context(&self, field: &str) -> FieldContext {
        FieldContext::new(self.record_type.clone(), field)
    }

    /// Prepares a record for writing.
    ///
    /// Every encrypted field holding plaintext is fingerprinted into
    /// `<field>_hash`, copied into an empty `<field>_backup` when the table
    /// has one, then replaced by its envelope. Fields already holding an
    /// envelope are left alone, so saving twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `Error::Encryption` if sealing fails; the record may then be
    /// partially transformed and must not be written.
    pub fn on_save(&self, record: &mut Record) -> Result<SaveReport, Error> {
        let mut report = SaveReport::default();

        for field in &self.fields.encrypted_fields {
            let Some(plaintext) = plain_value(record, field) else {
                let hash = hash_column(field);
                if !record.is_blank(&hash) {
                    record.set(hash, Value::Null);
                }
                report.empty.push(field.clone());
                continue;
            };

            if is_envelope(&plaintext) {
                report.already_encrypted.push(field.clone());
                continue;
            }

            record.set(hash_column(field), self.fingerprint.digest(&plaintext));

            if self.has_backup(field) {
                let backup = backup_column(field);
                if record.is_blank(&backup) {
                    record.set(backup, plaintext.clone());
                    report.backed_up.push(field.clone());
                } else {
                    tracing::debug!(
                        record_type = %self.record_type,
                        record_id = %record.id,
                        field = %field,
                        "backup column already set, leaving it unchanged"
                    );
                }
            }

            let envelope = self.cipher.encrypt(&plaintext, &self.context(field))?;
            record.set(field.clone(), envelope);
            report.encrypted.push(field.clone());
        }

        tracing::trace!(
            record_type = %self.record_type,
            record_id = %record.id,
            encrypted = report.encrypted.len(),
            skipped = report.already_encrypted.len(),
            "record prepared for save"
        );
        Ok(report)
    }

    /// Reverses [`FieldCodec::on_save`] on a loaded record.
    ///
    /// Envelopes that fail to open are left in place and reported through
    /// the event sink.
    ///
    /// # Errors
    ///
    /// Returns `Error::Decryption` only under the strict (debug) policy.
    pub fn on_load(&self, record: &mut Record, mode: LoadMode) -> Result<LoadReport, Error> {
        let mut report = LoadReport::default();

        for field in &self.fields.encrypted_fields {
            let Some(stored) = record.text(field).filter(|v| is_envelope(v)).map(str::to_string)
            else {
                continue;
            };

            if mode == LoadMode::SuppressDecryption {
                report.suppressed.push(field.clone());
                continue;
            }

            match self.cipher.decrypt(&stored, &self.context(field)) {
                Ok(plaintext) => {
                    record.set(field.clone(), plaintext);
                    report.decrypted.push(field.clone());
                }
                Err(err) => {
                    self.events.emit(&EngineEvent::DecryptionFailed {
                        record_type: self.record_type.clone(),
                        field: field.clone(),
                        record_id: record.id.clone(),
                    });
                    if self.cipher.policy() == DecryptPolicy::Strict {
                        return Err(err.into());
                    }
                    report.failed.push(field.clone());
                }
            }
        }

        Ok(report)
    }

    /// Plaintext of one field without mutating the record.
    ///
    /// Envelopes are opened under the codec's policy; an empty result maps
    /// to `None`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Decryption` only under the strict (debug) policy.
    pub fn plaintext(&self, record: &Record, field: &str) -> Result<Option<String>, Error> {
        let Some(value) = plain_value(record, field) else {
            return Ok(None);
        };
        if !self.fields.is_encrypted(field) || !is_envelope(&value) {
            return Ok(Some(value));
        }
        let revealed = self.cipher.reveal(&value, &self.context(field))?;
        Ok(Some(revealed).filter(|v| !v.is_empty()))
    }
}

/// Non-empty scalar value of a column rendered as text.
fn plain_value(record: &Record, column: &str) -> Option<String> {
    match record.get(column)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::CipherKind;
    use crate::events::RecordingSink;
    use crate::fingerprint::HashAlgorithm;
    use secrecy::{SecretString, SecretVec};

    fn schema() -> TableSchema {
        TableSchema::new(
            "users",
            ["id", "name", "email", "email_hash", "email_backup", "phone", "phone_hash"],
        )
    }

    fn cipher(policy: DecryptPolicy) -> CipherCodec {
        CipherCodec::new(CipherKind::Aes256Gcm, SecretVec::new(vec![9u8; 32]))
            .unwrap()
            .with_policy(policy)
    }

    fn fingerprint() -> Fingerprint {
        Fingerprint::new(HashAlgorithm::Sha256, SecretString::new("sealdex".into()))
    }

    fn codec(policy: DecryptPolicy) -> FieldCodec {
        FieldCodec::new(
            "user",
            RecordTypeConfig::new(["email", "phone"], ["email", "phone", "name"]),
            cipher(policy),
            fingerprint(),
            &schema(),
        )
        .unwrap()
    }

    fn user() -> Record {
        Record::new("1").with("name", "Alice").with("email", "a@b.com").with("phone", "555-1234")
    }

    #[test]
    fn test_save_encrypts_and_hashes() {
        let codec = codec(DecryptPolicy::Lenient);
        let mut record = user();

        let report = codec.on_save(&mut record).unwrap();

        assert_eq!(report.encrypted, ["email", "phone"]);
        assert_eq!(report.backed_up, ["email"]);
        assert!(is_envelope(record.text("email").unwrap()));
        assert_eq!(record.text("email_hash").unwrap(), fingerprint().digest("a@b.com"));
        assert_eq!(record.text("email_backup"), Some("a@b.com"));
        assert_eq!(record.text("name"), Some("Alice"));
    }

    #[test]
    fn test_save_twice_is_noop() {
        let codec = codec(DecryptPolicy::Lenient);
        let mut record = user();
        codec.on_save(&mut record).unwrap();
        let first = record.clone();

        let report = codec.on_save(&mut record).unwrap();

        assert!(report.is_noop());
        assert_eq!(report.already_encrypted, ["email", "phone"]);
        assert_eq!(record, first);
    }

    #[test]
    fn test_backup_is_written_once() {
        let codec = codec(DecryptPolicy::Lenient);
        let mut record = user();
        codec.on_save(&mut record).unwrap();
        codec.on_load(&mut record, LoadMode::Decrypt).unwrap();

        record.set("email", "new@b.com");
        codec.on_save(&mut record).unwrap();

        assert_eq!(record.text("email_hash").unwrap(), fingerprint().digest("new@b.com"));
        assert_eq!(record.text("email_backup"), Some("a@b.com"));
    }

    #[test]
    fn test_blank_field_clears_hash() {
        let codec = codec(DecryptPolicy::Lenient);
        let mut record = user();
        codec.on_save(&mut record).unwrap();

        record.set("phone", "");
        let report = codec.on_save(&mut record).unwrap();

        assert_eq!(report.empty, ["phone"]);
        assert!(record.is_blank("phone_hash"));
    }

    #[test]
    fn test_load_round_trip() {
        let codec = codec(DecryptPolicy::Lenient);
        let mut record = user();
        codec.on_save(&mut record).unwrap();

        let report = codec.on_load(&mut record, LoadMode::Decrypt).unwrap();

        assert_eq!(report.decrypted, ["email", "phone"]);
        assert_eq!(record.text("email"), Some("a@b.com"));
        assert_eq!(record.text("phone"), Some("555-1234"));
    }

    #[test]
    fn test_load_suppressed_keeps_envelopes() {
        let codec = codec(DecryptPolicy::Lenient);
        let mut record = user();
        codec.on_save(&mut record).unwrap();
        let stored = record.clone();

        let report = codec.on_load(&mut record, LoadMode::SuppressDecryption).unwrap();

        assert_eq!(report.suppressed, ["email", "phone"]);
        assert_eq!(record, stored);
    }

    #[test]
    fn test_load_leaves_legacy_plaintext() {
        let codec = codec(DecryptPolicy::Lenient);
        let mut record = user();

        let report = codec.on_load(&mut record, LoadMode::Decrypt).unwrap();

        assert_eq!(report, LoadReport::default());
        assert_eq!(record.text("email"), Some("a@b.com"));
    }

    #[test]
    fn test_load_failure_is_reported_and_value_kept() {
        let sink = Arc::new(RecordingSink::new());
        let writer = codec(DecryptPolicy::Lenient);
        let reader = FieldCodec::new(
            "user",
            RecordTypeConfig::new(["email", "phone"], Vec::<String>::new()),
            CipherCodec::new(CipherKind::Aes256Gcm, SecretVec::new(vec![1u8; 32])).unwrap(),
            fingerprint(),
            &schema(),
        )
        .unwrap()
        .with_event_sink(sink.clone());

        let mut record = user();
        writer.on_save(&mut record).unwrap();
        let stored_email = record.text("email").unwrap().to_string();

        let report = reader.on_load(&mut record, LoadMode::Decrypt).unwrap();

        assert_eq!(report.failed, ["email", "phone"]);
        assert_eq!(record.text("email"), Some(stored_email.as_str()));
        assert_eq!(sink.events().len(), 2);
        assert!(matches!(
            &sink.events()[0],
            EngineEvent::DecryptionFailed { field, record_id, .. } if field == "email" && record_id == "1"
        ));
    }

    #[test]
    fn test_strict_policy_propagates() {
        let writer = codec(DecryptPolicy::Lenient);
        let reader = FieldCodec::new(
            "account",
            RecordTypeConfig::new(["email", "phone"], Vec::<String>::new()),
            cipher(DecryptPolicy::Strict),
            fingerprint(),
            &schema(),
        )
        .unwrap();

        let mut record = user();
        writer.on_save(&mut record).unwrap();

        let result = reader.on_load(&mut record, LoadMode::Decrypt);
        assert!(matches!(result, Err(Error::Decryption(_))));
    }

    #[test]
    fn test_plaintext_projection() {
        let codec = codec(DecryptPolicy::Lenient);
        let mut record = user();
        codec.on_save(&mut record).unwrap();

        assert_eq!(codec.plaintext(&record, "email").unwrap().as_deref(), Some("a@b.com"));
        assert_eq!(codec.plaintext(&record, "name").unwrap().as_deref(), Some("Alice"));
        assert_eq!(codec.plaintext(&record, "missing").unwrap(), None);
    }

    #[test]
    fn test_new_requires_hash_column() {
        let result = FieldCodec::new(
            "user",
            RecordTypeConfig::new(["email"], Vec::<String>::new()),
            cipher(DecryptPolicy::Lenient),
            fingerprint(),
            &TableSchema::new("users", ["id", "email"]),
        );
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_numeric_values_are_encrypted_as_text() {
        let codec = codec(DecryptPolicy::Lenient);
        let mut record = Record::new("2").with("email", "x@y.io").with("phone", 5_551_234);

        codec.on_save(&mut record).unwrap();
        codec.on_load(&mut record, LoadMode::Decrypt).unwrap();

        assert_eq!(record.text("phone"), Some("5551234"));
    }
}

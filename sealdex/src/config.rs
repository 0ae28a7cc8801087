//! Engine configuration.
//!
//! Configuration is loaded once (TOML file plus `SEALDEX_*` environment
//! overrides for secrets) and handed to each component at construction.
//! Nothing in the engine reads process-wide state on its own.

use crate::cipher::{CipherCodec, CipherKind, DecryptPolicy};
use crate::error::Error;
use crate::fingerprint::{Fingerprint, HashAlgorithm};
use crate::gateway::IndexSettings;
use crate::kdf::parse_key;
use crate::tokens::FieldKind;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding `encryption.key`.
pub const ENV_ENCRYPTION_KEY: &str = "SEALDEX_ENCRYPTION_KEY";
/// Environment variable overriding `hashing.salt`.
pub const ENV_HASH_SALT: &str = "SEALDEX_HASH_SALT";
/// Environment variable overriding `search.host`.
pub const ENV_SEARCH_HOST: &str = "SEALDEX_SEARCH_HOST";
/// Environment variable overriding `search.api_key`.
pub const ENV_SEARCH_KEY: &str = "SEALDEX_SEARCH_KEY";
/// Environment variable overriding `search.enabled`.
pub const ENV_SEARCH_ENABLED: &str = "SEALDEX_SEARCH_ENABLED";

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Debug mode: decryption failures propagate instead of yielding empty values.
    #[serde(default)]
    pub debug: bool,
    /// Cipher and key material.
    pub encryption: EncryptionConfig,
    /// Fingerprint settings.
    #[serde(default)]
    pub hashing: HashingConfig,
    /// Remote search index settings.
    #[serde(default)]
    pub search: SearchConfig,
    /// Per record type field lists, keyed by record type identifier.
    #[serde(default)]
    pub records: BTreeMap<String, RecordTypeConfig>,
}

/// `[encryption]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct EncryptionConfig {
    /// Cipher identifier.
    #[serde(default)]
    pub cipher: CipherKind,
    /// Key material (`base64:...` or hex).
    pub key: SecretString,
}

/// `[hashing]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct HashingConfig {
    /// Hash algorithm identifier.
    #[serde(default)]
    pub algorithm: HashAlgorithm,
    /// Salt prepended to every value (HMAC key for `hmac-sha256`).
    #[serde(default = "default_salt")]
    pub salt: SecretString,
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self { algorithm: HashAlgorithm::default(), salt: default_salt() }
    }
}

/// `[search]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    /// Whether the remote index is used at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Base URL of the search engine.
    #[serde(default = "default_host")]
    pub host: String,
    /// Optional API key sent as a bearer token.
    #[serde(default)]
    pub api_key: Option<SecretString>,
    /// Prefix of every index name.
    #[serde(default = "default_prefix")]
    pub index_prefix: String,
    /// Upper bound for waiting on engine tasks.
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,
    /// Delay between task status polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            api_key: None,
            index_prefix: default_prefix(),
            task_timeout_ms: default_task_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl SearchConfig {
    /// Task wait timeout as a `Duration`.
    #[must_use]
    pub const fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    /// Task poll interval as a `Duration`.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Index name for a record type: prefix plus the normalized identifier.
    ///
    /// ```
    /// use sealdex::config::SearchConfig;
    ///
    /// let search = SearchConfig::default();
    /// assert_eq!(search.index_name("App\\Models\\User"), "encrypted_app_models_user");
    /// assert_eq!(search.index_name("billing::Account"), "encrypted_billing_account");
    /// ```
    #[must_use]
    pub fn index_name(&self, record_type: &str) -> String {
        let normalized = record_type.to_lowercase().replace("::", "_").replace(['\\', '/', '.'], "_");
        format!("{}{normalized}", self.index_prefix)
    }
}

/// `[records."<type>"]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordTypeConfig {
    /// Fields encrypted at rest.
    pub encrypted_fields: Vec<String>,
    /// Fields exposed to search; encrypted fields when empty.
    #[serde(default)]
    pub searchable_fields: Vec<String>,
    /// Tokenizer overrides by field name.
    #[serde(default)]
    pub field_kinds: BTreeMap<String, FieldKind>,
    /// Index settings overriding the derived defaults.
    #[serde(default)]
    pub index_settings: Option<IndexSettings>,
}

impl RecordTypeConfig {
    /// Creates a record type configuration.
    #[must_use]
    pub fn new<E, S>(encrypted: E, searchable: S) -> Self
    where
        E: IntoIterator,
        E::Item: Into<String>,
        S: IntoIterator,
        S::Item: Into<String>,
    {
        Self {
            encrypted_fields: encrypted.into_iter().map(Into::into).collect(),
            searchable_fields: searchable.into_iter().map(Into::into).collect(),
            field_kinds: BTreeMap::new(),
            index_settings: None,
        }
    }

    /// Overrides the tokenizer for one field.
    #[must_use]
    pub fn with_kind(mut self, field: impl Into<String>, kind: FieldKind) -> Self {
        self.field_kinds.insert(field.into(), kind);
        self
    }

    /// Checks the field lists.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` when the encrypted field list is empty,
    /// or a list contains a blank, duplicate, or derived (`_hash`/`_backup`)
    /// name.
    pub fn validate(&self, record_type: &str) -> Result<(), Error> {
        if self.encrypted_fields.is_empty() {
            return Err(Error::Configuration(format!(
                "record type `{record_type}` has no encrypted fields"
            )));
        }
        check_field_list(record_type, "encrypted_fields", &self.encrypted_fields)?;
        check_field_list(record_type, "searchable_fields", &self.searchable_fields)?;
        Ok(())
    }

    /// True if `field` is encrypted at rest.
    #[must_use]
    pub fn is_encrypted(&self, field: &str) -> bool {
        self.encrypted_fields.iter().any(|f| f == field)
    }

    /// Fields used for search: the searchable list, or the encrypted fields
    /// when none are declared.
    #[must_use]
    pub fn effective_searchable(&self) -> &[String] {
        if self.searchable_fields.is_empty() {
            &self.encrypted_fields
        } else {
            &self.searchable_fields
        }
    }

    /// Tokenizer for a field (override, else inferred from the name).
    #[must_use]
    pub fn kind_for(&self, field: &str) -> FieldKind {
        self.field_kinds.get(field).copied().unwrap_or_else(|| FieldKind::for_field(field))
    }
}

fn check_field_list(record_type: &str, list: &str, fields: &[String]) -> Result<(), Error> {
    let mut seen = HashSet::new();
    for field in fields {
        let name = field.trim();
        if name.is_empty() {
            return Err(Error::Configuration(format!(
                "record type `{record_type}`: blank name in {list}"
            )));
        }
        if name.ends_with("_hash") || name.ends_with("_backup") {
            return Err(Error::Configuration(format!(
                "record type `{record_type}`: `{name}` in {list} is a derived column"
            )));
        }
        if !seen.insert(name) {
            return Err(Error::Configuration(format!(
                "record type `{record_type}`: `{name}` listed twice in {list}"
            )));
        }
    }
    Ok(())
}

impl Config {
    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the TOML is malformed or fails validation.
    pub fn from_toml_str(text: &str) -> Result<Self, Error> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a TOML file, applies `SEALDEX_*` environment overrides, and validates.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be read, `Error::Configuration`
    /// if it is malformed or fails validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&text)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        tracing::debug!(
            path = %path.display(),
            record_types = config.records.len(),
            search_enabled = config.search.enabled,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Applies overrides from a variable lookup (the process environment in
    /// [`Config::load`]).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(ENV_ENCRYPTION_KEY) {
            self.encryption.key = SecretString::new(key);
        }
        if let Some(salt) = lookup(ENV_HASH_SALT) {
            self.hashing.salt = SecretString::new(salt);
        }
        if let Some(host) = lookup(ENV_SEARCH_HOST) {
            self.search.host = host;
        }
        if let Some(api_key) = lookup(ENV_SEARCH_KEY) {
            self.search.api_key = Some(SecretString::new(api_key));
        }
        if let Some(enabled) = lookup(ENV_SEARCH_ENABLED) {
            self.search.enabled = matches!(enabled.trim(), "1" | "true" | "yes" | "on");
        }
    }

    /// Validates key material and every record type.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` describing the first problem found.
    pub fn validate(&self) -> Result<(), Error> {
        parse_key(&self.encryption.key)?;
        if self.search.task_timeout_ms == 0 {
            return Err(Error::Configuration("search.task_timeout_ms must be positive".into()));
        }
        for (name, record) in &self.records {
            record.validate(name)?;
        }
        Ok(())
    }

    /// Configuration of one record type.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the record type was never provisioned.
    pub fn record_type(&self, name: &str) -> Result<&RecordTypeConfig, Error> {
        self.records.get(name).ok_or_else(|| {
            Error::Configuration(format!("record type `{name}` is not provisioned"))
        })
    }

    /// Builds the cipher codec, with the decryption policy derived from `debug`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the key material is invalid.
    pub fn cipher_codec(&self) -> Result<CipherCodec, Error> {
        let key = parse_key(&self.encryption.key)?;
        Ok(CipherCodec::new(self.encryption.cipher, key)?
            .with_policy(DecryptPolicy::for_debug(self.debug)))
    }

    /// Builds the fingerprint hasher.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::new(
            self.hashing.algorithm,
            SecretString::new(self.hashing.salt.expose_secret().clone()),
        )
    }
}

fn default_salt() -> SecretString {
    SecretString::new("sealdex".to_string())
}

const fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "http://localhost:7700".to_string()
}

fn default_prefix() -> String {
    "encrypted_".to_string()
}

const fn default_task_timeout_ms() -> u64 {
    5_000
}

const fn default_poll_interval_ms() -> u64 {
    50
}

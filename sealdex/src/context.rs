//! Context binding an encrypted value to the record type and field it lives in.

use std::fmt;

/// Context for field encryption, used for subkey derivation and as associated data.
///
/// The context ensures that:
/// - Ciphertext copied from one column into another fails to authenticate
/// - Different record types produce unrelated ciphertexts
/// - Key rotation is supported via versioning
///
/// # Example
///
/// ```
/// use sealdex::context::FieldContext;
///
/// let ctx = FieldContext::new("app::user", "email").with_version(2);
/// assert_eq!(ctx.to_string(), "app::user|email|v2");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldContext {
    record_type: String,
    field: String,
    version: u32,
}

impl FieldContext {
    /// Creates a new field context at version 1.
    ///
    /// # Arguments
    ///
    /// * `record_type` - Record type identifier (as configured)
    /// * `field` - Attribute name
    #[must_use]
    pub fn new(record_type: impl Into<String>, field: impl Into<String>) -> Self {
        Self { record_type: record_type.into(), field: field.into(), version: 1 }
    }

    /// Sets the version for key rotation support.
    #[must_use]
    pub const fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> &str {
        &self.record_type
    }

    /// Returns the field name.
    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Returns the version.
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }
}

impl fmt::Display for FieldContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|v{}", self.record_type, self.field, self.version)
    }
}

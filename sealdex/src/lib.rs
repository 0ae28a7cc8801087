//! # `Sealdex`
//!
//! Field-level encryption for existing record stores, with exact-match
//! fingerprints and a synchronized search index for partial matching.
//!
//! ## Features
//!
//! - AEAD encryption (AES-256-GCM, ChaCha20-Poly1305) with per-field HKDF subkeys
//! - Salted fingerprints (SHA-256, SHA-512, HMAC-SHA256) for equality lookups
//! - Field-kind aware search tokens (email, phone, text)
//! - Idempotent save/load transforms with optional plaintext backup columns
//! - Remote-first search with a local predicate fallback
//! - Cancellable bulk reindexing and encryption of legacy rows
//!
//! ## Example
//!
//! ```rust,ignore
//! use sealdex::prelude::*;
//!
//! let config = Config::load("sealdex.toml")?;
//! let schema = TableSchema::new("users", ["id", "email", "email_hash", "created_at"]);
//! let search = SearchOrchestrator::from_config(&config, "app::user", schema, gateway)?;
//!
//! let mut record = Record::new("1").with("email", "a@b.com");
//! search.codec().on_save(&mut record)?;
//! store.save(&record)?;
//! search.on_record_written(&record);
//!
//! let hits = store.select(&search.search("b.com"))?;
//! ```

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod bulk;
pub mod cipher;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod gateway;
pub mod kdf;
pub mod orchestrator;
pub mod record;
pub mod store;
pub mod tokens;

pub mod prelude {
    //! Convenience re-exports for common use.
    pub use crate::bulk::{encrypt_existing, reindex, BulkReport, CancelToken};
    pub use crate::cipher::{CipherCodec, CipherKind, DecryptPolicy};
    pub use crate::codec::{FieldCodec, LoadMode, LoadReport, SaveReport};
    pub use crate::config::{Config, RecordTypeConfig};
    pub use crate::context::FieldContext;
    pub use crate::error::{DecryptionError, Error, IndexError};
    pub use crate::events::{EngineEvent, EventSink, TracingSink};
    pub use crate::fingerprint::{is_envelope, Fingerprint, HashAlgorithm};
    pub use crate::gateway::{Document, IndexHandle, IndexSettings, MemoryIndex, SearchIndexGateway};
    pub use crate::orchestrator::SearchOrchestrator;
    pub use crate::record::{Clause, Record, SearchFilter, TableSchema};
    pub use crate::store::{MemoryStore, RecordStore};
    pub use crate::tokens::{extract_tokens, FieldKind};
}

//! Keeps the search index in step with the record store and answers queries.
//!
//! Indexing is best-effort: failures are logged and emitted as events, never
//! returned. Queries go to the remote index first and fall back to a local
//! predicate the record store can evaluate.

use crate::codec::FieldCodec;
use crate::config::{Config, RecordTypeConfig, SearchConfig};
use crate::error::Error;
use crate::events::{EngineEvent, EventSink, TracingSink};
use crate::gateway::{document_id, Document, IndexHandle, IndexSettings, IndexStats, SearchIndexGateway};
use crate::record::{
    backup_column, hash_column, parts_attribute, Clause, Record, SearchFilter, TableSchema,
    RESERVED_COLUMNS,
};
use crate::tokens::extract_tokens;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Attributes a full-text query is restricted to: every `<field>_parts`,
/// then the fields themselves.
#[must_use]
pub fn search_attributes(fields: &RecordTypeConfig) -> Vec<String> {
    let searchable = fields.effective_searchable();
    searchable.iter().map(|f| parts_attribute(f)).chain(searchable.iter().cloned()).collect()
}

/// Keeps the `candidates` that `settings` make searchable, in order.
///
/// An empty or `*` searchable list leaves every attribute searchable.
#[must_use]
pub fn query_attributes(
    settings: &IndexSettings,
    candidates: impl IntoIterator<Item = String>,
) -> Vec<String> {
    let searchable = &settings.searchable_attributes;
    let all = searchable.is_empty() || searchable.iter().any(|a| a == "*");
    candidates.into_iter().filter(|c| all || searchable.contains(c)).collect()
}

/// Index settings for a record type: the configured override, or settings
/// derived from the field lists.
#[must_use]
pub fn index_settings(fields: &RecordTypeConfig) -> IndexSettings {
    if let Some(settings) = &fields.index_settings {
        return settings.clone();
    }
    IndexSettings {
        searchable_attributes: search_attributes(fields),
        filterable_attributes: fields.encrypted_fields.iter().map(|f| hash_column(f)).collect(),
        sortable_attributes: vec!["created_at".to_string()],
    }
}

/// Search synchronization for one record type.
pub struct SearchOrchestrator {
    codec: FieldCodec,
    schema: TableSchema,
    gateway: Arc<dyn SearchIndexGateway>,
    enabled: bool,
    index: IndexHandle,
    settings: IndexSettings,
    task_timeout: Duration,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for SearchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchOrchestrator")
            .field("record_type", &self.codec.record_type())
            .field("index", &self.index)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl SearchOrchestrator {
    /// Creates an orchestrator.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if a searchable field is not a column
    /// of the table.
    pub fn new(
        codec: FieldCodec,
        schema: TableSchema,
        gateway: Arc<dyn SearchIndexGateway>,
        search: &SearchConfig,
    ) -> Result<Self, Error> {
        let fields = codec.fields();
        if let Some(field) = fields.effective_searchable().iter().find(|f| !schema.has_column(f)) {
            return Err(Error::Configuration(format!(
                "searchable field `{field}` of `{}` is not a column of `{}`",
                codec.record_type(),
                schema.table()
            )));
        }

        Ok(Self {
            index: IndexHandle::new(search.index_name(codec.record_type())),
            settings: index_settings(fields),
            enabled: search.enabled,
            task_timeout: search.task_timeout(),
            codec,
            schema,
            gateway,
            events: Arc::new(TracingSink),
        })
    }

    /// Creates an orchestrator and its codec from the loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the record type is not provisioned
    /// or does not fit the table.
    pub fn from_config(
        config: &Config,
        record_type: &str,
        schema: TableSchema,
        gateway: Arc<dyn SearchIndexGateway>,
    ) -> Result<Self, Error> {
        let codec = FieldCodec::from_config(config, record_type, &schema)?;
        Self::new(codec, schema, gateway, &config.search)
    }

    /// Routes events to `sink` (codec events included).
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.codec = self.codec.with_event_sink(Arc::clone(&sink));
        self.events = sink;
        self
    }

    /// The field codec of this record type.
    #[must_use]
    pub const fn codec(&self) -> &FieldCodec {
        &self.codec
    }

    /// Table schema of this record type.
    #[must_use]
    pub const fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Name of the remote index.
    #[must_use]
    pub fn index_name(&self) -> &str {
        self.index.name()
    }

    /// Settings pushed by [`SearchOrchestrator::initialize_index`].
    #[must_use]
    pub const fn settings(&self) -> &IndexSettings {
        &self.settings
    }

    /// Whether the remote index is used.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Creates the index and waits until its settings are live.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if search is disabled, or
    /// `Error::IndexUnavailable` (including timeouts) from the gateway.
    pub fn initialize_index(&self) -> Result<IndexHandle, Error> {
        if !self.enabled {
            return Err(Error::Configuration("search index is disabled".into()));
        }
        let index = self.gateway.initialize(self.index.name(), &self.settings, self.task_timeout)?;
        Ok(index)
    }

    /// Statistics of the remote index.
    ///
    /// # Errors
    ///
    /// Returns `Error::IndexUnavailable` if the engine cannot answer.
    pub fn stats(&self) -> Result<IndexStats, Error> {
        Ok(self.gateway.stats(&self.index)?)
    }

    /// Builds the search document of a record.
    ///
    /// Carries `id`, `created_at` (unix seconds) and, per searchable field,
    /// the plaintext, `<field>_hash` for encrypted fields, and
    /// `<field>_parts`. Missing values are left out. A stored hash is kept
    /// even when its envelope cannot be opened.
    ///
    /// # Errors
    ///
    /// Returns `Error::Decryption` if an envelope cannot be opened under the
    /// strict policy.
    pub fn build_document(&self, record: &Record) -> Result<Document, Error> {
        let fields = self.codec.fields();
        let mut document = Document::new();
        document.insert("id".into(), Value::String(record.id.clone()));
        if let Some(created_at) = record.created_at {
            document.insert("created_at".into(), Value::from(created_at.timestamp()));
        }

        for field in fields.effective_searchable() {
            let plaintext = self.codec.plaintext(record, field)?;

            if fields.is_encrypted(field) {
                let hash = record
                    .text(&hash_column(field))
                    .filter(|h| !h.is_empty())
                    .map(str::to_string)
                    .or_else(|| plaintext.as_deref().map(|p| self.codec.fingerprint().digest(p)));
                if let Some(hash) = hash {
                    document.insert(hash_column(field), Value::String(hash));
                }
            }

            let Some(plaintext) = plaintext else {
                continue;
            };
            let tokens = extract_tokens(&plaintext, fields.kind_for(field));
            document.insert(parts_attribute(field), Value::from(tokens));
            document.insert(field.clone(), Value::String(plaintext));
        }

        Ok(document)
    }

    /// Pushes a saved record to the index. Returns whether the push succeeded.
    ///
    /// Call only after the record store accepted the save.
    pub fn on_record_written(&self, record: &Record) -> bool {
        if !self.enabled {
            return false;
        }
        let pushed = self
            .build_document(record)
            .and_then(|document| Ok(self.gateway.upsert(&self.index, &document)?));
        match pushed {
            Ok(()) => {
                tracing::debug!(record_id = %record.id, index = %self.index, "record indexed");
                true
            }
            Err(err) => {
                self.indexing_failed(&record.id, &err);
                false
            }
        }
    }

    /// Removes a deleted record from the index. Returns whether the removal
    /// succeeded.
    pub fn on_record_deleted(&self, record: &Record) -> bool {
        if !self.enabled {
            return false;
        }
        match self.gateway.delete(&self.index, &record.id) {
            Ok(()) => {
                tracing::debug!(record_id = %record.id, index = %self.index, "record removed from index");
                true
            }
            Err(err) => {
                self.indexing_failed(&record.id, &Error::from(err));
                false
            }
        }
    }

    /// Finds records matching `query` across all searchable fields.
    ///
    /// A blank query matches nothing.
    #[must_use]
    pub fn search(&self, query: &str) -> SearchFilter {
        let query = query.trim();
        if query.is_empty() {
            return SearchFilter::AnyOf(Vec::new());
        }

        let fields = self.codec.fields();
        let attributes = query_attributes(&self.settings, search_attributes(fields));
        if let Some(ids) = self.remote_ids(query, &attributes) {
            return SearchFilter::Ids(ids);
        }

        let searchable = fields.effective_searchable();
        let mut clauses: Vec<Clause> =
            searchable.iter().flat_map(|field| self.field_clauses(field, query)).collect();
        clauses.extend(
            self.remaining_columns(searchable)
                .map(|column| Clause::Contains { column: column.to_string(), needle: query.to_string() }),
        );
        SearchFilter::AnyOf(clauses)
    }

    /// Finds records whose `field` matches `query`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidField` if `field` is not searchable.
    pub fn search_by_field(&self, field: &str, query: &str) -> Result<SearchFilter, Error> {
        let fields = self.codec.fields();
        if !fields.effective_searchable().iter().any(|f| f == field) {
            return Err(Error::InvalidField {
                record_type: self.codec.record_type().to_string(),
                field: field.to_string(),
            });
        }

        let query = query.trim();
        if query.is_empty() {
            return Ok(SearchFilter::AnyOf(Vec::new()));
        }

        let attributes = query_attributes(&self.settings, [parts_attribute(field), field.to_string()]);
        if let Some(ids) = self.remote_ids(query, &attributes) {
            return Ok(SearchFilter::Ids(ids));
        }
        Ok(SearchFilter::AnyOf(self.field_clauses(field, query)))
    }

    /// Remote hits, or `None` when the caller should fall back.
    fn remote_ids(&self, query: &str, attributes: &[String]) -> Option<Vec<String>> {
        if !self.enabled {
            return None;
        }
        if attributes.is_empty() {
            tracing::debug!(index = %self.index, "no searchable attribute in index settings, using local predicate");
            return None;
        }
        match self.gateway.query(&self.index, query, attributes) {
            Ok(hits) => {
                let ids: Vec<String> = hits.iter().filter_map(document_id).collect();
                if ids.is_empty() {
                    tracing::debug!(index = %self.index, "no remote hits, using local predicate");
                    None
                } else {
                    Some(ids)
                }
            }
            Err(err) => {
                tracing::warn!(
                    index = %self.index,
                    record_type = %self.codec.record_type(),
                    error = %err,
                    "search index unavailable, using local predicate"
                );
                None
            }
        }
    }

    fn field_clauses(&self, field: &str, query: &str) -> Vec<Clause> {
        if !self.codec.fields().is_encrypted(field) {
            return vec![Clause::Contains { column: field.to_string(), needle: query.to_string() }];
        }
        let mut clauses = vec![Clause::Equals {
            column: hash_column(field),
            value: self.codec.fingerprint().digest(query),
        }];
        if self.codec.has_backup(field) {
            clauses.push(Clause::Contains { column: backup_column(field), needle: query.to_string() });
        }
        clauses
    }

    /// Plain columns not covered by `searchable`, excluding reserved and
    /// derived columns.
    fn remaining_columns<'a>(&'a self, searchable: &'a [String]) -> impl Iterator<Item = &'a str> + 'a {
        let fields = self.codec.fields();
        self.schema.columns().iter().map(String::as_str).filter(move |column| {
            !RESERVED_COLUMNS.contains(column)
                && !searchable.iter().any(|f| f == column)
                && !fields.encrypted_fields.iter().any(|f| {
                    f == column || hash_column(f) == *column || backup_column(f) == *column
                })
        })
    }

    fn indexing_failed(&self, record_id: &str, err: &Error) {
        self.events.emit(&EngineEvent::IndexingFailed {
            record_id: record_id.to_string(),
            index: self.index.name().to_string(),
            error: err.to_string(),
        });
    }
}

//! Search index abstraction.
//!
//! A gateway owns one remote collection per record type. Every method reports
//! failures as [`IndexError`]; callers treat them as non-fatal and degrade.

use crate::error::IndexError;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// A search document: a JSON object with a required `id` key.
pub type Document = Map<String, Value>;

/// Identifier of an asynchronous engine task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to an existing index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexHandle {
    name: String,
}

impl IndexHandle {
    /// Wraps an index name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Returns the index name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for IndexHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Declarative index settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSettings {
    /// Attributes matched by full-text queries.
    #[serde(default, alias = "searchable_attributes")]
    pub searchable_attributes: Vec<String>,
    /// Attributes usable in filters.
    #[serde(default, alias = "filterable_attributes")]
    pub filterable_attributes: Vec<String>,
    /// Attributes usable for sorting.
    #[serde(default, alias = "sortable_attributes")]
    pub sortable_attributes: Vec<String>,
}

/// Lifecycle of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    /// No such index.
    Absent,
    /// Index exists, settings not yet applied.
    Created,
    /// Settings applied and live.
    Configured,
}

/// Operational statistics of one index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    /// Documents currently stored.
    pub number_of_documents: u64,
    /// Whether the engine is still processing updates.
    pub is_indexing: bool,
}

/// Remote document index, one collection per record type.
///
/// Implementations must be thread-safe (`Send + Sync`); the orchestrator
/// shares one gateway across all record types.
pub trait SearchIndexGateway: Send + Sync {
    /// Creates the index if it is missing and returns a handle to it.
    ///
    /// # Errors
    ///
    /// Returns an `IndexError` if the engine cannot be reached or refuses.
    fn ensure_index(&self, name: &str) -> Result<IndexHandle, IndexError>;

    /// Pushes settings; the engine applies them asynchronously.
    ///
    /// # Errors
    ///
    /// Returns an `IndexError` if the update could not be enqueued.
    fn apply_settings(
        &self,
        index: &IndexHandle,
        settings: &IndexSettings,
    ) -> Result<TaskId, IndexError>;

    /// Blocks until `task` succeeds.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::TaskFailed` if the task failed or was canceled,
    /// `IndexError::Timeout` if it did not finish within `timeout`.
    fn wait_for_task(&self, task: TaskId, timeout: Duration) -> Result<(), IndexError>;

    /// Adds or replaces a document by its `id`.
    ///
    /// # Errors
    ///
    /// Returns an `IndexError` if the document was rejected.
    fn upsert(&self, index: &IndexHandle, document: &Document) -> Result<(), IndexError>;

    /// Removes a document. A missing id is not an error.
    ///
    /// # Errors
    ///
    /// Returns an `IndexError` if the engine cannot be reached.
    fn delete(&self, index: &IndexHandle, id: &str) -> Result<(), IndexError>;

    /// Full-text query, restricted to `attributes` when non-empty.
    ///
    /// # Errors
    ///
    /// Returns an `IndexError` if the index is missing or the query is rejected.
    fn query(
        &self,
        index: &IndexHandle,
        text: &str,
        attributes: &[String],
    ) -> Result<Vec<Document>, IndexError>;

    /// Document count and indexing flag.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::NotFound` if the index does not exist.
    fn stats(&self, index: &IndexHandle) -> Result<IndexStats, IndexError>;

    /// Ensures the index, applies settings, and waits for them to be live.
    ///
    /// # Errors
    ///
    /// Returns the first `IndexError` encountered; a slow engine surfaces as
    /// `IndexError::Timeout` instead of blocking forever.
    fn initialize(
        &self,
        name: &str,
        settings: &IndexSettings,
        timeout: Duration,
    ) -> Result<IndexHandle, IndexError> {
        let index = self.ensure_index(name)?;
        let task = self.apply_settings(&index, settings)?;
        self.wait_for_task(task, timeout)?;
        tracing::info!(index = %index, task = %task, "index settings applied");
        Ok(index)
    }
}

#[derive(Debug, Default)]
struct Collection {
    settings: Option<IndexSettings>,
    documents: BTreeMap<String, Document>,
}

/// In-process gateway.
///
/// Settings tasks complete immediately. Queries are case-insensitive
/// substring matches over string (and string array) attributes; documents
/// with an exactly matching token rank first.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    indexes: RwLock<BTreeMap<String, Collection>>,
    tasks: Mutex<HashMap<TaskId, Result<(), String>>>,
    next_task: AtomicU64,
}

impl MemoryIndex {
    /// Creates an empty gateway.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current lifecycle state of an index.
    #[must_use]
    pub fn state(&self, name: &str) -> IndexState {
        match self.indexes.read().get(name) {
            None => IndexState::Absent,
            Some(collection) if collection.settings.is_none() => IndexState::Created,
            Some(_) => IndexState::Configured,
        }
    }

    /// Settings currently applied to an index.
    #[must_use]
    pub fn settings(&self, name: &str) -> Option<IndexSettings> {
        self.indexes.read().get(name).and_then(|c| c.settings.clone())
    }

    /// Fetches one document by id.
    #[must_use]
    pub fn document(&self, name: &str, id: &str) -> Option<Document> {
        self.indexes.read().get(name).and_then(|c| c.documents.get(id).cloned())
    }

    fn enqueue(&self, outcome: Result<(), String>) -> TaskId {
        let task = TaskId(self.next_task.fetch_add(1, Ordering::Relaxed));
        self.tasks.lock().insert(task, outcome);
        task
    }
}

impl SearchIndexGateway for MemoryIndex {
    fn ensure_index(&self, name: &str) -> Result<IndexHandle, IndexError> {
        if name.is_empty() {
            return Err(IndexError::Api { status: 400, message: "index uid is empty".into() });
        }
        self.indexes.write().entry(name.to_string()).or_default();
        Ok(IndexHandle::new(name))
    }

    fn apply_settings(
        &self,
        index: &IndexHandle,
        settings: &IndexSettings,
    ) -> Result<TaskId, IndexError> {
        let mut indexes = self.indexes.write();
        let collection = indexes
            .get_mut(index.name())
            .ok_or_else(|| IndexError::NotFound(index.name().to_string()))?;
        collection.settings = Some(settings.clone());
        Ok(self.enqueue(Ok(())))
    }

    fn wait_for_task(&self, task: TaskId, _timeout: Duration) -> Result<(), IndexError> {
        match self.tasks.lock().get(&task) {
            None => Err(IndexError::NotFound(format!("task {task}"))),
            Some(Ok(())) => Ok(()),
            Some(Err(reason)) => Err(IndexError::TaskFailed { task: task.0, reason: reason.clone() }),
        }
    }

    fn upsert(&self, index: &IndexHandle, document: &Document) -> Result<(), IndexError> {
        let id = document_id(document).ok_or_else(|| IndexError::Api {
            status: 400,
            message: "document has no `id`".into(),
        })?;
        self.indexes
            .write()
            .entry(index.name().to_string())
            .or_default()
            .documents
            .insert(id, document.clone());
        Ok(())
    }

    fn delete(&self, index: &IndexHandle, id: &str) -> Result<(), IndexError> {
        let mut indexes = self.indexes.write();
        let collection = indexes
            .get_mut(index.name())
            .ok_or_else(|| IndexError::NotFound(index.name().to_string()))?;
        collection.documents.remove(id);
        Ok(())
    }

    fn query(
        &self,
        index: &IndexHandle,
        text: &str,
        attributes: &[String],
    ) -> Result<Vec<Document>, IndexError> {
        let indexes = self.indexes.read();
        let collection = indexes
            .get(index.name())
            .ok_or_else(|| IndexError::NotFound(index.name().to_string()))?;

        if let Some(settings) = &collection.settings {
            let searchable = &settings.searchable_attributes;
            let all = searchable.is_empty() || searchable.iter().any(|s| s == "*");
            if let Some(attribute) =
                attributes.iter().find(|a| !all && !searchable.iter().any(|s| s == *a))
            {
                return Err(IndexError::Api {
                    status: 400,
                    message: format!("attribute `{attribute}` is not searchable"),
                });
            }
        }

        let needle = text.trim().to_lowercase();
        let mut exact = Vec::new();
        let mut partial = Vec::new();
        for document in collection.documents.values() {
            match rank(document, &needle, attributes) {
                Some(Rank::Exact) => exact.push(document.clone()),
                Some(Rank::Partial) => partial.push(document.clone()),
                None => {}
            }
        }
        exact.extend(partial);
        Ok(exact)
    }

    fn stats(&self, index: &IndexHandle) -> Result<IndexStats, IndexError> {
        let indexes = self.indexes.read();
        let collection = indexes
            .get(index.name())
            .ok_or_else(|| IndexError::NotFound(index.name().to_string()))?;
        Ok(IndexStats { number_of_documents: collection.documents.len() as u64, is_indexing: false })
    }
}

/// Reads a document's primary key as a string.
#[must_use]
pub fn document_id(document: &Document) -> Option<String> {
    match document.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Rank {
    Exact,
    Partial,
}

fn rank(document: &Document, needle: &str, attributes: &[String]) -> Option<Rank> {
    if needle.is_empty() {
        return Some(Rank::Partial);
    }
    let mut best: Option<Rank> = None;
    let mut consider = |value: &Value| {
        let candidates: Vec<&str> = match value {
            Value::String(s) => vec![s.as_str()],
            Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        for candidate in candidates {
            let candidate = candidate.to_lowercase();
            let found = if candidate == needle {
                Some(Rank::Exact)
            } else if candidate.contains(needle) {
                Some(Rank::Partial)
            } else {
                None
            };
            best = match (best, found) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
        }
    };

    if attributes.is_empty() {
        document.iter().filter(|(k, _)| k.as_str() != "id").for_each(|(_, v)| consider(v));
    } else {
        attributes.iter().filter_map(|a| document.get(a)).for_each(|v| consider(v));
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    fn attrs(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_lifecycle_states() {
        let gateway = MemoryIndex::new();
        assert_eq!(gateway.state("users"), IndexState::Absent);

        let index = gateway.ensure_index("users").unwrap();
        assert_eq!(gateway.state("users"), IndexState::Created);

        let task = gateway.apply_settings(&index, &IndexSettings::default()).unwrap();
        gateway.wait_for_task(task, Duration::from_millis(10)).unwrap();
        assert_eq!(gateway.state("users"), IndexState::Configured);
    }

    #[test]
    fn test_ensure_index_is_idempotent() {
        let gateway = MemoryIndex::new();
        let index = gateway.ensure_index("users").unwrap();
        gateway.upsert(&index, &doc(json!({"id": "1"}))).unwrap();

        gateway.ensure_index("users").unwrap();
        assert_eq!(gateway.stats(&index).unwrap().number_of_documents, 1);
    }

    #[test]
    fn test_initialize_composes_steps() {
        let gateway = MemoryIndex::new();
        let settings = IndexSettings {
            searchable_attributes: attrs(&["email_parts", "email"]),
            filterable_attributes: attrs(&["email_hash"]),
            sortable_attributes: attrs(&["created_at"]),
        };

        let index = gateway.initialize("users", &settings, Duration::from_secs(1)).unwrap();

        assert_eq!(index.name(), "users");
        assert_eq!(gateway.settings("users"), Some(settings));
    }

    #[test]
    fn test_upsert_replaces_by_id() {
        let gateway = MemoryIndex::new();
        let index = gateway.ensure_index("users").unwrap();

        gateway.upsert(&index, &doc(json!({"id": "1", "name": "old"}))).unwrap();
        gateway.upsert(&index, &doc(json!({"id": "1", "name": "new"}))).unwrap();

        assert_eq!(gateway.stats(&index).unwrap().number_of_documents, 1);
        assert_eq!(gateway.document("users", "1").unwrap()["name"], "new");
    }

    #[test]
    fn test_upsert_without_id_is_rejected() {
        let gateway = MemoryIndex::new();
        let index = gateway.ensure_index("users").unwrap();
        let result = gateway.upsert(&index, &doc(json!({"name": "anon"})));
        assert!(matches!(result, Err(IndexError::Api { status: 400, .. })));
    }

    #[test]
    fn test_delete_missing_id_is_ok() {
        let gateway = MemoryIndex::new();
        let index = gateway.ensure_index("users").unwrap();
        assert!(gateway.delete(&index, "404").is_ok());
    }

    #[test]
    fn test_query_missing_index() {
        let gateway = MemoryIndex::new();
        let result = gateway.query(&IndexHandle::new("nope"), "x", &[]);
        assert!(matches!(result, Err(IndexError::NotFound(_))));
    }

    #[test]
    fn test_query_ranks_exact_tokens_first() {
        let gateway = MemoryIndex::new();
        let index = gateway.ensure_index("users").unwrap();
        gateway
            .upsert(&index, &doc(json!({"id": "1", "email_parts": ["bob@b.com.au", "b.com.au"]})))
            .unwrap();
        gateway.upsert(&index, &doc(json!({"id": "2", "email_parts": ["a@b.com", "b.com"]}))).unwrap();

        let hits = gateway.query(&index, "B.COM", &attrs(&["email_parts"])).unwrap();
        let ids: Vec<_> = hits.iter().filter_map(document_id).collect();
        assert_eq!(ids, ["2", "1"]);
    }

    #[test]
    fn test_query_respects_attributes() {
        let gateway = MemoryIndex::new();
        let index = gateway.ensure_index("users").unwrap();
        gateway.upsert(&index, &doc(json!({"id": "1", "name": "alice", "city": "paris"}))).unwrap();

        assert_eq!(gateway.query(&index, "paris", &attrs(&["name"])).unwrap().len(), 0);
        assert_eq!(gateway.query(&index, "paris", &[]).unwrap().len(), 1);
    }

    #[test]
    fn test_query_rejects_unsearchable_attribute() {
        let gateway = MemoryIndex::new();
        let settings =
            IndexSettings { searchable_attributes: attrs(&["name"]), ..IndexSettings::default() };
        let index = gateway.initialize("users", &settings, Duration::from_secs(1)).unwrap();

        let result = gateway.query(&index, "x", &attrs(&["email_parts"]));
        assert!(matches!(result, Err(IndexError::Api { status: 400, .. })));
    }

    #[test]
    fn test_query_wildcard_settings_accept_any_attribute() {
        let gateway = MemoryIndex::new();
        let settings =
            IndexSettings { searchable_attributes: attrs(&["*"]), ..IndexSettings::default() };
        let index = gateway.initialize("users", &settings, Duration::from_secs(1)).unwrap();
        gateway.upsert(&index, &doc(json!({"id": "1", "city": "paris"}))).unwrap();

        assert_eq!(gateway.query(&index, "paris", &attrs(&["city"])).unwrap().len(), 1);
    }

    #[test]
    fn test_settings_serde_accepts_both_casings() {
        let camel: IndexSettings =
            serde_json::from_str(r#"{"searchableAttributes":["a"],"sortableAttributes":["b"]}"#)
                .unwrap();
        let snake: IndexSettings =
            serde_json::from_str(r#"{"searchable_attributes":["a"],"sortable_attributes":["b"]}"#)
                .unwrap();
        assert_eq!(camel, snake);
        assert!(serde_json::to_string(&camel).unwrap().contains("filterableAttributes"));
    }

    #[test]
    fn test_document_id_accepts_numbers() {
        assert_eq!(document_id(&doc(json!({"id": 7}))), Some("7".to_string()));
        assert_eq!(document_id(&doc(json!({"id": null}))), None);
    }
}

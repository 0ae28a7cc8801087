//! Meilisearch search index gateway for sealdex.
//!
//! Talks to a Meilisearch-compatible engine over its HTTP API with a
//! blocking client. Settings updates are asynchronous engine tasks; the
//! gateway polls `GET /tasks/{uid}` until they finish or the caller's
//! timeout runs out.
//!
//! # Example
//!
//! ```rust,no_run
//! use sealdex::config::SearchConfig;
//! use sealdex::gateway::{IndexSettings, SearchIndexGateway};
//! use sealdex_meili::MeiliGateway;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = MeiliGateway::from_config(&SearchConfig::default())?;
//! let settings = IndexSettings {
//!     searchable_attributes: vec!["email_parts".into(), "email".into()],
//!     ..IndexSettings::default()
//! };
//! gateway.initialize("encrypted_user", &settings, std::time::Duration::from_secs(5))?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::{Method, StatusCode};
use sealdex::config::SearchConfig;
use sealdex::error::IndexError;
use sealdex::gateway::{Document, IndexHandle, IndexSettings, IndexStats, SearchIndexGateway, TaskId};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::{Duration, Instant};
use thiserror::Error;
use urlencoding::encode;

/// Per-request transport timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum hits requested per query.
const SEARCH_LIMIT: usize = 1000;

/// Errors specific to the Meilisearch HTTP API.
#[derive(Debug, Error)]
pub enum MeiliError {
    /// Host is not an `http(s)://` URL
    #[error("invalid search host: {0}")]
    InvalidHost(String),

    /// Transport failure (connection refused, DNS, timeout)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Engine answered with an error status
    #[error("Meilisearch error {status} ({code}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Meilisearch error code, e.g. `index_not_found`
        code: String,
        /// Human-readable message
        message: String,
    },

    /// Response body did not have the expected shape
    #[error("unexpected response: {0}")]
    Malformed(String),
}

impl From<MeiliError> for IndexError {
    fn from(err: MeiliError) -> Self {
        match err {
            MeiliError::InvalidHost(host) => Self::Unreachable(format!("invalid host {host}")),
            MeiliError::Transport(e) if e.is_decode() => Self::Malformed(e.to_string()),
            MeiliError::Transport(e) => Self::Unreachable(e.to_string()),
            MeiliError::Api { status: 404, message, .. } => Self::NotFound(message),
            MeiliError::Api { status, message, .. } => Self::Api { status, message },
            MeiliError::Malformed(msg) => Self::Malformed(msg),
        }
    }
}

/// Body of a Meilisearch error response.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: String,
}

/// Summary returned by every enqueuing call.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskRef {
    task_uid: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum TaskStatus {
    Enqueued,
    Processing,
    Succeeded,
    Failed,
    Canceled,
}

#[derive(Debug, Deserialize)]
struct TaskInfo {
    status: TaskStatus,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

impl TaskInfo {
    /// `Some(result)` once the task reached a final state.
    fn outcome(&self, task: TaskId) -> Option<Result<(), IndexError>> {
        match self.status {
            TaskStatus::Enqueued | TaskStatus::Processing => None,
            TaskStatus::Succeeded => Some(Ok(())),
            TaskStatus::Failed | TaskStatus::Canceled => {
                let reason = self.error.as_ref().map_or_else(
                    || format!("task {:?}", self.status).to_lowercase(),
                    |e| format!("{}: {}", e.code, e.message),
                );
                Some(Err(IndexError::TaskFailed { task: task.0, reason }))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: Vec<Document>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    q: &'a str,
    #[serde(skip_serializing_if = "no_attributes")]
    attributes_to_search_on: &'a [String],
    limit: usize,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn no_attributes(attributes: &&[String]) -> bool {
    attributes.is_empty()
}

/// Search index gateway backed by a Meilisearch server.
pub struct MeiliGateway {
    client: Client,
    host: String,
    api_key: Option<SecretString>,
    task_timeout: Duration,
    poll_interval: Duration,
    confirm_writes: bool,
}

impl std::fmt::Debug for MeiliGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeiliGateway")
            .field("host", &self.host)
            .field("authenticated", &self.api_key.is_some())
            .finish_non_exhaustive()
    }
}

impl MeiliGateway {
    /// Creates a gateway for the engine at `host`.
    ///
    /// # Errors
    ///
    /// Returns `MeiliError::InvalidHost` if `host` is not an HTTP(S) URL, or
    /// `MeiliError::Transport` if the client cannot be built.
    pub fn new(host: &str, api_key: Option<SecretString>) -> Result<Self, MeiliError> {
        let host = host.trim().trim_end_matches('/');
        if !(host.starts_with("http://") || host.starts_with("https://")) {
            return Err(MeiliError::InvalidHost(host.to_string()));
        }

        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("sealdex/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            host: host.to_string(),
            api_key,
            task_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(50),
            confirm_writes: false,
        })
    }

    /// Creates a gateway from the `[search]` configuration section.
    ///
    /// # Errors
    ///
    /// See [`MeiliGateway::new`].
    pub fn from_config(search: &SearchConfig) -> Result<Self, MeiliError> {
        let api_key = search.api_key.as_ref().map(|k| SecretString::new(k.expose_secret().clone()));
        Ok(Self::new(&search.host, api_key)?
            .with_task_timeout(search.task_timeout())
            .with_poll_interval(search.poll_interval()))
    }

    /// Sets the wait applied to index creation tasks.
    #[must_use]
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Sets the delay between task status polls.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Makes `upsert` and `delete` wait for their engine task, so documents
    /// rejected asynchronously surface as `IndexError::TaskFailed`.
    #[must_use]
    pub fn with_confirmed_writes(mut self, confirm: bool) -> Self {
        self.confirm_writes = confirm;
        self
    }

    /// Base URL of the engine.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.host, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let request = self.client.request(method, self.url(path));
        match &self.api_key {
            Some(key) => request.bearer_auth(key.expose_secret()),
            None => request,
        }
    }

    fn send(&self, request: RequestBuilder) -> Result<Response, MeiliError> {
        let response = request.send()?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(api_error(status, &body))
    }

    fn call<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, IndexError> {
        let response = self.send(request)?;
        response.json::<T>().map_err(|e| IndexError::Malformed(e.to_string()))
    }

    fn enqueue(&self, request: RequestBuilder) -> Result<TaskId, IndexError> {
        let task: TaskRef = self.call(request)?;
        Ok(TaskId(task.task_uid))
    }

    /// Waits for a document task when writes are confirmed.
    fn settle(&self, index: &IndexHandle, task: TaskId) -> Result<(), IndexError> {
        if !self.confirm_writes {
            tracing::trace!(index = %index, task = %task, "document task enqueued");
            return Ok(());
        }
        self.wait_for_task(task, self.task_timeout).map_err(|err| {
            tracing::warn!(index = %index, task = %task, error = %err, "document task did not succeed");
            err
        })
    }
}

/// Builds an error from a non-success response body.
fn api_error(status: StatusCode, body: &str) -> MeiliError {
    let parsed: Option<ApiErrorBody> = serde_json::from_str(body).ok();
    let (code, message) = parsed.map_or_else(
        || (String::new(), body.trim().to_string()),
        |e| (e.code, e.message),
    );
    MeiliError::Api {
        status: status.as_u16(),
        code,
        message: if message.is_empty() { status.to_string() } else { message },
    }
}

/// `indexes/{name}{suffix}` with the index name percent-encoded.
fn index_path(name: &str, suffix: &str) -> String {
    format!("indexes/{}{suffix}", encode(name))
}

impl SearchIndexGateway for MeiliGateway {
    fn ensure_index(&self, name: &str) -> Result<IndexHandle, IndexError> {
        let path = index_path(name, "");
        match self.send(self.request(Method::GET, &path)) {
            Ok(_) => return Ok(IndexHandle::new(name)),
            Err(MeiliError::Api { status: 404, .. }) => {}
            Err(err) => return Err(err.into()),
        }

        tracing::info!(index = name, host = %self.host, "creating search index");
        let task = self.enqueue(
            self.request(Method::POST, "indexes").json(&json!({ "uid": name, "primaryKey": "id" })),
        )?;
        match self.wait_for_task(task, self.task_timeout) {
            Ok(()) => Ok(IndexHandle::new(name)),
            // Lost a creation race with another writer
            Err(IndexError::TaskFailed { reason, .. }) if reason.starts_with("index_already_exists") => {
                Ok(IndexHandle::new(name))
            }
            Err(err) => Err(err),
        }
    }

    fn apply_settings(
        &self,
        index: &IndexHandle,
        settings: &IndexSettings,
    ) -> Result<TaskId, IndexError> {
        let path = index_path(index.name(), "/settings");
        let task = self.enqueue(self.request(Method::PATCH, &path).json(settings))?;
        tracing::debug!(index = %index, task = %task, "settings update enqueued");
        Ok(task)
    }

    fn wait_for_task(&self, task: TaskId, timeout: Duration) -> Result<(), IndexError> {
        let started = Instant::now();
        loop {
            let info: TaskInfo = self.call(self.request(Method::GET, &format!("tasks/{task}")))?;
            if let Some(outcome) = info.outcome(task) {
                return outcome;
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(IndexError::Timeout {
                    task: task.0,
                    waited_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                });
            }
            std::thread::sleep(self.poll_interval.min(timeout - elapsed));
        }
    }

    /// Enqueues the document. The engine applies it asynchronously; unless
    /// [`MeiliGateway::with_confirmed_writes`] is set, a task that fails
    /// later (e.g. a rejected document) is not reported here.
    fn upsert(&self, index: &IndexHandle, document: &Document) -> Result<(), IndexError> {
        let path = index_path(index.name(), "/documents?primaryKey=id");
        let task = self.enqueue(self.request(Method::POST, &path).json(&[document]))?;
        self.settle(index, task)
    }

    /// Enqueues the deletion. Same confirmation rules as `upsert`.
    fn delete(&self, index: &IndexHandle, id: &str) -> Result<(), IndexError> {
        let path = index_path(index.name(), &format!("/documents/{}", encode(id)));
        let task = self.enqueue(self.request(Method::DELETE, &path))?;
        self.settle(index, task)
    }

    fn query(
        &self,
        index: &IndexHandle,
        text: &str,
        attributes: &[String],
    ) -> Result<Vec<Document>, IndexError> {
        let path = index_path(index.name(), "/search");
        let body = SearchRequest { q: text, attributes_to_search_on: attributes, limit: SEARCH_LIMIT };
        let response: SearchResponse = self.call(self.request(Method::POST, &path).json(&body))?;
        Ok(response.hits)
    }

    fn stats(&self, index: &IndexHandle) -> Result<IndexStats, IndexError> {
        let path = index_path(index.name(), "/stats");
        self.call(self.request(Method::GET, &path))
    }
}

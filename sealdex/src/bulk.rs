//! Batch jobs over a whole record store: reindexing and encrypting legacy rows.
//!
//! Both jobs walk the store in id order, one batch at a time, and check the
//! [`CancelToken`] before fetching each batch.

use crate::codec::FieldCodec;
use crate::error::Error;
use crate::orchestrator::SearchOrchestrator;
use crate::record::Record;
use crate::store::RecordStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Default number of records per batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Cooperative cancellation flag shared between a job and its controller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; the job stops before its next batch.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// True once [`CancelToken::cancel`] was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of a bulk job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkReport {
    /// Batches fetched.
    pub batches: usize,
    /// Records visited.
    pub processed: usize,
    /// Records indexed or re-encrypted.
    pub changed: usize,
    /// Records that could not be indexed.
    pub failed: usize,
    /// Whether the job stopped on cancellation.
    pub cancelled: bool,
}

/// Pushes every record of the store to the search index.
///
/// The index is initialized first, so settings are live before documents
/// arrive. Per-record push failures are counted, not returned.
///
/// # Errors
///
/// Returns `Error::Configuration` for a zero batch size, the index
/// initialization error, or a store read error.
pub fn reindex(
    store: &dyn RecordStore,
    orchestrator: &SearchOrchestrator,
    batch_size: usize,
    cancel: &CancelToken,
) -> Result<BulkReport, Error> {
    orchestrator.initialize_index()?;
    let report = walk(store, batch_size, cancel, |record| {
        Ok(if orchestrator.on_record_written(record) { Outcome::Changed } else { Outcome::Failed })
    })?;
    tracing::info!(
        index = %orchestrator.index_name(),
        processed = report.processed,
        indexed = report.changed,
        failed = report.failed,
        cancelled = report.cancelled,
        "reindex finished"
    );
    Ok(report)
}

/// Encrypts legacy plaintext rows in place.
///
/// Rows whose fields are all envelopes already are left untouched, so the
/// job can be re-run safely after an interruption.
///
/// # Errors
///
/// Returns `Error::Configuration` for a zero batch size, or the first store
/// or encryption error; rows saved before it stay encrypted.
pub fn encrypt_existing(
    store: &dyn RecordStore,
    codec: &FieldCodec,
    batch_size: usize,
    cancel: &CancelToken,
) -> Result<BulkReport, Error> {
    let report = walk(store, batch_size, cancel, |record| {
        let mut record = record.clone();
        if codec.on_save(&mut record)?.is_noop() {
            return Ok(Outcome::Unchanged);
        }
        store.save(&record)?;
        Ok(Outcome::Changed)
    })?;
    tracing::info!(
        record_type = %codec.record_type(),
        processed = report.processed,
        encrypted = report.changed,
        cancelled = report.cancelled,
        "bulk encryption finished"
    );
    Ok(report)
}

enum Outcome {
    Changed,
    Unchanged,
    Failed,
}

fn walk<F>(
    store: &dyn RecordStore,
    batch_size: usize,
    cancel: &CancelToken,
    mut visit: F,
) -> Result<BulkReport, Error>
where
    F: FnMut(&Record) -> Result<Outcome, Error>,
{
    if batch_size == 0 {
        return Err(Error::Configuration("batch size must be positive".into()));
    }

    let mut report = BulkReport::default();
    let mut after: Option<String> = None;

    loop {
        if cancel.is_cancelled() {
            report.cancelled = true;
            tracing::info!(batches = report.batches, "bulk job cancelled");
            break;
        }

        let batch = store.fetch_batch(after.as_deref(), batch_size)?;
        let Some(last) = batch.last() else {
            break;
        };
        after = Some(last.id.clone());
        report.batches += 1;

        for record in &batch {
            report.processed += 1;
            match visit(record)? {
                Outcome::Changed => report.changed += 1,
                Outcome::Unchanged => {}
                Outcome::Failed => report.failed += 1,
            }
        }
        tracing::debug!(batch = report.batches, size = batch.len(), "batch processed");

        if batch.len() < batch_size {
            break;
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::TableSchema;
    use crate::store::MemoryStore;

    fn store(n: usize) -> MemoryStore {
        let store = MemoryStore::new(TableSchema::new("items", ["id", "name"]));
        for i in 0..n {
            store.save(&Record::new(format!("{i:03}")).with("name", format!("item {i}"))).unwrap();
        }
        store
    }

    #[test]
    fn test_walk_visits_every_record_once() {
        let store = store(25);
        let mut seen = Vec::new();

        let report = walk(&store, 10, &CancelToken::new(), |record| {
            seen.push(record.id.clone());
            Ok(Outcome::Changed)
        })
        .unwrap();

        assert_eq!(report.batches, 3);
        assert_eq!(report.processed, 25);
        assert_eq!(report.changed, 25);
        assert_eq!(seen.first().map(String::as_str), Some("000"));
        assert_eq!(seen.last().map(String::as_str), Some("024"));
    }

    #[test]
    fn test_walk_stops_between_batches() {
        let store = store(25);
        let cancel = CancelToken::new();
        let controller = cancel.clone();

        let report = walk(&store, 10, &cancel, |record| {
            if record.id == "004" {
                controller.cancel();
            }
            Ok(Outcome::Unchanged)
        })
        .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.batches, 1);
        assert_eq!(report.processed, 10);
    }

    #[test]
    fn test_walk_rejects_zero_batch() {
        let result = walk(&store(1), 0, &CancelToken::new(), |_| Ok(Outcome::Unchanged));
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_walk_exact_multiple_of_batch() {
        let report = walk(&store(20), 10, &CancelToken::new(), |_| Ok(Outcome::Failed)).unwrap();
        assert_eq!(report.batches, 2);
        assert_eq!(report.failed, 20);
    }
}

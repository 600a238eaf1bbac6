//! Best-effort unordered batch writes with a single-document fallback.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::database_ops::store::{document_id, Document, DocumentFailure, DocumentStore, StoreError};

/// Failure samples kept per run for the report.
pub const MAX_FAILURE_SAMPLES: usize = 100;

/// Result of writing one batch: every document is either counted in `inserted` or
/// listed in `failed` with its reason.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub inserted: usize,
    pub failed: Vec<DocumentFailure>,
    /// True when the batch write failed and documents were retried one at a time.
    pub fell_back: bool,
}

/// Totals across all batches of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteSummary {
    pub batches: u64,
    pub fallback_batches: u64,
    pub inserted: u64,
    pub failed: u64,
    /// First failures seen, capped at [`MAX_FAILURE_SAMPLES`].
    pub failure_samples: Vec<DocumentFailure>,
}

impl WriteSummary {
    pub fn absorb(&mut self, outcome: BatchOutcome) {
        self.batches += 1;
        if outcome.fell_back {
            self.fallback_batches += 1;
        }
        self.inserted += outcome.inserted as u64;
        self.failed += outcome.failed.len() as u64;
        let room = MAX_FAILURE_SAMPLES.saturating_sub(self.failure_samples.len());
        self.failure_samples.extend(outcome.failed.into_iter().take(room));
    }
}

/// Write `docs` as one unordered batch. If the batch write fails, every document the
/// store did not confirm is retried on its own and its result recorded. Only
/// connection-level errors are returned as `Err`.
pub fn write_batch<S: DocumentStore + ?Sized>(
    store: &mut S,
    collection: &str,
    docs: &[Document],
) -> Result<BatchOutcome, StoreError> {
    if docs.is_empty() {
        return Ok(BatchOutcome::default());
    }
    // ids the store confirmed, with multiplicity so a repeated id is retried
    let mut confirmed: HashMap<String, usize> = match store.insert_many(collection, docs) {
        Ok(_) => {
            return Ok(BatchOutcome {
                inserted: docs.len(),
                failed: Vec::new(),
                fell_back: false,
            })
        }
        Err(err) if err.is_fatal() => return Err(err),
        Err(StoreError::BulkWrite { inserted, failures, .. }) => {
            warn!(
                target: "loader",
                collection,
                batch = docs.len(),
                rejected = failures.len(),
                "batch insert partially failed; retrying rejected documents individually"
            );
            inserted.into_iter().fold(HashMap::new(), |mut acc, id| {
                *acc.entry(id).or_insert(0) += 1;
                acc
            })
        }
        Err(err) => {
            warn!(
                target: "loader",
                collection,
                batch = docs.len(),
                error = %err,
                "batch insert failed; retrying documents individually"
            );
            HashMap::new()
        }
    };

    let mut outcome = BatchOutcome {
        inserted: 0,
        failed: Vec::new(),
        fell_back: true,
    };
    for doc in docs {
        let id = match document_id(doc) {
            Ok(id) => id,
            Err(err) => {
                outcome.failed.push(DocumentFailure {
                    id: String::new(),
                    reason: err.to_string(),
                });
                continue;
            }
        };
        if let Some(remaining) = confirmed.get_mut(&id).filter(|n| **n > 0) {
            *remaining -= 1;
            outcome.inserted += 1;
            continue;
        }
        match store.insert_one(collection, doc) {
            Ok(()) => outcome.inserted += 1,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                debug!(target: "loader", collection, id = %id, error = %err, "document rejected");
                outcome.failed.push(DocumentFailure {
                    id,
                    reason: err.to_string(),
                });
            }
        }
    }
    Ok(outcome)
}

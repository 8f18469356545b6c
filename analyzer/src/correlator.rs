//! Request correlator: id allocation and the pending-request table.
//!
//! Every entry is finalized exactly once: by a matching response, by
//! `abandon` when the frame never reached the writer, or by `cancel_all`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio::sync::oneshot;

use crate::error::AnalyzerError;
use crate::protocol::ResponseError;

pub(crate) type Completion = oneshot::Sender<Result<serde_json::Value, AnalyzerError>>;
pub(crate) type CompletionRx = oneshot::Receiver<Result<serde_json::Value, AnalyzerError>>;

struct PendingRequest {
    method: String,
    created_at: Instant,
    completion: Completion,
}

#[derive(Default)]
struct PendingTable {
    entries: HashMap<u64, PendingRequest>,
    /// Set once the connection is gone; new requests fail immediately.
    closed: Option<String>,
}

/// Outcome of routing a response to the table.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Routed {
    Delivered { method: String },
    Unknown,
}

pub(crate) struct RequestCorrelator {
    next_id: AtomicU64,
    table: Mutex<PendingTable>,
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            table: Mutex::new(PendingTable::default()),
        }
    }

    fn table(&self) -> MutexGuard<'_, PendingTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate the next id and park a completion handle for it.
    pub fn begin(&self, method: &str) -> Result<(u64, CompletionRx), AnalyzerError> {
        let mut table = self.table();
        if let Some(reason) = &table.closed {
            return Err(AnalyzerError::Cancelled {
                reason: reason.clone(),
            });
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        table.entries.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                created_at: Instant::now(),
                completion: tx,
            },
        );
        Ok((id, rx))
    }

    /// Drop an entry whose frame was never written. The caller reports the failure.
    pub fn abandon(&self, id: u64) {
        self.table().entries.remove(&id);
    }

    /// Resolve the entry for `id`, translating an error payload into a failure.
    pub fn complete(
        &self,
        id: u64,
        outcome: Result<serde_json::Value, ResponseError>,
    ) -> Routed {
        let Some(pending) = self.table().entries.remove(&id) else {
            return Routed::Unknown;
        };

        tracing::trace!(
            id,
            method = %pending.method,
            elapsed_ms = pending.created_at.elapsed().as_millis() as u64,
            "response received"
        );

        let result = outcome.map_err(|error| AnalyzerError::Server {
            method: pending.method.clone(),
            code: error.code,
            message: error.message,
        });
        // The caller may have stopped waiting; that is not our failure.
        let _ = pending.completion.send(result);
        Routed::Delivered {
            method: pending.method,
        }
    }

    /// Atomically remove every pending entry and fail each with `reason`.
    pub fn cancel_all(&self, reason: &str) -> usize {
        let drained: Vec<(u64, PendingRequest)> = self.table().entries.drain().collect();
        let count = drained.len();
        for (id, pending) in drained {
            tracing::debug!(id, method = %pending.method, %reason, "cancelling pending request");
            let _ = pending.completion.send(Err(AnalyzerError::Cancelled {
                reason: reason.to_string(),
            }));
        }
        count
    }

    /// Cancel everything and refuse new requests from now on.
    pub fn close(&self, reason: &str) -> usize {
        {
            let mut table = self.table();
            if table.closed.is_none() {
                table.closed = Some(reason.to_string());
            }
        }
        self.cancel_all(reason)
    }

    pub fn pending_count(&self) -> usize {
        self.table().entries.len()
    }
}

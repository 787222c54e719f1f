//! Concurrent soft-deletion pipeline for the Keyhole URL shortener.
//!
//! Bulk deletions run through three stages: a generator task feeding
//! requests into a channel, a fixed pool of workers applying the backend's
//! per-item update (fan-out), and relay tasks merging worker results into
//! one stream (fan-in). The pipeline keeps bulk soft-delete I/O off the
//! request path; callers spawn [`run`] in their own task and respond
//! immediately.
//!
//! Cancellation is cooperative: every stage checks the shared signal at its
//! next select, already-dispatched backend calls are allowed to complete,
//! and no task outlives the drain.

use keyhole_core::{SoftDelete, StorageError};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{info, warn};

/// Number of workers applying deletions concurrently.
pub const NUM_WORKERS: usize = 5;

/// One item of a bulk deletion: the code to flag and the owner it must
/// belong to. A code owned by someone else is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRequest {
    pub short_code: String,
    pub user_id: i64,
}

/// Per-item outcome: affected record count, or the backend error.
pub type DeleteResult = Result<u64, StorageError>;

/// Aggregate outcome of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeleteSummary {
    /// Items fed into the pipeline.
    pub requested: usize,
    /// Records actually flagged, summed over successful items.
    pub removed: u64,
    /// Items that returned a backend error.
    pub failed: usize,
}

/// Creates a cancellation signal pair for one pipeline run.
///
/// The pipeline stops enqueuing and dequeuing at the next opportunity after
/// `send(true)`. Dropping the sender without cancelling leaves the pipeline
/// running to completion.
pub fn cancel_pair() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Resolves once the signal has been cancelled. Sticky: resolves
/// immediately on every call after the first cancel. A dropped sender
/// without a cancel means the pipeline is never cancelled, so the future
/// pends forever in that case.
async fn cancelled(signal: &mut watch::Receiver<bool>) {
    if signal.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Generator stage: feeds each request into the returned channel from its
/// own task, closing the channel when the input is exhausted or the signal
/// fires.
pub fn generate(
    requests: Vec<DeleteRequest>,
    mut cancel: watch::Receiver<bool>,
) -> mpsc::Receiver<DeleteRequest> {
    let (tx, rx) = mpsc::channel(1);

    tokio::spawn(async move {
        for request in requests {
            tokio::select! {
                _ = cancelled(&mut cancel) => break,
                sent = tx.send(request) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
    });

    rx
}

/// Fan-out stage: starts [`NUM_WORKERS`] workers sharing the input channel.
/// Each worker applies [`SoftDelete::mark_deleted`] per item and emits the
/// outcome on its own channel; the channels close as the workers finish.
pub fn fan_out<S>(
    store: S,
    input: mpsc::Receiver<DeleteRequest>,
    cancel: watch::Receiver<bool>,
) -> Vec<mpsc::Receiver<DeleteResult>>
where
    S: SoftDelete + Clone,
{
    let input = Arc::new(Mutex::new(input));

    (0..NUM_WORKERS)
        .map(|_| spawn_worker(store.clone(), Arc::clone(&input), cancel.clone()))
        .collect()
}

fn spawn_worker<S>(
    store: S,
    input: Arc<Mutex<mpsc::Receiver<DeleteRequest>>>,
    mut cancel: watch::Receiver<bool>,
) -> mpsc::Receiver<DeleteResult>
where
    S: SoftDelete,
{
    let (tx, rx) = mpsc::channel(1);

    tokio::spawn(async move {
        loop {
            let request = tokio::select! {
                _ = cancelled(&mut cancel) => break,
                request = async { input.lock().await.recv().await } => {
                    match request {
                        Some(request) => request,
                        None => break,
                    }
                }
            };

            // The backend call itself is not raced against the signal; a
            // dispatched update runs to completion.
            let result = store
                .mark_deleted(&request.short_code, request.user_id)
                .await;

            tokio::select! {
                _ = cancelled(&mut cancel) => break,
                sent = tx.send(result) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
    });

    rx
}

/// Fan-in stage: merges the worker channels into one. The merged channel
/// closes exactly when every relay has finished, so observing the close
/// implies all workers are done.
pub fn fan_in(
    outputs: Vec<mpsc::Receiver<DeleteResult>>,
    cancel: watch::Receiver<bool>,
) -> mpsc::Receiver<DeleteResult> {
    let (tx, rx) = mpsc::channel(1);

    for mut output in outputs {
        let tx = tx.clone();
        let mut cancel = cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancelled(&mut cancel) => break,
                    item = output.recv() => {
                        match item {
                            Some(item) => {
                                if tx.send(item).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
        });
    }

    // Only the relay clones remain; the merged channel closes once the
    // last relay drops its sender.
    rx
}

/// Runs the full pipeline over `requests` and drains it, summing affected
/// records for the audit log. Item failures are logged and counted, never
/// propagated; one failed update does not block the others.
pub async fn run<S>(
    store: S,
    requests: Vec<DeleteRequest>,
    cancel: watch::Receiver<bool>,
) -> DeleteSummary
where
    S: SoftDelete + Clone,
{
    let requested = requests.len();
    let user_id = requests.first().map(|r| r.user_id);

    let input = generate(requests, cancel.clone());
    let outputs = fan_out(store, input, cancel.clone());
    let mut merged = fan_in(outputs, cancel);

    let mut summary = DeleteSummary {
        requested,
        ..DeleteSummary::default()
    };

    while let Some(result) = merged.recv().await {
        match result {
            Ok(rows) => summary.removed += rows,
            Err(err) => {
                summary.failed += 1;
                warn!(error = %err, "delete worker failed");
            }
        }
    }

    info!(
        user_id = user_id.unwrap_or_default(),
        removed = summary.removed,
        requested = summary.requested,
        "bulk deletion drained"
    );

    summary
}

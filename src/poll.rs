//! Processing task observation.
//!
//! After the pipeline is started the only window into it is the status
//! endpoint. The poller queries it on a fixed cadence, folds any partial
//! per-file results into the dataset's merged map as they appear, and
//! settles on a terminal phase:
//!
//! - `Succeeded` / `Failed`: final payload merged, map persisted, durable
//!   handle cleared.
//! - `TimedOut`: the attempt budget ran out while the task was still live.
//!   The handle is deliberately left in place so observation can resume
//!   later; the task itself keeps running server-side.
//!
//! A transient poll error consumes an attempt and the loop carries on.
//! Cancellation is checked before every request; a cancelled observation
//! also leaves the handle in place.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::backend::{DatasetServiceOps, RemoteTaskState, TaskResultPayload};
use crate::cancel::CancellationRegistry;
use crate::error::AppError;
use crate::model::DatasetIdentity;
use crate::reconcile::{merge, AggregateCounts, ResultMap};
use crate::store::TaskHandleStoreOps;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed delay between status queries.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Status queries before the observation gives up.
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 60;

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Where a processing task stands, as seen from this side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPhase {
    /// Task id obtained, no status response seen yet.
    Submitted,
    /// Queued server-side.
    Pending,
    /// A worker is on it.
    Running,
    /// Terminal: finished cleanly.
    Succeeded,
    /// Terminal: stopped with an error.
    Failed,
    /// Attempt budget exhausted while the task was still live. Soft
    /// terminal: the remote task may still finish.
    TimedOut,
}

impl TaskPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPhase::Submitted => "SUBMITTED",
            TaskPhase::Pending => "PENDING",
            TaskPhase::Running => "RUNNING",
            TaskPhase::Succeeded => "SUCCEEDED",
            TaskPhase::Failed => "FAILED",
            TaskPhase::TimedOut => "TIMED_OUT",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskPhase::Succeeded | TaskPhase::Failed | TaskPhase::TimedOut
        )
    }
}

/// How one observation of a task ended.
#[derive(Debug, Clone)]
pub struct ProcessingOutcome {
    pub phase: TaskPhase,
    /// The dataset's merged result map after this observation.
    pub results: ResultMap,
    /// Recomputed from `results`, never carried forward.
    pub counts: AggregateCounts,
    /// Task-level failure detail, present on `Failed`.
    pub error: Option<String>,
    /// On `Failed`: some per-file results arrived before the task died.
    pub partial: bool,
}

impl ProcessingOutcome {
    /// One line for the completion toast.
    pub fn describe(&self) -> String {
        let c = &self.counts;
        match self.phase {
            TaskPhase::Succeeded => format!(
                "Processing finished: {} processed, {} unchanged, {} failed",
                c.processed_files, c.skipped_files, c.failed_files
            ),
            TaskPhase::Failed if self.partial => format!(
                "Processing failed partway: {} processed, {} unchanged, {} failed",
                c.processed_files, c.skipped_files, c.failed_files
            ),
            TaskPhase::Failed => "Processing failed before any file completed".to_string(),
            TaskPhase::TimedOut => {
                "Processing is taking longer than expected; it continues in the background"
                    .to_string()
            }
            phase => format!("Processing is {}", phase.as_str()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TaskPoller
// ─────────────────────────────────────────────────────────────────────────────

/// Polls one processing task to completion, merging and persisting results
/// along the way.
pub struct TaskPoller<C: DatasetServiceOps, S: TaskHandleStoreOps> {
    client: Arc<C>,
    store: Arc<S>,
    registry: CancellationRegistry,
    poll_interval: Duration,
    max_attempts: u32,
    phase_tx: watch::Sender<TaskPhase>,
}

impl<C: DatasetServiceOps, S: TaskHandleStoreOps> TaskPoller<C, S> {
    pub fn new(
        client: Arc<C>,
        store: Arc<S>,
        registry: CancellationRegistry,
        poll_interval: Duration,
        max_attempts: u32,
    ) -> Self {
        let (phase_tx, _) = watch::channel(TaskPhase::Submitted);
        Self {
            client,
            store,
            registry,
            poll_interval,
            max_attempts,
            phase_tx,
        }
    }

    /// Phase updates for progress UIs. The receiver always sees the latest
    /// phase; intermediate flips may be skipped under load.
    pub fn subscribe(&self) -> watch::Receiver<TaskPhase> {
        self.phase_tx.subscribe()
    }

    /// Observes `task_id` until it settles, the attempt budget runs out, or
    /// the session is cancelled.
    ///
    /// `initial` carries the dataset's previously reconciled results (from
    /// the durable store on resume, empty on a fresh run); everything the
    /// task reports is merged on top of it.
    ///
    /// # Errors
    ///
    /// - `AppError::Cancelled` - session cancelled; the handle stays live
    /// - `AppError::NotFound` - the service no longer knows the task (stale
    ///   handle; the caller decides whether to clear it)
    /// - `AppError::StorageError` - persisting a terminal result failed
    pub async fn observe(
        &self,
        identity: &DatasetIdentity,
        task_id: &str,
        initial: ResultMap,
    ) -> Result<ProcessingOutcome, AppError> {
        let handle = self.registry.register();
        let mut results = initial;
        let mut saw_partials = false;

        self.set_phase(TaskPhase::Submitted);
        info!(dataset = %identity, max_attempts = self.max_attempts, "observing processing task");

        for attempt in 1..=self.max_attempts {
            if handle.is_cancelled() {
                warn!(dataset = %identity, attempt, "observation cancelled");
                return Err(AppError::Cancelled);
            }

            let status = match self.client.get_task_status(task_id).await {
                Ok(status) => status,
                Err(err @ AppError::NotFound(_)) => {
                    warn!(dataset = %identity, "task unknown to the service");
                    return Err(err);
                }
                Err(e) => {
                    // Transient: burn the attempt and keep watching
                    warn!(dataset = %identity, attempt, error = %e, "poll failed");
                    self.wait_or_cancel(&handle).await?;
                    continue;
                }
            };

            // Fold in partials the moment they show up, so a crash between
            // polls loses as little as possible.
            if let Some(payload) = &status.partial_meta {
                saw_partials |= self.merge_payload(identity, &mut results, payload).await;
            }
            if !status.state.is_terminal() {
                if let Some(payload) = &status.result {
                    saw_partials |= self.merge_payload(identity, &mut results, payload).await;
                }
            }

            match status.state {
                RemoteTaskState::Pending => self.set_phase(TaskPhase::Pending),
                RemoteTaskState::Running => self.set_phase(TaskPhase::Running),
                RemoteTaskState::Success => {
                    if let Some(payload) = &status.result {
                        results = merge(&results, &payload.files);
                    }
                    self.store.save_result_map(identity, &results).await?;
                    self.store.clear_task_handle(identity).await?;
                    self.set_phase(TaskPhase::Succeeded);

                    let counts = AggregateCounts::from_results(&results);
                    info!(
                        dataset = %identity,
                        processed = counts.processed_files,
                        skipped = counts.skipped_files,
                        failed = counts.failed_files,
                        "processing succeeded"
                    );
                    return Ok(ProcessingOutcome {
                        phase: TaskPhase::Succeeded,
                        counts,
                        results,
                        error: None,
                        partial: false,
                    });
                }
                RemoteTaskState::Failure => {
                    let mut detail = None;
                    if let Some(payload) = &status.result {
                        if !payload.files.is_empty() {
                            saw_partials = true;
                        }
                        results = merge(&results, &payload.files);
                        detail = payload.error.clone();
                    }
                    self.store.save_result_map(identity, &results).await?;
                    self.store.clear_task_handle(identity).await?;
                    self.set_phase(TaskPhase::Failed);

                    let counts = AggregateCounts::from_results(&results);
                    warn!(dataset = %identity, partial = saw_partials, "processing failed");
                    return Ok(ProcessingOutcome {
                        phase: TaskPhase::Failed,
                        counts,
                        results,
                        error: Some(
                            detail.unwrap_or_else(|| "Processing failed".to_string()),
                        ),
                        partial: saw_partials,
                    });
                }
            }

            if attempt < self.max_attempts {
                self.wait_or_cancel(&handle).await?;
            }
        }

        // Budget exhausted: soft timeout. The handle stays so a later
        // observation can pick the task back up.
        self.store.save_result_map(identity, &results).await?;
        self.set_phase(TaskPhase::TimedOut);
        warn!(dataset = %identity, "observation timed out; handle kept for resume");

        let counts = AggregateCounts::from_results(&results);
        Ok(ProcessingOutcome {
            phase: TaskPhase::TimedOut,
            counts,
            results,
            error: None,
            partial: false,
        })
    }

    /// Merges one payload and persists the snapshot best-effort.
    /// Returns whether the payload carried any per-file entries.
    async fn merge_payload(
        &self,
        identity: &DatasetIdentity,
        results: &mut ResultMap,
        payload: &TaskResultPayload,
    ) -> bool {
        if payload.files.is_empty() {
            return false;
        }
        *results = merge(results, &payload.files);
        if let Err(e) = self.store.save_result_map(identity, results).await {
            // Not fatal mid-flight; the terminal persist will retry
            warn!(dataset = %identity, error = %e, "failed to persist partial results");
        }
        true
    }

    /// Sleeps one poll interval, bailing out early on cancellation.
    async fn wait_or_cancel(
        &self,
        handle: &crate::cancel::OperationHandle,
    ) -> Result<(), AppError> {
        tokio::select! {
            _ = handle.cancelled() => Err(AppError::Cancelled),
            _ = tokio::time::sleep(self.poll_interval) => Ok(()),
        }
    }

    fn set_phase(&self, phase: TaskPhase) {
        self.phase_tx.send_if_modified(|current| {
            if *current != phase {
                *current = phase;
                true
            } else {
                false
            }
        });
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

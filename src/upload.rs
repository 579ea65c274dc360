//! Batched file uploads.
//!
//! Admitted files are uploaded in consecutive groups of `batch_size`
//! (default 3). Groups run strictly one after another; files inside a group
//! upload concurrently. Each file registers with the cancellation registry
//! for its own upload, so a cancel stops in-flight transfers and prevents
//! any later group from starting.
//!
//! One file failing never takes its group or the remaining groups down:
//! the failure is recorded in that file's outcome and the run continues.

use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use crate::backend::DatasetServiceOps;
use crate::cancel::CancellationRegistry;
use crate::error::AppError;
use crate::model::{CandidateFile, DatasetIdentity};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Files uploaded concurrently within one group.
pub const DEFAULT_BATCH_SIZE: usize = 3;

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Classification of one file's upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    /// Content stored as new.
    Stored,
    /// Content-identical file already existed on the server.
    Skipped,
    /// Upload failed; the run continued without this file.
    Failed,
    /// Stopped by the user before or during transfer.
    Cancelled,
}

/// Outcome of one file's upload attempt.
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub file_name: String,
    pub status: UploadStatus,
    /// Server-computed content hash, present on `Stored` and `Skipped`.
    pub file_hash: Option<String>,
    /// Failure detail, present on `Failed`.
    pub error: Option<String>,
}

/// Totals over a finished (or cancelled) upload run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UploadSummary {
    pub stored: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl UploadSummary {
    pub fn from_outcomes(outcomes: &[UploadOutcome]) -> Self {
        let mut summary = Self::default();
        for outcome in outcomes {
            match outcome.status {
                UploadStatus::Stored => summary.stored += 1,
                UploadStatus::Skipped => summary.skipped += 1,
                UploadStatus::Failed => summary.failed += 1,
                UploadStatus::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.stored + self.skipped + self.failed + self.cancelled
    }

    /// One line for the completion toast.
    pub fn describe(&self) -> String {
        format!(
            "{} uploaded, {} already present, {} failed, {} cancelled",
            self.stored, self.skipped, self.failed, self.cancelled
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// UploadBatcher
// ─────────────────────────────────────────────────────────────────────────────

/// Uploads files in sequential groups with intra-group concurrency.
pub struct UploadBatcher<C: DatasetServiceOps> {
    client: Arc<C>,
    registry: CancellationRegistry,
    batch_size: usize,
}

impl<C: DatasetServiceOps> UploadBatcher<C> {
    /// Creates a batcher. `batch_size` of 0 falls back to the default.
    pub fn new(client: Arc<C>, registry: CancellationRegistry, batch_size: usize) -> Self {
        Self {
            client,
            registry,
            batch_size: if batch_size == 0 {
                DEFAULT_BATCH_SIZE
            } else {
                batch_size
            },
        }
    }

    /// Uploads `files` in admission order, streaming each outcome through
    /// `events` as it settles and returning all of them at the end.
    ///
    /// Group `k + 1` never starts before every file of group `k` has
    /// settled. After a cancel, files that have not started report
    /// `Cancelled` without any network traffic.
    pub async fn upload(
        &self,
        identity: &DatasetIdentity,
        files: Vec<CandidateFile>,
        events: Option<&UnboundedSender<UploadOutcome>>,
    ) -> (Vec<UploadOutcome>, UploadSummary) {
        let total = files.len();
        let mut outcomes: Vec<UploadOutcome> = Vec::with_capacity(total);

        info!(
            dataset = %identity,
            files = total,
            batch_size = self.batch_size,
            "starting batched upload"
        );

        let groups: Vec<&[CandidateFile]> = files.chunks(self.batch_size).collect();
        for (group_index, group) in groups.iter().enumerate() {
            if self.registry.is_cancelled() {
                // Everything not yet started settles as cancelled, silently
                // skipping the network entirely.
                for file in files[outcomes.len()..].iter() {
                    let outcome = UploadOutcome {
                        file_name: file.name.clone(),
                        status: UploadStatus::Cancelled,
                        file_hash: None,
                        error: None,
                    };
                    emit(events, &outcome);
                    outcomes.push(outcome);
                }
                warn!(dataset = %identity, "upload cancelled between groups");
                break;
            }

            let group_outcomes = join_all(
                group
                    .iter()
                    .map(|file| self.upload_one(identity, file)),
            )
            .await;

            info!(
                dataset = %identity,
                group = group_index + 1,
                groups = groups.len(),
                "upload group finished"
            );

            for outcome in group_outcomes {
                emit(events, &outcome);
                outcomes.push(outcome);
            }
        }

        let summary = UploadSummary::from_outcomes(&outcomes);
        info!(dataset = %identity, summary = %summary.describe(), "batched upload finished");
        (outcomes, summary)
    }

    /// Uploads one file, racing the transfer against its cancellation handle.
    async fn upload_one(&self, identity: &DatasetIdentity, file: &CandidateFile) -> UploadOutcome {
        let handle = self.registry.register();
        if handle.is_cancelled() {
            return UploadOutcome {
                file_name: file.name.clone(),
                status: UploadStatus::Cancelled,
                file_hash: None,
                error: None,
            };
        }

        let result = tokio::select! {
            _ = handle.cancelled() => Err(AppError::Cancelled),
            result = self.client.upload_file(identity, file) => result,
        };

        match result {
            Ok(response) => UploadOutcome {
                file_name: file.name.clone(),
                status: if response.skipped {
                    UploadStatus::Skipped
                } else {
                    UploadStatus::Stored
                },
                file_hash: Some(response.file_hash),
                error: None,
            },
            Err(AppError::Cancelled) => UploadOutcome {
                file_name: file.name.clone(),
                status: UploadStatus::Cancelled,
                file_hash: None,
                error: None,
            },
            Err(e) => {
                warn!(file = %file.name, error = %e, "file upload failed");
                UploadOutcome {
                    file_name: file.name.clone(),
                    status: UploadStatus::Failed,
                    file_hash: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

fn emit(events: Option<&UnboundedSender<UploadOutcome>>, outcome: &UploadOutcome) {
    if let Some(sender) = events {
        // Receiver dropping just means nobody is watching anymore
        let _ = sender.send(outcome.clone());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

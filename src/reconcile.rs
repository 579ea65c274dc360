//! Result reconciliation for processing runs.
//!
//! Every payload the service reports (partial or final) flows through
//! `merge`, which folds per-file entries into the map persisted for the
//! dataset. The merge is keyed by content hash, so re-delivered entries
//! overwrite their own slot and entries from earlier runs survive.
//!
//! Aggregate counts are never tracked incrementally: they are recomputed
//! from the merged map every time, so repeated or out-of-order payloads
//! cannot skew them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Per-file processing outcome, keyed in `ResultMap` by `file_hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileProcessingResult {
    /// Server-computed content hash; the merge key.
    pub file_hash: String,
    /// Display name at upload time.
    pub file_name: String,
    /// Pipeline finished this file cleanly.
    pub success: bool,
    /// File was unchanged since the last run; nothing was re-processed.
    pub skipped: bool,
    /// Number of chunks the parser produced.
    #[serde(default)]
    pub chunks_created: u64,
    /// Items written to the index.
    #[serde(default)]
    pub items_stored: u64,
    /// Items already present and left untouched.
    #[serde(default)]
    pub items_skipped: u64,
    /// Failure detail when `success` is false.
    #[serde(default)]
    pub error: Option<String>,
    /// Which parser handled the file.
    #[serde(default)]
    pub parser: Option<String>,
    /// Which embedder produced the vectors.
    #[serde(default)]
    pub embedder: Option<String>,
}

/// Reconciled per-file results for a dataset, keyed by content hash.
pub type ResultMap = HashMap<String, FileProcessingResult>;

/// Counts derived from a `ResultMap`.
///
/// Always built via `from_results`; there is deliberately no way to bump
/// the fields one at a time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateCounts {
    /// Files processed successfully in some run.
    pub processed_files: usize,
    /// Files skipped as unchanged.
    pub skipped_files: usize,
    /// Files whose last known outcome is a failure.
    pub failed_files: usize,
}

impl AggregateCounts {
    /// Recomputes the counts from the merged map.
    pub fn from_results(results: &ResultMap) -> Self {
        let mut counts = Self::default();
        for entry in results.values() {
            if entry.skipped {
                counts.skipped_files += 1;
            } else if entry.success {
                counts.processed_files += 1;
            } else {
                counts.failed_files += 1;
            }
        }
        counts
    }

    /// Total files with a known outcome.
    pub fn total(&self) -> usize {
        self.processed_files + self.skipped_files + self.failed_files
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Merge
// ─────────────────────────────────────────────────────────────────────────────

/// Folds an incoming payload into the previous map.
///
/// Incoming entries overwrite by hash; every other previous entry is kept.
/// Applying the same payload twice produces the same map.
pub fn merge(previous: &ResultMap, incoming: &ResultMap) -> ResultMap {
    let mut merged = previous.clone();
    for (hash, entry) in incoming {
        merged.insert(hash.clone(), entry.clone());
    }
    merged
}

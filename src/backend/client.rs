//! HTTP client for the dataset service.
//!
//! This module provides functionality to:
//! - Upload files into a dataset (multipart, hash-deduplicated server-side)
//! - Remove individual files by content hash
//! - Start the ingestion pipeline for a dataset
//! - Poll processing task status
//! - Delete a dataset outright
//!
//! Authentication is the embedder's concern: the injected `reqwest::Client`
//! carries whatever default headers the surrounding application configured.
//! Only HTTP method, path, and status codes are logged.

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::error::AppError;
use crate::model::{CandidateFile, DatasetIdentity};
use crate::reconcile::FileProcessingResult;

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Remote state of a processing task.
///
/// IMPORTANT: Uses `#[serde(rename_all = "UPPERCASE")]` to match the service,
/// which reports "PENDING", "RUNNING", "SUCCESS", "FAILURE".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RemoteTaskState {
    /// Queued, not yet picked up by a worker.
    Pending,
    /// A worker is processing the dataset.
    Running,
    /// Terminal: processing finished cleanly.
    Success,
    /// Terminal: processing stopped with an error.
    Failure,
}

impl RemoteTaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteTaskState::Pending => "PENDING",
            RemoteTaskState::Running => "RUNNING",
            RemoteTaskState::Success => "SUCCESS",
            RemoteTaskState::Failure => "FAILURE",
        }
    }

    /// True for states the task can never leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RemoteTaskState::Success | RemoteTaskState::Failure)
    }
}

/// Response to a single file upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileUploadResponse {
    /// File content was stored as new.
    pub stored: bool,
    /// Content-identical file already existed; nothing was written.
    pub skipped: bool,
    /// Server-computed content hash, the key for all later results.
    pub file_hash: String,
}

/// Response to starting the ingestion pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartProcessingResponse {
    /// Opaque handle for polling.
    pub task_id: String,
}

/// Per-file results carried in a task payload, keyed by content hash.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskResultPayload {
    #[serde(default)]
    pub files: HashMap<String, FileProcessingResult>,
    /// Task-level error detail, present on FAILURE.
    #[serde(default)]
    pub error: Option<String>,
}

/// One poll of a processing task.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskStatusResponse {
    pub state: RemoteTaskState,
    /// Fraction complete in [0, 1] when the worker reports it.
    #[serde(default)]
    pub progress: Option<f64>,
    /// Full payload, present on terminal states.
    #[serde(default)]
    pub result: Option<TaskResultPayload>,
    /// Incremental per-file results surfaced while still RUNNING.
    #[serde(default)]
    pub partial_meta: Option<TaskResultPayload>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal Wire Types
// ─────────────────────────────────────────────────────────────────────────────

/// Service error response format.
#[derive(Debug, Deserialize)]
struct ServiceErrorBody {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// DatasetServiceClient
// ─────────────────────────────────────────────────────────────────────────────

/// Client for the dataset service's ingestion endpoints.
#[derive(Clone)]
pub struct DatasetServiceClient {
    /// Shared HTTP client.
    client: Arc<Client>,
    /// Service base URL.
    base_url: Url,
}

impl DatasetServiceClient {
    /// Creates a new client.
    ///
    /// # Arguments
    ///
    /// * `client` - Shared HTTP client, pre-configured by the embedder
    /// * `base_url` - Dataset service base URL
    pub fn new(client: Arc<Client>, base_url: Url) -> Self {
        Self { client, base_url }
    }

    /// Uploads one file into the dataset.
    ///
    /// The service hashes the content; a duplicate comes back with
    /// `skipped: true` and is not an error.
    ///
    /// # Errors
    ///
    /// - `AppError::ServiceError` - API error
    /// - `AppError::RateLimited` - Rate limit exceeded
    /// - `AppError::ConnectionFailed` - Network error
    pub async fn upload_file(
        &self,
        identity: &DatasetIdentity,
        file: &CandidateFile,
    ) -> Result<FileUploadResponse, AppError> {
        let url = self.build_dataset_url(identity, Some("files"))?;

        let part = Part::bytes(file.bytes.clone())
            .file_name(file.name.clone())
            .mime_str(&file.declared_mime)
            .map_err(|e| AppError::Internal(format!("Invalid MIME type: {}", e)))?;
        let form = Form::new().part("file", part);

        info!(
            "[DATASET] POST /datasets/{}/files ({} bytes)",
            identity,
            file.size()
        );

        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| AppError::ConnectionFailed(format!("File upload failed: {}", e)))?;

        let status = response.status();
        info!("[DATASET] POST /datasets/{}/files -> {}", identity, status.as_u16());

        if !status.is_success() {
            return Err(parse_error_response(response, status).await);
        }

        response.json().await.map_err(|e| {
            AppError::ServiceError(format!("Failed to parse upload response: {}", e))
        })
    }

    /// Removes a stored file from the dataset by content hash.
    pub async fn delete_file(
        &self,
        identity: &DatasetIdentity,
        file_hash: &str,
    ) -> Result<(), AppError> {
        let url = self.build_dataset_url(identity, Some(&format!("files/{}", file_hash)))?;

        info!(
            "[DATASET] DELETE /datasets/{}/files/{}",
            identity,
            redact_id(file_hash)
        );

        let response = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(|e| AppError::ConnectionFailed(format!("File delete failed: {}", e)))?;

        let status = response.status();
        info!(
            "[DATASET] DELETE /datasets/{}/files/{} -> {}",
            identity,
            redact_id(file_hash),
            status.as_u16()
        );

        if !status.is_success() {
            return Err(parse_error_response(response, status).await);
        }

        Ok(())
    }

    /// Starts the ingestion pipeline for the dataset.
    ///
    /// # Returns
    ///
    /// The task id to poll.
    pub async fn start_processing(
        &self,
        identity: &DatasetIdentity,
    ) -> Result<String, AppError> {
        let url = self.build_dataset_url(identity, Some("process"))?;

        info!("[DATASET] POST /datasets/{}/process", identity);

        let response = self
            .client
            .post(url)
            .send()
            .await
            .map_err(|e| AppError::ConnectionFailed(format!("Processing start failed: {}", e)))?;

        let status = response.status();
        info!(
            "[DATASET] POST /datasets/{}/process -> {}",
            identity,
            status.as_u16()
        );

        if !status.is_success() {
            return Err(parse_error_response(response, status).await);
        }

        let started: StartProcessingResponse = response.json().await.map_err(|e| {
            AppError::ServiceError(format!("Failed to parse processing response: {}", e))
        })?;

        Ok(started.task_id)
    }

    /// Gets the current status of a processing task.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` - Task unknown to the service
    /// - `AppError::ServiceError` - API error
    /// - `AppError::ConnectionFailed` - Network error
    pub async fn get_task_status(&self, task_id: &str) -> Result<TaskStatusResponse, AppError> {
        let url = self.build_task_url(task_id)?;

        info!("[DATASET] GET /tasks/{} (status)", redact_id(task_id));

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::ConnectionFailed(format!("Task status check failed: {}", e)))?;

        let status = response.status();
        info!(
            "[DATASET] GET /tasks/{} -> {}",
            redact_id(task_id),
            status.as_u16()
        );

        if !status.is_success() {
            return Err(parse_error_response(response, status).await);
        }

        response.json().await.map_err(|e| {
            AppError::ServiceError(format!("Failed to parse task status response: {}", e))
        })
    }

    /// Deletes the dataset and everything stored under it.
    pub async fn delete_dataset(&self, identity: &DatasetIdentity) -> Result<(), AppError> {
        let url = self.build_dataset_url(identity, None)?;

        info!("[DATASET] DELETE /datasets/{}", identity);

        let response = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(|e| AppError::ConnectionFailed(format!("Dataset delete failed: {}", e)))?;

        let status = response.status();
        info!(
            "[DATASET] DELETE /datasets/{} -> {}",
            identity,
            status.as_u16()
        );

        if !status.is_success() {
            return Err(parse_error_response(response, status).await);
        }

        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // URL Builders
    // ─────────────────────────────────────────────────────────────────────────

    /// Builds `/datasets/{ns}/{project}/{dataset}` plus an optional suffix.
    fn build_dataset_url(
        &self,
        identity: &DatasetIdentity,
        suffix: Option<&str>,
    ) -> Result<Url, AppError> {
        let mut path = format!(
            "/datasets/{}/{}/{}",
            identity.namespace, identity.project, identity.dataset
        );
        if let Some(suffix) = suffix {
            path.push('/');
            path.push_str(suffix);
        }
        self.base_url
            .join(&path)
            .map_err(|e| AppError::Internal(format!("Failed to build dataset URL: {}", e)))
    }

    /// Builds `/tasks/{task_id}`.
    fn build_task_url(&self, task_id: &str) -> Result<Url, AppError> {
        let path = format!("/tasks/{}", task_id);
        self.base_url
            .join(&path)
            .map_err(|e| AppError::Internal(format!("Failed to build task URL: {}", e)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Error Handling
// ─────────────────────────────────────────────────────────────────────────────

/// Parses an error response and maps it to the appropriate AppError.
async fn parse_error_response(
    response: reqwest::Response,
    status: reqwest::StatusCode,
) -> AppError {
    // Check for rate limiting
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        return AppError::RateLimited {
            retry_after_secs: retry_after,
        };
    }

    // Check for not found
    if status == reqwest::StatusCode::NOT_FOUND {
        return AppError::NotFound("The requested resource".to_string());
    }

    // Try to parse the service error body
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("Unable to read error body"));

    if let Ok(err) = serde_json::from_str::<ServiceErrorBody>(&body) {
        return match err.code {
            Some(code) => AppError::ServiceError(format!("[{}] {}", code, err.message)),
            None => AppError::ServiceError(err.message),
        };
    }

    // Fallback to generic error
    AppError::ServiceError(format!(
        "HTTP {} - {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown error")
    ))
}

// ─────────────────────────────────────────────────────────────────────────────
// Helper Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Redacts an opaque id for logging (shows first 8 chars).
fn redact_id(id: &str) -> String {
    if id.len() > 8 {
        format!("{}...", &id[..8])
    } else {
        id.to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

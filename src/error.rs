use serde::Serialize;
use thiserror::Error;

/// What the dashboard shows the user when an operation goes wrong.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPresentation {
    pub title: String,
    pub message: String,
    pub action: Option<String>,
}

/// Application-wide error type.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Input ─────────────────────────────────────────────────────────────────
    #[error("Invalid dataset identity: {0}")]
    InvalidIdentity(String),

    #[error("No files to process")]
    NoFilesToProcess,

    // ── API ───────────────────────────────────────────────────────────────────
    #[error("Dataset service error: {0}")]
    ServiceError(String),

    #[error("Rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Not found: {0}")]
    NotFound(String),

    // ── Ingestion ─────────────────────────────────────────────────────────────
    #[error("Processing task {task_id} failed: {message}")]
    TaskFailed { task_id: String, message: String },

    #[error("A processing task is already running for {dataset}")]
    TaskAlreadyActive { dataset: String },

    #[error("Operation cancelled")]
    Cancelled,

    // ── Storage ───────────────────────────────────────────────────────────────
    #[error("Storage error: {0}")]
    StorageError(String),

    // ── Network ───────────────────────────────────────────────────────────────
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    // ── Generic fallback ──────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Maps the error onto a title, message, and suggested next step the UI
    /// can render directly. Internal detail stays out of the message for the
    /// storage and fallback variants.
    pub fn to_presentation(&self) -> ErrorPresentation {
        match self {
            // ── Input ─────────────────────────────────────────────────────────
            AppError::InvalidIdentity(msg) => ErrorPresentation {
                title: "Invalid Dataset".into(),
                message: format!("The dataset reference is incomplete: {}", msg),
                action: Some("Select a project and dataset first".into()),
            },

            AppError::NoFilesToProcess => ErrorPresentation {
                title: "Nothing to Upload".into(),
                message: "No files were selected for this dataset.".into(),
                action: Some("Add at least one file".into()),
            },

            // ── API ───────────────────────────────────────────────────────────
            AppError::ServiceError(msg) => ErrorPresentation {
                title: "Service Error".into(),
                message: msg.clone(),
                action: None,
            },

            AppError::RateLimited { retry_after_secs } => {
                let message = match retry_after_secs {
                    Some(secs) => format!(
                        "The dataset service is throttling requests; it asked for a {} second pause.",
                        secs
                    ),
                    None => "The dataset service is throttling requests.".into(),
                };
                ErrorPresentation {
                    title: "Too Many Requests".into(),
                    message,
                    action: Some("Wait a moment, then retry".into()),
                }
            }

            AppError::NotFound(what) => ErrorPresentation {
                title: "Not Found".into(),
                message: format!("{} no longer exists on the server.", what),
                action: Some("Refresh and try again".into()),
            },

            // ── Ingestion ─────────────────────────────────────────────────────
            AppError::TaskFailed { task_id: _, message } => ErrorPresentation {
                title: "Processing Failed".into(),
                message: message.clone(),
                action: Some("Review the error and try again".into()),
            },

            AppError::TaskAlreadyActive { dataset } => ErrorPresentation {
                title: "Already Processing".into(),
                message: format!("Dataset {} is still being processed.", dataset),
                action: Some("Wait for the current run to finish".into()),
            },

            AppError::Cancelled => ErrorPresentation {
                title: "Cancelled".into(),
                message: "The operation was stopped at your request.".into(),
                action: None,
            },

            // ── Storage ───────────────────────────────────────────────────────
            AppError::StorageError(_) => ErrorPresentation {
                title: "Local Storage Error".into(),
                message: "Could not read or write the local ingestion records.".into(),
                action: Some("Try again".into()),
            },

            // ── Network ───────────────────────────────────────────────────────
            AppError::ConnectionFailed(_) => ErrorPresentation {
                title: "Connection Failed".into(),
                message: "Could not reach the dataset service.".into(),
                action: Some("Check your connection and retry".into()),
            },

            // ── Generic ───────────────────────────────────────────────────────
            AppError::Internal(_) => ErrorPresentation {
                title: "Unexpected Error".into(),
                message: "An unexpected problem occurred.".into(),
                action: Some("Try again".into()),
            },
        }
    }

    /// True for a user-initiated stop, which is never reported as a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }
}

// The session API surfaces errors straight to the embedding UI layer, so an
// AppError serializes as its presentation rather than its Debug shape
impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_presentation().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn every_variant() -> Vec<AppError> {
        vec![
            AppError::InvalidIdentity("namespace is empty".into()),
            AppError::NoFilesToProcess,
            AppError::ServiceError("upstream rejected the request".into()),
            AppError::RateLimited {
                retry_after_secs: Some(30),
            },
            AppError::RateLimited {
                retry_after_secs: None,
            },
            AppError::NotFound("Task 01J2".into()),
            AppError::TaskFailed {
                task_id: "01J2K3".into(),
                message: "parser crashed".into(),
            },
            AppError::TaskAlreadyActive {
                dataset: "acme/roadmap/specs".into(),
            },
            AppError::Cancelled,
            AppError::StorageError("disk full".into()),
            AppError::ConnectionFailed("timeout".into()),
            AppError::Internal("something broke".into()),
        ]
    }

    #[test]
    fn every_presentation_is_renderable() {
        for variant in every_variant() {
            let p = variant.to_presentation();
            assert!(!p.title.trim().is_empty(), "blank title: {:?}", variant);
            assert!(!p.message.trim().is_empty(), "blank message: {:?}", variant);
            if let Some(action) = &p.action {
                assert!(!action.trim().is_empty(), "blank action: {:?}", variant);
            }
        }
    }

    #[test]
    fn retryable_errors_suggest_a_next_step() {
        let retryable = [
            AppError::NoFilesToProcess,
            AppError::RateLimited {
                retry_after_secs: None,
            },
            AppError::ConnectionFailed("network unreachable".into()),
            AppError::StorageError("locked".into()),
        ];
        for variant in retryable {
            assert!(
                variant.to_presentation().action.is_some(),
                "no action suggested for {:?}",
                variant
            );
        }
    }

    #[test]
    fn rate_limit_message_carries_the_server_delay() {
        let p = AppError::RateLimited {
            retry_after_secs: Some(30),
        }
        .to_presentation();
        assert!(p.message.contains("30"));
    }

    #[test]
    fn cancellation_is_a_notice_not_a_failure() {
        let cancelled = AppError::Cancelled;
        assert!(cancelled.is_cancellation());
        assert!(cancelled.to_presentation().action.is_none());

        for variant in every_variant() {
            if !matches!(variant, AppError::Cancelled) {
                assert!(!variant.is_cancellation(), "misclassified: {:?}", variant);
            }
        }
    }

    #[test]
    fn errors_serialize_as_their_presentation() {
        for variant in every_variant() {
            let value = serde_json::to_value(&variant).unwrap();
            assert!(value.get("title").is_some(), "no title in {:?}", variant);
            assert!(value.get("message").is_some(), "no message in {:?}", variant);
            // action may be null but the field is always present
            assert!(value.get("action").is_some(), "no action in {:?}", variant);
        }
    }
}

//! Dataset ingestion for the project-management dashboard.
//!
//! The crate takes a user's file selection from admission through batched
//! upload, processing-pipeline submission, and task observation, persisting
//! enough state along the way that an interrupted run can be resumed:
//!
//! - [`admission`] - local file validation before anything touches the network
//! - [`upload`] - sequential groups of concurrent uploads, cancellable per run
//! - [`poll`] - fixed-cadence task observation with partial-result merging
//! - [`reconcile`] - idempotent per-file result merging and aggregate counts
//! - [`store`] - durable SQLite records for task handles and result maps
//! - [`session`] - the orchestrator tying the stages together
//!
//! [`backend`] talks to the dataset service over HTTP; [`cancel`] lets any
//! holder of a registry clone stop everything a session has in flight.

pub mod admission;
pub mod backend;
pub mod cancel;
pub mod error;
pub mod model;
pub mod poll;
pub mod reconcile;
pub mod session;
pub mod store;
pub mod upload;

pub use admission::{AdmissionPolicy, AdmissionVerdict, Rejection, RejectionReason};
pub use backend::{DatasetServiceClient, DatasetServiceOps};
pub use cancel::CancellationRegistry;
pub use error::{AppError, ErrorPresentation};
pub use model::{CandidateFile, DatasetIdentity};
pub use poll::{ProcessingOutcome, TaskPhase, TaskPoller};
pub use reconcile::{AggregateCounts, FileProcessingResult, ResultMap};
pub use session::{IngestionEvent, IngestionReport, IngestionSession, SessionOptions};
pub use store::{Database, TaskHandleStoreOps};
pub use upload::{UploadBatcher, UploadOutcome, UploadStatus, UploadSummary};

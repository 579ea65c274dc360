//! Ingestion session: the end-to-end flow the dashboard drives.
//!
//! One session covers one dataset interaction: admission, batched upload,
//! pipeline start, task observation, and reconciliation, with durable
//! checkpoints so a reloaded UI can pick up where it left off. Progress is
//! emitted as `IngestionEvent`s over an optional channel; the caller
//! renders them however it likes.

use std::sync::Arc;

use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tracing::{info, warn};
use uuid::Uuid;

use crate::admission::{AdmissionPolicy, Rejection};
use crate::backend::DatasetServiceOps;
use crate::cancel::CancellationRegistry;
use crate::error::AppError;
use crate::model::{CandidateFile, DatasetIdentity};
use crate::poll::{
    ProcessingOutcome, TaskPhase, TaskPoller, DEFAULT_MAX_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL,
};
use crate::reconcile::AggregateCounts;
use crate::store::TaskHandleStoreOps;
use crate::upload::{UploadBatcher, UploadOutcome, UploadSummary, DEFAULT_BATCH_SIZE};

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Tunables for one session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Files uploaded concurrently within one group.
    pub batch_size: usize,
    /// Delay between task status queries.
    pub poll_interval: std::time::Duration,
    /// Status queries before observation times out softly.
    pub max_poll_attempts: u32,
    /// Which file types the dashboard accepts.
    pub admission: AdmissionPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
            admission: AdmissionPolicy::default(),
        }
    }
}

/// Progress notifications for the embedding UI.
#[derive(Debug, Clone)]
pub enum IngestionEvent {
    /// Admission finished; rejected files never touch the network.
    AdmissionComplete {
        accepted: usize,
        rejections: Vec<Rejection>,
    },
    /// One file's upload settled.
    FileUploaded(UploadOutcome),
    /// All upload groups settled.
    UploadComplete(UploadSummary),
    /// The pipeline accepted the run.
    TaskSubmitted { task_id: String },
    /// The observed task moved to a new phase.
    PhaseChanged(TaskPhase),
}

/// Everything one `ingest` call produced.
#[derive(Debug)]
pub struct IngestionReport {
    pub rejections: Vec<Rejection>,
    pub uploads: Vec<UploadOutcome>,
    pub upload_summary: UploadSummary,
    /// `None` when no processing run started (blocked selection, nothing
    /// new stored, or cancelled before submission).
    pub processing: Option<ProcessingOutcome>,
}

impl IngestionReport {
    /// Files were selected but every one was turned away.
    pub fn blocked(&self) -> bool {
        self.uploads.is_empty() && !self.rejections.is_empty()
    }

    /// One line for the completion toast.
    pub fn describe(&self) -> String {
        if self.blocked() {
            return format!(
                "No files were uploaded: all {} selected files were rejected",
                self.rejections.len()
            );
        }
        match &self.processing {
            Some(outcome) => outcome.describe(),
            None => format!("Upload finished: {}", self.upload_summary.describe()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// IngestionSession
// ─────────────────────────────────────────────────────────────────────────────

/// Orchestrates one dataset's ingestion flow against the service and the
/// durable store.
pub struct IngestionSession<C: DatasetServiceOps + 'static, S: TaskHandleStoreOps + 'static> {
    client: Arc<C>,
    store: Arc<S>,
    registry: CancellationRegistry,
    options: SessionOptions,
    events: Option<UnboundedSender<IngestionEvent>>,
    session_id: Uuid,
}

impl<C: DatasetServiceOps + 'static, S: TaskHandleStoreOps + 'static> IngestionSession<C, S> {
    pub fn new(client: Arc<C>, store: Arc<S>, options: SessionOptions) -> Self {
        Self {
            client,
            store,
            registry: CancellationRegistry::new(),
            options,
            events: None,
            session_id: Uuid::new_v4(),
        }
    }

    /// Attaches an event channel for progress notifications.
    pub fn with_events(mut self, events: UnboundedSender<IngestionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// The session's cancellation registry; any clone can stop the session.
    pub fn registry(&self) -> CancellationRegistry {
        self.registry.clone()
    }

    /// Stops everything this session has in flight.
    pub fn cancel(&self) {
        self.registry.cancel_all();
    }

    /// Runs the full flow: admission, batched upload, pipeline start, and
    /// observation through to a terminal phase.
    ///
    /// # Errors
    ///
    /// - `AppError::NoFilesToProcess` - empty selection
    /// - `AppError::TaskAlreadyActive` - a live handle exists for this dataset
    /// - `AppError::Cancelled` - cancelled during observation (uploads that
    ///   settled beforehand were already reported through events)
    pub async fn ingest(
        &self,
        identity: &DatasetIdentity,
        files: Vec<CandidateFile>,
    ) -> Result<IngestionReport, AppError> {
        if files.is_empty() {
            return Err(AppError::NoFilesToProcess);
        }

        info!(
            session = %self.session_id,
            dataset = %identity,
            files = files.len(),
            "ingestion started"
        );

        // A second run against the same dataset must wait for the first
        if self.store.load_task_handle(identity).await?.is_some() {
            return Err(AppError::TaskAlreadyActive {
                dataset: identity.storage_key(),
            });
        }

        // Admission: purely local, nothing rejected here touches the network
        let verdict = self.options.admission.admit(files);
        self.emit(IngestionEvent::AdmissionComplete {
            accepted: verdict.accepted.len(),
            rejections: verdict.rejections.clone(),
        });
        if verdict.accepted.is_empty() {
            warn!(session = %self.session_id, dataset = %identity, "every selected file was rejected");
            return Ok(IngestionReport {
                rejections: verdict.rejections,
                uploads: Vec::new(),
                upload_summary: UploadSummary::default(),
                processing: None,
            });
        }

        // Batched upload, streaming outcomes out as they settle
        let (uploads, upload_summary) = self.run_upload(identity, verdict.accepted).await;
        self.emit(IngestionEvent::UploadComplete(upload_summary));

        if self.registry.is_cancelled() {
            return Ok(IngestionReport {
                rejections: verdict.rejections,
                uploads,
                upload_summary,
                processing: None,
            });
        }

        // Nothing new stored: the pipeline would have nothing to do
        if upload_summary.stored == 0 {
            info!(session = %self.session_id, dataset = %identity, "no new content; processing skipped");
            return Ok(IngestionReport {
                rejections: verdict.rejections,
                uploads,
                upload_summary,
                processing: None,
            });
        }

        let outcome = self.start_and_observe(identity).await?;

        Ok(IngestionReport {
            rejections: verdict.rejections,
            uploads,
            upload_summary,
            processing: Some(outcome),
        })
    }

    /// Re-attaches to a run persisted by an earlier session.
    ///
    /// Returns `Ok(None)` when nothing is pending, including when the
    /// persisted handle turns out to be stale (the service no longer knows
    /// the task); a stale handle is cleared on the way out.
    pub async fn resume(
        &self,
        identity: &DatasetIdentity,
    ) -> Result<Option<ProcessingOutcome>, AppError> {
        let task_id = match self.store.load_task_handle(identity).await? {
            Some(task_id) => task_id,
            None => return Ok(None),
        };

        info!(session = %self.session_id, dataset = %identity, "resuming observation");

        match self.observe(identity, &task_id).await {
            Ok(outcome) => Ok(Some(outcome)),
            Err(AppError::NotFound(_)) => {
                warn!(dataset = %identity, "persisted task is stale; clearing handle");
                self.store.clear_task_handle(identity).await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Removes one stored file remotely and drops its entry from the
    /// persisted result map.
    pub async fn remove_file(
        &self,
        identity: &DatasetIdentity,
        file_hash: &str,
    ) -> Result<AggregateCounts, AppError> {
        self.client.delete_file(identity, file_hash).await?;

        let mut results = self
            .store
            .load_result_map(identity)
            .await?
            .unwrap_or_default();
        results.remove(file_hash);
        self.store.save_result_map(identity, &results).await?;

        Ok(AggregateCounts::from_results(&results))
    }

    /// Deletes the dataset remotely, then every local record for it.
    pub async fn delete_dataset(&self, identity: &DatasetIdentity) -> Result<(), AppError> {
        self.client.delete_dataset(identity).await?;
        self.store.clear_dataset(identity).await?;
        info!(session = %self.session_id, dataset = %identity, "dataset deleted");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Stages
    // ─────────────────────────────────────────────────────────────────────────

    async fn run_upload(
        &self,
        identity: &DatasetIdentity,
        files: Vec<CandidateFile>,
    ) -> (Vec<UploadOutcome>, UploadSummary) {
        let batcher = UploadBatcher::new(
            self.client.clone(),
            self.registry.clone(),
            self.options.batch_size,
        );

        match &self.events {
            None => batcher.upload(identity, files, None).await,
            Some(events) => {
                // Bridge per-file outcomes into the session event stream
                let (tx, mut rx) = unbounded_channel::<UploadOutcome>();
                let events = events.clone();
                let forwarder = tokio::spawn(async move {
                    while let Some(outcome) = rx.recv().await {
                        if events.send(IngestionEvent::FileUploaded(outcome)).is_err() {
                            break;
                        }
                    }
                });

                let result = batcher.upload(identity, files, Some(&tx)).await;
                drop(tx);
                let _ = forwarder.await;
                result
            }
        }
    }

    /// Starts the pipeline, persists the handle, then observes.
    async fn start_and_observe(
        &self,
        identity: &DatasetIdentity,
    ) -> Result<ProcessingOutcome, AppError> {
        let task_id = self.client.start_processing(identity).await?;
        self.emit(IngestionEvent::TaskSubmitted {
            task_id: task_id.clone(),
        });

        // Persist before the first poll: a crash from here on is resumable
        self.store.save_task_handle(identity, &task_id).await?;

        self.observe(identity, &task_id).await
    }

    async fn observe(
        &self,
        identity: &DatasetIdentity,
        task_id: &str,
    ) -> Result<ProcessingOutcome, AppError> {
        let initial = self
            .store
            .load_result_map(identity)
            .await?
            .unwrap_or_default();

        let poller = TaskPoller::new(
            self.client.clone(),
            self.store.clone(),
            self.registry.clone(),
            self.options.poll_interval,
            self.options.max_poll_attempts,
        );

        let forwarder = self.events.as_ref().map(|events| {
            let mut rx = poller.subscribe();
            let events = events.clone();
            tokio::spawn(async move {
                while rx.changed().await.is_ok() {
                    let phase = *rx.borrow_and_update();
                    if events.send(IngestionEvent::PhaseChanged(phase)).is_err() {
                        break;
                    }
                }
            })
        });

        let outcome = poller.observe(identity, task_id, initial).await;

        // Dropping the poller closes the watch channel and ends the forwarder
        drop(poller);
        if let Some(forwarder) = forwarder {
            let _ = forwarder.await;
        }

        outcome
    }

    fn emit(&self, event: IngestionEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::backend::{
        FileUploadResponse, RemoteTaskState, TaskResultPayload, TaskStatusResponse,
    };
    use crate::reconcile::{FileProcessingResult, ResultMap};
    use crate::upload::UploadStatus;

    // ── Fakes ─────────────────────────────────────────────────────────────────

    /// Full-service fake: uploads by script, scripted task statuses,
    /// recorded deletes.
    struct FakeService {
        /// Upload result per file name; absent means stored.
        failing_uploads: Vec<String>,
        duplicate_uploads: Vec<String>,
        upload_calls: AtomicUsize,
        start_calls: AtomicUsize,
        statuses: Mutex<VecDeque<Result<TaskStatusResponse, AppError>>>,
        deleted_files: Mutex<Vec<String>>,
        deleted_datasets: Mutex<Vec<String>>,
    }

    impl FakeService {
        fn new(statuses: Vec<Result<TaskStatusResponse, AppError>>) -> Self {
            Self {
                failing_uploads: Vec::new(),
                duplicate_uploads: Vec::new(),
                upload_calls: AtomicUsize::new(0),
                start_calls: AtomicUsize::new(0),
                statuses: Mutex::new(statuses.into()),
                deleted_files: Mutex::new(Vec::new()),
                deleted_datasets: Mutex::new(Vec::new()),
            }
        }
    }

    impl DatasetServiceOps for FakeService {
        fn upload_file<'a>(
            &'a self,
            _identity: &'a DatasetIdentity,
            file: &'a CandidateFile,
        ) -> Pin<Box<dyn Future<Output = Result<FileUploadResponse, AppError>> + Send + 'a>>
        {
            Box::pin(async move {
                self.upload_calls.fetch_add(1, Ordering::SeqCst);
                if self.failing_uploads.contains(&file.name) {
                    return Err(AppError::ServiceError("upload rejected".into()));
                }
                let skipped = self.duplicate_uploads.contains(&file.name);
                Ok(FileUploadResponse {
                    stored: !skipped,
                    skipped,
                    file_hash: format!("hash-{}", file.name),
                })
            })
        }

        fn delete_file<'a>(
            &'a self,
            _identity: &'a DatasetIdentity,
            file_hash: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
            Box::pin(async move {
                self.deleted_files.lock().unwrap().push(file_hash.to_string());
                Ok(())
            })
        }

        fn start_processing<'a>(
            &'a self,
            _identity: &'a DatasetIdentity,
        ) -> Pin<Box<dyn Future<Output = Result<String, AppError>> + Send + 'a>> {
            Box::pin(async move {
                self.start_calls.fetch_add(1, Ordering::SeqCst);
                Ok("task-1".to_string())
            })
        }

        fn get_task_status<'a>(
            &'a self,
            _task_id: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<TaskStatusResponse, AppError>> + Send + 'a>>
        {
            Box::pin(async move {
                self.statuses.lock().unwrap().pop_front().unwrap_or_else(|| {
                    Ok(TaskStatusResponse {
                        state: RemoteTaskState::Pending,
                        progress: None,
                        result: None,
                        partial_meta: None,
                    })
                })
            })
        }

        fn delete_dataset<'a>(
            &'a self,
            identity: &'a DatasetIdentity,
        ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
            Box::pin(async move {
                self.deleted_datasets
                    .lock()
                    .unwrap()
                    .push(identity.storage_key());
                Ok(())
            })
        }
    }

    /// In-memory store fake keyed by storage key.
    #[derive(Default)]
    struct MemoryStore {
        handles: Mutex<HashMap<String, String>>,
        results: Mutex<HashMap<String, ResultMap>>,
    }

    impl TaskHandleStoreOps for MemoryStore {
        fn save_task_handle<'a>(
            &'a self,
            identity: &'a DatasetIdentity,
            task_id: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
            Box::pin(async move {
                self.handles
                    .lock()
                    .unwrap()
                    .insert(identity.storage_key(), task_id.to_string());
                Ok(())
            })
        }

        fn load_task_handle<'a>(
            &'a self,
            identity: &'a DatasetIdentity,
        ) -> Pin<Box<dyn Future<Output = Result<Option<String>, AppError>> + Send + 'a>>
        {
            Box::pin(async move {
                Ok(self
                    .handles
                    .lock()
                    .unwrap()
                    .get(&identity.storage_key())
                    .cloned())
            })
        }

        fn clear_task_handle<'a>(
            &'a self,
            identity: &'a DatasetIdentity,
        ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
            Box::pin(async move {
                self.handles.lock().unwrap().remove(&identity.storage_key());
                Ok(())
            })
        }

        fn save_result_map<'a>(
            &'a self,
            identity: &'a DatasetIdentity,
            results: &'a ResultMap,
        ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
            Box::pin(async move {
                self.results
                    .lock()
                    .unwrap()
                    .insert(identity.storage_key(), results.clone());
                Ok(())
            })
        }

        fn load_result_map<'a>(
            &'a self,
            identity: &'a DatasetIdentity,
        ) -> Pin<Box<dyn Future<Output = Result<Option<ResultMap>, AppError>> + Send + 'a>>
        {
            Box::pin(async move {
                Ok(self
                    .results
                    .lock()
                    .unwrap()
                    .get(&identity.storage_key())
                    .cloned())
            })
        }

        fn clear_dataset<'a>(
            &'a self,
            identity: &'a DatasetIdentity,
        ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
            Box::pin(async move {
                self.handles.lock().unwrap().remove(&identity.storage_key());
                self.results.lock().unwrap().remove(&identity.storage_key());
                Ok(())
            })
        }
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn identity() -> DatasetIdentity {
        DatasetIdentity::new("acme", "roadmap", "specs").unwrap()
    }

    fn pdf(name: &str) -> CandidateFile {
        CandidateFile::new(name, "application/pdf", b"%PDF-1.7 body".to_vec())
    }

    fn success_status(hashes: &[&str]) -> Result<TaskStatusResponse, AppError> {
        let files: HashMap<String, FileProcessingResult> = hashes
            .iter()
            .map(|h| {
                (
                    h.to_string(),
                    FileProcessingResult {
                        file_hash: h.to_string(),
                        file_name: format!("{}.pdf", h),
                        success: true,
                        skipped: false,
                        chunks_created: 4,
                        items_stored: 4,
                        items_skipped: 0,
                        error: None,
                        parser: Some("pdf".into()),
                        embedder: None,
                    },
                )
            })
            .collect();
        Ok(TaskStatusResponse {
            state: RemoteTaskState::Success,
            progress: None,
            result: Some(TaskResultPayload { files, error: None }),
            partial_meta: None,
        })
    }

    fn running_status() -> Result<TaskStatusResponse, AppError> {
        Ok(TaskStatusResponse {
            state: RemoteTaskState::Running,
            progress: Some(0.5),
            result: None,
            partial_meta: None,
        })
    }

    fn fast_options() -> SessionOptions {
        SessionOptions {
            batch_size: 2,
            poll_interval: Duration::from_millis(1),
            max_poll_attempts: 10,
            admission: AdmissionPolicy::default(),
        }
    }

    fn session(
        service: FakeService,
    ) -> (
        IngestionSession<FakeService, MemoryStore>,
        Arc<FakeService>,
        Arc<MemoryStore>,
    ) {
        let service = Arc::new(service);
        let store = Arc::new(MemoryStore::default());
        let session = IngestionSession::new(service.clone(), store.clone(), fast_options());
        (session, service, store)
    }

    // ── ingest ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn full_flow_uploads_processes_and_clears_handle() {
        let service = FakeService::new(vec![
            running_status(),
            success_status(&["hash-a.pdf", "hash-b.pdf", "hash-c.pdf"]),
        ]);
        let (session, service, store) = session(service);
        let id = identity();

        let report = session
            .ingest(&id, vec![pdf("a.pdf"), pdf("b.pdf"), pdf("c.pdf")])
            .await
            .unwrap();

        assert!(report.rejections.is_empty());
        assert_eq!(report.upload_summary.stored, 3);
        assert_eq!(service.upload_calls.load(Ordering::SeqCst), 3);
        assert_eq!(service.start_calls.load(Ordering::SeqCst), 1);

        let outcome = report.processing.unwrap();
        assert_eq!(outcome.phase, TaskPhase::Succeeded);
        assert_eq!(outcome.counts.processed_files, 3);

        // Terminal success cleared the handle and persisted the map
        assert!(store.load_task_handle(&id).await.unwrap().is_none());
        assert_eq!(store.load_result_map(&id).await.unwrap().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn rejected_files_never_reach_the_service() {
        let service = FakeService::new(vec![success_status(&["hash-good.pdf"])]);
        let (session, service, _) = session(service);

        let bogus = CandidateFile::new("notes.exe", "application/x-msdownload", vec![1, 2, 3]);
        let report = session
            .ingest(&identity(), vec![pdf("good.pdf"), bogus])
            .await
            .unwrap();

        assert_eq!(report.rejections.len(), 1);
        assert_eq!(report.rejections[0].file_name, "notes.exe");
        assert_eq!(report.upload_summary.stored, 1);
        assert_eq!(service.upload_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_selection_is_a_fatal_precondition() {
        let (session, service, _) = session(FakeService::new(vec![]));
        let err = session.ingest(&identity(), vec![]).await.unwrap_err();
        assert!(matches!(err, AppError::NoFilesToProcess));
        assert_eq!(service.upload_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fully_rejected_selection_blocks_without_network() {
        let (session, service, _) = session(FakeService::new(vec![]));

        let report = session
            .ingest(
                &identity(),
                vec![
                    CandidateFile::new("a.exe", "application/x-msdownload", vec![1]),
                    CandidateFile::new("b.pdf", "application/pdf", b"not a pdf".to_vec()),
                ],
            )
            .await
            .unwrap();

        assert!(report.blocked());
        assert_eq!(report.rejections.len(), 2);
        assert!(report.processing.is_none());
        assert_eq!(service.upload_calls.load(Ordering::SeqCst), 0);
        assert_eq!(service.start_calls.load(Ordering::SeqCst), 0);
        assert!(report.describe().contains("rejected"));
    }

    #[tokio::test]
    async fn live_handle_refuses_a_second_run() {
        let (session, service, store) = session(FakeService::new(vec![]));
        let id = identity();
        store.save_task_handle(&id, "task-0").await.unwrap();

        let err = session.ingest(&id, vec![pdf("a.pdf")]).await.unwrap_err();
        assert!(matches!(err, AppError::TaskAlreadyActive { .. }));
        assert_eq!(service.upload_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn nothing_new_stored_skips_processing() {
        let mut service = FakeService::new(vec![]);
        service.duplicate_uploads = vec!["a.pdf".into()];
        service.failing_uploads = vec!["b.pdf".into()];
        let (session, service, _) = session(service);

        let report = session
            .ingest(&identity(), vec![pdf("a.pdf"), pdf("b.pdf")])
            .await
            .unwrap();

        assert_eq!(report.upload_summary.skipped, 1);
        assert_eq!(report.upload_summary.failed, 1);
        assert_eq!(report.upload_summary.stored, 0);
        assert!(report.processing.is_none());
        assert_eq!(service.start_calls.load(Ordering::SeqCst), 0);
        assert!(report.describe().contains("Upload finished"));
    }

    #[tokio::test]
    async fn cancelled_session_stops_before_submission() {
        let (session, service, _) = session(FakeService::new(vec![]));
        session.cancel();

        let report = session
            .ingest(&identity(), vec![pdf("a.pdf"), pdf("b.pdf")])
            .await
            .unwrap();

        assert_eq!(report.upload_summary.cancelled, 2);
        assert!(report
            .uploads
            .iter()
            .all(|o| o.status == UploadStatus::Cancelled));
        assert!(report.processing.is_none());
        assert_eq!(service.start_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handle_is_persisted_before_the_first_poll() {
        // Observation dies on its only poll; the handle must already be durable
        let service = FakeService::new(vec![Err(AppError::NotFound("task-1".into()))]);
        let (session, _, store) = session(service);
        let id = identity();

        let err = session.ingest(&id, vec![pdf("a.pdf")]).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(
            store.load_task_handle(&id).await.unwrap().as_deref(),
            Some("task-1")
        );
    }

    // ── resume ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn resume_without_handle_is_none() {
        let (session, service, _) = session(FakeService::new(vec![]));
        let outcome = session.resume(&identity()).await.unwrap();
        assert!(outcome.is_none());
        assert_eq!(service.start_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn resume_observes_without_resubmitting() {
        let service = FakeService::new(vec![success_status(&["h1"])]);
        let (session, service, store) = session(service);
        let id = identity();

        // A previous session got as far as persisting the handle and one result
        store.save_task_handle(&id, "task-9").await.unwrap();
        let mut earlier = ResultMap::new();
        earlier.insert(
            "h0".into(),
            FileProcessingResult {
                file_hash: "h0".into(),
                file_name: "old.pdf".into(),
                success: true,
                skipped: false,
                chunks_created: 1,
                items_stored: 1,
                items_skipped: 0,
                error: None,
                parser: None,
                embedder: None,
            },
        );
        store.save_result_map(&id, &earlier).await.unwrap();

        let outcome = session.resume(&id).await.unwrap().unwrap();

        assert_eq!(outcome.phase, TaskPhase::Succeeded);
        // Earlier results survived the merge
        assert_eq!(outcome.results.len(), 2);
        assert!(outcome.results.contains_key("h0"));
        assert_eq!(service.start_calls.load(Ordering::SeqCst), 0);
        assert!(store.load_task_handle(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resume_clears_stale_handle() {
        let service = FakeService::new(vec![Err(AppError::NotFound("task-9".into()))]);
        let (session, _, store) = session(service);
        let id = identity();
        store.save_task_handle(&id, "task-9").await.unwrap();

        let outcome = session.resume(&id).await.unwrap();
        assert!(outcome.is_none());
        assert!(store.load_task_handle(&id).await.unwrap().is_none());
    }

    // ── file & dataset removal ────────────────────────────────────────────────

    #[tokio::test]
    async fn remove_file_updates_the_persisted_map() {
        let (session, service, store) = session(FakeService::new(vec![]));
        let id = identity();

        let mut results = ResultMap::new();
        for hash in ["h1", "h2"] {
            results.insert(
                hash.into(),
                FileProcessingResult {
                    file_hash: hash.into(),
                    file_name: format!("{}.pdf", hash),
                    success: true,
                    skipped: false,
                    chunks_created: 1,
                    items_stored: 1,
                    items_skipped: 0,
                    error: None,
                    parser: None,
                    embedder: None,
                },
            );
        }
        store.save_result_map(&id, &results).await.unwrap();

        let counts = session.remove_file(&id, "h1").await.unwrap();

        assert_eq!(counts.processed_files, 1);
        assert_eq!(service.deleted_files.lock().unwrap().as_slice(), ["h1"]);
        let remaining = store.load_result_map(&id).await.unwrap().unwrap();
        assert!(!remaining.contains_key("h1"));
        assert!(remaining.contains_key("h2"));
    }

    #[tokio::test]
    async fn delete_dataset_clears_remote_and_local_state() {
        let (session, service, store) = session(FakeService::new(vec![]));
        let id = identity();
        store.save_task_handle(&id, "task-1").await.unwrap();
        store.save_result_map(&id, &ResultMap::new()).await.unwrap();

        session.delete_dataset(&id).await.unwrap();

        assert_eq!(
            service.deleted_datasets.lock().unwrap().as_slice(),
            [id.storage_key()]
        );
        assert!(store.load_task_handle(&id).await.unwrap().is_none());
        assert!(store.load_result_map(&id).await.unwrap().is_none());
    }

    // ── events ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn events_narrate_the_whole_flow() {
        let service = FakeService::new(vec![
            running_status(),
            success_status(&["hash-a.pdf", "hash-b.pdf"]),
        ]);
        let service = Arc::new(service);
        let store = Arc::new(MemoryStore::default());
        let (tx, mut rx) = unbounded_channel();
        let session = IngestionSession::new(service, store, fast_options()).with_events(tx);

        session
            .ingest(&identity(), vec![pdf("a.pdf"), pdf("b.pdf")])
            .await
            .unwrap();
        drop(session);

        let mut admission = 0;
        let mut uploaded = 0;
        let mut upload_complete = 0;
        let mut submitted = 0;
        let mut phases = Vec::new();
        while let Some(event) = rx.recv().await {
            match event {
                IngestionEvent::AdmissionComplete { accepted, .. } => {
                    admission += 1;
                    assert_eq!(accepted, 2);
                }
                IngestionEvent::FileUploaded(_) => uploaded += 1,
                IngestionEvent::UploadComplete(summary) => {
                    upload_complete += 1;
                    assert_eq!(summary.stored, 2);
                }
                IngestionEvent::TaskSubmitted { task_id } => {
                    submitted += 1;
                    assert_eq!(task_id, "task-1");
                }
                IngestionEvent::PhaseChanged(phase) => phases.push(phase),
            }
        }

        assert_eq!(admission, 1);
        assert_eq!(uploaded, 2);
        assert_eq!(upload_complete, 1);
        assert_eq!(submitted, 1);
        assert_eq!(phases.last(), Some(&TaskPhase::Succeeded));
    }
}

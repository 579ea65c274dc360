//! Dataset service integration: HTTP client, wire types, and the operations
//! trait the orchestration layers are written against.

pub mod client;

pub use client::{
    DatasetServiceClient, FileUploadResponse, RemoteTaskState, StartProcessingResponse,
    TaskResultPayload, TaskStatusResponse,
};

use std::future::Future;
use std::pin::Pin;

use crate::error::AppError;
use crate::model::{CandidateFile, DatasetIdentity};

/// Operations the batcher, poller, and session need from the dataset service.
///
/// Abstracted as a trait so tests can substitute fakes for the HTTP client.
pub trait DatasetServiceOps: Send + Sync {
    fn upload_file<'a>(
        &'a self,
        identity: &'a DatasetIdentity,
        file: &'a CandidateFile,
    ) -> Pin<Box<dyn Future<Output = Result<FileUploadResponse, AppError>> + Send + 'a>>;

    fn delete_file<'a>(
        &'a self,
        identity: &'a DatasetIdentity,
        file_hash: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>>;

    fn start_processing<'a>(
        &'a self,
        identity: &'a DatasetIdentity,
    ) -> Pin<Box<dyn Future<Output = Result<String, AppError>> + Send + 'a>>;

    fn get_task_status<'a>(
        &'a self,
        task_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<TaskStatusResponse, AppError>> + Send + 'a>>;

    fn delete_dataset<'a>(
        &'a self,
        identity: &'a DatasetIdentity,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>>;
}

impl DatasetServiceOps for DatasetServiceClient {
    fn upload_file<'a>(
        &'a self,
        identity: &'a DatasetIdentity,
        file: &'a CandidateFile,
    ) -> Pin<Box<dyn Future<Output = Result<FileUploadResponse, AppError>> + Send + 'a>> {
        Box::pin(self.upload_file(identity, file))
    }

    fn delete_file<'a>(
        &'a self,
        identity: &'a DatasetIdentity,
        file_hash: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(self.delete_file(identity, file_hash))
    }

    fn start_processing<'a>(
        &'a self,
        identity: &'a DatasetIdentity,
    ) -> Pin<Box<dyn Future<Output = Result<String, AppError>> + Send + 'a>> {
        Box::pin(self.start_processing(identity))
    }

    fn get_task_status<'a>(
        &'a self,
        task_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<TaskStatusResponse, AppError>> + Send + 'a>> {
        Box::pin(self.get_task_status(task_id))
    }

    fn delete_dataset<'a>(
        &'a self,
        identity: &'a DatasetIdentity,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(self.delete_dataset(identity))
    }
}

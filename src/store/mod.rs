//! Durable local storage: SQLite database plus task handle and result
//! records, keyed by dataset identity.

pub mod database;
pub mod task_handles;

pub use database::Database;
pub use task_handles::RECORD_FORMAT_VERSION;

use std::future::Future;
use std::pin::Pin;

use crate::error::AppError;
use crate::model::DatasetIdentity;
use crate::reconcile::ResultMap;

/// Storage operations the poller and session are written against.
///
/// Implemented by `Database`; tests substitute in-memory fakes.
pub trait TaskHandleStoreOps: Send + Sync {
    fn save_task_handle<'a>(
        &'a self,
        identity: &'a DatasetIdentity,
        task_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>>;

    fn load_task_handle<'a>(
        &'a self,
        identity: &'a DatasetIdentity,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, AppError>> + Send + 'a>>;

    fn clear_task_handle<'a>(
        &'a self,
        identity: &'a DatasetIdentity,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>>;

    fn save_result_map<'a>(
        &'a self,
        identity: &'a DatasetIdentity,
        results: &'a ResultMap,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>>;

    fn load_result_map<'a>(
        &'a self,
        identity: &'a DatasetIdentity,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ResultMap>, AppError>> + Send + 'a>>;

    fn clear_dataset<'a>(
        &'a self,
        identity: &'a DatasetIdentity,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>>;
}

impl TaskHandleStoreOps for Database {
    fn save_task_handle<'a>(
        &'a self,
        identity: &'a DatasetIdentity,
        task_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(self.save_task_handle(identity, task_id))
    }

    fn load_task_handle<'a>(
        &'a self,
        identity: &'a DatasetIdentity,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, AppError>> + Send + 'a>> {
        Box::pin(self.load_task_handle(identity))
    }

    fn clear_task_handle<'a>(
        &'a self,
        identity: &'a DatasetIdentity,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(self.clear_task_handle(identity))
    }

    fn save_result_map<'a>(
        &'a self,
        identity: &'a DatasetIdentity,
        results: &'a ResultMap,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(self.save_result_map(identity, results))
    }

    fn load_result_map<'a>(
        &'a self,
        identity: &'a DatasetIdentity,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ResultMap>, AppError>> + Send + 'a>> {
        Box::pin(self.load_result_map(identity))
    }

    fn clear_dataset<'a>(
        &'a self,
        identity: &'a DatasetIdentity,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(self.clear_dataset(identity))
    }
}

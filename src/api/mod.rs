//! Client side of the queue/storage API and the seam the job loop depends on.

pub mod client;
pub mod download;
pub mod error;
pub mod types;

use std::path::Path;

use uuid::Uuid;

use crate::config::Capabilities;
use crate::upload::{UploadDescriptor, UploadError};

pub use client::ApiClient;
pub use error::ApiError;
pub use types::{App, Deployment, FileDescriptor, Job, JobStatus, JobType, Package, Release};

/// Remote operations the controller and pipelines need.
/// Implemented by [`ApiClient`] and by recording fakes in tests.
#[allow(async_fn_in_trait)]
pub trait WorkerApi {
    /// Claims at most one job matching `capabilities`.
    async fn next_job(&self, capabilities: &Capabilities) -> Result<Option<Job>, ApiError>;

    async fn update_status(&self, job_id: Uuid, status: JobStatus, message: &str) -> Result<(), ApiError>;

    async fn report_log(&self, job_id: Uuid, warnings: &[String], errors: &[String]) -> Result<(), ApiError>;

    async fn upload(&self, descriptor: &UploadDescriptor) -> Result<(), UploadError>;

    /// Fetches a job input to `dest`. Returns false when an up to date copy was kept.
    async fn download(&self, file: &FileDescriptor, dest: &Path, force: bool) -> Result<bool, ApiError>;
}

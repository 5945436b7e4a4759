//! Build pipelines, one per (job type, deployment) pair.
//!
//! A stage gets a [`JobContext`] giving it the job, the configuration and the
//! worker's side effects: tools, downloads, uploads and version control. The
//! context reports `uploading` once, right before the first artifact leaves.

pub mod commands;
pub mod files;
pub mod launcher;
pub mod package;
pub mod platform;
pub mod release;

use std::fmt;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{error, info};
use uuid::Uuid;

use crate::api::{Deployment, FileDescriptor, Job, JobStatus, JobType, WorkerApi};
use crate::archive;
use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::git::GitManager;
use crate::job::JobTracker;
use crate::supervisor::{Markers, ProcessResult, Supervisor, ToolProfile};
use crate::upload::UploadDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ClientRelease,
    ServerRelease,
    SdkRelease,
    ClientPackage,
    ServerPackage,
    ClientLauncher,
}

impl Stage {
    /// The stage handling `job_type` for `deployment`, if any.
    pub fn for_job(job_type: JobType, deployment: Deployment) -> Option<Self> {
        match (job_type, deployment) {
            (JobType::Release, Deployment::Client) => Some(Stage::ClientRelease),
            (JobType::Release, Deployment::Server) => Some(Stage::ServerRelease),
            (JobType::Release, Deployment::Sdk) => Some(Stage::SdkRelease),
            (JobType::Package, Deployment::Client) => Some(Stage::ClientPackage),
            (JobType::Package, Deployment::Server) => Some(Stage::ServerPackage),
            (JobType::Launcher, Deployment::Client) => Some(Stage::ClientLauncher),
            _ => None,
        }
    }

    pub async fn execute<A: WorkerApi>(&self, ctx: &JobContext<'_, A>) -> Result<(), WorkerError> {
        info!(job_id = %ctx.job.id, stage = %self, "running stage");
        match self {
            Stage::ClientRelease => release::client(ctx).await,
            Stage::ServerRelease => release::server(ctx).await,
            Stage::SdkRelease => release::sdk(ctx).await,
            Stage::ClientPackage => package::client(ctx).await,
            Stage::ServerPackage => package::server(ctx).await,
            Stage::ClientLauncher => launcher::client(ctx).await,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::ClientRelease => "client release",
            Stage::ServerRelease => "server release",
            Stage::SdkRelease => "SDK release",
            Stage::ClientPackage => "client package",
            Stage::ServerPackage => "server package",
            Stage::ClientLauncher => "client launcher",
        };
        f.write_str(name)
    }
}

pub struct JobContext<'a, A> {
    pub api: &'a A,
    pub config: &'a WorkerConfig,
    pub supervisor: &'a Supervisor,
    pub job: &'a Job,
    pub deployment: Deployment,
    tracker: &'a Mutex<JobTracker>,
}

impl<'a, A: WorkerApi> JobContext<'a, A> {
    pub fn new(
        api: &'a A,
        config: &'a WorkerConfig,
        supervisor: &'a Supervisor,
        job: &'a Job,
        deployment: Deployment,
        tracker: &'a Mutex<JobTracker>,
    ) -> Self {
        Self {
            api,
            config,
            supervisor,
            job,
            deployment,
            tracker,
        }
    }

    pub fn markers(&self) -> Markers {
        Markers {
            warning: self.config.warning_marker.clone(),
            error: self.config.error_marker.clone(),
        }
    }

    /// Reports `uploading` the first time it is called for this job.
    pub async fn report_uploading(&self) {
        let mut tracker = self.tracker.lock().await;
        if tracker.status() != JobStatus::Processing {
            return;
        }
        tracker.advance(JobStatus::Uploading);
        if let Err(e) = self
            .api
            .update_status(self.job.id, JobStatus::Uploading, "")
            .await
        {
            error!(job_id = %self.job.id, error = %e, "failed to update job status");
        }
    }

    /// Upload descriptor for `target_id`, tagged with the job's deployment and platform.
    pub fn descriptor(
        &self,
        target_id: Uuid,
        file_type: &str,
        mime: &str,
        source: impl Into<PathBuf>,
        original_path: Option<String>,
    ) -> UploadDescriptor {
        UploadDescriptor {
            deployment: Some(self.job.deployment.clone()),
            platform: Some(self.job.platform.clone()),
            original_path,
            ..UploadDescriptor::new(target_id, file_type, mime, source)
        }
    }

    pub async fn upload(&self, what: &str, descriptor: UploadDescriptor) -> Result<(), WorkerError> {
        self.report_uploading().await;
        info!(job_id = %self.job.id, file = %descriptor.source_path.display(), "uploading {what}");
        self.api
            .upload(&descriptor)
            .await
            .map_err(|e| WorkerError::upload(what, e))
    }

    /// Fetches a job input, always replacing a local copy.
    pub async fn download(&self, file: &FileDescriptor, dest: &Path) -> Result<(), WorkerError> {
        info!(job_id = %self.job.id, url = %file.url, dest = %dest.display(), "downloading {}", file.file_type);
        self.api.download(file, dest, true).await?;
        Ok(())
    }

    pub async fn run_tool(
        &self,
        profile: &ToolProfile,
        executable: &Path,
        args: &[String],
        working_dir: Option<&Path>,
    ) -> Result<ProcessResult, WorkerError> {
        Ok(self
            .supervisor
            .run(profile, executable, args, working_dir)
            .await?)
    }

    /// Runs AutomationTool from its own directory.
    pub async fn run_automation_tool(&self, args: &[String]) -> Result<ProcessResult, WorkerError> {
        let exe = &self.config.tools.automation_tool;
        let profile = ToolProfile::automation_tool(self.markers());
        self.run_tool(&profile, exe, args, exe.parent()).await
    }

    /// Associates the project with engine `version`.
    pub async fn switch_engine(&self, version: &str) -> Result<(), WorkerError> {
        info!(version, "switching engine version");
        let exe = &self.config.tools.version_selector;
        let args = commands::switch_engine_version(&self.config.project_descriptor(), version);
        self.run_tool(&ToolProfile::version_selector(), exe, &args, exe.parent())
            .await?;
        Ok(())
    }

    /// Runs `f` against the project repository on the blocking pool.
    pub async fn git<T, F>(&self, f: F) -> Result<T, WorkerError>
    where
        T: Send + 'static,
        F: FnOnce(&GitManager) -> Result<T, git2::Error> + Send + 'static,
    {
        let dir = self.config.project_dir.clone();
        let key = self.config.ssh_key_path.clone();
        blocking(move || {
            let git = GitManager::open(&dir)?.with_ssh_key(key);
            Ok(f(&git)?)
        })
        .await
    }

    pub async fn unzip(&self, zip_path: &Path, dest: &Path) -> Result<usize, WorkerError> {
        let (zip_path, dest) = (zip_path.to_path_buf(), dest.to_path_buf());
        blocking(move || archive::unzip(&zip_path, &dest)).await
    }
}

/// Runs blocking filesystem or libgit2 work off the async threads.
pub async fn blocking<T, F>(f: F) -> Result<T, WorkerError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, WorkerError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| WorkerError::Stage(format!("background task failed: {e}")))?
}

pub async fn create_dir(path: &Path) -> Result<(), WorkerError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| WorkerError::io(format!("failed to create a directory {}", path.display()), e))
}

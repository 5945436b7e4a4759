use std::future::Future;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::state::{JobTracker, PollBackoff};
use crate::api::{Deployment, Job, JobStatus, JobType, WorkerApi};
use crate::config::WorkerConfig;
use crate::error::{ValidationError, WorkerError};
use crate::pipeline::{JobContext, Stage};
use crate::supervisor::Supervisor;

/// Drives claimed jobs through their pipeline, one at a time.
pub struct Controller<A> {
    api: A,
    config: WorkerConfig,
    supervisor: Supervisor,
    backoff: PollBackoff,
}

impl<A: WorkerApi> Controller<A> {
    pub fn new(api: A, config: WorkerConfig) -> Self {
        let supervisor = Supervisor::new(config.tool_log_dir.clone());
        let backoff = PollBackoff::new(config.poll_interval_ms, config.max_poll_interval_ms);
        Self {
            api,
            config,
            supervisor,
            backoff,
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn backoff(&self) -> &PollBackoff {
        &self.backoff
    }

    /// Claims the next matching job. A failed fetch counts as an empty queue.
    pub async fn poll(&self) -> Option<Job> {
        match self.api.next_job(&self.config.capabilities).await {
            Ok(job) => job,
            Err(e) => {
                warn!(error = %e, "failed to fetch the next job");
                None
            }
        }
    }

    /// Checks the job against this worker's capabilities and its payload.
    pub fn validate(&self, job: &Job) -> Result<(JobType, Deployment), ValidationError> {
        let caps = &self.config.capabilities;
        let unsupported = |field, value: &str| ValidationError::UnsupportedJobKind {
            field,
            value: value.to_string(),
        };

        let job_type = job
            .job_type()
            .filter(|t| caps.job_types.contains(t))
            .ok_or_else(|| unsupported("type", &job.kind))?;
        let deployment = job
            .deployment_kind()
            .filter(|d| caps.deployments.contains(d))
            .ok_or_else(|| unsupported("deployment", &job.deployment))?;
        if !caps.platforms.contains(&job.platform) {
            return Err(unsupported("platform", &job.platform));
        }

        let has_payload = match job_type {
            JobType::Release => job.release.is_some(),
            JobType::Package => job.package.is_some(),
            JobType::Launcher => job.app.is_some(),
        };
        if !has_payload {
            let name = match job_type {
                JobType::Release => "release",
                JobType::Package => "package",
                JobType::Launcher => "app",
            };
            return Err(ValidationError::MissingPayload(name));
        }
        Ok((job_type, deployment))
    }

    pub fn dispatch(job_type: JobType, deployment: Deployment) -> Result<Stage, ValidationError> {
        Stage::for_job(job_type, deployment).ok_or_else(|| ValidationError::UnsupportedJobKind {
            field: "type/deployment",
            value: format!("{job_type}/{deployment}"),
        })
    }

    /// Runs one claimed job to a terminal status and returns its tracker.
    pub async fn process(&self, job: Job) -> JobTracker {
        info!(
            job_id = %job.id,
            job_type = %job.kind,
            deployment = %job.deployment,
            platform = %job.platform,
            configuration = %job.configuration,
            "processing job"
        );
        let tracker = Mutex::new(JobTracker::claimed(job.id));
        self.transition(&job, &tracker, JobStatus::Processing, "").await;

        let outcome = self.execute(&job, &tracker).await;
        self.finish(&job, &tracker, outcome).await;

        tracker.into_inner()
    }

    async fn execute(&self, job: &Job, tracker: &Mutex<JobTracker>) -> Result<(), WorkerError> {
        let (job_type, deployment) = self.validate(job)?;
        let stage = Self::dispatch(job_type, deployment)?;
        let ctx = JobContext::new(&self.api, &self.config, &self.supervisor, job, deployment, tracker);
        stage.execute(&ctx).await
    }

    /// The single place a terminal status is reported.
    async fn finish(&self, job: &Job, tracker: &Mutex<JobTracker>, outcome: Result<(), WorkerError>) {
        match outcome {
            Ok(()) => {
                self.transition(job, tracker, JobStatus::Completed, "").await;
                let elapsed = tracker.lock().await.elapsed_ms();
                info!(job_id = %job.id, elapsed_ms = elapsed, "job completed");
            }
            Err(e) => {
                error!(job_id = %job.id, kind = %e.kind(), error = %e, "job failed");
                if let Some(result) = e.process_result().filter(|r| r.has_log()) {
                    if let Err(report_err) = self
                        .api
                        .report_log(job.id, &result.warnings, &result.errors)
                        .await
                    {
                        error!(job_id = %job.id, error = %report_err, "failed to report job log");
                    }
                }
                self.transition(job, tracker, JobStatus::Error, &e.to_string())
                    .await;
            }
        }
    }

    async fn transition(&self, job: &Job, tracker: &Mutex<JobTracker>, status: JobStatus, message: &str) {
        if !tracker.lock().await.advance(status) {
            return;
        }
        if let Err(e) = self.api.update_status(job.id, status, message).await {
            error!(job_id = %job.id, status = %status.as_str(), error = %e, "failed to update job status");
        }
    }

    /// Polls once. Processes the job if one was claimed, otherwise sleeps
    /// for the current backoff delay. Returns whether a job ran.
    pub async fn run_once(&mut self) -> bool {
        match self.poll().await {
            Some(job) => {
                self.backoff.reset();
                self.process(job).await;
                true
            }
            None => {
                let delay = self.backoff.next_delay();
                tracing::debug!(attempt = self.backoff.attempt(), delay_ms = delay.as_millis() as u64, "no jobs, waiting");
                tokio::time::sleep(delay).await;
                false
            }
        }
    }

    /// Loops until `shutdown` resolves. A running job is always finished first.
    pub async fn run_until(&mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        info!(
            platforms = %self.config.capabilities.platforms.to_query(),
            job_types = %self.config.capabilities.job_types.to_query(),
            deployments = %self.config.capabilities.deployments.to_query(),
            "waiting for jobs"
        );
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = std::future::ready(()) => {}
            }

            // A claim in flight always completes: the server may already have
            // handed the job to this worker.
            let mut stopping = false;
            let job = {
                let poll = self.poll();
                tokio::pin!(poll);
                loop {
                    tokio::select! {
                        job = &mut poll => break job,
                        _ = &mut shutdown, if !stopping => stopping = true,
                    }
                }
            };
            let idle = job.is_none();
            if let Some(job) = job {
                self.backoff.reset();
                self.process(job).await;
            }
            if stopping {
                break;
            }
            if idle {
                let delay = self.backoff.next_delay();
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
        info!("shutting down");
    }

    /// Runs until Ctrl-C.
    pub async fn run_forever(&mut self) {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await;
    }
}

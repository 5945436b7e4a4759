use std::path::Path;
use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::{debug, info};
use uuid::Uuid;

use super::WorkerApi;
use super::download::download_file;
use super::error::ApiError;
use super::types::{
    CodeReleaseRequest, FileDescriptor, Job, JobEnvelope, JobStatus, LogReport, LoginRequest,
    LoginResponse, NO_JOBS_STATUS, StatusUpdate,
};
use crate::config::{Capabilities, Credentials};
use crate::upload::{StreamingUploader, UploadDescriptor, UploadError};

/// HTTP client for the queue/storage API.
///
/// Only the connect phase has a timeout: uploads and downloads of large
/// artifacts may legitimately take hours.
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: String,
    uploader: StreamingUploader,
}

impl ApiClient {
    pub fn new(base_url: &str, upload_chunk_size: usize) -> Result<Self, ApiError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        let base_url = base_url.trim_end_matches('/').to_string();
        Ok(Self {
            uploader: StreamingUploader::new(client.clone(), base_url.clone(), upload_chunk_size),
            client,
            base_url,
            token: String::new(),
        })
    }

    /// Uses an already issued token instead of logging in.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    pub fn is_authenticated(&self) -> bool {
        !self.token.is_empty()
    }

    /// `POST /auth/login`; stores the returned token for every later call.
    pub async fn login(&mut self, credentials: &Credentials) -> Result<(), ApiError> {
        let response = self
            .client
            .post(format!("{}/auth/login", self.base_url))
            .json(&LoginRequest {
                email: &credentials.email,
                password: &credentials.password,
            })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        let parsed: Option<LoginResponse> = serde_json::from_str(&body).ok();

        match parsed {
            Some(r) if status.is_success() && r.status == "ok" => match r.data {
                Some(token) if !token.is_empty() => {
                    self.token = token;
                    info!(email = %credentials.email, "logged in");
                    Ok(())
                }
                _ => Err(ApiError::Auth("no token in login response".into())),
            },
            Some(r) if r.status == "error" => Err(ApiError::Auth(r.message)),
            _ if !status.is_success() => Err(ApiError::Rejected {
                status: status.as_u16(),
                body,
            }),
            _ => Err(ApiError::Decode(format!("unexpected login response: {body}"))),
        }
    }

    /// `POST /jobs/release`: announces a new code version to the queue.
    pub async fn push_code_release(&self, code_version: &str, content_version: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .post(format!("{}/jobs/release", self.base_url))
            .bearer_auth(&self.token)
            .json(&CodeReleaseRequest {
                code_version,
                content_version,
            })
            .send()
            .await?;
        check_status(response).await?;
        info!(code_version, content_version, "code release pushed");
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T, ApiError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .bearer_auth(&self.token)
            .header("accept", "application/json")
            .send()
            .await?;
        let response = check_status(response).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ApiError::Decode(format!("{e}: {body}")))
    }
}

/// Turns a status >= 400 into [`ApiError::Rejected`] carrying the body.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.as_u16() >= 400 {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        return Err(ApiError::Rejected {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

impl WorkerApi for ApiClient {
    async fn next_job(&self, capabilities: &Capabilities) -> Result<Option<Job>, ApiError> {
        let query = [
            ("platform", capabilities.platforms.to_query()),
            ("type", capabilities.job_types.to_query()),
            ("deployment", capabilities.deployments.to_query()),
        ];
        let envelope: JobEnvelope = self
            .get_json(&format!("{}/jobs/unclaimed", self.base_url), &query)
            .await?;

        if envelope.status == NO_JOBS_STATUS {
            return Ok(None);
        }
        if envelope.status == "error" {
            return Err(ApiError::Decode(format!("queue error: {}", envelope.message)));
        }
        match envelope.data {
            Some(job) if job.id.is_nil() => Err(ApiError::InvalidJobId),
            Some(job) => Ok(Some(job)),
            None => Ok(None),
        }
    }

    async fn update_status(&self, job_id: Uuid, status: JobStatus, message: &str) -> Result<(), ApiError> {
        if job_id.is_nil() {
            return Err(ApiError::InvalidJobId);
        }
        debug!(%job_id, %status, message, "reporting job status");
        let response = self
            .client
            .patch(format!("{}/jobs/{job_id}/status", self.base_url))
            .bearer_auth(&self.token)
            .json(&StatusUpdate { status, message })
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn report_log(&self, job_id: Uuid, warnings: &[String], errors: &[String]) -> Result<(), ApiError> {
        if job_id.is_nil() {
            return Err(ApiError::InvalidJobId);
        }
        let response = self
            .client
            .post(format!("{}/jobs/{job_id}/log", self.base_url))
            .bearer_auth(&self.token)
            .json(&LogReport { warnings, errors })
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn upload(&self, descriptor: &UploadDescriptor) -> Result<(), UploadError> {
        self.uploader.upload(&self.token, descriptor).await
    }

    async fn download(&self, file: &FileDescriptor, dest: &Path, force: bool) -> Result<bool, ApiError> {
        download_file(&self.client, &file.url, dest, file.size, force).await
    }
}

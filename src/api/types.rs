//! Wire types of the queue/storage API.
//!
//! Job attributes (`type`, `deployment`, `platform`) stay plain strings on the
//! wire so an unknown value from the server surfaces as a validation error of
//! that job instead of a decoding failure of the whole poll.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job types this worker knows how to process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobType {
    /// App release building and deployment.
    Release,
    /// Package (DLC plugin) processing.
    Package,
    /// Launcher processing.
    Launcher,
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobType::Release => write!(f, "Release"),
            JobType::Package => write!(f, "Package"),
            JobType::Launcher => write!(f, "Launcher"),
        }
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Release" => Ok(JobType::Release),
            "Package" => Ok(JobType::Package),
            "Launcher" => Ok(JobType::Launcher),
            other => Err(format!("unknown job type {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Deployment {
    Client,
    Server,
    #[serde(rename = "SDK")]
    Sdk,
}

impl fmt::Display for Deployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Deployment::Client => write!(f, "Client"),
            Deployment::Server => write!(f, "Server"),
            Deployment::Sdk => write!(f, "SDK"),
        }
    }
}

impl FromStr for Deployment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Client" => Ok(Deployment::Client),
            "Server" => Ok(Deployment::Server),
            "SDK" => Ok(Deployment::Sdk),
            other => Err(format!("unknown deployment {other}")),
        }
    }
}

/// Lifecycle status of a job as known to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Unclaimed,
    Claimed,
    Processing,
    Uploading,
    Completed,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Unclaimed => "unclaimed",
            JobStatus::Claimed => "claimed",
            JobStatus::Processing => "processing",
            JobStatus::Uploading => "uploading",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Error | JobStatus::Cancelled
        )
    }

    /// Whether the worker may move a job from `self` to `next`.
    ///
    /// Unclaimed → Claimed → Processing → Uploading → {Completed | Error}.
    /// Error is reachable from every non-terminal state, Completed from
    /// Processing (stages without artifacts) and Uploading. Cancelled is
    /// server driven and never set by the worker.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Unclaimed, Claimed) => true,
            (Claimed, Processing) => true,
            (Processing, Uploading) => true,
            (Processing | Uploading, Completed) => true,
            (s, Error) => !s.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An input file attached to a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    /// Logical type tag, e.g. `uplugin` or `image-app-icon`.
    #[serde(rename = "type")]
    pub file_type: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    /// Size in bytes. Absent size disables the download skip check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub map: String,
    /// Release version the package is based on.
    #[serde(default)]
    pub release: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub app_id: Option<Uuid>,
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub code_version: String,
    #[serde(default)]
    pub content_version: String,
    #[serde(default)]
    pub map: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct App {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub external: bool,
}

/// A build job claimed from the queue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub deployment: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub configuration: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub files: Vec<FileDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<Release>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<Package>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<App>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn job_type(&self) -> Option<JobType> {
        self.kind.parse().ok()
    }

    pub fn deployment_kind(&self) -> Option<Deployment> {
        self.deployment.parse().ok()
    }

    /// Files of the given logical type, in declaration order.
    pub fn files_of_type<'a>(&'a self, file_type: &'a str) -> impl Iterator<Item = &'a FileDescriptor> {
        self.files.iter().filter(move |f| f.file_type == file_type)
    }
}

/// Response envelope of `GET /jobs/unclaimed`.
#[derive(Debug, Clone, Deserialize)]
pub struct JobEnvelope {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<Job>,
}

/// Queue status reported when nothing is waiting.
pub const NO_JOBS_STATUS: &str = "no jobs";

#[derive(Debug, Clone, Serialize)]
pub struct StatusUpdate<'a> {
    pub status: JobStatus,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub message: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogReport<'a> {
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    pub warnings: &'a [String],
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    pub errors: &'a [String],
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeReleaseRequest<'a> {
    pub code_version: &'a str,
    pub content_version: &'a str,
}

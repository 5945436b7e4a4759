use thiserror::Error;

use crate::api::ApiError;
use crate::supervisor::{ProcessResult, ToolError};
use crate::upload::UploadError;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("failed to upload {what}: {source}")]
    Upload {
        what: String,
        #[source]
        source: UploadError,
    },

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("failed to walk directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("{0}")]
    Stage(String),
}

impl WorkerError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        WorkerError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn upload(what: impl Into<String>, source: UploadError) -> Self {
        WorkerError::Upload {
            what: what.into(),
            source,
        }
    }

    /// Classifies the error for reporting decisions.
    pub fn kind(&self) -> FailureKind {
        match self {
            WorkerError::Validation(_) => FailureKind::Validation,
            WorkerError::Tool(_) => FailureKind::Tool,
            WorkerError::Upload { .. } | WorkerError::Api(_) => FailureKind::Transport,
            WorkerError::Io { .. }
            | WorkerError::Git(_)
            | WorkerError::Archive(_)
            | WorkerError::Walk(_)
            | WorkerError::Stage(_) => FailureKind::Local,
        }
    }

    /// The tool output collected before a tool failure, if any.
    pub fn process_result(&self) -> Option<&ProcessResult> {
        match self {
            WorkerError::Tool(ToolError::ExecutionFailed { result, .. }) => Some(result),
            _ => None,
        }
    }
}

/// Local job errors: the job itself is malformed or outside this worker's capabilities.
/// Never retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unsupported job {field}: {value}")]
    UnsupportedJobKind { field: &'static str, value: String },

    #[error("job has no {0} metadata")]
    MissingPayload(&'static str),

    #[error("invalid job {0}")]
    InvalidField(&'static str),

    #[error("invalid platform {platform} for {target}")]
    InvalidPlatform { platform: String, target: &'static str },

    #[error("job is missing required input: {0}")]
    MissingInput(String),
}

/// Classifies a job failure, mirroring the error taxonomy of the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FailureKind {
    /// Bad job shape or capability mismatch.
    Validation,
    /// External tool could not run or exited non-zero.
    Tool,
    /// Queue or storage API failure on a primary operation.
    Transport,
    /// Filesystem, archive or version control failure inside a stage.
    Local,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Validation => write!(f, "Validation"),
            FailureKind::Tool => write!(f, "Tool"),
            FailureKind::Transport => write!(f, "Transport"),
            FailureKind::Local => write!(f, "Local"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_payload_message() {
        let err = WorkerError::from(ValidationError::MissingPayload("package"));
        assert_eq!(err.to_string(), "job has no package metadata");
        assert_eq!(err.kind(), FailureKind::Validation);
    }

    #[test]
    fn unsupported_kind_message() {
        let err = ValidationError::UnsupportedJobKind {
            field: "platform",
            value: "PS5".into(),
        };
        assert_eq!(err.to_string(), "unsupported job platform: PS5");
    }

    #[test]
    fn tool_failure_exposes_process_result() {
        let result = ProcessResult {
            exit_code: 3,
            warnings: vec!["Warning: a".into()],
            errors: vec!["Error: b".into()],
        };
        let err = WorkerError::from(ToolError::ExecutionFailed {
            tool: "AutomationTool".into(),
            code: 3,
            result,
        });
        assert_eq!(err.kind(), FailureKind::Tool);
        let collected = err.process_result().unwrap();
        assert_eq!(collected.warnings.len(), 1);
        assert_eq!(collected.errors.len(), 1);
    }

    #[test]
    fn stage_error_is_local() {
        let err = WorkerError::Stage("job package has no files".into());
        assert_eq!(err.kind(), FailureKind::Local);
        assert_eq!(err.to_string(), "job package has no files");
    }

    #[test]
    fn failure_kind_display() {
        assert_eq!(FailureKind::Transport.to_string(), "Transport");
        assert_eq!(FailureKind::Local.to_string(), "Local");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<WorkerError>();
    }
}

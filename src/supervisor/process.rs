//! Runs an external tool, tees its stdout into a log file and the worker log,
//! and turns the outcome into a [`ProcessResult`].

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{ChildStdout, Command};
use tracing::{debug, info, warn};

use super::classify::{ProcessResult, classify, restructure};
use super::profile::ToolProfile;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{tool} not found at {}", path.display())]
    NotFound { tool: String, path: PathBuf },

    #[error("failed to start {tool}: {source}")]
    SpawnFailed {
        tool: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to wait for {tool}: {reason}")]
    WaitFailed { tool: String, reason: String },

    #[error("failed to write {tool} log {}: {source}", path.display())]
    LogFile {
        tool: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{tool} failed with exit code {code}")]
    ExecutionFailed {
        tool: String,
        code: i32,
        result: ProcessResult,
    },
}

/// What the drainer saw on stdout.
#[derive(Debug, Default)]
struct Drained {
    sentinel: Option<i32>,
    warnings: Vec<String>,
    errors: Vec<String>,
}

/// Spawns tools one at a time. Each profile writes its own log file under
/// `log_dir`, recreated on every run.
#[derive(Debug, Clone)]
pub struct Supervisor {
    log_dir: PathBuf,
}

impl Supervisor {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
        }
    }

    pub fn log_path(&self, profile: &ToolProfile) -> PathBuf {
        self.log_dir.join(&profile.log_file)
    }

    pub async fn run(
        &self,
        profile: &ToolProfile,
        executable: &Path,
        args: &[String],
        working_dir: Option<&Path>,
    ) -> Result<ProcessResult, ToolError> {
        let tool = profile.name.clone();

        if executable.components().count() > 1 && !executable.exists() {
            return Err(ToolError::NotFound {
                tool,
                path: executable.to_path_buf(),
            });
        }

        let log_path = self.log_path(profile);
        let log_file = File::create(&log_path)
            .await
            .map_err(|source| ToolError::LogFile {
                tool: tool.clone(),
                path: log_path.clone(),
                source,
            })?;

        if profile.log_args {
            info!(tool = %tool, "running {} {}", executable.display(), args.join(" "));
        } else {
            info!(tool = %tool, "running {}", executable.display());
        }

        let mut command = Command::new(executable);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        if let Some(dir) = working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ToolError::NotFound {
                    tool: tool.clone(),
                    path: executable.to_path_buf(),
                }
            } else {
                ToolError::SpawnFailed {
                    tool: tool.clone(),
                    source,
                }
            }
        })?;

        let stdout = child.stdout.take().ok_or_else(|| ToolError::WaitFailed {
            tool: tool.clone(),
            reason: "stdout was not captured".to_string(),
        })?;

        let drainer = tokio::spawn(drain(stdout, log_file, log_path, profile.clone()));

        let (status, drained) = tokio::join!(child.wait(), drainer);

        let status = status.map_err(|e| ToolError::WaitFailed {
            tool: tool.clone(),
            reason: e.to_string(),
        })?;
        let drained = drained.map_err(|e| ToolError::WaitFailed {
            tool: tool.clone(),
            reason: format!("output drainer failed: {e}"),
        })??;

        let os_code = status.code().unwrap_or(-1);
        let exit_code = drained.sentinel.unwrap_or(os_code);
        debug!(tool = %tool, os_code, sentinel = ?drained.sentinel, exit_code, "tool finished");

        let mut result = ProcessResult {
            exit_code,
            warnings: drained.warnings,
            errors: drained.errors,
        };

        if exit_code != 0 {
            restructure(&mut result.errors);
            warn!(
                tool = %tool,
                exit_code,
                warnings = result.warnings.len(),
                errors = result.errors.len(),
                "tool failed"
            );
            return Err(ToolError::ExecutionFailed {
                tool,
                code: exit_code,
                result,
            });
        }

        Ok(result)
    }
}

/// Reads stdout line by line until end of stream or, when the profile asks
/// for it, the first sentinel. Dropping `stdout` on return closes our end of
/// the pipe.
async fn drain(
    stdout: ChildStdout,
    log_file: File,
    log_path: PathBuf,
    profile: ToolProfile,
) -> Result<Drained, ToolError> {
    let mut reader = BufReader::new(stdout);
    let mut writer = Some(BufWriter::new(log_file));
    let mut drained = Drained::default();
    let mut buf = Vec::with_capacity(1024);

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(tool = %profile.name, error = %e, "reading tool output failed");
                break;
            }
        }

        if let Some(w) = writer.as_mut()
            && let Err(e) = w.write_all(&buf).await
        {
            // keep draining so the tool never blocks on a full pipe
            warn!(tool = %profile.name, error = %e, "writing tool log failed");
            writer = None;
        }

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\r', '\n']);
        info!(target: "tool", tool = %profile.name, "{}", line.replace('\\', "/"));

        if let Some(code) = profile.match_sentinel(line) {
            drained.sentinel = Some(code);
            if profile.stop_at_sentinel {
                debug!(tool = %profile.name, code, "sentinel reached, closing output");
                break;
            }
        }
    }
    drop(reader);

    let log_error = |source: io::Error| ToolError::LogFile {
        tool: profile.name.clone(),
        path: log_path.clone(),
        source,
    };

    if let Some(mut w) = writer {
        w.flush().await.map_err(log_error)?;
        w.into_inner().sync_all().await.map_err(log_error)?;
    }

    if profile.classify {
        let path = log_path.clone();
        let markers = profile.markers.clone();
        let classified = tokio::task::spawn_blocking(move || {
            let file = std::fs::File::open(&path)?;
            classify(io::BufReader::new(file), &markers)
        })
        .await
        .map_err(|e| ToolError::WaitFailed {
            tool: profile.name.clone(),
            reason: format!("log classification failed: {e}"),
        })?
        .map_err(log_error)?;
        (drained.warnings, drained.errors) = classified;
    }

    Ok(drained)
}

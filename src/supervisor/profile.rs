//! Per-tool knobs for the supervisor: how a tool announces completion and
//! whether its output is worth classifying.

use std::sync::LazyLock;

use regex::Regex;

use super::classify::Markers;

static UAT_EXIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^AutomationTool exiting with ExitCode=(?P<code>-?\d+) \(").expect("valid regex")
});

static WAILS_BUILT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^Built").expect("valid regex"));

static WAILS_EXIT_STATUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"exit status (?P<code>\d+)").expect("valid regex"));

#[derive(Debug, Clone)]
pub struct ToolProfile {
    /// Display name, used in logs and errors.
    pub name: String,
    /// Lines announcing the tool's real exit code. A pattern without a
    /// `code` group means success.
    pub sentinels: Vec<Regex>,
    /// Treat a sentinel match as end of output.
    pub stop_at_sentinel: bool,
    pub classify: bool,
    pub markers: Markers,
    /// File name of the per-invocation output log.
    pub log_file: String,
    /// Whether the command line may be written to the worker log.
    pub log_args: bool,
}

impl ToolProfile {
    /// Unreal AutomationTool. Its wrapper scripts may keep the pipe open after
    /// the tool is done, so output ends at the exit-code banner.
    pub fn automation_tool(markers: Markers) -> Self {
        Self {
            name: "AutomationTool".to_string(),
            sentinels: vec![UAT_EXIT.clone()],
            stop_at_sentinel: true,
            classify: true,
            markers,
            log_file: "uat.log".to_string(),
            log_args: true,
        }
    }

    pub fn wails(markers: Markers) -> Self {
        Self {
            name: "Wails".to_string(),
            sentinels: vec![WAILS_BUILT.clone(), WAILS_EXIT_STATUS.clone()],
            stop_at_sentinel: false,
            classify: true,
            markers,
            log_file: "wails.log".to_string(),
            log_args: true,
        }
    }

    pub fn version_selector() -> Self {
        Self::plain("UnrealVersionSelector", "uvs.log")
    }

    /// Signing arguments carry the certificate password.
    pub fn sign_tool() -> Self {
        Self {
            log_args: false,
            ..Self::plain("SignTool", "signtool.log")
        }
    }

    /// A tool judged only by its OS exit code.
    pub fn plain(name: &str, log_file: &str) -> Self {
        Self {
            name: name.to_string(),
            sentinels: Vec::new(),
            stop_at_sentinel: false,
            classify: false,
            markers: Markers::default(),
            log_file: log_file.to_string(),
            log_args: true,
        }
    }

    /// Exit code announced by `line`, if it is a sentinel.
    pub fn match_sentinel(&self, line: &str) -> Option<i32> {
        self.sentinels.iter().find_map(|re| {
            let caps = re.captures(line)?;
            Some(
                caps.name("code")
                    .and_then(|m| m.as_str().parse().ok())
                    .unwrap_or(0),
            )
        })
    }
}

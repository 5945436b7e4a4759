//! Worker configuration loaded from `vat-worker.toml` and `VAT_*` environment variables.
//!
//! The file is optional; every key can also be supplied through the environment,
//! which takes precedence. The result is an immutable [`WorkerConfig`] built once
//! at startup and shared by reference.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

use crate::api::{Deployment, JobType};

pub const DEFAULT_CONFIG_FILE: &str = "vat-worker.toml";

/// Name of the credentials file looked up next to the executable.
const CREDENTIALS_FILE: &str = ".credentials";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required setting {key} (env {env}) is not defined")]
    Missing { key: &'static str, env: &'static str },

    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// An ordered set of declared capabilities with an explicit membership test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilitySet<T> {
    items: Vec<T>,
}

impl<T> Default for CapabilitySet<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T: PartialEq> CapabilitySet<T> {
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        let mut set = Self::default();
        for item in items {
            if !set.items.contains(&item) {
                set.items.push(item);
            }
        }
        set
    }

    pub fn contains(&self, item: &T) -> bool {
        self.items.contains(item)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T: fmt::Display> CapabilitySet<T> {
    /// Comma separated list, the form the queue expects in query strings.
    pub fn to_query(&self) -> String {
        self.items
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl<T> CapabilitySet<T>
where
    T: FromStr + PartialEq,
    T::Err: fmt::Display,
{
    /// Parses a comma separated list, ignoring blank entries.
    pub fn parse_list(key: &'static str, list: &str) -> Result<Self, ConfigError> {
        let mut items = Vec::new();
        for raw in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let item = raw.parse::<T>().map_err(|e| ConfigError::Invalid {
                key,
                value: raw.to_string(),
                reason: e.to_string(),
            })?;
            items.push(item);
        }
        Ok(Self::new(items))
    }
}

/// The (platform × job type × deployment) tuples this worker can process.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    pub platforms: CapabilitySet<String>,
    pub job_types: CapabilitySet<JobType>,
    pub deployments: CapabilitySet<Deployment>,
}

/// Paths to the external tools driven by the pipelines.
#[derive(Debug, Clone, Default)]
pub struct ToolPaths {
    pub automation_tool: PathBuf,
    pub version_selector: PathBuf,
    pub wails: PathBuf,
    pub editor: PathBuf,
    pub sign_tool: Option<PathBuf>,
}

/// Code signing material for launcher builds. Signing is skipped when absent.
#[derive(Clone)]
pub struct SigningConfig {
    pub cert_file: PathBuf,
    pub cert_password: String,
}

impl fmt::Debug for SigningConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningConfig")
            .field("cert_file", &self.cert_file)
            .field("cert_password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Parses the `email:password` credentials file format.
    pub fn parse(contents: &str) -> Option<Self> {
        let (email, password) = contents.trim().split_once(':')?;
        if email.is_empty() || password.is_empty() {
            return None;
        }
        Some(Self {
            email: email.to_string(),
            password: password.to_string(),
        })
    }

    fn from_executable_dir() -> Result<Self, ConfigError> {
        let exe = std::env::current_exe().map_err(|source| ConfigError::Read {
            path: PathBuf::from(CREDENTIALS_FILE),
            source,
        })?;
        let path = exe
            .parent()
            .map(|dir| dir.join(CREDENTIALS_FILE))
            .unwrap_or_else(|| PathBuf::from(CREDENTIALS_FILE));
        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::parse(&contents).ok_or(ConfigError::Invalid {
            key: "credentials",
            value: path.display().to_string(),
            reason: "expected email:password".into(),
        })
    }
}

/// Raw, partially specified configuration as found in the TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub api_url: Option<String>,
    pub api_email: Option<String>,
    pub api_password: Option<String>,
    pub project_dir: Option<PathBuf>,
    pub launcher_dir: Option<PathBuf>,
    pub project_name: Option<String>,
    pub ue_version_code: Option<String>,
    pub ue_version_marketplace: Option<String>,
    pub uat_path: Option<PathBuf>,
    pub uvs_path: Option<PathBuf>,
    pub wails_path: Option<PathBuf>,
    pub editor_path: Option<PathBuf>,
    pub signtool_path: Option<PathBuf>,
    pub cert_file: Option<PathBuf>,
    pub cert_password: Option<String>,
    pub ssh_key_path: Option<PathBuf>,
    pub platforms: Option<String>,
    pub job_types: Option<String>,
    pub deployments: Option<String>,
    pub content_version: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub max_poll_interval_ms: Option<u64>,
    pub upload_chunk_size: Option<usize>,
    pub tool_log_dir: Option<PathBuf>,
    pub warning_marker: Option<String>,
    pub error_marker: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
}

impl FileConfig {
    /// Overrides file values with `VAT_*` variables returned by `lookup`.
    /// Numeric variables that do not parse are rejected.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let string = |slot: &mut Option<String>, key: &str| {
            if let Some(v) = get(key) {
                *slot = Some(v);
            }
        };
        let path = |slot: &mut Option<PathBuf>, key: &str| {
            if let Some(v) = get(key) {
                *slot = Some(PathBuf::from(v));
            }
        };

        string(&mut self.api_url, "VAT_API2_URL");
        string(&mut self.api_email, "VAT_API_EMAIL");
        string(&mut self.api_password, "VAT_API_PASSWORD");
        path(&mut self.project_dir, "VAT_PROJECT_DIR");
        path(&mut self.launcher_dir, "VAT_LAUNCHER_DIR");
        string(&mut self.project_name, "VAT_PROJECT_NAME");
        string(&mut self.ue_version_code, "VAT_UE_VERSION_CODE");
        string(&mut self.ue_version_marketplace, "VAT_UE_VERSION_MARKETPLACE");
        path(&mut self.uat_path, "VAT_UAT_PATH");
        path(&mut self.uvs_path, "VAT_UVS_PATH");
        path(&mut self.wails_path, "VAT_WAILS_PATH");
        path(&mut self.editor_path, "VAT_EDITOR_PATH");
        path(&mut self.signtool_path, "VAT_SIGNTOOL_PATH");
        path(&mut self.cert_file, "VAT_CERT_FILE");
        string(&mut self.cert_password, "VAT_CERT_PASSWORD");
        path(&mut self.ssh_key_path, "VAT_SSH_KEY_PATH");
        string(&mut self.platforms, "VAT_PLATFORMS");
        string(&mut self.job_types, "VAT_JOB_TYPES");
        string(&mut self.deployments, "VAT_DEPLOYMENTS");
        string(&mut self.content_version, "VAT_CONTENT_VERSION");
        if let Some(v) = get("VAT_POLL_INTERVAL_MS") {
            self.poll_interval_ms = Some(parse_number("poll_interval_ms", v)?);
        }
        if let Some(v) = get("VAT_MAX_POLL_INTERVAL_MS") {
            self.max_poll_interval_ms = Some(parse_number("max_poll_interval_ms", v)?);
        }
        if let Some(v) = get("VAT_UPLOAD_CHUNK_SIZE") {
            self.upload_chunk_size = Some(parse_number("upload_chunk_size", v)?);
        }
        path(&mut self.tool_log_dir, "VAT_TOOL_LOG_DIR");
        string(&mut self.log_level, "VAT_LOG_LEVEL");
        string(&mut self.log_format, "VAT_LOG_FORMAT");
        Ok(())
    }
}

fn parse_number<T>(key: &'static str, value: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr<Err = std::num::ParseIntError>,
{
    value.trim().parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
        key,
        reason: e.to_string(),
        value,
    })
}

/// Validated, immutable worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub api_url: String,
    /// `None` means the credentials file next to the executable is used.
    pub credentials: Option<Credentials>,
    pub project_dir: PathBuf,
    pub launcher_dir: PathBuf,
    pub project_name: String,
    pub ue_version_code: String,
    pub ue_version_marketplace: String,
    pub tools: ToolPaths,
    pub signing: Option<SigningConfig>,
    pub ssh_key_path: Option<PathBuf>,
    pub capabilities: Capabilities,
    pub content_version: String,
    pub poll_interval_ms: u64,
    pub max_poll_interval_ms: u64,
    pub upload_chunk_size: usize,
    pub tool_log_dir: PathBuf,
    pub warning_marker: String,
    pub error_marker: String,
    pub log_level: String,
    pub log_format: String,
}

fn default_poll_interval_ms() -> u64 {
    10_000
}

fn default_max_poll_interval_ms() -> u64 {
    60_000
}

/// Read chunk used while streaming artifacts: 100 MiB.
pub const DEFAULT_UPLOAD_CHUNK_SIZE: usize = 100 * 1024 * 1024;

fn require<T>(value: Option<T>, key: &'static str, env: &'static str) -> Result<T, ConfigError> {
    value.ok_or(ConfigError::Missing { key, env })
}

impl WorkerConfig {
    /// Loads `path` (or `vat-worker.toml` in the working directory) and applies
    /// environment overrides. A missing file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let mut file = if path.exists() {
            let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            toml::from_str::<FileConfig>(&contents)?
        } else {
            FileConfig::default()
        };
        file.apply_env(|key| std::env::var(key).ok())?;
        Self::from_file_config(file)
    }

    pub fn from_file_config(file: FileConfig) -> Result<Self, ConfigError> {
        let credentials = match (file.api_email, file.api_password) {
            (Some(email), Some(password)) => Some(Credentials { email, password }),
            _ => None,
        };

        let signing = match (&file.signtool_path, file.cert_file, file.cert_password) {
            (Some(_), Some(cert_file), Some(cert_password)) => Some(SigningConfig {
                cert_file,
                cert_password,
            }),
            _ => None,
        };

        let capabilities = Capabilities {
            platforms: CapabilitySet::parse_list(
                "platforms",
                file.platforms.as_deref().unwrap_or_default(),
            )?,
            job_types: CapabilitySet::parse_list(
                "job_types",
                file.job_types.as_deref().unwrap_or_default(),
            )?,
            deployments: CapabilitySet::parse_list(
                "deployments",
                file.deployments.as_deref().unwrap_or_default(),
            )?,
        };

        let upload_chunk_size = file.upload_chunk_size.unwrap_or(DEFAULT_UPLOAD_CHUNK_SIZE);
        if upload_chunk_size == 0 {
            return Err(ConfigError::Invalid {
                key: "upload_chunk_size",
                value: "0".into(),
                reason: "must be positive".into(),
            });
        }

        Ok(Self {
            api_url: require(file.api_url, "api_url", "VAT_API2_URL")?
                .trim_end_matches('/')
                .to_string(),
            credentials,
            project_dir: require(file.project_dir, "project_dir", "VAT_PROJECT_DIR")?,
            launcher_dir: require(file.launcher_dir, "launcher_dir", "VAT_LAUNCHER_DIR")?,
            project_name: require(file.project_name, "project_name", "VAT_PROJECT_NAME")?,
            ue_version_code: require(
                file.ue_version_code,
                "ue_version_code",
                "VAT_UE_VERSION_CODE",
            )?,
            ue_version_marketplace: require(
                file.ue_version_marketplace,
                "ue_version_marketplace",
                "VAT_UE_VERSION_MARKETPLACE",
            )?,
            tools: ToolPaths {
                automation_tool: file.uat_path.unwrap_or_default(),
                version_selector: file.uvs_path.unwrap_or_default(),
                wails: file.wails_path.unwrap_or_default(),
                editor: file.editor_path.unwrap_or_default(),
                sign_tool: file.signtool_path,
            },
            signing,
            ssh_key_path: file.ssh_key_path.or_else(default_ssh_key_path),
            capabilities,
            content_version: file.content_version.unwrap_or_else(|| "1.0.0".to_string()),
            poll_interval_ms: file
                .poll_interval_ms
                .unwrap_or_else(default_poll_interval_ms),
            max_poll_interval_ms: file
                .max_poll_interval_ms
                .unwrap_or_else(default_max_poll_interval_ms),
            upload_chunk_size,
            tool_log_dir: file.tool_log_dir.unwrap_or_else(|| PathBuf::from(".")),
            warning_marker: file.warning_marker.unwrap_or_else(|| "Warning:".into()),
            error_marker: file.error_marker.unwrap_or_else(|| "Error:".into()),
            log_level: file.log_level.unwrap_or_else(|| "info".into()),
            log_format: file.log_format.unwrap_or_else(|| "text".into()),
        })
    }

    /// Checks the settings only the job loop needs: tool paths and capabilities.
    pub fn validate_for_run(&self) -> Result<(), ConfigError> {
        let tools = [
            (&self.tools.automation_tool, "uat_path", "VAT_UAT_PATH"),
            (&self.tools.version_selector, "uvs_path", "VAT_UVS_PATH"),
            (&self.tools.wails, "wails_path", "VAT_WAILS_PATH"),
            (&self.tools.editor, "editor_path", "VAT_EDITOR_PATH"),
        ];
        for (path, key, env) in tools {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Missing { key, env });
            }
        }
        if self.capabilities.platforms.is_empty() {
            return Err(ConfigError::Missing {
                key: "platforms",
                env: "VAT_PLATFORMS",
            });
        }
        if self.capabilities.job_types.is_empty() {
            return Err(ConfigError::Missing {
                key: "job_types",
                env: "VAT_JOB_TYPES",
            });
        }
        if self.capabilities.deployments.is_empty() {
            return Err(ConfigError::Missing {
                key: "deployments",
                env: "VAT_DEPLOYMENTS",
            });
        }
        if self.signing.is_none() {
            tracing::warn!("signtool path, certificate file or password not defined, app signing will be skipped");
        }
        Ok(())
    }

    /// Credentials from the config, or from the `.credentials` file next to the executable.
    pub fn resolve_credentials(&self) -> Result<Credentials, ConfigError> {
        match &self.credentials {
            Some(c) => Ok(c.clone()),
            None => {
                tracing::info!("loading credentials from file");
                Credentials::from_executable_dir()
            }
        }
    }

    /// Path to the `.uproject` descriptor of the configured project.
    pub fn project_descriptor(&self) -> PathBuf {
        self.project_dir
            .join(format!("{}.uproject", self.project_name))
    }
}

fn default_ssh_key_path() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(|home| {
            PathBuf::from(home)
                .join(".ssh")
                .join("veverse_builder_id_rsa")
        })
}

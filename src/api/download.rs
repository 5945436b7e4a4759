//! Streaming file download used to fetch job inputs.

use std::path::Path;

use reqwest::{Client, StatusCode};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::error::ApiError;

/// File name suffixes of dedicated server binaries, which must stay executable.
const SERVER_BINARY_SUFFIXES: [&str; 5] = [
    "Server-Debug",
    "Server-DebugGame",
    "Server",
    "Server-Test",
    "Server-Shipping",
];

/// Downloads `url` into `dest`.
///
/// When `dest` already exists with the expected non-zero `size` the download
/// is skipped, unless `force` is set. Returns whether bytes were fetched.
pub async fn download_file(
    client: &Client,
    url: &str,
    dest: &Path,
    size: Option<u64>,
    force: bool,
) -> Result<bool, ApiError> {
    if let Ok(meta) = fs::metadata(dest).await
        && let Some(expected) = size
        && expected > 0
        && meta.len() == expected
    {
        if !force {
            debug!(dest = %dest.display(), "file exists with matching size, skipping download");
            return Ok(false);
        }
        fs::remove_file(dest)
            .await
            .map_err(|e| ApiError::io(format!("failed to remove {}", dest.display()), e))?;
    }

    let mut response = client.get(url).send().await?;
    if response.status() != StatusCode::OK {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::Rejected { status, body });
    }

    if let Some(parent) = dest.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| ApiError::io(format!("failed to create {}", parent.display()), e))?;
    }

    let write_err = |e| ApiError::io(format!("failed to write {}", dest.display()), e);
    let mut file = fs::File::create(dest).await.map_err(write_err)?;
    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await.map_err(write_err)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(write_err)?;

    mark_executable(dest).await?;
    info!(dest = %dest.display(), bytes = written, "downloaded");
    Ok(true)
}

fn is_server_binary(path: &Path) -> bool {
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default();
    SERVER_BINARY_SUFFIXES.iter().any(|s| name.ends_with(s))
}

#[cfg(unix)]
async fn mark_executable(path: &Path) -> Result<(), ApiError> {
    use std::os::unix::fs::PermissionsExt;

    if is_server_binary(path) {
        fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
            .await
            .map_err(|e| ApiError::io(format!("failed to chmod {}", path.display()), e))?;
    }
    Ok(())
}

#[cfg(not(unix))]
async fn mark_executable(_path: &Path) -> Result<(), ApiError> {
    Ok(())
}

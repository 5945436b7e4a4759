//! Selection of staged build files for release uploads and SDK archives.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::WorkerError;

/// Fragments of staged paths never uploaded with a release.
pub const RELEASE_IGNORE_FILE: &str = ".veverse-automation-ignore";

/// Project paths packed into the SDK archive.
pub const SDK_INCLUDE_FILE: &str = ".veverse-automation-sdk-include";

/// A file picked for upload or archiving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub path: PathBuf,
    /// Path relative to the listing root, `/` separated.
    pub relative: String,
}

/// Reads a pattern list: one entry per line, blank lines and `#` comments
/// skipped. A missing file is an empty list.
pub fn read_pattern_list(path: &Path) -> Result<Vec<String>, WorkerError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(WorkerError::io(format!("failed to read {}", path.display()), e)),
    };
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn to_slash(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Regular files under `root` whose slash-separated path matches `keep`,
/// sorted by relative path. Directories failing `keep_dir` are pruned.
fn walk(
    root: &Path,
    keep_dir: impl Fn(&str) -> bool,
    keep: impl Fn(&str) -> bool,
) -> Result<Vec<StagedFile>, WorkerError> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_type().is_dir() || keep_dir(&to_slash(e.path())));
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let full = to_slash(entry.path());
        if !keep(&full) {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map(to_slash)
            .unwrap_or_else(|_| full.clone());
        files.push(StagedFile {
            path: entry.path().to_path_buf(),
            relative,
        });
    }
    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

/// Staged release files, skipping any path containing an ignored fragment.
pub fn list_release_files(staging_dir: &Path, ignored: &[String]) -> Result<Vec<StagedFile>, WorkerError> {
    let ignored: Vec<String> = ignored.iter().map(|i| i.replace('\\', "/")).collect();
    let allowed = |path: &str| !ignored.iter().any(|i| path.contains(i.as_str()));
    walk(staging_dir, allowed, allowed)
}

/// Project files for the SDK archive: those whose path contains
/// `UnrealEngine/<project>/<entry>` for some included entry.
pub fn list_sdk_files(project_dir: &Path, project_name: &str, included: &[String]) -> Result<Vec<StagedFile>, WorkerError> {
    let needles: Vec<String> = included
        .iter()
        .map(|i| format!("UnrealEngine/{project_name}/{}", i.replace('\\', "/")))
        .collect();
    walk(
        project_dir,
        |_| true,
        |path| needles.iter().any(|n| path.contains(n.as_str())),
    )
}

//! Platform naming used by staged builds and package artifacts.

use std::path::{Path, PathBuf};

use crate::api::Deployment;

/// Name of the platform folder the engine stages builds into.
pub fn staged_platform_name(platform: &str, deployment: Deployment) -> String {
    let server = deployment == Deployment::Server;
    match platform {
        "Win64" if server => "WindowsServer".to_string(),
        "Win64" => "Windows".to_string(),
        "IOS" | "Android" => platform.to_string(),
        other if server => format!("{other}Server"),
        other => other.to_string(),
    }
}

/// Mobile targets cannot host dedicated servers.
pub fn is_mobile(platform: &str) -> bool {
    matches!(platform, "IOS" | "Android")
}

/// Location of the cooked DLC pak produced by a package build.
pub fn package_pak_path(
    project_dir: &Path,
    project_name: &str,
    package_name: &str,
    platform: &str,
    deployment: Deployment,
) -> PathBuf {
    let staged = staged_platform_name(platform, deployment);
    let file_name = format!("{package_name}{project_name}-{staged}.pak");
    let root = project_dir
        .join("Plugins")
        .join(package_name)
        .join("Saved")
        .join("StagedBuilds")
        .join(&staged);

    if platform == "IOS" {
        root.join("cookeddata")
            .join(project_name.to_lowercase())
            .join("plugins")
            .join(package_name.to_lowercase())
            .join("content")
            .join("paks")
            .join(staged.to_lowercase())
            .join(file_name)
    } else {
        root.join(project_name)
            .join("Plugins")
            .join(package_name)
            .join("Content")
            .join("Paks")
            .join(&staged)
            .join(file_name)
    }
}

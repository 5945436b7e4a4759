//! Command lines of the external tools, one builder per job shape.

use std::path::Path;

const PACKAGING_INI: &str =
    "-ini:Game:[/Script/UnrealEd.ProjectPackagingSettings]:BlueprintNativizationMethod=Disabled";

const TIMESTAMP_SERVER: &str = "http://timestamp.digicert.com";

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Inputs shared by the BuildCookRun variants.
#[derive(Debug, Clone)]
pub struct CookTarget<'a> {
    pub project: &'a str,
    pub configuration: &'a str,
    pub editor: &'a Path,
    pub platform: &'a str,
    pub map: &'a str,
}

/// Cooks a DLC plugin for a client platform.
pub fn package_client(t: &CookTarget<'_>, dlc_name: &str, base_release: &str) -> Vec<String> {
    let mut cmd = vec![
        "BuildCookRun".to_string(),
        format!("-project={}", t.project),
        "-noP4".into(),
        format!("-clientconfig={}", t.configuration),
        format!("-unrealexe={}", path_arg(t.editor)),
        "-utf8output".into(),
        format!("-platform={}", t.platform),
        "-cook".into(),
        format!("-map={}", t.map),
        "-unversionedcookedcontent".into(),
        "-pak".into(),
        format!("-dlcname={dlc_name}"),
        "-DLCIncludeEngineContent".into(),
        format!("-basedonreleaseversion={base_release}"),
        "-compressed".into(),
        "-package".into(),
        "-skipstage".into(),
        "-VeryVerbose".into(),
        "-BuildMachine".into(),
    ];
    if t.configuration == "Shipping" {
        cmd.push("-distribution".into());
    }
    cmd
}

/// Cooks a DLC plugin for a dedicated server.
pub fn package_server(t: &CookTarget<'_>, dlc_name: &str, base_release: &str) -> Vec<String> {
    vec![
        "BuildCookRun".to_string(),
        format!("-project={}", t.project),
        "-noP4".into(),
        format!("-serverconfig={}", t.configuration),
        format!("-unrealexe={}", path_arg(t.editor)),
        "-utf8output".into(),
        "-cook".into(),
        format!("-map={}", t.map),
        "-unversionedcookedcontent".into(),
        "-pak".into(),
        format!("-dlcname={dlc_name}"),
        "-DLCIncludeEngineContent".into(),
        format!("-basedonreleaseversion={base_release}"),
        "-distribution".into(),
        "-compressed".into(),
        "-package".into(),
        "-noclient".into(),
        "-server".into(),
        format!("-serverplatform={}", t.platform),
        "-skipstage".into(),
        "-VeryVerbose".into(),
        "-BuildMachine".into(),
    ]
}

/// Shared stage/package flags of release builds, starting at the packaging ini.
fn release_tail(map: &str, release_version: &str, staging_dir: &Path) -> Vec<String> {
    vec![
        PACKAGING_INI.to_string(),
        "-build".into(),
        "-cook".into(),
        "-unversionedcookedcontent".into(),
        "-SkipCookingEditorContent".into(),
        format!("-map={map}"),
        "-pak".into(),
        "-compressed".into(),
        "-package".into(),
        format!("-createreleaseversion={release_version}"),
        "-stage".into(),
        format!("-stagingdirectory={}", path_arg(staging_dir)),
        "-VeryVerbose".into(),
        "-NoCodeSign".into(),
        "-BuildMachine".into(),
        "-AllowCommandletRendering".into(),
        "-utf8output".into(),
    ]
}

fn configuration_flags(configuration: &str) -> Vec<String> {
    match configuration {
        "Shipping" => args(&["-CrashReporter", "-nodebug", "-nodebuginfo", "-distribution", "-prereqs"]),
        "Development" | "DebugGame" | "Debug" | "Test" => args(&["-debug"]),
        _ => Vec::new(),
    }
}

/// Builds, cooks and stages a dedicated server release.
pub fn release_server(t: &CookTarget<'_>, release_version: &str, staging_dir: &Path) -> Vec<String> {
    let mut cmd = vec![
        "BuildCookRun".to_string(),
        format!("-project={}", t.project),
        "-noP4".into(),
        format!("-unrealexe={}", path_arg(t.editor)),
        "-noclient".into(),
        "-server".into(),
        format!("-serverconfig={}", t.configuration),
        format!("-serverplatform={}", t.platform),
    ];
    cmd.extend(release_tail(t.map, release_version, staging_dir));
    cmd.extend(configuration_flags(t.configuration));
    cmd
}

/// Builds, cooks and stages a client release.
pub fn release_client(t: &CookTarget<'_>, release_version: &str, staging_dir: &Path) -> Vec<String> {
    let mut cmd = vec![
        "BuildCookRun".to_string(),
        format!("-project={}", t.project),
        "-noP4".into(),
        format!("-unrealexe={}", path_arg(t.editor)),
        format!("-clientconfig={}", t.configuration),
        format!("-platform={}", t.platform),
    ];
    cmd.extend(release_tail(t.map, release_version, staging_dir));
    cmd.extend(configuration_flags(t.configuration));
    cmd
}

pub fn build_editor(project: &str) -> Vec<String> {
    vec!["BuildEditor".to_string(), format!("-project={project}")]
}

/// Development build staged for SDK packaging.
pub fn sdk_build(t: &CookTarget<'_>, release_version: &str, staging_dir: &Path) -> Vec<String> {
    let mut cmd = vec![
        "BuildCookRun".to_string(),
        format!("-project={}", t.project),
        "-noP4".into(),
        format!("-unrealexe={}", path_arg(t.editor)),
        "-clientconfig=Development".into(),
        "-serveconfig=Development".into(),
        format!("-platform={}", t.platform),
    ];
    cmd.extend(release_tail(t.map, release_version, staging_dir));
    cmd.extend(args(&["-nodebug", "-nodebuginfo"]));
    cmd
}

/// `-switchversionsilent <uproject> <version>` for UnrealVersionSelector.
pub fn switch_engine_version(descriptor: &Path, version: &str) -> Vec<String> {
    vec![
        "-switchversionsilent".to_string(),
        path_arg(descriptor),
        version.to_string(),
    ]
}

/// Wails build of the launcher and the name of the produced binary.
/// Only Windows and macOS launchers exist.
pub fn wails_build(platform: &str, app_id: &str, app_name: &str, configuration: &str) -> Option<(Vec<String>, String)> {
    let binary = match platform {
        "Win64" => format!("{app_name}Launcher.exe"),
        "Mac" => format!("{app_name}Launcher"),
        _ => return None,
    };
    let cmd = vec![
        "build".to_string(),
        "-nocolour".into(),
        "-clean".into(),
        "-ldflags".into(),
        format!("-s -w -X games.launch.launcher/config.AppId={app_id}"),
        "-tags".into(),
        configuration.to_string(),
        "-o".into(),
        binary.clone(),
        "-v".into(),
        "2".into(),
    ];
    Some((cmd, binary))
}

/// SignTool invocation; the sha256 pass appends a second signature.
pub fn sign(cert_file: &Path, cert_password: &str, target: &Path, sha256: bool) -> Vec<String> {
    let digest = if sha256 { "sha256" } else { "sha1" };
    let mut cmd = args(&["sign", "/tr", TIMESTAMP_SERVER]);
    if sha256 {
        cmd.push("/as".into());
    }
    cmd.extend(args(&["/td", digest, "/fd", digest, "/f"]));
    cmd.push(path_arg(cert_file));
    cmd.push("/p".into());
    cmd.push(cert_password.to_string());
    cmd.push(path_arg(target));
    cmd
}

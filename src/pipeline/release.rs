//! Full game releases and SDK archives.
//!
//! Release builds are staged under `Saved/StagedBuilds/<platform>`; every
//! staged file is uploaded on its own, keyed by its path relative to the
//! staging root. Client and SDK builds also ship a single zip of the result.

use std::path::{Path, PathBuf};

use tracing::{info, warn};
use uuid::Uuid;

use super::commands::{self, CookTarget};
use super::files::{self, RELEASE_IGNORE_FILE, SDK_INCLUDE_FILE, StagedFile};
use super::platform::{is_mobile, staged_platform_name};
use super::{JobContext, blocking, create_dir};
use crate::api::{Release, WorkerApi};
use crate::archive;
use crate::error::{ValidationError, WorkerError};
use crate::git;
use crate::upload::guess_mime;

const ARCHIVE_MIME: &str = "application/zip";

fn validate<'a, A: WorkerApi>(ctx: &JobContext<'a, A>) -> Result<(Uuid, &'a Release), WorkerError> {
    let release = ctx
        .job
        .release
        .as_ref()
        .ok_or(ValidationError::MissingPayload("release"))?;
    let id = release
        .id
        .filter(|id| !id.is_nil())
        .ok_or(ValidationError::InvalidField("release id"))?;
    Ok((id, release))
}

fn staging_root<A: WorkerApi>(ctx: &JobContext<'_, A>) -> PathBuf {
    ctx.config.project_dir.join("Saved").join("StagedBuilds")
}

fn cook_target<'a, A: WorkerApi>(ctx: &'a JobContext<'_, A>, release: &'a Release) -> CookTarget<'a> {
    CookTarget {
        project: &ctx.config.project_name,
        configuration: &ctx.job.configuration,
        editor: &ctx.config.tools.editor,
        platform: &ctx.job.platform,
        map: &release.map,
    }
}

/// `{AppName}-{Version}-{Deployment}-{Configuration}-{Platform}{suffix}.zip`
fn archive_name<A: WorkerApi>(ctx: &JobContext<'_, A>, release: &Release, suffix: &str) -> String {
    format!(
        "{}-{}-{}-{}-{}{suffix}.zip",
        release.app_name, release.version, ctx.deployment, ctx.job.configuration, ctx.job.platform
    )
}

/// Checks out the branch of the job's configuration if not already on it, then pulls.
async fn sync_branch<A: WorkerApi>(ctx: &JobContext<'_, A>) -> Result<(), WorkerError> {
    let configuration = &ctx.job.configuration;
    let target = git::release_branch(configuration).ok_or_else(|| {
        WorkerError::Stage(format!(
            "failed to map the job configuration {configuration} to a branch"
        ))
    })?;
    ctx.git(move |repo| {
        let current = repo.current_branch()?;
        if current != target {
            info!(current = %current, target = %target, "checking out release branch");
            repo.checkout_branch(&target)?;
        }
        repo.pull()?;
        Ok(())
    })
    .await
}

async fn staged_files<A: WorkerApi>(ctx: &JobContext<'_, A>) -> Result<(PathBuf, Vec<StagedFile>), WorkerError> {
    let platform_dir = staging_root(ctx).join(staged_platform_name(&ctx.job.platform, ctx.deployment));
    let ignore_file = ctx.config.project_dir.join(RELEASE_IGNORE_FILE);
    let dir = platform_dir.clone();
    let files = blocking(move || {
        let ignored = files::read_pattern_list(&ignore_file)?;
        files::list_release_files(&dir, &ignored)
    })
    .await?;
    if files.is_empty() {
        warn!(dir = %platform_dir.display(), "no staged release files found");
    }
    Ok((platform_dir, files))
}

async fn upload_staged<A: WorkerApi>(ctx: &JobContext<'_, A>, id: Uuid, staged: &[StagedFile]) -> Result<(), WorkerError> {
    for file in staged {
        let descriptor = ctx.descriptor(
            id,
            "release",
            &guess_mime(&file.path),
            &file.path,
            Some(file.relative.clone()),
        );
        ctx.upload("release file", descriptor).await?;
    }
    info!(count = staged.len(), "uploaded release files");
    Ok(())
}

/// Zips `staged` into `Saved/Archives/<name>` and returns its path.
async fn build_archive<A: WorkerApi>(ctx: &JobContext<'_, A>, name: &str, staged: Vec<StagedFile>) -> Result<PathBuf, WorkerError> {
    let dir = ctx.config.project_dir.join("Saved").join("Archives");
    create_dir(&dir).await?;
    let out = dir.join(name);
    info!(archive = %out.display(), files = staged.len(), "creating release archive");
    let entries: Vec<(PathBuf, String)> = staged.into_iter().map(|f| (f.path, f.relative)).collect();
    let target = out.clone();
    blocking(move || archive::zip_files(&entries, &target)).await?;
    Ok(out)
}

async fn upload_archive<A: WorkerApi>(
    ctx: &JobContext<'_, A>,
    id: Uuid,
    file_type: &str,
    path: &Path,
    name: &str,
) -> Result<(), WorkerError> {
    let descriptor = ctx.descriptor(id, file_type, ARCHIVE_MIME, path, Some(name.to_string()));
    ctx.upload("release archive", descriptor).await
}

pub async fn server<A: WorkerApi>(ctx: &JobContext<'_, A>) -> Result<(), WorkerError> {
    if is_mobile(&ctx.job.platform) {
        return Err(ValidationError::InvalidPlatform {
            platform: ctx.job.platform.clone(),
            target: "server release",
        }
        .into());
    }
    let (id, release) = validate(ctx)?;

    sync_branch(ctx).await?;
    ctx.switch_engine(&ctx.config.ue_version_code).await?;

    let args = commands::release_server(
        &cook_target(ctx, release),
        &release.content_version,
        &staging_root(ctx),
    );
    ctx.run_automation_tool(&args).await?;

    let (_, staged) = staged_files(ctx).await?;
    upload_staged(ctx, id, &staged).await
}

pub async fn client<A: WorkerApi>(ctx: &JobContext<'_, A>) -> Result<(), WorkerError> {
    let (id, release) = validate(ctx)?;

    let tag = release.code_version.clone();
    if tag.is_empty() {
        return Err(ValidationError::InvalidField("release code version").into());
    }
    ctx.git(move |repo| {
        repo.pull()?;
        if let Some(latest) = repo.latest_tag()? {
            info!(latest = %latest, "latest tag");
        }
        repo.checkout_tag(&tag)
    })
    .await?;
    ctx.switch_engine(&ctx.config.ue_version_code).await?;

    let args = commands::release_client(
        &cook_target(ctx, release),
        &release.content_version,
        &staging_root(ctx),
    );
    ctx.run_automation_tool(&args).await?;

    let (_, staged) = staged_files(ctx).await?;
    upload_staged(ctx, id, &staged).await?;

    let name = archive_name(ctx, release, "");
    let archive = build_archive(ctx, &name, staged).await?;
    upload_archive(ctx, id, "release-archive", &archive, &name).await
}

pub async fn sdk<A: WorkerApi>(ctx: &JobContext<'_, A>) -> Result<(), WorkerError> {
    let (id, release) = validate(ctx)?;

    sync_branch(ctx).await?;
    ctx.switch_engine(&ctx.config.ue_version_marketplace).await?;

    ctx.run_automation_tool(&commands::build_editor(&ctx.config.project_name))
        .await?;
    let args = commands::sdk_build(
        &cook_target(ctx, release),
        &release.content_version,
        &staging_root(ctx),
    );
    ctx.run_automation_tool(&args).await?;

    let project_dir = ctx.config.project_dir.clone();
    let project_name = ctx.config.project_name.clone();
    let include_file = project_dir.join(SDK_INCLUDE_FILE);
    let included = blocking(move || files::read_pattern_list(&include_file)).await?;
    if included.is_empty() {
        return Err(WorkerError::Stage(format!(
            "sdk include list {SDK_INCLUDE_FILE} is empty"
        )));
    }
    let staged = blocking(move || files::list_sdk_files(&project_dir, &project_name, &included)).await?;

    let name = archive_name(ctx, release, "-SDK");
    let archive = build_archive(ctx, &name, staged).await?;
    upload_archive(ctx, id, "release-archive-sdk", &archive, &name).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Deployment, Job, JobStatus};
    use crate::config::WorkerConfig;
    use crate::config::tests::test_config;
    use crate::git::GitManager;
    use crate::git::tests::commit_file;
    use crate::job::JobTracker;
    use crate::pipeline::tests::RecordingApi;
    use crate::supervisor::Supervisor;
    use git2::Repository;
    use tokio::sync::Mutex;

    fn release_job(deployment: &str, platform: &str, release: Option<Release>) -> Job {
        Job {
            id: Uuid::new_v4(),
            kind: "Release".into(),
            deployment: deployment.into(),
            platform: platform.into(),
            configuration: "Shipping".into(),
            release,
            ..Default::default()
        }
    }

    fn release(id: Option<Uuid>) -> Release {
        Release {
            id,
            app_name: "Metaverse".into(),
            version: "1.2.0".into(),
            code_version: "1.2.0-code".into(),
            content_version: "7".into(),
            map: "Lobby".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn archive_name_follows_release_coordinates() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let supervisor = Supervisor::new(tmp.path());
        let api = RecordingApi::default();
        let job = release_job("SDK", "Win64", Some(release(Some(Uuid::new_v4()))));
        let tracker = Mutex::new(JobTracker::claimed(job.id));
        let ctx = JobContext::new(&api, &config, &supervisor, &job, Deployment::Sdk, &tracker);

        let r = job.release.as_ref().unwrap();
        assert_eq!(archive_name(&ctx, r, ""), "Metaverse-1.2.0-SDK-Shipping-Win64.zip");
        assert_eq!(archive_name(&ctx, r, "-SDK"), "Metaverse-1.2.0-SDK-Shipping-Win64-SDK.zip");
    }

    #[tokio::test]
    async fn server_release_rejects_mobile_before_touching_git() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let supervisor = Supervisor::new(tmp.path());
        let api = RecordingApi::default();
        let job = release_job("Server", "Android", Some(release(Some(Uuid::new_v4()))));
        let tracker = Mutex::new(JobTracker::claimed(job.id));
        let ctx = JobContext::new(&api, &config, &supervisor, &job, Deployment::Server, &tracker);

        let err = server(&ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "invalid platform Android for server release");
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn nil_release_id_is_invalid() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let supervisor = Supervisor::new(tmp.path());
        let api = RecordingApi::default();
        let job = release_job("Client", "Win64", Some(release(Some(Uuid::nil()))));
        let tracker = Mutex::new(JobTracker::claimed(job.id));
        let ctx = JobContext::new(&api, &config, &supervisor, &job, Deployment::Client, &tracker);

        let err = client(&ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "invalid job release id");
    }

    #[tokio::test]
    async fn client_release_fails_outside_a_repository() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        std::fs::create_dir_all(&config.project_dir).unwrap();
        let supervisor = Supervisor::new(tmp.path());
        let api = RecordingApi::default();
        let job = release_job("Client", "Win64", Some(release(Some(Uuid::new_v4()))));
        let tracker = Mutex::new(JobTracker::claimed(job.id));
        let ctx = JobContext::new(&api, &config, &supervisor, &job, Deployment::Client, &tracker);

        let err = client(&ctx).await.unwrap_err();
        assert!(matches!(err, WorkerError::Git(_)));
        assert!(api.uploads().is_empty());
    }

    #[tokio::test]
    async fn staged_files_honor_project_ignore_list() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let staged = config.project_dir.join("Saved/StagedBuilds/Windows");
        std::fs::create_dir_all(staged.join("Metaverse/Saved/Logs")).unwrap();
        std::fs::write(staged.join("Metaverse.exe"), b"exe").unwrap();
        std::fs::write(staged.join("Metaverse/Saved/Logs/run.log"), b"log").unwrap();
        std::fs::write(config.project_dir.join(RELEASE_IGNORE_FILE), "# logs\nSaved/Logs\n").unwrap();

        let supervisor = Supervisor::new(tmp.path());
        let api = RecordingApi::default();
        let job = release_job("Client", "Win64", Some(release(Some(Uuid::new_v4()))));
        let tracker = Mutex::new(JobTracker::claimed(job.id));
        let ctx = JobContext::new(&api, &config, &supervisor, &job, Deployment::Client, &tracker);

        let (dir, files) = staged_files(&ctx).await.unwrap();
        assert_eq!(dir, staged);
        let names: Vec<_> = files.iter().map(|f| f.relative.as_str()).collect();
        assert_eq!(names, vec!["Metaverse.exe"]);
    }

    /// Clones a fresh origin into the project directory. The origin carries
    /// the branch of `Shipping` builds and the client code tag.
    fn project_checkout(project_dir: &Path) {
        let origin_path = project_dir.parent().unwrap().join("origin");
        let origin = Repository::init(&origin_path).unwrap();
        let head = commit_file(&origin, "Metaverse.uproject", "{}", 1_700_000_000);
        let commit = origin.find_commit(head).unwrap();
        origin
            .branch(&git::release_branch("Shipping").unwrap(), &commit, false)
            .unwrap();
        origin
            .tag_lightweight("1.2.0-code", commit.as_object(), false)
            .unwrap();
        std::fs::create_dir_all(project_dir).unwrap();
        Repository::clone(origin_path.to_str().unwrap(), project_dir).unwrap();
    }

    #[cfg(unix)]
    fn fake_tools(config: &WorkerConfig) {
        use std::os::unix::fs::PermissionsExt;
        let scripts = [
            (
                &config.tools.automation_tool,
                "echo 'LogCook: Display: cooking'\necho 'AutomationTool exiting with ExitCode=0 (Success)'\n",
            ),
            (&config.tools.version_selector, "exit 0\n"),
        ];
        for (path, body) in scripts {
            std::fs::write(path, format!("#!/bin/sh\n{body}")).unwrap();
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
    }

    fn stage(dir: &Path, files: &[&str]) {
        for rel in files {
            let p = dir.join(rel);
            std::fs::create_dir_all(p.parent().unwrap()).unwrap();
            std::fs::write(p, rel).unwrap();
        }
    }

    fn zip_entries(path: &Path) -> Vec<String> {
        let file = std::fs::File::open(path).unwrap();
        let mut zip = zip::ZipArchive::new(file).unwrap();
        let mut names: Vec<_> = (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_string())
            .collect();
        names.sort();
        names
    }

    fn processing(job: &Job) -> Mutex<JobTracker> {
        let mut tracker = JobTracker::claimed(job.id);
        tracker.advance(JobStatus::Processing);
        Mutex::new(tracker)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn server_release_uploads_every_staged_file() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        project_checkout(&config.project_dir);
        fake_tools(&config);
        let staged = config.project_dir.join("Saved/StagedBuilds/WindowsServer");
        stage(
            &staged,
            &["Metaverse/Binaries/Win64/MetaverseServer.exe", "Metaverse/Content/Paks/pakchunk0.pak", "README.txt"],
        );

        let supervisor = Supervisor::new(tmp.path());
        let api = RecordingApi::default();
        let release_id = Uuid::new_v4();
        let job = release_job("Server", "Win64", Some(release(Some(release_id))));
        let tracker = processing(&job);
        let ctx = JobContext::new(&api, &config, &supervisor, &job, Deployment::Server, &tracker);

        server(&ctx).await.unwrap();

        let repo = GitManager::open(&config.project_dir).unwrap();
        assert_eq!(repo.current_branch().unwrap(), git::release_branch("Shipping").unwrap());

        let uploads = api.uploads();
        let paths: Vec<_> = uploads.iter().map(|u| u.original_path.clone().unwrap()).collect();
        assert_eq!(
            paths,
            vec![
                "Metaverse/Binaries/Win64/MetaverseServer.exe",
                "Metaverse/Content/Paks/pakchunk0.pak",
                "README.txt",
            ]
        );
        for upload in &uploads {
            assert_eq!(upload.file_type, "release");
            assert_eq!(upload.target_id, release_id);
            assert_eq!(upload.deployment.as_deref(), Some("Server"));
            assert_eq!(upload.platform.as_deref(), Some("Win64"));
            assert_eq!(
                upload.source_path,
                staged.join(upload.original_path.as_deref().unwrap())
            );
        }
        assert_eq!(uploads[2].mime, "text/plain");
        assert_eq!(api.statuses(), vec![(JobStatus::Uploading, String::new())]);
        assert_eq!(tracker.lock().await.status(), JobStatus::Uploading);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn client_release_uploads_files_then_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        project_checkout(&config.project_dir);
        fake_tools(&config);
        let staged = config.project_dir.join("Saved/StagedBuilds/Windows");
        stage(&staged, &["Metaverse.exe", "Metaverse/Content/Paks/pakchunk0.pak"]);

        let supervisor = Supervisor::new(tmp.path());
        let api = RecordingApi::default();
        let release_id = Uuid::new_v4();
        let job = release_job("Client", "Win64", Some(release(Some(release_id))));
        let tracker = processing(&job);
        let ctx = JobContext::new(&api, &config, &supervisor, &job, Deployment::Client, &tracker);

        client(&ctx).await.unwrap();

        let head = Repository::open(&config.project_dir).unwrap();
        assert!(head.head_detached().unwrap());

        let uploads = api.uploads();
        assert_eq!(uploads.len(), 3);
        let files: Vec<_> = uploads[..2]
            .iter()
            .map(|u| (u.file_type.as_str(), u.original_path.as_deref().unwrap()))
            .collect();
        assert_eq!(
            files,
            vec![
                ("release", "Metaverse.exe"),
                ("release", "Metaverse/Content/Paks/pakchunk0.pak"),
            ]
        );

        let archive = &uploads[2];
        let name = "Metaverse-1.2.0-Client-Shipping-Win64.zip";
        assert_eq!(archive.file_type, "release-archive");
        assert_eq!(archive.mime, "application/zip");
        assert_eq!(archive.target_id, release_id);
        assert_eq!(archive.original_path.as_deref(), Some(name));
        assert_eq!(archive.source_path, config.project_dir.join("Saved/Archives").join(name));
        assert_eq!(
            zip_entries(&archive.source_path),
            vec!["Metaverse.exe", "Metaverse/Content/Paks/pakchunk0.pak"]
        );
        assert_eq!(api.statuses(), vec![(JobStatus::Uploading, String::new())]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn sdk_release_archives_included_project_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = test_config(tmp.path());
        config.project_dir = tmp.path().join("UnrealEngine/Metaverse");
        project_checkout(&config.project_dir);
        fake_tools(&config);
        std::fs::write(
            config.project_dir.join(SDK_INCLUDE_FILE),
            "# sdk content\nContent/SDK\nConfig/DefaultGame.ini\n",
        )
        .unwrap();
        stage(
            &config.project_dir,
            &["Content/SDK/Widgets/Button.uasset", "Content/Maps/Lobby.umap", "Config/DefaultGame.ini"],
        );

        let supervisor = Supervisor::new(tmp.path());
        let api = RecordingApi::default();
        let release_id = Uuid::new_v4();
        let job = release_job("SDK", "Win64", Some(release(Some(release_id))));
        let tracker = processing(&job);
        let ctx = JobContext::new(&api, &config, &supervisor, &job, Deployment::Sdk, &tracker);

        sdk(&ctx).await.unwrap();

        let uploads = api.uploads();
        assert_eq!(uploads.len(), 1);
        let name = "Metaverse-1.2.0-SDK-Shipping-Win64-SDK.zip";
        assert_eq!(uploads[0].file_type, "release-archive-sdk");
        assert_eq!(uploads[0].mime, "application/zip");
        assert_eq!(uploads[0].original_path.as_deref(), Some(name));
        assert_eq!(
            zip_entries(&uploads[0].source_path),
            vec!["Config/DefaultGame.ini", "Content/SDK/Widgets/Button.uasset"]
        );
        assert_eq!(api.statuses(), vec![(JobStatus::Uploading, String::new())]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn sdk_release_requires_an_include_list() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = test_config(tmp.path());
        config.project_dir = tmp.path().join("UnrealEngine/Metaverse");
        project_checkout(&config.project_dir);
        fake_tools(&config);

        let supervisor = Supervisor::new(tmp.path());
        let api = RecordingApi::default();
        let job = release_job("SDK", "Win64", Some(release(Some(Uuid::new_v4()))));
        let tracker = processing(&job);
        let ctx = JobContext::new(&api, &config, &supervisor, &job, Deployment::Sdk, &tracker);

        let err = sdk(&ctx).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("sdk include list {SDK_INCLUDE_FILE} is empty")
        );
        assert!(api.uploads().is_empty());
    }
}

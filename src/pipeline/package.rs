//! DLC package builds: fetch the plugin, cook it, upload the pak.

use std::path::PathBuf;

use tracing::info;
use uuid::Uuid;

use super::commands::{self, CookTarget};
use super::platform::{is_mobile, package_pak_path};
use super::{JobContext, create_dir};
use crate::api::{Package, WorkerApi};
use crate::error::{ValidationError, WorkerError};

const PAK_MIME: &str = "application/octet-stream";

/// A validated package job: payload present with an id, a name and input files.
struct PackageJob<'a> {
    id: Uuid,
    package: &'a Package,
}

fn validate<'a, A: WorkerApi>(ctx: &JobContext<'a, A>) -> Result<PackageJob<'a>, WorkerError> {
    let package = ctx
        .job
        .package
        .as_ref()
        .ok_or(ValidationError::MissingPayload("package"))?;
    let id = package
        .id
        .filter(|id| !id.is_nil())
        .ok_or(ValidationError::InvalidField("package id"))?;
    if package.name.is_empty() {
        return Err(ValidationError::InvalidField("package name").into());
    }
    if ctx.job.files.is_empty() {
        return Err(WorkerError::Stage("job package has no files".into()));
    }
    Ok(PackageJob { id, package })
}

/// Downloads the plugin descriptor and content archive into
/// `Plugins/<name>` and unpacks the content.
async fn fetch_plugin<A: WorkerApi>(ctx: &JobContext<'_, A>, job: &PackageJob<'_>) -> Result<(), WorkerError> {
    let plugin_dir = ctx.config.project_dir.join("Plugins").join(&job.package.name);
    let content_dir = plugin_dir.join("Content");
    create_dir(&content_dir).await?;

    let descriptor = ctx
        .job
        .files_of_type("uplugin")
        .next()
        .ok_or_else(|| ValidationError::MissingInput("plugin descriptor (uplugin)".into()))?;
    let content = ctx
        .job
        .files_of_type("uplugin_content")
        .next()
        .ok_or_else(|| ValidationError::MissingInput("plugin content zip (uplugin_content)".into()))?;

    let descriptor_path = plugin_dir.join(format!("{}.uplugin", job.package.name));
    ctx.download(descriptor, &descriptor_path).await?;

    let zip_path = plugin_dir.join(format!("{}.zip", job.id));
    ctx.download(content, &zip_path).await?;

    info!(zip = %zip_path.display(), dest = %content_dir.display(), "unzipping plugin content");
    let extracted = ctx.unzip(&zip_path, &content_dir).await?;
    info!(files = extracted, "plugin content ready");
    Ok(())
}

fn pak_path<A: WorkerApi>(ctx: &JobContext<'_, A>, job: &PackageJob<'_>) -> PathBuf {
    package_pak_path(
        &ctx.config.project_dir,
        &ctx.config.project_name,
        &job.package.name,
        &ctx.job.platform,
        ctx.deployment,
    )
}

fn cook_target<'a, A: WorkerApi>(ctx: &'a JobContext<'_, A>, package: &'a Package) -> CookTarget<'a> {
    CookTarget {
        project: &ctx.config.project_name,
        configuration: &ctx.job.configuration,
        editor: &ctx.config.tools.editor,
        platform: &ctx.job.platform,
        map: &package.map,
    }
}

async fn upload_pak<A: WorkerApi>(ctx: &JobContext<'_, A>, job: &PackageJob<'_>) -> Result<(), WorkerError> {
    let pak = pak_path(ctx, job);
    let descriptor = ctx.descriptor(job.id, "pak", PAK_MIME, pak, None);
    ctx.upload("package", descriptor).await
}

pub async fn client<A: WorkerApi>(ctx: &JobContext<'_, A>) -> Result<(), WorkerError> {
    let job = validate(ctx)?;
    fetch_plugin(ctx, &job).await?;

    let args = commands::package_client(
        &cook_target(ctx, job.package),
        &job.package.name,
        &job.package.release,
    );
    ctx.run_automation_tool(&args).await?;

    upload_pak(ctx, &job).await
}

pub async fn server<A: WorkerApi>(ctx: &JobContext<'_, A>) -> Result<(), WorkerError> {
    if is_mobile(&ctx.job.platform) {
        return Err(ValidationError::InvalidPlatform {
            platform: ctx.job.platform.clone(),
            target: "server package",
        }
        .into());
    }
    let job = validate(ctx)?;
    fetch_plugin(ctx, &job).await?;

    ctx.switch_engine(&ctx.config.ue_version_code).await?;

    let args = commands::package_server(
        &cook_target(ctx, job.package),
        &job.package.name,
        &job.package.release,
    );
    ctx.run_automation_tool(&args).await?;

    upload_pak(ctx, &job).await
}

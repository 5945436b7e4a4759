//! Branded launcher builds with Wails.

use std::path::Path;

use tracing::{debug, info};

use super::commands;
use super::{JobContext, create_dir};
use crate::api::{FileDescriptor, WorkerApi};
use crate::error::{ValidationError, WorkerError};
use crate::supervisor::ToolProfile;

const ICON_FILE_TYPE: &str = "image-app-icon";

fn launcher_mime() -> &'static str {
    if cfg!(windows) {
        "application/vnd.microsoft.portable-executable"
    } else {
        "application/octet-stream"
    }
}

fn icon<'a>(files: &'a [FileDescriptor], mime: &str) -> Option<&'a FileDescriptor> {
    files
        .iter()
        .find(|f| f.file_type == ICON_FILE_TYPE && f.mime.as_deref() == Some(mime))
}

pub async fn client<A: WorkerApi>(ctx: &JobContext<'_, A>) -> Result<(), WorkerError> {
    let app = ctx
        .job
        .app
        .as_ref()
        .ok_or(ValidationError::MissingPayload("app"))?;
    let app_id = app
        .id
        .filter(|id| !id.is_nil())
        .ok_or(ValidationError::InvalidField("app id"))?;
    if app.name.is_empty() {
        return Err(ValidationError::InvalidField("app name").into());
    }
    if ctx.job.files.is_empty() {
        return Err(WorkerError::Stage(
            "job app has no files, must have app-icons (image/png and image/x-icon)".into(),
        ));
    }

    let launcher_dir = &ctx.config.launcher_dir;
    let build_dir = launcher_dir.join("build");
    let bin_dir = build_dir.join("bin");
    create_dir(&build_dir.join("windows")).await?;

    let png = icon(&ctx.job.files, "image/png");
    let ico = icon(&ctx.job.files, "image/x-icon");
    let (Some(png), Some(ico)) = (png, ico) else {
        return Err(WorkerError::Stage(format!(
            "app icon is missing: png={}, ico={}",
            png.is_some(),
            ico.is_some()
        )));
    };
    ctx.download(png, &build_dir.join("appicon.png")).await?;
    ctx.download(ico, &build_dir.join("windows").join("icon.ico")).await?;

    let (args, binary) = commands::wails_build(
        &ctx.job.platform,
        &app_id.to_string(),
        &app.name,
        &ctx.job.configuration,
    )
    .ok_or_else(|| ValidationError::UnsupportedJobKind {
        field: "platform",
        value: ctx.job.platform.clone(),
    })?;

    let profile = ToolProfile::wails(ctx.markers());
    ctx.run_tool(&profile, &ctx.config.tools.wails, &args, Some(launcher_dir.as_path()))
        .await?;

    let out = bin_dir.join(&binary);
    if cfg!(windows) {
        sign(ctx, &out, &bin_dir).await?;
    }

    if !tokio::fs::try_exists(&out).await.unwrap_or(false) {
        return Err(WorkerError::Stage(format!(
            "no result launcher binary found at {}",
            out.display()
        )));
    }

    let descriptor = ctx.descriptor(app_id, "app-launcher", launcher_mime(), &out, Some(binary));
    ctx.upload("launcher", descriptor).await
}

/// Signs `target` twice: sha1, then an appended sha256 signature.
async fn sign<A: WorkerApi>(ctx: &JobContext<'_, A>, target: &Path, bin_dir: &Path) -> Result<(), WorkerError> {
    let (Some(signing), Some(sign_tool)) = (&ctx.config.signing, &ctx.config.tools.sign_tool) else {
        debug!("signing not configured, skipping");
        return Ok(());
    };
    let profile = ToolProfile::sign_tool();
    for sha256 in [false, true] {
        let args = commands::sign(&signing.cert_file, &signing.cert_password, target, sha256);
        ctx.run_tool(&profile, sign_tool, &args, Some(bin_dir)).await?;
    }
    info!(binary = %target.display(), "launcher signed");
    Ok(())
}

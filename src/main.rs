mod api;
mod archive;
mod cli;
mod config;
mod error;
mod git;
mod job;
mod logging;
mod pipeline;
mod supervisor;
mod ui;
mod upload;

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;

use api::ApiClient;
use cli::{Cli, Command};
use config::WorkerConfig;
use git::GitManager;
use job::Controller;
use logging::LogFormat;
use supervisor::{Markers, classify_log};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.subcommand() {
        Command::Run => run(&cli).await,
        Command::Release => release(&cli).await,
        Command::Classify { log, exit_code } => classify(&log, exit_code),
    }
}

fn load_config(cli: &Cli) -> Result<WorkerConfig> {
    let config = WorkerConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    logging::init(&config.log_level, LogFormat::parse(&config.log_format), cli.verbose);
    Ok(config)
}

async fn connect(config: &WorkerConfig) -> Result<ApiClient> {
    let credentials = config.resolve_credentials()?;
    let mut api = ApiClient::new(&config.api_url, config.upload_chunk_size)?;
    api.login(&credentials).await.context("failed to log in")?;
    Ok(api)
}

async fn run(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    config.validate_for_run()?;
    info!(version = env!("CARGO_PKG_VERSION"), api = %config.api_url, "starting worker");

    let api = connect(&config).await?;
    let mut controller = Controller::new(api, config);
    controller.run_forever().await;
    Ok(())
}

async fn release(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let api = connect(&config).await?;

    let project_dir = config.project_dir.clone();
    let ssh_key = config.ssh_key_path.clone();
    let tag = tokio::task::spawn_blocking(move || {
        GitManager::open(&project_dir)?
            .with_ssh_key(ssh_key)
            .latest_tag()
    })
    .await?
    .context("failed to read repository tags")?;

    let Some(code_version) = tag else {
        bail!("no tags found in {}", config.project_dir.display());
    };
    api.push_code_release(&code_version, &config.content_version)
        .await
        .context("failed to push code release")?;
    ui::print_code_release(&code_version, &config.content_version);
    Ok(())
}

fn classify(log: &Path, exit_code: i32) -> Result<()> {
    let file = File::open(log).with_context(|| format!("failed to open {}", log.display()))?;
    let result = classify_log(BufReader::new(file), &Markers::default(), exit_code)?;
    print!("{}", ui::render_classification(&result));
    Ok(())
}

//! Mode runners.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use imgrot_channel::{RotationClient, RotationServer};
use imgrot_jobs::{FileAuditLog, LocalPool};
use imgrot_transform::{Angle, PngCodec};

use crate::cli::Command;
use crate::config::Config;

pub async fn run(command: Command, config: Config) -> anyhow::Result<()> {
    match command {
        Command::Local {
            input_dir,
            output_dir,
            workers,
            angle,
        } => {
            let audit = open_audit_log(&config.log_file)?;
            let pool = LocalPool::new(
                input_dir,
                output_dir,
                workers,
                Arc::new(PngCodec),
                Arc::new(audit),
            );
            let report = pool.rotate_directory(angle).await?;
            tracing::info!(processed = report.processed, failed = report.failed, "done");
            if report.failed > 0 {
                bail!("{} of {} jobs failed", report.failed, report.processed + report.failed);
            }
            Ok(())
        }
        Command::Serve => serve(&config).await,
        Command::Client {
            input_dir,
            output_dir,
            angle,
        } => client(&config, input_dir.as_path(), output_dir.as_path(), angle).await,
    }
}

async fn serve(config: &Config) -> anyhow::Result<()> {
    let server_config = config.server_config();
    let bind_addr = server_config.bind_addr;
    let server = RotationServer::bind(server_config, Arc::new(PngCodec))
        .await
        .with_context(|| format!("binding {bind_addr}"))?;

    let runner = Arc::clone(&server);
    let mut run = tokio::spawn(async move { runner.run().await });

    tokio::select! {
        result = &mut run => return Ok(result??),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("SIGINT received, shutting down");
            server.shutdown();
        }
    }

    run.await??;
    tracing::info!("server shut down cleanly");
    Ok(())
}

async fn client(
    config: &Config,
    input_dir: &Path,
    output_dir: &Path,
    angle: Angle,
) -> anyhow::Result<()> {
    let audit = open_audit_log(&config.log_file)?;
    let client_config = config.client_config();
    let server_addr = client_config.server_addr;

    let client = RotationClient::new(
        client_config,
        input_dir.to_path_buf(),
        output_dir.to_path_buf(),
        Arc::new(audit),
    );
    let report = client
        .rotate_directory(angle)
        .await
        .with_context(|| format!("rotating via {server_addr}"))?;

    if !report.is_clean() {
        bail!(
            "{} jobs failed, {} not processed",
            report.failed,
            report.unprocessed
        );
    }
    Ok(())
}

fn open_audit_log(path: &Path) -> anyhow::Result<FileAuditLog> {
    FileAuditLog::create(path).with_context(|| format!("creating log file {}", path.display()))
}

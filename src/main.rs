mod cli;

use std::io::Read;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use kgraph_core::bootstrap::resolve_config_path;
use kgraph_core::service::SyncRequest;
use kgraph_core::{Config, GraphService, ServiceError};
use serde::Serialize;

use crate::cli::{Cli, Command};

/// `EX_TEMPFAIL`: the graph store is unreachable, retry later.
const EXIT_UNAVAILABLE: u8 = 75;

#[tokio::main]
async fn main() -> ExitCode {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            let unavailable = e
                .downcast_ref::<ServiceError>()
                .is_some_and(ServiceError::is_unavailable);
            if unavailable {
                ExitCode::from(EXIT_UNAVAILABLE)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = resolve_config_path(cli.config);
    let config = Config::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let service = GraphService::open(&config).await?;

    let outcome = dispatch(&service, cli.command).await;
    service.shutdown().await;
    outcome
}

async fn dispatch(service: &GraphService, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Sync { request } => {
            let request = read_request(&request)?;
            print_json(&service.sync(&request).await?)
        }
        Command::Ask {
            question,
            workspace,
        } => {
            let request = kgraph_core::service::RagRequest {
                question,
                workspace_id: workspace,
            };
            print_json(&service.ask(&request).await?)
        }
        Command::Manifest { workspace } => print_json(&service.manifest(&workspace).await?),
        Command::Cat { workspace, path } => {
            print_json(&service.file_content(&workspace, &path).await)
        }
        Command::Status { workspace } => print_json(&service.status(workspace.as_deref()).await?),
        Command::Reset { all: true, .. } => {
            service.reset_all().await?;
            print_json(&serde_json::json!({ "success": true }))
        }
        Command::Reset {
            workspace: Some(workspace),
            ..
        } => print_json(&service.reset_workspace(&workspace).await?),
        Command::Reset { .. } => anyhow::bail!("reset needs --all or --workspace"),
    }
}

fn read_request(source: &str) -> anyhow::Result<SyncRequest> {
    let raw = if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read request from stdin")?;
        buf
    } else {
        std::fs::read_to_string(source).with_context(|| format!("failed to read {source}"))?
    };
    serde_json::from_str(&raw).context("invalid sync request")
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

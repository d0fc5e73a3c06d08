//! `parley` command-line entry point.

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::{debug, error, info};
use parley::config::{LayeredConfigOptions, ParleyConfig};
use parley::core::{
    FileSnapshotStore, OpenAiCompletion, Orchestrator, SnapshotStore, resolve_snapshot_path,
};
use parley::providers::{McpConnector, ProviderRegistry};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

/// Command-line options for the Parley server.
#[derive(Parser)]
#[command(name = "parley", version, about = "Session and provider orchestration engine")]
struct Cli {
    /// Extra parley.json5 files applied after the discovered layers
    #[arg(long, global = true)]
    config: Vec<PathBuf>,
    /// `mcpServers`-style provider files merged into `providers`
    #[arg(long, global = true)]
    providers_file: Vec<PathBuf>,
    /// Directory used to discover project and cwd config layers
    #[arg(long, global = true)]
    cwd: Option<PathBuf>,
    /// Default log filter when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Restore sessions, connect providers, and serve HTTP + websocket clients
    Serve {
        #[arg(long)]
        address: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the effective configuration as JSON
    CheckConfig,
    /// Print session counts from the snapshot file
    SnapshotInfo {
        /// Snapshot file to inspect instead of the configured one
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    parley::init_logging(&cli.log_level);

    let config = load_config(&cli)?;
    match cli.command.unwrap_or(Command::Serve {
        address: None,
        port: None,
    }) {
        Command::Serve { address, port } => serve(config, address, port).await,
        Command::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Command::SnapshotInfo { path } => snapshot_info(&config, path),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<ParleyConfig> {
    let cwd = match &cli.cwd {
        Some(cwd) => cwd.clone(),
        None => std::env::current_dir().context("failed to resolve current working directory")?,
    };
    info!("loading layered config from cwd: {}", cwd.display());
    let mut options = LayeredConfigOptions::new(&cwd);
    for path in &cli.providers_file {
        options = options.with_provider_file(path);
    }
    for path in &cli.config {
        options = options.with_runtime_path(path);
    }
    let layered = ParleyConfig::load_layered_with_options(options)
        .context("failed to load layered config")?;
    debug!("layered config loaded (layers={})", layered.layers.len());
    Ok(layered.config)
}

async fn serve(
    mut config: ParleyConfig,
    address: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    if let Some(address) = address {
        config.server.address = address;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    info!(
        "starting parley (providers={}, max_sessions={}, persist={})",
        config.enabled_providers().count(),
        config.sessions.max_sessions,
        config.sessions.persist
    );

    let registry = ProviderRegistry::from_config(&config, Arc::new(McpConnector::default()));
    let completion = Arc::new(
        OpenAiCompletion::from_config(&config.completion)
            .context("failed to build completion backend")?,
    );
    let server = config.server.clone();
    let orchestrator = Arc::new(
        Orchestrator::new(config, registry, completion, None, None)
            .context("failed to restore session snapshot")?,
    );
    orchestrator.start().await;

    let launched = parley::server::build_rocket(orchestrator.clone(), &server)
        .launch()
        .await;
    if let Err(err) = orchestrator.shutdown().await {
        error!("final snapshot failed (err={})", err);
    }
    if let Err(err) = launched {
        anyhow::bail!("http server failed: {err}");
    }
    info!("parley stopped");
    Ok(())
}

fn snapshot_info(config: &ParleyConfig, path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = match path {
        Some(path) => path,
        None => resolve_snapshot_path(config.sessions.snapshot_path.as_deref())?,
    };
    let store = FileSnapshotStore::new(&path);
    let report = match store.load().context("failed to read snapshot")? {
        Some(snapshot) => json!({
            "path": store.location(),
            "version": snapshot.version,
            "saved_at": snapshot.saved_at,
            "sessions": snapshot.sessions.len(),
            "messages": snapshot.message_count(),
        }),
        None => json!({
            "path": store.location(),
            "sessions": 0,
            "messages": 0,
        }),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command};
    use clap::Parser;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    #[test]
    fn serve_flags_parse() {
        let cli = Cli::parse_from([
            "parley",
            "--config",
            "a.json5",
            "--config",
            "b.json5",
            "serve",
            "--port",
            "9000",
        ]);
        assert_eq!(
            cli.config,
            vec![PathBuf::from("a.json5"), PathBuf::from("b.json5")]
        );
        assert_eq!(cli.log_level, "info");
        match cli.command {
            Some(Command::Serve { address, port }) => {
                assert_eq!(address, None);
                assert_eq!(port, Some(9000));
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn bare_invocation_defaults_to_serve() {
        let cli = Cli::parse_from(["parley", "--log-level", "debug"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, "debug");
    }
}

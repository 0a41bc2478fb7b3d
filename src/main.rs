use anyhow::Context;
use clap::Parser;

use vpn_sim::config::settings::{Command, ServerArgs};
use vpn_sim::config::ServerConfig;
use vpn_sim::storage::LogStore;
use vpn_sim::utils::logging::{init_file_logging, init_logging};
use vpn_sim::VpnSimServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = ServerArgs::parse();
    let config = ServerConfig::from_args(&args).context("Invalid configuration")?;

    // Held until exit so buffered file logs are flushed
    let _log_guard = match &config.log_file {
        Some(path) => Some(init_file_logging(&config.log_level, path)?),
        None => {
            init_logging(&config.log_level)?;
            None
        }
    };

    if let Some(Command::Logs { query }) = &args.command {
        let store = LogStore::open(&config.database_path)
            .with_context(|| format!("Failed to open log database {:?}", config.database_path))?;
        tracing::debug!("Querying logs in {}", store.path().display());
        let rows = store.run_query(query)?;
        tracing::info!("Query returned {} rows", rows.len());
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    tracing::info!("Starting simulated VPN server");
    tracing::info!("Server version: {}", env!("CARGO_PKG_VERSION"));

    let server = VpnSimServer::new(config)?;
    let accept_loop = server.start().await?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            tracing::info!("Shutdown signal received");
        }
        result = accept_loop => {
            if let Err(e) = result {
                tracing::error!("Accept loop terminated: {}", e);
            }
        }
    }

    server.shutdown().await?;
    Ok(())
}

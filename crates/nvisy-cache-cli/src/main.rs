#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod command;
mod config;

use std::process;

use anyhow::Context;
use nvisy_cache::CacheClient;

use crate::config::Cli;

// Tracing target constants
pub const TRACING_TARGET_STARTUP: &str = "nvisy_cache_cli::startup";
pub const TRACING_TARGET_SHUTDOWN: &str = "nvisy_cache_cli::shutdown";
pub const TRACING_TARGET_CONFIG: &str = "nvisy_cache_cli::config";
pub const TRACING_TARGET_COMMAND: &str = "nvisy_cache_cli::command";

#[tokio::main]
async fn main() {
    let Err(error) = run().await else {
        tracing::debug!(
            target: TRACING_TARGET_SHUTDOWN,
            "command completed successfully"
        );
        process::exit(0);
    };

    if tracing::enabled!(tracing::Level::ERROR) {
        tracing::error!(
            target: TRACING_TARGET_SHUTDOWN,
            error = %error,
            "command terminated with error"
        );
    } else {
        eprintln!("Error: {error:#}");
    }

    process::exit(1);
}

/// Main application entry point.
async fn run() -> anyhow::Result<()> {
    let cli = Cli::init();

    Cli::init_tracing();
    cli.log();
    cli.validate()?;

    let client = CacheClient::connect(cli.cache.clone())
        .await
        .context("failed to connect to cache servers")?;

    // Close before reporting so the connection is flushed either way.
    let outcome = cli.command.execute(&client, cli.ttl()).await;
    client.close().await;

    let output = outcome?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

//! CLI configuration management.
//!
//! ```text
//! Cli
//! ├── cache: CacheConfig   # Servers, prefix, bucket, timeouts, credentials
//! ├── ttl_secs             # Expiry applied to writes
//! └── command: Command     # The cache operation to run
//! ```
//!
//! All cache settings can be provided via CLI arguments or environment variables.
//! Use `--help` to see all available options.
//!
//! # Example
//!
//! ```bash
//! nvisy-cache --cache-servers nats://localhost:4222 set greeting '"hello"'
//!
//! # Or via environment variables
//! CACHE_SERVERS=nats://localhost:4222 CACHE_KEY_PREFIX=app nvisy-cache incr hits
//! ```

use std::process;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use nvisy_cache::CacheConfig;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::command::Command;
use crate::{TRACING_TARGET_CONFIG, TRACING_TARGET_STARTUP};

const DEFAULT_LOG_FILTER: &str = "info";

/// Complete CLI configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "nvisy-cache")]
#[command(about = "Inspect and modify cache entries")]
#[command(version)]
pub struct Cli {
    /// Cache client configuration.
    #[clap(flatten)]
    pub cache: CacheConfig,

    /// Expiry for written entries in seconds (0 = never expires)
    #[arg(long = "ttl", env = "CACHE_TTL_SECS", global = true)]
    pub ttl_secs: Option<u64>,

    /// Operation to run.
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Loads environment variables from .env file (if enabled) and parses CLI arguments.
    ///
    /// The .env file is loaded before clap parses arguments so its variables
    /// can serve as defaults.
    pub fn init() -> Self {
        Self::load_dotenv();
        Self::parse()
    }

    /// Loads environment variables from .env file if the dotenv feature is enabled.
    #[cfg(feature = "dotenv")]
    fn load_dotenv() {
        if let Err(err) = dotenvy::dotenv()
            && !err.not_found()
        {
            eprintln!("Warning: failed to load .env file: {err}");
        }
    }

    /// No-op when dotenv feature is disabled.
    #[cfg(not(feature = "dotenv"))]
    fn load_dotenv() {}

    /// Initializes tracing with environment-based filtering.
    ///
    /// Installs the process-wide subscriber; call once, before any other work.
    pub fn init_tracing() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| Self::default_filter());

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    /// Filter used when `RUST_LOG` is not set.
    fn default_filter() -> EnvFilter {
        EnvFilter::new(DEFAULT_LOG_FILTER)
    }

    /// Returns the expiry to apply to writes.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }

    /// Validates all configuration values.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.cache
            .validate()
            .context("invalid cache configuration")?;
        Ok(())
    }

    /// Logs configuration at debug level (no sensitive information).
    pub fn log(&self) {
        tracing::debug!(
            target: TRACING_TARGET_STARTUP,
            version = env!("CARGO_PKG_VERSION"),
            pid = process::id(),
            arch = std::env::consts::ARCH,
            os = std::env::consts::OS,
            features = ?Self::enabled_features(),
            "Build information"
        );

        tracing::debug!(
            target: TRACING_TARGET_CONFIG,
            servers = ?self.cache.servers(),
            key_prefix = ?self.cache.key_prefix(),
            bucket = %self.cache.bucket(),
            operation_timeout_ms = self.cache.operation_timeout().as_millis(),
            failure_mode = %self.cache.cache_failure_mode,
            protocol = %self.cache.cache_protocol,
            has_credentials = self.cache.credentials().is_some(),
            ttl_secs = ?self.ttl_secs,
            "Cache configuration"
        );
    }

    /// Returns a list of enabled compile-time features.
    fn enabled_features() -> Vec<&'static str> {
        [cfg!(feature = "dotenv").then_some("dotenv")]
            .into_iter()
            .flatten()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_filter_is_info() {
        assert_eq!(Cli::default_filter().to_string(), "info");
    }

    #[test]
    fn test_parse_with_ttl() {
        let cli = Cli::try_parse_from([
            "nvisy-cache",
            "--cache-servers",
            "nats://localhost:4222",
            "--cache-key-prefix",
            "app",
            "set",
            "greeting",
            "\"hello\"",
            "--ttl",
            "60",
        ])
        .unwrap();

        assert_eq!(cli.ttl(), Some(Duration::from_secs(60)));
        assert_eq!(cli.cache.key_prefix(), Some("app"));
        assert!(cli.validate().is_ok());
        assert!(matches!(cli.command, Command::Set { ref key, .. } if key == "greeting"));
    }

    #[test]
    fn test_rejects_invalid_json_value() {
        let result = Cli::try_parse_from([
            "nvisy-cache",
            "--cache-servers",
            "nats://localhost:4222",
            "set",
            "greeting",
            "not json",
        ]);
        assert!(result.is_err());
    }
}

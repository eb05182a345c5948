//! CLI argument definitions for watchpost-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use watchpost_core::config::WatchpostConfig;
use watchpost_core::error::{ConfigError, WatchpostError};

/// Configuration path used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/watchpost/watchpost.toml";

/// Watchpost security event ingestion daemon.
///
/// Runs the HTTP ingest API, the file and syslog collectors, and the
/// analysis worker, and manages their lifecycles.
#[derive(Parser, Debug)]
#[command(name = "watchpost-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to watchpost.toml configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,
}

impl DaemonCli {
    /// Load the configuration named by `--config` and apply CLI overrides.
    ///
    /// A missing file at the default path falls back to built-in defaults
    /// (still subject to environment overrides). A missing file at an
    /// explicitly given path is an error.
    pub async fn load_config(&self) -> Result<WatchpostConfig> {
        let mut config = match WatchpostConfig::load(&self.config).await {
            Ok(config) => config,
            Err(WatchpostError::Config(ConfigError::FileNotFound { .. }))
                if self.config.as_os_str() == DEFAULT_CONFIG_PATH =>
            {
                let mut config = WatchpostConfig::default();
                config.apply_env_overrides();
                config
            }
            Err(e) => return Err(anyhow::anyhow!("failed to load config: {}", e)),
        };

        if let Some(level) = &self.log_level {
            config.general.log_level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.general.log_format = format.clone();
        }

        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;
        Ok(config)
    }
}

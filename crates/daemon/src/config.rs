//! Daemon configuration
//!
//! Layers, lowest to highest: built-in defaults, TOML file
//! (`~/.cmdvault/config.toml` or `$CMDVAULT_CONFIG`), `CMDVAULT_*` env vars.

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cmdvault_api_rpc::server::{DEFAULT_RPC_HOST, DEFAULT_RPC_PORT};
use cmdvault_core::application::DEFAULT_SUBSCRIBER_CAPACITY;
use cmdvault_infra_system::{DEFAULT_KILL_GRACE, DEFAULT_SHELL};

const ENV_PREFIX: &str = "CMDVAULT";
const CONFIG_PATH_VAR: &str = "CMDVAULT_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "~/.cmdvault/config.toml";
const DEFAULT_DB_PATH: &str = "~/.cmdvault/catalog.db";
const IN_MEMORY_DB: &str = ":memory:";

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    pub db_path: String,
    pub rpc_host: String,
    pub rpc_port: u16,
    /// `pretty` or `json`
    pub log_format: String,
    pub shell: String,
    pub subscriber_capacity: usize,
    pub kill_grace_ms: u64,
}

impl DaemonConfig {
    /// Load from the default locations and the process environment
    pub fn load() -> Result<Self> {
        let (path, required) = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) => (path, true),
            Err(_) => (DEFAULT_CONFIG_PATH.to_string(), false),
        };
        let path = PathBuf::from(shellexpand::tilde(&path).into_owned());
        Self::build(Some((&path, required)), Environment::with_prefix(ENV_PREFIX))
    }

    fn build(file: Option<(&Path, bool)>, env: Environment) -> Result<Self> {
        let mut builder = Config::builder()
            .set_default("db_path", DEFAULT_DB_PATH)?
            .set_default("rpc_host", DEFAULT_RPC_HOST)?
            .set_default("rpc_port", i64::from(DEFAULT_RPC_PORT))?
            .set_default("log_format", "pretty")?
            .set_default("shell", DEFAULT_SHELL)?
            .set_default("subscriber_capacity", DEFAULT_SUBSCRIBER_CAPACITY as i64)?
            .set_default("kill_grace_ms", DEFAULT_KILL_GRACE.as_millis() as i64)?;

        if let Some((path, required)) = file {
            builder = builder.add_source(File::from(path).required(required));
        }

        let config: DaemonConfig = builder
            .add_source(env)
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        Ok(config)
    }

    /// sqlx connection URL for `db_path` (with `~` expanded)
    pub fn database_url(&self) -> String {
        if self.db_path == IN_MEMORY_DB {
            return "sqlite::memory:".to_string();
        }
        format!("sqlite://{}", self.db_file().display())
    }

    /// On-disk database path with `~` expanded
    pub fn db_file(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.db_path).into_owned())
    }

    pub fn is_in_memory(&self) -> bool {
        self.db_path == IN_MEMORY_DB
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

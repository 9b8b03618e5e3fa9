//! CmdVault Daemon - Main Entry Point
//! Command catalog + execution engine behind a JSON-RPC server

mod config;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Import workspace crates
use cmdvault_api_rpc::{RpcServer, RpcServerConfig};
use cmdvault_core::application::{CommandRegistry, LogBroadcaster, ProcessLauncher};
use cmdvault_core::port::id_provider::UuidProvider;
use cmdvault_core::port::time_provider::SystemTimeProvider;
use cmdvault_core::port::{CatalogStore, CommandRunner, IdProvider, TimeProvider};
use cmdvault_infra_sqlite::{create_pool, run_migrations, SqliteCatalogStore};
use cmdvault_infra_system::ShellCommandRunner;

use crate::config::DaemonConfig;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn init_logging(log_format: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("cmdvault=info"))
        .expect("Failed to create env filter");

    match log_format {
        "json" => {
            // Production: JSON structured logging
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            // Development: Pretty formatting with colors
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration, then logging
    let config = DaemonConfig::load()?;
    init_logging(&config.log_format);

    info!("CmdVault daemon v{} starting...", VERSION);

    // 2. Initialize database
    if !config.is_in_memory() {
        if let Some(parent) = config.db_file().parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    info!(db_path = %config.db_path, "Initializing database...");

    let pool = create_pool(&config.database_url())
        .await
        .context("DB pool creation failed")?;
    run_migrations(&pool).await.context("Migration failed")?;

    // 3. Setup dependencies (DI wiring)
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let id_provider: Arc<dyn IdProvider> = Arc::new(UuidProvider);
    let store: Arc<dyn CatalogStore> = Arc::new(SqliteCatalogStore::new(pool.clone()));
    let runner: Arc<dyn CommandRunner> =
        Arc::new(ShellCommandRunner::new(config.shell.clone(), config.kill_grace()));

    let registry = Arc::new(CommandRegistry::new(
        store,
        id_provider.clone(),
        time_provider.clone(),
    ));
    let broadcaster = Arc::new(LogBroadcaster::new(
        time_provider.clone(),
        config.subscriber_capacity,
    ));
    let launcher = Arc::new(ProcessLauncher::new(
        registry.clone(),
        runner,
        broadcaster,
        id_provider,
        time_provider,
    ));

    let commands = registry.count_commands().await?;
    info!(commands, "Catalog loaded");

    // 4. Start JSON-RPC server
    let rpc_config = RpcServerConfig {
        host: config.rpc_host.clone(),
        port: config.rpc_port,
    };
    let (rpc_handle, addr) = RpcServer::new(rpc_config, registry, launcher.clone())
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("RPC server start failed: {}", e))?;

    info!(addr = %addr, "System ready");
    info!("Press Ctrl+C to shutdown");

    // 5. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received. Exiting gracefully...");

    // 6. Graceful shutdown: stop accepting calls, then cancel running commands
    rpc_handle
        .stop()
        .map_err(|e| anyhow::anyhow!("RPC server stop failed: {}", e))?;
    let grace = config.kill_grace() + std::time::Duration::from_secs(2);
    match tokio::time::timeout(grace, launcher.shutdown()).await {
        Ok(stopped) => info!(stopped, "Active executions cancelled"),
        Err(_) => tracing::warn!("Timed out waiting for executions to stop"),
    }
    pool.close().await;

    info!("Shutdown complete.");

    Ok(())
}

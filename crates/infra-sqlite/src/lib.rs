// CmdVault Infrastructure - SQLite Adapter
// Implements: CatalogStore

mod command_store;
mod connection;
mod migration;

pub use command_store::SqliteCatalogStore;
pub use connection::create_pool;
pub use migration::run_migrations;

// Note: sqlx::Error conversion is handled by wrapping in helper functions
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)

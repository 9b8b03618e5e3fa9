// Port Layer - Interfaces for external dependencies

pub mod cancel;
pub mod catalog_store;
pub mod command_runner;
pub mod id_provider; // For deterministic testing
pub mod time_provider;

// Re-exports
pub use cancel::{cancel_channel, CancelSender, CancelToken};
pub use catalog_store::{CatalogStore, CommandFilter, CommandQuery};
pub use command_runner::{CommandRunner, ExecutionError, OutputSink, RunSpec};
pub use id_provider::IdProvider;
pub use time_provider::TimeProvider;

// Application Layer - Use Cases and Business Logic

pub mod broadcaster;
pub mod launcher;
pub mod registry;

// Re-exports
pub use broadcaster::{ExecutionLog, LogBroadcaster, LogSubscription, DEFAULT_SUBSCRIBER_CAPACITY};
pub use launcher::{validate_working_dir, ExecutionHandle, ProcessLauncher};
pub use registry::{AddCommandRequest, CommandRegistry, UpdateCommandRequest};

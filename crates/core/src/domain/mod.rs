// Domain Layer - Pure business logic and entities

pub mod command;
pub mod error;
pub mod execution;

// Re-exports
pub use command::{normalize_tags, split_tags, Command, CommandId, CommandPatch};
pub use error::DomainError;
pub use execution::{
    ExecutionId, ExecutionInfo, ExecutionOutcome, ExecutionState, LogEvent, LogLine,
};

// Execution Domain Model

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::domain::error::{DomainError, Result};

/// Execution ID (UUID v4)
pub type ExecutionId = String;

/// One captured line of subprocess output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    /// Position within the execution, starting at 0
    pub seq: u64,
    pub text: String,
    pub emitted_at: i64, // epoch ms
}

/// Final state of an execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// Process exited on its own
    Finished { exit_code: i32 },
    /// Process could not be spawned, or died without an exit code
    Failed { reason: String },
    /// Process was terminated on request
    Cancelled,
}

impl ExecutionOutcome {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecutionOutcome::Finished { exit_code } => Some(*exit_code),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code() == Some(0)
    }
}

impl std::fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionOutcome::Finished { exit_code } => write!(f, "FINISHED({})", exit_code),
            ExecutionOutcome::Failed { reason } => write!(f, "FAILED({})", reason),
            ExecutionOutcome::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Event delivered to log subscribers
///
/// A stream carries zero or more `Line`s followed by at most one `Terminal`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum LogEvent {
    Line(LogLine),
    Terminal(ExecutionOutcome),
}

impl LogEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LogEvent::Terminal(_))
    }
}

/// Execution lifecycle: Running -> Terminated(outcome), exactly once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ExecutionState {
    Running,
    Terminated { outcome: ExecutionOutcome },
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionState::Terminated { .. })
    }

    pub fn outcome(&self) -> Option<&ExecutionOutcome> {
        match self {
            ExecutionState::Running => None,
            ExecutionState::Terminated { outcome } => Some(outcome),
        }
    }

    /// Transition to a terminal state
    pub fn terminate(&mut self, outcome: ExecutionOutcome) -> Result<()> {
        if let ExecutionState::Terminated { outcome: current } = self {
            return Err(DomainError::InvalidStateTransition {
                from: current.to_string(),
                to: outcome.to_string(),
            });
        }
        *self = ExecutionState::Terminated { outcome };
        Ok(())
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionState::Running => write!(f, "RUNNING"),
            ExecutionState::Terminated { outcome } => write!(f, "{}", outcome),
        }
    }
}

/// Read-only snapshot of an execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionInfo {
    pub execution_id: ExecutionId,
    pub command_name: String,
    pub command_text: String,
    pub working_dir: PathBuf,
    pub started_at: i64, // epoch ms
    pub state: ExecutionState,
}

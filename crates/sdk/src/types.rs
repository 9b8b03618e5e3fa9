//! SDK Types
//!
//! Mirrors the daemon's JSON-RPC wire format. Kept independent of the
//! daemon crates so clients only pull in the SDK.

use serde::{Deserialize, Serialize};

// ============================================================================
// Catalog
// ============================================================================

/// A catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandInfo {
    pub id: String,
    pub name: String,
    pub command_text: String,
    pub description: String,
    pub tags: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddCommandRequest {
    pub name: String,
    pub command_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Comma-separated, normalized by the daemon
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddCommandResponse {
    pub name: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchCommandsRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateCommandRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
}

/// Delete filter; name and tags are ANDed, `all` ignores both
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteCommandsRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    pub all: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CommandsResponse {
    pub commands: Vec<CommandInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CommandResponse {
    pub command: CommandInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct DeleteCommandsResponse {
    pub deleted: u64,
}

// ============================================================================
// Executions
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RunCommandRequest {
    pub name: String,
    pub working_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ExecutionRequest {
    pub execution_id: String,
}

/// Final state of an execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Finished { exit_code: i32 },
    Failed { reason: String },
    Cancelled,
}

impl ExecutionOutcome {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecutionOutcome::Finished { exit_code } => Some(*exit_code),
            _ => None,
        }
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

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ExecutionState {
    Running,
    Terminated { outcome: ExecutionOutcome },
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionState::Running => write!(f, "RUNNING"),
            ExecutionState::Terminated { outcome } => write!(f, "{}", outcome),
        }
    }
}

/// Snapshot of a live execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionInfo {
    pub execution_id: String,
    pub command_name: String,
    pub command_text: String,
    pub working_dir: String,
    pub started_at: i64,
    pub state: ExecutionState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ExecutionResponse {
    pub execution: ExecutionInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ExecutionsResponse {
    pub executions: Vec<ExecutionInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CancelExecutionResponse {
    #[allow(dead_code)]
    pub execution_id: String,
    pub cancelled: bool,
}

// ============================================================================
// Log stream
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub seq: u64,
    pub text: String,
    pub emitted_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum LogEvent {
    Line(LogLine),
    Terminal(ExecutionOutcome),
}

/// One `execution.log` notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogNotification {
    pub execution_id: String,
    pub event: LogEvent,
}

/// Notification as sent by the daemon, including the `started` event that
/// opens a run stream
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WireNotification {
    pub execution_id: String,
    pub event: WireEvent,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub(crate) enum WireEvent {
    Started(ExecutionInfo),
    Line(LogLine),
    Terminal(ExecutionOutcome),
}

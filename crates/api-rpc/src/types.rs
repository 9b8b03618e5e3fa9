//! RPC Request/Response Types
//!
//! Defines the JSON-RPC method parameters and results. Params are always a
//! JSON object; tags travel as the comma-separated string the user typed.

use cmdvault_core::domain::{Command, ExecutionInfo, ExecutionOutcome, LogEvent, LogLine};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: i64 = 50;

fn default_limit() -> i64 {
    DEFAULT_PAGE_SIZE
}

/// command.add.v1 - Add a command to the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddCommandParams {
    pub name: String,
    pub command_text: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddCommandResponse {
    pub name: String,
    pub tags: Vec<String>,
}

/// command.list.v1 - Page through the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListCommandsParams {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

impl Default for ListCommandsParams {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

/// command.search.v1 - Free text and/or tag search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchCommandsParams {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

impl Default for SearchCommandsParams {
    fn default() -> Self {
        Self {
            query: None,
            tags: None,
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandsResponse {
    pub commands: Vec<Command>,
}

/// command.update.v1 - Partial update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateCommandParams {
    pub name: String,
    #[serde(default)]
    pub command_text: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub command: Command,
}

/// command.delete.v1 - Delete by name and/or tags, or everything
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteCommandsParams {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub all: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteCommandsResponse {
    pub deleted: u64,
}

/// command.run.v1 / command.run_follow.v1 - Start a command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCommandParams {
    pub name: String,
    pub working_dir: String,
}

/// execution.status.v1 / execution.cancel.v1 / execution.follow.v1
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionParams {
    pub execution_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResponse {
    pub execution: ExecutionInfo,
}

/// execution.list.v1 - Live executions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionsResponse {
    pub executions: Vec<ExecutionInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelExecutionResponse {
    pub execution_id: String,
    pub cancelled: bool,
}

/// Event carried by a log notification
///
/// `started` opens a `command.run_follow.v1` stream so the caller learns the
/// execution id before any output arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    Started(ExecutionInfo),
    Line(LogLine),
    Terminal(ExecutionOutcome),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Terminal(_))
    }
}

impl From<LogEvent> for StreamEvent {
    fn from(event: LogEvent) -> Self {
        match event {
            LogEvent::Line(line) => StreamEvent::Line(line),
            LogEvent::Terminal(outcome) => StreamEvent::Terminal(outcome),
        }
    }
}

/// Subscription notification payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogNotification {
    pub execution_id: String,
    pub event: StreamEvent,
}

/// Split a comma-separated tag string; `None` or blank gives no tags
pub fn parse_tags(raw: Option<&str>) -> Vec<String> {
    raw.map(cmdvault_core::domain::split_tags)
        .unwrap_or_default()
}

//! CmdVault CLI - Command-line interface for the CmdVault daemon

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cmdvault_sdk::{CmdVaultClient, CommandInfo, ExecutionInfo, ExecutionOutcome, LogEvent};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use tabled::{Table, Tabled};

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:9631";
const DEFAULT_PAGE_SIZE: i64 = 50;

/// Exit code used when an execution fails to start or dies abnormally
const EXIT_FAILED: i32 = 1;
/// Exit code for a cancelled execution (128 + SIGINT)
const EXIT_CANCELLED: i32 = 130;

#[derive(Parser)]
#[command(name = "cmdvault")]
#[command(about = "CmdVault command catalog CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// RPC server URL
    #[arg(long, env = "CMDVAULT_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a command to the catalog
    Add {
        /// Unique command name
        name: String,

        /// Shell text to run
        command_text: String,

        #[arg(short, long)]
        description: Option<String>,

        /// Comma-separated tags
        #[arg(short, long)]
        tags: Option<String>,
    },

    /// List catalog commands
    List {
        #[arg(short, long, default_value_t = DEFAULT_PAGE_SIZE)]
        limit: i64,

        #[arg(short, long, default_value_t = 0)]
        offset: i64,
    },

    /// Search by text (name, command, description) and/or tags
    Search {
        query: Option<String>,

        /// Comma-separated tags; matches any
        #[arg(short, long)]
        tags: Option<String>,

        #[arg(short, long, default_value_t = DEFAULT_PAGE_SIZE)]
        limit: i64,
    },

    /// Update fields of an existing command
    Update {
        name: String,

        #[arg(short, long)]
        command_text: Option<String>,

        #[arg(short, long)]
        description: Option<String>,

        /// Replaces all tags
        #[arg(short, long)]
        tags: Option<String>,
    },

    /// Delete commands by name and/or tags
    Delete {
        name: Option<String>,

        #[arg(short, long)]
        tags: Option<String>,

        /// Delete the whole catalog
        #[arg(long, conflicts_with_all = ["name", "tags"])]
        all: bool,
    },

    /// Run a catalog command and stream its output
    Run {
        name: String,

        /// Working directory (default: current directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Start only, print the execution id and return
        #[arg(long)]
        detach: bool,
    },

    /// Stream output of a running execution
    Follow {
        execution_id: String,
    },

    /// Show one execution
    Status {
        execution_id: String,
    },

    /// List running executions
    Ps,

    /// Cancel a running execution
    Cancel {
        execution_id: String,
    },
}

#[derive(Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: serde_json::Value,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[allow(dead_code)]
    jsonrpc: String,
    #[allow(dead_code)]
    id: u64,
    result: Option<serde_json::Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

#[derive(Tabled)]
struct CommandRow {
    name: String,
    command: String,
    tags: String,
    description: String,
}

impl From<CommandInfo> for CommandRow {
    fn from(c: CommandInfo) -> Self {
        Self {
            name: c.name,
            command: c.command_text,
            tags: c.tags.join(","),
            description: c.description,
        }
    }
}

#[derive(Tabled)]
struct ExecutionRow {
    execution_id: String,
    command: String,
    working_dir: String,
    state: String,
}

impl From<ExecutionInfo> for ExecutionRow {
    fn from(e: ExecutionInfo) -> Self {
        Self {
            execution_id: e.execution_id,
            command: e.command_name,
            working_dir: e.working_dir,
            state: e.state.to_string(),
        }
    }
}

async fn call_rpc(url: &str, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
    let request = JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        method: method.to_string(),
        params,
        id: 1,
    };

    let client = reqwest::Client::new();
    let response: JsonRpcResponse = client
        .post(url)
        .json(&request)
        .send()
        .await
        .context("Failed to connect to daemon")?
        .json()
        .await
        .context("Failed to parse response")?;

    if let Some(error) = response.error {
        anyhow::bail!("RPC error ({}): {}", error.code, error.message);
    }

    response
        .result
        .ok_or_else(|| anyhow::anyhow!("No result in response"))
}

/// Call a method and decode one field of the result
async fn call_field<T: serde::de::DeserializeOwned>(
    url: &str,
    method: &str,
    params: serde_json::Value,
    field: &str,
) -> Result<T> {
    let mut result = call_rpc(url, method, params).await?;
    let value = result
        .get_mut(field)
        .map(serde_json::Value::take)
        .ok_or_else(|| anyhow::anyhow!("Missing `{}` in response", field))?;
    serde_json::from_value(value).with_context(|| format!("Invalid `{}` in response", field))
}

/// Absolute working directory; relative paths resolve against the current one
fn resolve_dir(dir: Option<&Path>) -> Result<PathBuf> {
    let cwd = std::env::current_dir().context("Cannot determine current directory")?;
    Ok(match dir {
        None => cwd,
        Some(dir) if dir.is_absolute() => dir.to_path_buf(),
        Some(dir) => cwd.join(dir),
    })
}

fn exit_code(outcome: &ExecutionOutcome) -> i32 {
    match outcome {
        ExecutionOutcome::Finished { exit_code } => *exit_code,
        ExecutionOutcome::Failed { .. } => EXIT_FAILED,
        ExecutionOutcome::Cancelled => EXIT_CANCELLED,
    }
}

fn print_table<R: Tabled>(rows: Vec<R>, empty: &str) {
    if rows.is_empty() {
        println!("{}", empty.yellow());
    } else {
        println!("{}", Table::new(rows));
    }
}

fn print_outcome(outcome: &ExecutionOutcome) {
    let text = format!("-> {}", outcome);
    match outcome {
        ExecutionOutcome::Finished { exit_code: 0 } => eprintln!("{}", text.green().bold()),
        ExecutionOutcome::Finished { .. } => eprintln!("{}", text.yellow().bold()),
        _ => eprintln!("{}", text.red().bold()),
    }
}

/// Print log lines until the terminal event
///
/// Ctrl+C cancels the execution when `cancel_on_interrupt` is set, otherwise
/// it detaches and returns `None`.
async fn stream_output(
    client: &CmdVaultClient,
    mut stream: cmdvault_sdk::LogStream,
    cancel_on_interrupt: bool,
) -> Result<Option<ExecutionOutcome>> {
    let mut interrupted = false;

    loop {
        tokio::select! {
            next = stream.next() => {
                let Some(notification) = next else {
                    anyhow::bail!("Log stream closed before the execution finished");
                };
                match notification?.event {
                    LogEvent::Line(line) => println!("{}", line.text),
                    LogEvent::Terminal(outcome) => return Ok(Some(outcome)),
                }
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                if !cancel_on_interrupt {
                    eprintln!("{}", "Detached".yellow());
                    return Ok(None);
                }
                let id = stream.execution_id().to_string();
                eprintln!("{}", format!("Cancelling {}...", id).yellow());
                client.cancel(&id).await?;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let url = cli.rpc_url.as_str();

    match cli.command {
        Commands::Add {
            name,
            command_text,
            description,
            tags,
        } => {
            let params = json!({
                "name": name,
                "command_text": command_text,
                "description": description,
                "tags": tags,
            });
            let tags: Vec<String> = call_field(url, "command.add.v1", params, "tags").await?;

            println!("{}", format!("✓ Command '{}' added", name).green().bold());
            if !tags.is_empty() {
                println!("  {} {}", "Tags:".bold(), tags.join(", "));
            }
        }

        Commands::List { limit, offset } => {
            let commands: Vec<CommandInfo> = call_field(
                url,
                "command.list.v1",
                json!({ "limit": limit, "offset": offset }),
                "commands",
            )
            .await?;
            let rows = commands.into_iter().map(CommandRow::from).collect();
            print_table::<CommandRow>(rows, "Catalog is empty");
        }

        Commands::Search { query, tags, limit } => {
            let commands: Vec<CommandInfo> = call_field(
                url,
                "command.search.v1",
                json!({ "query": query, "tags": tags, "limit": limit }),
                "commands",
            )
            .await?;
            let rows = commands.into_iter().map(CommandRow::from).collect();
            print_table::<CommandRow>(rows, "No matching commands");
        }

        Commands::Update {
            name,
            command_text,
            description,
            tags,
        } => {
            let params = json!({
                "name": name,
                "command_text": command_text,
                "description": description,
                "tags": tags,
            });
            let command: CommandInfo =
                call_field(url, "command.update.v1", params, "command").await?;

            println!("{}", format!("✓ Command '{}' updated", name).green().bold());
            println!("{}", Table::new(vec![CommandRow::from(command)]));
        }

        Commands::Delete { name, tags, all } => {
            let params = json!({ "name": name, "tags": tags, "all": all });
            let deleted: u64 = call_field(url, "command.delete.v1", params, "deleted").await?;

            if deleted == 0 {
                println!("{}", "Nothing deleted".yellow());
            } else {
                println!("{}", format!("✓ {} command(s) deleted", deleted).green().bold());
            }
        }

        Commands::Run { name, dir, detach } => {
            let working_dir = resolve_dir(dir.as_deref())?;

            if detach {
                let params = json!({
                    "name": name,
                    "working_dir": working_dir.display().to_string(),
                });
                let execution: ExecutionInfo =
                    call_field(url, "command.run.v1", params, "execution").await?;
                println!("{}", execution.execution_id);
                return Ok(());
            }

            let client = CmdVaultClient::connect(url).await?;
            let stream = client.run_and_follow(&name, &working_dir).await?;
            let Some(outcome) = stream_output(&client, stream, true).await? else {
                return Ok(());
            };
            print_outcome(&outcome);
            std::process::exit(exit_code(&outcome));
        }

        Commands::Follow { execution_id } => {
            let client = CmdVaultClient::connect(url).await?;
            let stream = client.follow(&execution_id).await?;
            if let Some(outcome) = stream_output(&client, stream, false).await? {
                print_outcome(&outcome);
            }
        }

        Commands::Status { execution_id } => {
            let execution: ExecutionInfo = call_field(
                url,
                "execution.status.v1",
                json!({ "execution_id": execution_id }),
                "execution",
            )
            .await?;

            println!("  {} {}", "Execution:".bold(), execution.execution_id);
            println!("  {} {}", "Command:".bold(), execution.command_name);
            println!("  {} {}", "Text:".bold(), execution.command_text);
            println!("  {} {}", "Directory:".bold(), execution.working_dir);
            println!("  {} {}", "State:".bold(), execution.state.to_string().cyan());
        }

        Commands::Ps => {
            let executions: Vec<ExecutionInfo> =
                call_field(url, "execution.list.v1", json!({}), "executions").await?;
            let rows = executions.into_iter().map(ExecutionRow::from).collect();
            print_table::<ExecutionRow>(rows, "No running executions");
        }

        Commands::Cancel { execution_id } => {
            let cancelled: bool = call_field(
                url,
                "execution.cancel.v1",
                json!({ "execution_id": execution_id }),
                "cancelled",
            )
            .await?;

            if cancelled {
                println!("{}", format!("✓ Execution {} cancelled", execution_id).green().bold());
            } else {
                println!("{}", format!("Execution {} is already stopping", execution_id).yellow());
            }
        }
    }

    Ok(())
}

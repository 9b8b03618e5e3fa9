//! CmdVault SDK - Rust Client Library
//!
//! Typed client for the CmdVault daemon: manage the command catalog, start
//! commands and stream their output.
//!
//! # Example
//!
//! ```no_run
//! use cmdvault_sdk::{AddCommandRequest, CmdVaultClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = CmdVaultClient::connect("http://127.0.0.1:9631").await?;
//!
//!     client.add_command(AddCommandRequest {
//!         name: "hello".to_string(),
//!         command_text: "echo hello".to_string(),
//!         description: None,
//!         tags: None,
//!     }).await?;
//!
//!     let outcome = client.run_and_follow("hello", "/tmp").await?.wait().await?;
//!     println!("Finished: {}", outcome);
//!
//!     Ok(())
//! }
//! ```

mod client;
mod error;
mod types;

pub use client::{CmdVaultClient, LogStream};
pub use error::{code, Result, SdkError};
pub use types::{
    AddCommandRequest, AddCommandResponse, CommandInfo, DeleteCommandsRequest, ExecutionInfo,
    ExecutionOutcome, ExecutionState, LogEvent, LogLine, LogNotification, SearchCommandsRequest,
    UpdateCommandRequest,
};

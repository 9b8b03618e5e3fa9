//! JSON-RPC API Layer
//!
//! Implements the JSON-RPC 2.0 server for CmdVault: catalog methods plus
//! WebSocket subscriptions that stream execution output.

pub mod error;
pub mod handler;
pub mod server;
pub mod types;

pub use server::{RpcServer, RpcServerConfig};
pub use jsonrpsee::server::ServerHandle;

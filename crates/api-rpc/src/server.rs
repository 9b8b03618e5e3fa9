//! JSON-RPC Server
//!
//! Serves JSON-RPC 2.0 over HTTP and WebSocket on one localhost TCP port.
//! Log streaming is only available over WebSocket (subscriptions).

use crate::handler::RpcHandler;
use crate::types::{
    AddCommandParams, DeleteCommandsParams, ExecutionParams, ListCommandsParams,
    LogNotification, RunCommandParams, SearchCommandsParams, StreamEvent, UpdateCommandParams,
};
use cmdvault_core::application::{CommandRegistry, LogSubscription, ProcessLauncher};
use cmdvault_core::domain::ExecutionInfo;
use jsonrpsee::core::SubscriptionResult;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::{ErrorObjectOwned, Params};
use jsonrpsee::{PendingSubscriptionSink, RpcModule, SubscriptionMessage};
use serde::de::DeserializeOwned;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_RPC_HOST: &str = "127.0.0.1";
pub const DEFAULT_RPC_PORT: u16 = 9631;

/// Notification method used by every log subscription
pub const LOG_NOTIFICATION: &str = "execution.log";

/// RPC Server Configuration
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
        }
    }
}

/// Parse params, treating absent params as the type's default
fn parse_or_default<T: DeserializeOwned + Default>(
    params: &Params<'_>,
) -> Result<T, ErrorObjectOwned> {
    if params.as_str().is_none() {
        return Ok(T::default());
    }
    params.parse()
}

/// Accept (or reject) a pending subscription and pump log events into it
///
/// `started` is sent first when given. Ends after the terminal marker. If the
/// execution's broadcaster dropped us for falling behind, the subscription is
/// closed with an error instead.
async fn stream_log(
    pending: PendingSubscriptionSink,
    log: Result<(Option<ExecutionInfo>, LogSubscription), ErrorObjectOwned>,
) -> SubscriptionResult {
    let (started, mut log) = match log {
        Ok(log) => log,
        Err(e) => {
            pending.reject(e).await;
            return Ok(());
        }
    };

    let sink = pending.accept().await?;
    let execution_id = log.execution_id().to_string();
    debug!(execution_id = %execution_id, "Log subscription accepted");

    if let Some(info) = started {
        let message = SubscriptionMessage::from_json(&LogNotification {
            execution_id: execution_id.clone(),
            event: StreamEvent::Started(info),
        })?;
        sink.send(message).await?;
    }

    loop {
        tokio::select! {
            _ = sink.closed() => {
                debug!(execution_id = %execution_id, "Log subscriber went away");
                return Ok(());
            }
            event = log.recv() => {
                let Some(event) = event else {
                    warn!(execution_id = %execution_id, "Log stream dropped before terminal event");
                    return Err("log stream dropped: subscriber fell behind".into());
                };
                let terminal = event.is_terminal();
                let message = SubscriptionMessage::from_json(&LogNotification {
                    execution_id: execution_id.clone(),
                    event: event.into(),
                })?;
                sink.send(message).await?;
                if terminal {
                    return Ok(());
                }
            }
        }
    }
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

impl RpcServer {
    pub fn new(
        config: RpcServerConfig,
        registry: Arc<CommandRegistry>,
        launcher: Arc<ProcessLauncher>,
    ) -> Self {
        Self {
            config,
            handler: Arc::new(RpcHandler::new(registry, launcher)),
        }
    }

    fn build_module(&self) -> Result<RpcModule<()>, String> {
        let mut module = RpcModule::new(());

        // Catalog
        let handler = self.handler.clone();
        module
            .register_async_method("command.add.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: AddCommandParams = params.parse()?;
                    handler.add_command(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("command.list.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: ListCommandsParams = parse_or_default(&params)?;
                    handler.list_commands(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("command.search.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: SearchCommandsParams = parse_or_default(&params)?;
                    handler.search_commands(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("command.update.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: UpdateCommandParams = params.parse()?;
                    handler.update_command(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("command.delete.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: DeleteCommandsParams = parse_or_default(&params)?;
                    handler.delete_commands(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        // Execution
        let handler = self.handler.clone();
        module
            .register_async_method("command.run.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: RunCommandParams = params.parse()?;
                    handler.run_command(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("execution.status.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: ExecutionParams = params.parse()?;
                    handler.execution_status(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("execution.list.v1", move |_, _, _| {
                let handler = handler.clone();
                async move { handler.list_executions().await }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("execution.cancel.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: ExecutionParams = params.parse()?;
                    handler.cancel_execution(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        // Log streaming (WebSocket only)
        let handler = self.handler.clone();
        module
            .register_subscription(
                "command.run_follow.v1",
                LOG_NOTIFICATION,
                "command.run_unfollow.v1",
                move |params, pending, _, _| {
                    let handler = handler.clone();
                    async move {
                        let log = match params.parse::<RunCommandParams>() {
                            Ok(req) => handler
                                .run_and_follow(req)
                                .await
                                .map(|(info, log)| (Some(info), log)),
                            Err(e) => Err(e),
                        };
                        stream_log(pending, log).await
                    }
                },
            )
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_subscription(
                "execution.follow.v1",
                LOG_NOTIFICATION,
                "execution.unfollow.v1",
                move |params, pending, _, _| {
                    let handler = handler.clone();
                    async move {
                        let log = match params.parse::<ExecutionParams>() {
                            Ok(req) => handler.follow_execution(req).await.map(|log| (None, log)),
                            Err(e) => Err(e),
                        };
                        stream_log(pending, log).await
                    }
                },
            )
            .map_err(|e| e.to_string())?;

        Ok(module)
    }

    /// Start the JSON-RPC server
    ///
    /// Returns the handle and the bound address (useful with port 0).
    pub async fn start(self) -> Result<(ServerHandle, SocketAddr), String> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        info!(
            host = %self.config.host,
            port = %self.config.port,
            "Starting JSON-RPC server (HTTP + WebSocket)"
        );

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| format!("Failed to build server on {}: {}", addr, e))?;
        let local_addr = server
            .local_addr()
            .map_err(|e| format!("Failed to read bound address: {}", e))?;

        let module = self.build_module()?;

        info!(addr = %local_addr, "JSON-RPC server started successfully");

        let handle = server.start(module);
        Ok((handle, local_addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmdvault_core::application::{AddCommandRequest, LogBroadcaster};
    use cmdvault_core::domain::ExecutionOutcome;
    use cmdvault_core::port::catalog_store::mocks::InMemoryCatalogStore;
    use cmdvault_core::port::command_runner::mocks::MockCommandRunner;
    use cmdvault_core::port::id_provider::SequentialIdProvider;
    use cmdvault_core::port::time_provider::SystemTimeProvider;
    use cmdvault_core::port::{CommandRunner, TimeProvider};
    use jsonrpsee::core::client::{ClientT, Error as ClientError, SubscriptionClientT};
    use jsonrpsee::core::params::ObjectParams;
    use jsonrpsee::http_client::HttpClientBuilder;
    use jsonrpsee::ws_client::WsClientBuilder;
    use serde_json::Value;
    use tempfile::TempDir;

    use crate::error::code;
    use crate::types::{AddCommandResponse, CommandsResponse, ExecutionsResponse};

    async fn start_server(runner: Arc<dyn CommandRunner>) -> (ServerHandle, SocketAddr) {
        let time: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
        let registry = Arc::new(CommandRegistry::new(
            Arc::new(InMemoryCatalogStore::new()),
            Arc::new(SequentialIdProvider::new("cmd")),
            time.clone(),
        ));
        registry
            .add_command(AddCommandRequest {
                name: "greet".to_string(),
                command_text: "echo a; echo b".to_string(),
                description: "says things".to_string(),
                tags: "demo".to_string(),
            })
            .await
            .unwrap();
        let launcher = Arc::new(ProcessLauncher::new(
            registry.clone(),
            runner,
            Arc::new(LogBroadcaster::new(time.clone(), 64)),
            Arc::new(SequentialIdProvider::new("exec")),
            time,
        ));

        let config = RpcServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };
        RpcServer::new(config, registry, launcher).start().await.unwrap()
    }

    fn object(pairs: &[(&str, Value)]) -> ObjectParams {
        let mut params = ObjectParams::new();
        for (key, value) in pairs {
            params.insert(key, value.clone()).unwrap();
        }
        params
    }

    fn error_code(err: ClientError) -> i32 {
        match err {
            ClientError::Call(obj) => obj.code(),
            other => panic!("unexpected client error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_catalog_methods_over_http() {
        let (handle, addr) = start_server(Arc::new(MockCommandRunner::new_lines(&[], 0))).await;
        let client = HttpClientBuilder::default()
            .build(format!("http://{}", addr))
            .unwrap();

        let added: AddCommandResponse = client
            .request(
                "command.add.v1",
                object(&[
                    ("name", "build".into()),
                    ("command_text", "cargo build".into()),
                    ("tags", "rust, ci, rust".into()),
                ]),
            )
            .await
            .unwrap();
        assert_eq!(added.name, "build");
        assert_eq!(added.tags, vec!["rust", "ci"]);

        let listed: CommandsResponse = client
            .request("command.list.v1", ObjectParams::new())
            .await
            .unwrap();
        let names: Vec<_> = listed.commands.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["greet", "build"]);

        let dup = client
            .request::<AddCommandResponse, _>(
                "command.add.v1",
                object(&[("name", "build".into()), ("command_text", "make".into())]),
            )
            .await
            .unwrap_err();
        assert_eq!(error_code(dup), code::CONFLICT);

        let blank = client
            .request::<AddCommandResponse, _>(
                "command.add.v1",
                object(&[("name", "".into()), ("command_text", "make".into())]),
            )
            .await
            .unwrap_err();
        assert_eq!(error_code(blank), code::VALIDATION_ERROR);

        handle.stop().unwrap();
    }

    #[tokio::test]
    async fn test_run_errors() {
        let (handle, addr) = start_server(Arc::new(MockCommandRunner::new_lines(&[], 0))).await;
        let client = HttpClientBuilder::default()
            .build(format!("http://{}", addr))
            .unwrap();
        let dir = TempDir::new().unwrap();

        let missing = client
            .request::<Value, _>(
                "command.run.v1",
                object(&[
                    ("name", "nope".into()),
                    ("working_dir", dir.path().display().to_string().into()),
                ]),
            )
            .await
            .unwrap_err();
        assert_eq!(error_code(missing), code::NOT_FOUND);

        let bad_dir = client
            .request::<Value, _>(
                "command.run.v1",
                object(&[
                    ("name", "greet".into()),
                    ("working_dir", dir.path().join("gone").display().to_string().into()),
                ]),
            )
            .await
            .unwrap_err();
        assert_eq!(error_code(bad_dir), code::INVALID_DIRECTORY);

        let executions: ExecutionsResponse = client
            .request("execution.list.v1", ObjectParams::new())
            .await
            .unwrap();
        assert!(executions.executions.is_empty());

        handle.stop().unwrap();
    }

    #[tokio::test]
    async fn test_run_follow_streams_until_terminal() {
        let (handle, addr) =
            start_server(Arc::new(MockCommandRunner::new_lines(&["a", "b"], 0))).await;
        let client = WsClientBuilder::default()
            .build(format!("ws://{}", addr))
            .await
            .unwrap();
        let dir = TempDir::new().unwrap();

        let mut sub = client
            .subscribe::<LogNotification, _>(
                "command.run_follow.v1",
                object(&[
                    ("name", "greet".into()),
                    ("working_dir", dir.path().display().to_string().into()),
                ]),
                "command.run_unfollow.v1",
            )
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Some(notification) = sub.next().await {
            let notification = notification.unwrap();
            let terminal = notification.event.is_terminal();
            events.push(notification.event);
            if terminal {
                break;
            }
        }

        assert_eq!(events.len(), 4);
        match &events[0] {
            StreamEvent::Started(info) => {
                assert_eq!(info.command_name, "greet");
                assert_eq!(info.command_text, "echo a; echo b");
            }
            other => panic!("unexpected event: {:?}", other),
        }
        match &events[1] {
            StreamEvent::Line(line) => {
                assert_eq!(line.seq, 0);
                assert_eq!(line.text, "a");
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(
            events[3],
            StreamEvent::Terminal(ExecutionOutcome::Finished { exit_code: 0 })
        );

        handle.stop().unwrap();
    }

    #[tokio::test]
    async fn test_follow_unknown_execution_is_rejected() {
        let (handle, addr) = start_server(Arc::new(MockCommandRunner::new_lines(&[], 0))).await;
        let client = WsClientBuilder::default()
            .build(format!("ws://{}", addr))
            .await
            .unwrap();

        let err = client
            .subscribe::<LogNotification, _>(
                "execution.follow.v1",
                object(&[("execution_id", "exec-404".into())]),
                "execution.unfollow.v1",
            )
            .await
            .unwrap_err();
        assert_eq!(error_code(err), code::NOT_FOUND);

        handle.stop().unwrap();
    }
}

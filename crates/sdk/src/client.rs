//! CmdVault Client Implementation

use crate::error::{Result, SdkError};
use crate::types::{
    AddCommandRequest, AddCommandResponse, CancelExecutionResponse, CommandInfo, CommandResponse,
    CommandsResponse, DeleteCommandsRequest, DeleteCommandsResponse, ExecutionInfo,
    ExecutionOutcome, ExecutionRequest, ExecutionResponse, ExecutionsResponse, LogEvent,
    LogNotification, RunCommandRequest, SearchCommandsRequest, UpdateCommandRequest, WireEvent,
    WireNotification,
};
use jsonrpsee::core::client::{ClientT, Subscription, SubscriptionClientT};
use jsonrpsee::core::params::ObjectParams;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::ws_client::{WsClient, WsClientBuilder};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// CmdVault daemon client
///
/// Catalog and status calls go over HTTP. Log streams open a WebSocket
/// connection on the same address for the lifetime of the stream.
///
/// # Example
///
/// ```no_run
/// use cmdvault_sdk::CmdVaultClient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = CmdVaultClient::connect("http://127.0.0.1:9631").await?;
/// # Ok(())
/// # }
/// ```
pub struct CmdVaultClient {
    client: HttpClient,
    ws_url: String,
}

impl CmdVaultClient {
    /// Connect to the CmdVault daemon
    ///
    /// # Arguments
    ///
    /// * `url` - RPC endpoint (`http://`, `https://`, `ws://` or `wss://`)
    pub async fn connect(url: impl AsRef<str>) -> Result<Self> {
        let (http_url, ws_url) = endpoint_urls(url.as_ref())?;

        let client = HttpClientBuilder::default()
            .request_timeout(REQUEST_TIMEOUT)
            .build(&http_url)
            .map_err(|e| SdkError::Connection(format!("Failed to create client: {}", e)))?;

        Ok(Self { client, ws_url })
    }

    /// Add a command to the catalog
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use cmdvault_sdk::{CmdVaultClient, AddCommandRequest};
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// # let client = CmdVaultClient::connect("http://127.0.0.1:9631").await?;
    /// let added = client.add_command(AddCommandRequest {
    ///     name: "build".to_string(),
    ///     command_text: "cargo build --release".to_string(),
    ///     description: None,
    ///     tags: Some("rust, ci".to_string()),
    /// }).await?;
    ///
    /// println!("Tags: {:?}", added.tags);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn add_command(&self, request: AddCommandRequest) -> Result<AddCommandResponse> {
        self.call("command.add.v1", &request).await
    }

    /// One page of the catalog, in insertion order
    pub async fn list_commands(&self, limit: i64, offset: i64) -> Result<Vec<CommandInfo>> {
        let response: CommandsResponse = self
            .call(
                "command.list.v1",
                &serde_json::json!({ "limit": limit, "offset": offset }),
            )
            .await?;
        Ok(response.commands)
    }

    pub async fn search_commands(&self, request: SearchCommandsRequest) -> Result<Vec<CommandInfo>> {
        let response: CommandsResponse = self.call("command.search.v1", &request).await?;
        Ok(response.commands)
    }

    pub async fn update_command(&self, request: UpdateCommandRequest) -> Result<CommandInfo> {
        let response: CommandResponse = self.call("command.update.v1", &request).await?;
        Ok(response.command)
    }

    /// Delete matching commands and return how many were removed
    pub async fn delete_commands(&self, request: DeleteCommandsRequest) -> Result<u64> {
        let response: DeleteCommandsResponse = self.call("command.delete.v1", &request).await?;
        Ok(response.deleted)
    }

    /// Start a catalog command without attaching to its output
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use cmdvault_sdk::CmdVaultClient;
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// # let client = CmdVaultClient::connect("http://127.0.0.1:9631").await?;
    /// let execution = client.run("build", "/home/me/project").await?;
    /// println!("Started {}", execution.execution_id);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run(&self, name: &str, working_dir: impl AsRef<Path>) -> Result<ExecutionInfo> {
        let response: ExecutionResponse = self
            .call("command.run.v1", &run_request(name, working_dir.as_ref()))
            .await?;
        Ok(response.execution)
    }

    pub async fn status(&self, execution_id: &str) -> Result<ExecutionInfo> {
        let response: ExecutionResponse = self
            .call("execution.status.v1", &execution_request(execution_id))
            .await?;
        Ok(response.execution)
    }

    /// Executions that have not terminated yet
    pub async fn list_executions(&self) -> Result<Vec<ExecutionInfo>> {
        let response: ExecutionsResponse = self
            .client
            .request("execution.list.v1", ObjectParams::new())
            .await?;
        Ok(response.executions)
    }

    /// Request cancellation; `false` if the execution was already stopping
    pub async fn cancel(&self, execution_id: &str) -> Result<bool> {
        let response: CancelExecutionResponse = self
            .call("execution.cancel.v1", &execution_request(execution_id))
            .await?;
        Ok(response.cancelled)
    }

    /// Start a catalog command and stream its output from the first line
    ///
    /// Returns once the daemon has announced the execution, so
    /// [`LogStream::execution_id`] is known before any output.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use cmdvault_sdk::{CmdVaultClient, LogEvent};
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// # let client = CmdVaultClient::connect("http://127.0.0.1:9631").await?;
    /// let mut stream = client.run_and_follow("build", "/home/me/project").await?;
    /// while let Some(notification) = stream.next().await {
    ///     match notification?.event {
    ///         LogEvent::Line(line) => println!("{}", line.text),
    ///         LogEvent::Terminal(outcome) => println!("-> {}", outcome),
    ///     }
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run_and_follow(
        &self,
        name: &str,
        working_dir: impl AsRef<Path>,
    ) -> Result<LogStream> {
        let (client, mut subscription) = self
            .subscribe(
                "command.run_follow.v1",
                &run_request(name, working_dir.as_ref()),
                "command.run_unfollow.v1",
            )
            .await?;

        let first = subscription.next().await.ok_or(SdkError::StreamClosed)??;
        let mut stream = LogStream {
            _client: client,
            subscription,
            execution_id: first.execution_id,
            started: None,
            pending: None,
            finished: false,
        };
        match first.event {
            WireEvent::Started(info) => stream.started = Some(info),
            event => stream.pending = stream.accept(event),
        }
        Ok(stream)
    }

    /// Attach to a running execution; earlier lines are not replayed
    pub async fn follow(&self, execution_id: &str) -> Result<LogStream> {
        let (client, subscription) = self
            .subscribe(
                "execution.follow.v1",
                &execution_request(execution_id),
                "execution.unfollow.v1",
            )
            .await?;

        Ok(LogStream {
            _client: client,
            subscription,
            execution_id: execution_id.to_string(),
            started: None,
            pending: None,
            finished: false,
        })
    }

    async fn call<P, R>(&self, method: &str, params: &P) -> Result<R>
    where
        P: Serialize,
        R: serde::de::DeserializeOwned,
    {
        Ok(self.client.request(method, object_params(params)?).await?)
    }

    async fn subscribe<P: Serialize>(
        &self,
        method: &str,
        params: &P,
        unsubscribe: &str,
    ) -> Result<(WsClient, Subscription<WireNotification>)> {
        let client = WsClientBuilder::default()
            .request_timeout(REQUEST_TIMEOUT)
            .build(&self.ws_url)
            .await
            .map_err(|e| SdkError::Connection(format!("Failed to open stream: {}", e)))?;
        let subscription = client
            .subscribe::<WireNotification, _>(method, object_params(params)?, unsubscribe)
            .await?;
        Ok((client, subscription))
    }
}

/// Live log stream of one execution
///
/// Yields notifications until the terminal event, then `None`. A stream
/// that ends without a terminal event was dropped by the daemon.
pub struct LogStream {
    _client: WsClient,
    subscription: Subscription<WireNotification>,
    execution_id: String,
    started: Option<ExecutionInfo>,
    pending: Option<LogNotification>,
    finished: bool,
}

impl LogStream {
    /// Execution being streamed
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Snapshot announced by the daemon when a run stream opened
    pub fn started(&self) -> Option<&ExecutionInfo> {
        self.started.as_ref()
    }

    pub async fn next(&mut self) -> Option<Result<LogNotification>> {
        if let Some(notification) = self.pending.take() {
            return Some(Ok(notification));
        }
        while !self.finished {
            match self.subscription.next().await {
                Some(Ok(notification)) => {
                    if let Some(notification) = self.accept(notification.event) {
                        return Some(Ok(notification));
                    }
                }
                Some(Err(e)) => return Some(Err(e.into())),
                None => self.finished = true,
            }
        }
        None
    }

    fn accept(&mut self, event: WireEvent) -> Option<LogNotification> {
        let event = match event {
            WireEvent::Started(_) => return None,
            WireEvent::Line(line) => LogEvent::Line(line),
            WireEvent::Terminal(outcome) => {
                self.finished = true;
                LogEvent::Terminal(outcome)
            }
        };
        Some(LogNotification {
            execution_id: self.execution_id.clone(),
            event,
        })
    }

    /// Discard remaining lines and return the outcome
    pub async fn wait(mut self) -> Result<ExecutionOutcome> {
        while let Some(notification) = self.next().await {
            if let LogEvent::Terminal(outcome) = notification?.event {
                return Ok(outcome);
            }
        }
        Err(SdkError::StreamClosed)
    }
}

fn run_request(name: &str, working_dir: &Path) -> RunCommandRequest {
    RunCommandRequest {
        name: name.to_string(),
        working_dir: working_dir.display().to_string(),
    }
}

fn execution_request(execution_id: &str) -> ExecutionRequest {
    ExecutionRequest {
        execution_id: execution_id.to_string(),
    }
}

/// Serialize a struct into named JSON-RPC params
fn object_params<P: Serialize>(params: &P) -> Result<ObjectParams> {
    let value = serde_json::to_value(params)?;
    let serde_json::Value::Object(fields) = value else {
        return Err(SdkError::Other("params must serialize to an object".to_string()));
    };

    let mut object = ObjectParams::new();
    for (key, value) in fields {
        object.insert(&key, value)?;
    }
    Ok(object)
}

/// HTTP and WebSocket URLs for one daemon endpoint
fn endpoint_urls(url: &str) -> Result<(String, String)> {
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| SdkError::InvalidUrl(url.to_string()))?;
    if rest.is_empty() {
        return Err(SdkError::InvalidUrl(url.to_string()));
    }

    let (http, ws) = match scheme {
        "http" | "ws" => ("http", "ws"),
        "https" | "wss" => ("https", "wss"),
        _ => return Err(SdkError::InvalidUrl(url.to_string())),
    };
    Ok((format!("{}://{}", http, rest), format!("{}://{}", ws, rest)))
}

//! RPC Method Handlers
//!
//! Implements the business logic for each JSON-RPC method.

use crate::error::to_rpc_error;
use crate::types::{
    parse_tags, AddCommandParams, AddCommandResponse, CancelExecutionResponse, CommandResponse,
    CommandsResponse, DeleteCommandsParams, DeleteCommandsResponse, ExecutionParams,
    ExecutionResponse, ExecutionsResponse, ListCommandsParams, RunCommandParams,
    SearchCommandsParams, UpdateCommandParams,
};
use cmdvault_core::application::{
    AddCommandRequest, CommandRegistry, LogSubscription, ProcessLauncher, UpdateCommandRequest,
};
use cmdvault_core::domain::ExecutionInfo;
use jsonrpsee::types::ErrorObjectOwned;
use std::sync::Arc;
use tracing::debug;

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    registry: Arc<CommandRegistry>,
    launcher: Arc<ProcessLauncher>,
}

impl RpcHandler {
    pub fn new(registry: Arc<CommandRegistry>, launcher: Arc<ProcessLauncher>) -> Self {
        Self { registry, launcher }
    }

    /// command.add.v1
    pub async fn add_command(
        &self,
        params: AddCommandParams,
    ) -> Result<AddCommandResponse, ErrorObjectOwned> {
        let command = self
            .registry
            .add_command(AddCommandRequest {
                name: params.name,
                command_text: params.command_text,
                description: params.description.unwrap_or_default(),
                tags: params.tags.unwrap_or_default(),
            })
            .await
            .map_err(to_rpc_error)?;

        Ok(AddCommandResponse {
            name: command.name,
            tags: command.tags,
        })
    }

    /// command.list.v1
    pub async fn list_commands(
        &self,
        params: ListCommandsParams,
    ) -> Result<CommandsResponse, ErrorObjectOwned> {
        let commands = self
            .registry
            .list_commands(params.limit, params.offset)
            .await
            .map_err(to_rpc_error)?;
        Ok(CommandsResponse { commands })
    }

    /// command.search.v1
    pub async fn search_commands(
        &self,
        params: SearchCommandsParams,
    ) -> Result<CommandsResponse, ErrorObjectOwned> {
        let commands = self
            .registry
            .search_commands(
                params.query.as_deref(),
                parse_tags(params.tags.as_deref()),
                params.limit,
                params.offset,
            )
            .await
            .map_err(to_rpc_error)?;
        Ok(CommandsResponse { commands })
    }

    /// command.update.v1
    pub async fn update_command(
        &self,
        params: UpdateCommandParams,
    ) -> Result<CommandResponse, ErrorObjectOwned> {
        let command = self
            .registry
            .update_command(UpdateCommandRequest {
                name: params.name,
                command_text: params.command_text,
                description: params.description,
                tags: params.tags,
            })
            .await
            .map_err(to_rpc_error)?;
        Ok(CommandResponse { command })
    }

    /// command.delete.v1
    pub async fn delete_commands(
        &self,
        params: DeleteCommandsParams,
    ) -> Result<DeleteCommandsResponse, ErrorObjectOwned> {
        let deleted = if params.all {
            self.registry.delete_all_commands().await
        } else {
            self.registry
                .delete_commands(params.name.as_deref(), parse_tags(params.tags.as_deref()))
                .await
        }
        .map_err(to_rpc_error)?;

        Ok(DeleteCommandsResponse { deleted })
    }

    /// command.run.v1
    pub async fn run_command(
        &self,
        params: RunCommandParams,
    ) -> Result<ExecutionResponse, ErrorObjectOwned> {
        let handle = self
            .launcher
            .run(&params.name, &params.working_dir)
            .await
            .map_err(to_rpc_error)?;
        Ok(ExecutionResponse {
            execution: handle.info(),
        })
    }

    /// command.run_follow.v1 (subscription)
    pub async fn run_and_follow(
        &self,
        params: RunCommandParams,
    ) -> Result<(ExecutionInfo, LogSubscription), ErrorObjectOwned> {
        let (handle, subscription) = self
            .launcher
            .run_attached(&params.name, &params.working_dir)
            .await
            .map_err(to_rpc_error)?;
        debug!(execution_id = %handle.id(), "Streaming new execution to subscriber");
        Ok((handle.info(), subscription))
    }

    /// execution.follow.v1 (subscription)
    pub async fn follow_execution(
        &self,
        params: ExecutionParams,
    ) -> Result<LogSubscription, ErrorObjectOwned> {
        self.launcher
            .subscribe(&params.execution_id)
            .await
            .map_err(to_rpc_error)
    }

    /// execution.status.v1
    pub async fn execution_status(
        &self,
        params: ExecutionParams,
    ) -> Result<ExecutionResponse, ErrorObjectOwned> {
        let execution = self
            .launcher
            .status(&params.execution_id)
            .await
            .map_err(to_rpc_error)?;
        Ok(ExecutionResponse { execution })
    }

    /// execution.list.v1
    pub async fn list_executions(&self) -> Result<ExecutionsResponse, ErrorObjectOwned> {
        Ok(ExecutionsResponse {
            executions: self.launcher.list_active().await,
        })
    }

    /// execution.cancel.v1
    pub async fn cancel_execution(
        &self,
        params: ExecutionParams,
    ) -> Result<CancelExecutionResponse, ErrorObjectOwned> {
        let cancelled = self
            .launcher
            .cancel(&params.execution_id)
            .await
            .map_err(to_rpc_error)?;
        Ok(CancelExecutionResponse {
            execution_id: params.execution_id,
            cancelled,
        })
    }
}

//! MCP protocol client layered on a [`ProcessHandle`].
//!
//! Speaks the fixed handshake (`initialize` → `notifications/initialized`
//! → `tools/list`) and proxies tool invocations. Protocol failures are
//! translated into typed [`HubError`] values; the client never retries.

use std::{process::ExitStatus, sync::Arc, time::Duration};

use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::{
    error::HubError,
    process::ProcessHandle,
    protocol::{
        CallToolParams, CallToolResult, ClientInfo, InitializeParams, ListToolsResult,
        RpcNotification, Tool, METHOD_CALL_TOOL, METHOD_INITIALIZE, METHOD_INITIALIZED,
        METHOD_LIST_TOOLS,
    },
};

/// A connected MCP session over one child process.
pub struct McpClient {
    server: String,
    handle: Arc<ProcessHandle>,
}

impl McpClient {
    /// Performs the handshake on a freshly spawned handle.
    ///
    /// Returns the client together with the discovered tool manifest. Any
    /// failure in the three handshake steps drops the handle (killing the
    /// child) and surfaces as [`HubError::Handshake`].
    pub async fn connect(
        server: &str,
        handle: ProcessHandle,
        info: ClientInfo,
        deadline: Duration,
    ) -> Result<(Self, Vec<Tool>), HubError> {
        let client = Self {
            server: server.to_string(),
            handle: Arc::new(handle),
        };

        let params = serde_json::to_value(InitializeParams::new(info))?;
        client
            .handle
            .call(METHOD_INITIALIZE, params, deadline)
            .await
            .map_err(|err| client.handshake_error(err))?;

        client
            .notify(METHOD_INITIALIZED, Value::Null)
            .map_err(|err| client.handshake_error(err))?;

        let tools = client
            .list_tools(deadline)
            .await
            .map_err(|err| client.handshake_error(err))?;

        debug!(server = %client.server, tools = tools.len(), "handshake complete");
        Ok((client, tools))
    }

    /// Re-issues `tools/list` and returns the fresh manifest.
    pub async fn list_tools(&self, deadline: Duration) -> Result<Vec<Tool>, HubError> {
        let result = self
            .handle
            .call(METHOD_LIST_TOOLS, json!({}), deadline)
            .await?;
        let listed: ListToolsResult = serde_json::from_value(result)?;
        Ok(listed.tools)
    }

    /// Invokes a tool and returns its content parts verbatim.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        deadline: Duration,
    ) -> Result<CallToolResult, HubError> {
        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })?;

        match self.handle.call(METHOD_CALL_TOOL, params, deadline).await {
            Ok(value) => Ok(serde_json::from_value(value)?),
            Err(HubError::Rpc { code, message, .. }) => Err(HubError::Tool { code, message }),
            Err(other) => Err(other),
        }
    }

    /// Writes a notification to the child.
    pub fn notify(&self, method: &str, params: Value) -> Result<(), HubError> {
        self.handle.notify(method, params)
    }

    /// Takes the server-initiated notification stream. Single consumer.
    pub async fn take_notifications(&self) -> Option<mpsc::UnboundedReceiver<RpcNotification>> {
        self.handle.take_notifications().await
    }

    /// OS process id of the child.
    pub fn pid(&self) -> Option<u32> {
        self.handle.pid()
    }

    /// Time since the child was spawned.
    pub fn uptime(&self) -> Duration {
        self.handle.uptime()
    }

    /// Most recent stderr output, for diagnostics.
    pub fn stderr_tail(&self) -> String {
        self.handle.stderr_tail()
    }

    /// Watch channel resolving once the child has been reaped.
    pub fn exited(&self) -> watch::Receiver<Option<ExitStatus>> {
        self.handle.exited()
    }

    /// Stops the child with the standard escalation.
    pub async fn shutdown(&self, grace: Duration) -> Option<ExitStatus> {
        self.handle.shutdown(grace).await
    }

    fn handshake_error(&self, err: HubError) -> HubError {
        let stderr = self.handle.stderr_tail();
        let reason = if stderr.is_empty() {
            err.to_string()
        } else {
            format!("{err}; stderr: {stderr}")
        };
        HubError::Handshake {
            server: self.server.clone(),
            reason,
        }
    }
}

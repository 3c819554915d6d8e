//! Harbor MCP runtime: JSON-RPC dispatch, transports, sessions and tools.

use std::sync::Arc;
use std::time::Instant;

use clap::{Args, Subcommand};
use harbor_core::{HarborError, Result};
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

pub mod binder;
pub mod client;
pub mod config;
pub mod connection;
pub mod context;
pub mod session;
pub mod tools;
pub mod transport;

#[cfg(test)]
mod testing;

use binder::{
    ConfigTokenBinder, ConnectionMetadataBinder, HeaderTokenBinder, HttpSessionBinder,
    MultiHttpContextFn, MultiStdioContextFn, StdioSessionBinder,
};
use client::ApiClient;
use config::{ConfigStore, DEFAULT_HOST};
use context::CallContext;
use session::StoreBackend;
use tools::{build_tool_call_response, execute_tool, tool_definitions};

const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
const MCP_SERVER_NAME: &str = "harbor-mcp-server";

const INSTRUCTIONS: &str = "Tools for the Harbor platform. Every call runs against one selected workspace. \
Start with list_workspaces; if it did not select one automatically, ask the user which workspace to use \
and then call select_workspace. Never pick a workspace on the user's behalf.";

#[derive(Subcommand)]
pub enum McpCommands {
    /// Serve MCP over stdio
    Serve(ServeArgs),
    /// Serve MCP over HTTP at /mcp
    ServeHttp(ServeHttpArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Workspace to use instead of the one stored in the config file
    #[arg(long, env = "HARBOR_WORKSPACE")]
    pub workspace: Option<String>,
}

#[derive(Args, Clone, Debug)]
pub struct ServeHttpArgs {
    /// Address to listen on
    #[arg(long, env = "HARBOR_MCP_LISTEN", default_value = "0.0.0.0:10000")]
    pub listen: String,
    /// Where per-connection sessions live: memory or redis
    #[arg(long, env = "HARBOR_SESSION_STORE", default_value = "memory")]
    pub session_store: String,
    /// Redis URL, required with --session-store redis
    #[arg(long, env = "HARBOR_REDIS_URL")]
    pub redis_url: Option<String>,
}

/// Runs a subcommand and returns the process exit code.
pub async fn run(host: Option<String>, command: McpCommands) -> i32 {
    match serve(host, command).await {
        Ok(()) => 0,
        Err(err) => {
            tracing::error!(event = "mcp_server_error", code = err.code(), error = %err, "server stopped");
            let payload = json!({
                "error": err.code(),
                "message": err.to_string(),
            });
            eprintln!("{}", tools::to_pretty_json(&payload));
            1
        }
    }
}

async fn serve(host: Option<String>, command: McpCommands) -> Result<()> {
    let config = ConfigStore::from_env();
    let host = host
        .filter(|host| !host.trim().is_empty())
        .or_else(|| config.api_host())
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let server = McpServer::new(ApiClient::new(&host)?);
    tracing::info!(event = "api_host", host = %host, "using Harbor API");

    match command {
        McpCommands::Serve(args) => {
            let config = match args.workspace.filter(|workspace| !workspace.trim().is_empty()) {
                Some(workspace) => config.with_workspace_override(workspace),
                None => config,
            };
            let binder = MultiStdioContextFn::new()
                .with(ConfigTokenBinder::new(&config))
                .with(StdioSessionBinder::new(config));
            let transport = transport::StdioTransport::new(server, Arc::new(binder));
            transport::serve_stdio(&transport)
                .await
                .map_err(|err| HarborError::Transport(format!("stdio transport failed: {err}")))
        }
        McpCommands::ServeHttp(args) => {
            let backend = StoreBackend::from_parts(&args.session_store, args.redis_url.as_deref())?;
            let store = session::build_store(&backend).await?;
            let binder = MultiHttpContextFn::new()
                .with(HeaderTokenBinder)
                .with(ConnectionMetadataBinder)
                .with(HttpSessionBinder::new(store));

            let shutdown = CancellationToken::new();
            let app = transport::router(server, Arc::new(binder), shutdown.clone());
            let listener = tokio::net::TcpListener::bind(&args.listen)
                .await
                .map_err(|err| {
                    HarborError::Transport(format!("failed to listen on {}: {err}", args.listen))
                })?;

            let signal = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!(event = "shutdown_requested", "shutting down");
                }
                signal.cancel();
            });

            transport::serve_http(listener, app, shutdown)
                .await
                .map_err(|err| HarborError::Transport(format!("HTTP transport failed: {err}")))
        }
    }
}

/// JSON-RPC dispatcher shared by both transports.
#[derive(Clone)]
pub struct McpServer {
    client: Arc<ApiClient>,
}

impl McpServer {
    pub fn new(client: ApiClient) -> Self {
        Self {
            client: Arc::new(client),
        }
    }

    /// Handles a single message or a batch; returns the responses to send.
    pub async fn handle_incoming_message(&self, ctx: &CallContext, incoming: Value) -> Vec<Value> {
        let mut responses = Vec::new();

        if let Value::Array(batch) = incoming {
            if batch.is_empty() {
                responses.push(error_response(
                    Value::Null,
                    RpcError::invalid_request("Batch request must not be empty"),
                ));
                return responses;
            }
            for item in batch {
                if let Some(response) = self.handle_single_message(ctx, item).await {
                    responses.push(response);
                }
            }
            return responses;
        }

        if let Some(response) = self.handle_single_message(ctx, incoming).await {
            responses.push(response);
        }
        responses
    }

    async fn handle_single_message(&self, ctx: &CallContext, incoming: Value) -> Option<Value> {
        let Some(obj) = incoming.as_object() else {
            return Some(error_response(
                Value::Null,
                RpcError::invalid_request("Request must be a JSON object"),
            ));
        };

        if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            let id = obj.get("id").cloned().unwrap_or(Value::Null);
            return Some(error_response(
                id,
                RpcError::invalid_request("jsonrpc must be '2.0'"),
            ));
        }

        // Without a method this is a client response; the server never asks.
        let method = obj.get("method").and_then(Value::as_str)?;

        let params = obj.get("params").cloned().unwrap_or(Value::Null);
        match obj.get("id").cloned() {
            Some(id) => Some(match self.handle_request(ctx, method, params).await {
                Ok(payload) => success_response(id, payload),
                Err(err) => error_response(id, err),
            }),
            None => {
                self.handle_notification(ctx, method);
                None
            }
        }
    }

    fn handle_notification(&self, ctx: &CallContext, method: &str) {
        tracing::debug!(
            event = "mcp_notification",
            connection_id = ?ctx.connection_id(),
            method,
            "notification received"
        );
    }

    async fn handle_request(
        &self,
        ctx: &CallContext,
        method: &str,
        params: Value,
    ) -> std::result::Result<Value, RpcError> {
        match method {
            "initialize" => Ok(initialize_payload()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(tools_list_payload()),
            "tools/call" => self.handle_tools_call(ctx, params).await,
            _ => Err(RpcError::method_not_found(method)),
        }
    }

    async fn handle_tools_call(
        &self,
        ctx: &CallContext,
        params: Value,
    ) -> std::result::Result<Value, RpcError> {
        let params = params
            .as_object()
            .ok_or_else(|| RpcError::invalid_params("tools/call params must be an object"))?;

        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("tools/call requires string field 'name'"))?;

        let args = match params.get("arguments") {
            Some(Value::Object(map)) => map.clone(),
            None | Some(Value::Null) => Map::new(),
            Some(_) => {
                return Err(RpcError::invalid_params(
                    "tools/call field 'arguments' must be an object",
                ));
            }
        };

        let started = Instant::now();
        let outcome = execute_tool(&self.client, ctx, name, &args).await;
        match &outcome {
            Ok(_) => tracing::info!(
                event = "tool_call",
                connection_id = ?ctx.connection_id(),
                tool = name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "tool call succeeded"
            ),
            Err(err) => tracing::info!(
                event = "tool_call_failed",
                connection_id = ?ctx.connection_id(),
                tool = name,
                code = %err.code,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "tool call failed"
            ),
        }
        Ok(build_tool_call_response(outcome))
    }
}

fn initialize_payload() -> Value {
    json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "capabilities": {
            "tools": {
                "listChanged": false
            }
        },
        "serverInfo": {
            "name": MCP_SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION")
        },
        "instructions": INSTRUCTIONS
    })
}

fn tools_list_payload() -> Value {
    let tools: Vec<Value> = tool_definitions().iter().map(|tool| tool.to_value()).collect();
    json!({ "tools": tools })
}

#[derive(Debug)]
struct RpcError {
    code: i64,
    message: String,
}

impl RpcError {
    fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
        }
    }

    fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {method}"),
        }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
        }
    }
}

fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

fn error_response(id: Value, error: RpcError) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": error.code,
            "message": error.message
        }
    })
}

/// Reply to a message that is not valid JSON.
pub(crate) fn parse_error_response() -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": null,
        "error": {
            "code": -32700,
            "message": "Parse error"
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::InMemoryStore;
    use crate::testing::{open_session, test_client};

    fn server() -> McpServer {
        McpServer::new(test_client("http://127.0.0.1:9/v1/"))
    }

    async fn single(server: &McpServer, ctx: &CallContext, message: Value) -> Value {
        let mut responses = server.handle_incoming_message(ctx, message).await;
        assert_eq!(responses.len(), 1);
        responses.remove(0)
    }

    #[tokio::test]
    async fn initialize_advertises_tools_only() {
        let response = single(
            &server(),
            &CallContext::new(),
            json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {} }),
        )
        .await;
        let result = &response["result"];
        assert_eq!(result["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert_eq!(result["capabilities"]["tools"]["listChanged"], false);
        assert!(result["capabilities"].get("resources").is_none());
        assert_eq!(result["serverInfo"]["name"], MCP_SERVER_NAME);
        assert!(result["instructions"].as_str().unwrap().contains("select_workspace"));
    }

    #[tokio::test]
    async fn protocol_errors() {
        let server = server();
        let ctx = CallContext::new();

        let wrong_version = single(&server, &ctx, json!({ "jsonrpc": "1.0", "id": 3, "method": "ping" })).await;
        assert_eq!(wrong_version["error"]["code"], -32600);
        assert_eq!(wrong_version["id"], 3);

        let unknown = single(&server, &ctx, json!({ "jsonrpc": "2.0", "id": 4, "method": "resources/list" })).await;
        assert_eq!(unknown["error"]["code"], -32601);

        let not_object = single(&server, &ctx, json!("ping")).await;
        assert_eq!(not_object["error"]["code"], -32600);

        let empty_batch = single(&server, &ctx, json!([])).await;
        assert_eq!(empty_batch["error"]["code"], -32600);

        let bad_params = single(
            &server,
            &ctx,
            json!({ "jsonrpc": "2.0", "id": 5, "method": "tools/call", "params": { "name": "list_services", "arguments": [] } }),
        )
        .await;
        assert_eq!(bad_params["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn notifications_and_client_responses_are_silent() {
        let server = server();
        let ctx = CallContext::new();
        let responses = server
            .handle_incoming_message(
                &ctx,
                json!([
                    { "jsonrpc": "2.0", "method": "notifications/initialized" },
                    { "jsonrpc": "2.0", "id": 9, "result": {} }
                ]),
            )
            .await;
        assert!(responses.is_empty());
    }

    #[tokio::test]
    async fn tools_list_carries_annotations() {
        let response = single(
            &server(),
            &CallContext::new(),
            json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" }),
        )
        .await;
        let tools = response["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), tool_definitions().len());
        let select = tools
            .iter()
            .find(|tool| tool["name"] == "select_workspace")
            .unwrap();
        assert_eq!(select["annotations"]["readOnlyHint"], false);
        assert_eq!(select["inputSchema"]["required"][0], "ownerID");
    }

    #[tokio::test]
    async fn tool_failures_are_results_not_protocol_errors() {
        let server = server();
        let store = InMemoryStore::new();
        let ctx = CallContext::new().with_session(open_session(&store, "c").await);

        let response = single(
            &server,
            &ctx,
            json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": { "name": "list_services" } }),
        )
        .await;
        assert!(response.get("error").is_none());
        assert_eq!(response["result"]["isError"], true);
        assert_eq!(
            response["result"]["structuredContent"]["error"],
            harbor_core::error::codes::NO_WORKSPACE
        );

        let unknown = single(
            &server,
            &ctx,
            json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/call", "params": { "name": "delete_everything" } }),
        )
        .await;
        assert_eq!(unknown["result"]["structuredContent"]["error"], "unknown_tool");
    }
}

use harbor_core::resources::{ListOwnersParams, Owner, OwnerWithCursor, QueryParams};
use harbor_core::{HarborError, fetch_all, pagination::split_page};
use serde_json::{Map, Value, json};

use super::{ToolDefinition, ToolError, required_string};
use crate::client::ApiClient;
use crate::context::CallContext;

pub(super) fn definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "list_workspaces",
            title: "List workspaces",
            description: "List the workspaces that you have access to. If exactly one exists it is selected automatically.",
            read_only: true,
            destructive: false,
            idempotent: true,
            input_schema: json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "select_workspace",
            title: "Select workspace",
            description: "Select a workspace to use for all actions. Only use this after explicitly asking the user to pick one, never as part of an automated process: acting in the wrong workspace can change unintended resources.",
            read_only: false,
            destructive: false,
            idempotent: true,
            input_schema: json!({
                "type": "object",
                "properties": {
                    "ownerID": {
                        "type": "string",
                        "description": "The ID of the workspace (owner) to select"
                    }
                },
                "required": ["ownerID"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "get_selected_workspace",
            title: "Get selected workspace",
            description: "Get the currently selected workspace.",
            read_only: true,
            destructive: false,
            idempotent: true,
            input_schema: json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        },
    ]
}

pub(crate) async fn list_owners(
    client: &ApiClient,
    ctx: &CallContext,
) -> Result<Vec<Owner>, HarborError> {
    fetch_all(ListOwnersParams::default(), |params: ListOwnersParams| async move {
        let envelopes: Vec<OwnerWithCursor> = client
            .get_json(ctx, &["owners"], &params.query_pairs())
            .await?;
        Ok(split_page(envelopes))
    })
    .await
}

pub(super) async fn list_workspaces(
    client: &ApiClient,
    ctx: &CallContext,
) -> Result<Value, ToolError> {
    let owners = list_owners(client, ctx).await?;

    if let [only] = owners.as_slice() {
        ctx.select_workspace(&only.id).await?;
        tracing::info!(
            event = "workspace_auto_selected",
            connection_id = ?ctx.connection_id(),
            workspace = %only.id,
            "only one workspace available"
        );
        return Ok(json!({
            "message": "Only one workspace found, automatically selected it",
            "selectedWorkspace": only.id,
            "workspaces": owners,
        }));
    }

    Ok(json!({ "workspaces": owners }))
}

pub(super) async fn select_workspace(
    ctx: &CallContext,
    args: &Map<String, Value>,
) -> Result<Value, ToolError> {
    let owner_id = required_string(args, "ownerID")?;
    ctx.select_workspace(&owner_id).await?;
    tracing::info!(
        event = "workspace_selected",
        connection_id = ?ctx.connection_id(),
        workspace = %owner_id,
        "workspace selected"
    );
    Ok(Value::String("Workspace selected".to_string()))
}

pub(super) async fn get_selected_workspace(ctx: &CallContext) -> Result<Value, ToolError> {
    let workspace = ctx.selected_workspace().await?;
    Ok(Value::String(format!(
        "The currently selected workspace is: {workspace}"
    )))
}

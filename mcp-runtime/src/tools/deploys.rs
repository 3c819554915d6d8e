use harbor_core::pagination::{Cursor, PageParams, split_page};
use harbor_core::resources::{Deploy, DeployWithCursor, ListDeploysParams, QueryParams};
use harbor_core::PAGE_SIZE;
use serde_json::{Map, Value, json};

use super::{ToolDefinition, ToolError, arg_bounded_u64, arg_optional_string, required_string};
use crate::client::ApiClient;
use crate::context::CallContext;

const DEFAULT_DEPLOY_LIMIT: u64 = 10;

pub(super) fn definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "list_deploys",
            title: "List deploys",
            description: "List one page of deploys for a service, most recent first. The response carries the cursor of the last deploy; pass it back to fetch the next page.",
            read_only: true,
            destructive: false,
            idempotent: true,
            input_schema: json!({
                "type": "object",
                "properties": {
                    "serviceId": {
                        "type": "string",
                        "description": "The ID of the service to list deploys for"
                    },
                    "limit": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": PAGE_SIZE,
                        "default": DEFAULT_DEPLOY_LIMIT,
                        "description": "Maximum deploys in this page. It should be rare to need more than 20."
                    },
                    "cursor": {
                        "type": "string",
                        "description": "Cursor returned by a previous call. Omit for the first page."
                    }
                },
                "required": ["serviceId"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "get_deploy",
            title: "Get deploy details",
            description: "Get the details of a specific deploy of a service.",
            read_only: true,
            destructive: false,
            idempotent: true,
            input_schema: json!({
                "type": "object",
                "properties": {
                    "serviceId": { "type": "string", "description": "The ID of the service" },
                    "deployId": { "type": "string", "description": "The ID of the deploy" }
                },
                "required": ["serviceId", "deployId"],
                "additionalProperties": false
            }),
        },
    ]
}

pub(super) async fn list_deploys(
    client: &ApiClient,
    ctx: &CallContext,
    args: &Map<String, Value>,
) -> Result<Value, ToolError> {
    let service_id = required_string(args, "serviceId")?;
    let limit = arg_bounded_u64(args, "limit", DEFAULT_DEPLOY_LIMIT, u64::from(PAGE_SIZE))?;

    let mut params = ListDeploysParams::default();
    params.set_limit(limit as u32);
    params.set_cursor(arg_optional_string(args, "cursor")?.map(Cursor::new));

    let envelopes: Vec<DeployWithCursor> = client
        .get_json(ctx, &["services", &service_id, "deploys"], &params.query_pairs())
        .await?;
    let (deploys, cursor): (Vec<Deploy>, _) = split_page(envelopes);

    Ok(json!({
        "deploys": deploys,
        "cursor": cursor,
    }))
}

pub(super) async fn get_deploy(
    client: &ApiClient,
    ctx: &CallContext,
    args: &Map<String, Value>,
) -> Result<Value, ToolError> {
    let service_id = required_string(args, "serviceId")?;
    let deploy_id = required_string(args, "deployId")?;
    let deploy: Deploy = client
        .get_json(ctx, &["services", &service_id, "deploys", &deploy_id], &[])
        .await?;
    Ok(json!(deploy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{serve, test_client};
    use axum::extract::{Path, Query};
    use axum::routing::get;
    use axum::{Json, Router};
    use std::collections::HashMap;

    #[tokio::test]
    async fn returns_one_page_with_its_cursor() {
        let router = Router::new().route(
            "/v1/services/{id}/deploys",
            get(
                |Path(id): Path<String>, Query(query): Query<HashMap<String, String>>| async move {
                    assert_eq!(id, "srv-1");
                    assert_eq!(query.get("limit").map(String::as_str), Some("2"));
                    assert_eq!(query.get("cursor").map(String::as_str), Some("prev"));
                    Json(json!([
                        { "cursor": "d1", "deploy": { "id": "dep-1", "status": "live" } },
                        { "cursor": "d2", "deploy": { "id": "dep-2", "status": "deactivated" } }
                    ]))
                },
            ),
        );
        let client = test_client(&serve(router).await);
        let ctx = CallContext::new().with_api_token("k");

        let mut args = Map::new();
        args.insert("serviceId".to_string(), json!("srv-1"));
        args.insert("limit".to_string(), json!(2));
        args.insert("cursor".to_string(), json!("prev"));
        let result = list_deploys(&client, &ctx, &args).await.unwrap();

        assert_eq!(result["deploys"].as_array().unwrap().len(), 2);
        assert_eq!(result["deploys"][1]["status"], "deactivated");
        assert_eq!(result["cursor"], "d2");
    }

    #[tokio::test]
    async fn empty_page_has_null_cursor() {
        let router = Router::new().route(
            "/v1/services/{id}/deploys",
            get(|| async { Json(json!([])) }),
        );
        let client = test_client(&serve(router).await);
        let ctx = CallContext::new().with_api_token("k");
        let mut args = Map::new();
        args.insert("serviceId".to_string(), json!("srv-1"));

        let result = list_deploys(&client, &ctx, &args).await.unwrap();
        assert_eq!(result["cursor"], Value::Null);
    }

    #[tokio::test]
    async fn limit_out_of_range_is_rejected() {
        let client = test_client("http://127.0.0.1:9/v1/");
        let mut args = Map::new();
        args.insert("serviceId".to_string(), json!("srv-1"));
        args.insert("limit".to_string(), json!(500));
        let err = list_deploys(&client, &CallContext::new(), &args)
            .await
            .unwrap_err();
        assert_eq!(err.field.as_deref(), Some("limit"));
    }
}

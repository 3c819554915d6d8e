//! Postgres and Key Value instances.

use harbor_core::pagination::{CursorEnvelope, split_page};
use harbor_core::resources::{
    CreateKeyValueRequest, CreatePostgresRequest, KeyValue, KeyValueWithCursor,
    ListDatastoreParams, Owned, Postgres, PostgresWithCursor, QueryParams,
};
use harbor_core::{HarborError, fetch_all};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

use super::{
    DEFAULT_REGION, REGIONS, ToolDefinition, ToolError, arg_choice, arg_optional_string,
    arg_optional_u64, ensure_workspace_matches, owner_scope, required_choice, required_string,
    selected_owner,
};
use crate::client::ApiClient;
use crate::context::CallContext;

pub(super) fn definitions() -> Vec<ToolDefinition> {
    let list_schema = json!({
        "type": "object",
        "properties": {
            "name": {
                "type": "string",
                "description": "Only return instances with this exact name"
            }
        },
        "additionalProperties": false
    });
    vec![
        ToolDefinition {
            name: "list_postgres_instances",
            title: "List Postgres instances",
            description: "List all Postgres databases in the selected workspace.",
            read_only: true,
            destructive: false,
            idempotent: true,
            input_schema: list_schema.clone(),
        },
        ToolDefinition {
            name: "get_postgres",
            title: "Get Postgres details",
            description: "Get details about a specific Postgres database.",
            read_only: true,
            destructive: false,
            idempotent: true,
            input_schema: json!({
                "type": "object",
                "properties": {
                    "postgresId": { "type": "string", "description": "The ID of the Postgres instance" }
                },
                "required": ["postgresId"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "list_key_value",
            title: "List Key Value instances",
            description: "List all Key Value instances in the selected workspace.",
            read_only: true,
            destructive: false,
            idempotent: true,
            input_schema: list_schema,
        },
        ToolDefinition {
            name: "get_key_value",
            title: "Get Key Value details",
            description: "Get details about a specific Key Value instance.",
            read_only: true,
            destructive: false,
            idempotent: true,
            input_schema: json!({
                "type": "object",
                "properties": {
                    "keyValueId": { "type": "string", "description": "The ID of the Key Value instance" }
                },
                "required": ["keyValueId"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "create_postgres",
            title: "Create Postgres",
            description: "Create a Postgres database in the selected workspace.",
            read_only: false,
            destructive: false,
            idempotent: false,
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "Name of the database instance" },
                    "plan": {
                        "type": "string",
                        "enum": POSTGRES_PLANS,
                        "description": "Instance plan. Custom plans are only available from the dashboard."
                    },
                    "region": {
                        "type": "string",
                        "enum": REGIONS,
                        "description": "Region to create the database in"
                    },
                    "version": {
                        "type": "integer",
                        "minimum": MIN_POSTGRES_VERSION,
                        "maximum": MAX_POSTGRES_VERSION,
                        "default": MAX_POSTGRES_VERSION,
                        "description": "Major Postgres version"
                    },
                    "diskSizeGb": {
                        "type": "integer",
                        "description": "Disk size in GB: 1 or a multiple of 5. Not available on the free plan."
                    }
                },
                "required": ["name", "plan"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "create_key_value",
            title: "Create Key Value",
            description: "Create a Key Value instance in the selected workspace.",
            read_only: false,
            destructive: false,
            idempotent: false,
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "Name of the Key Value instance" },
                    "plan": {
                        "type": "string",
                        "enum": KEY_VALUE_PLANS,
                        "default": "free",
                        "description": "Instance plan. Custom plans are only available from the dashboard."
                    },
                    "region": {
                        "type": "string",
                        "enum": REGIONS,
                        "default": DEFAULT_REGION,
                        "description": "Region to create the instance in"
                    },
                    "maxmemoryPolicy": {
                        "type": "string",
                        "enum": MAXMEMORY_POLICIES,
                        "description": "Eviction policy once the instance reaches its memory limit"
                    }
                },
                "required": ["name", "plan"],
                "additionalProperties": false
            }),
        },
    ]
}

const POSTGRES_PLANS: [&str; 23] = [
    "free",
    "basic_256mb",
    "basic_1gb",
    "basic_4gb",
    "pro_4gb",
    "pro_8gb",
    "pro_16gb",
    "pro_32gb",
    "pro_64gb",
    "pro_128gb",
    "pro_192gb",
    "pro_256gb",
    "pro_384gb",
    "pro_512gb",
    "accelerated_16gb",
    "accelerated_32gb",
    "accelerated_64gb",
    "accelerated_128gb",
    "accelerated_256gb",
    "accelerated_384gb",
    "accelerated_512gb",
    "accelerated_768gb",
    "accelerated_1024gb",
];
const MIN_POSTGRES_VERSION: u64 = 12;
const MAX_POSTGRES_VERSION: u64 = 16;
const KEY_VALUE_PLANS: [&str; 5] = ["free", "starter", "standard", "pro", "pro_plus"];
const MAXMEMORY_POLICIES: [&str; 8] = [
    "noeviction",
    "allkeys_lfu",
    "allkeys_lru",
    "allkeys_random",
    "volatile_lfu",
    "volatile_lru",
    "volatile_random",
    "volatile_ttl",
];

async fn list_all<E>(
    client: &ApiClient,
    ctx: &CallContext,
    collection: &str,
    args: &Map<String, Value>,
) -> Result<Vec<E::Item>, ToolError>
where
    E: CursorEnvelope + DeserializeOwned,
{
    let params = ListDatastoreParams {
        owner_id: owner_scope(ctx).await?,
        name: arg_optional_string(args, "name")?.into_iter().collect(),
        ..Default::default()
    };
    let items = fetch_all(params, |params: ListDatastoreParams| async move {
        let envelopes: Vec<E> = client
            .get_json(ctx, &[collection], &params.query_pairs())
            .await?;
        Ok::<_, HarborError>(split_page(envelopes))
    })
    .await?;
    Ok(items)
}

async fn get_owned<T>(
    client: &ApiClient,
    ctx: &CallContext,
    collection: &str,
    id: &str,
) -> Result<Value, ToolError>
where
    T: Owned + Serialize + DeserializeOwned,
{
    let item: T = client.get_json(ctx, &[collection, id], &[]).await?;
    ensure_workspace_matches(ctx, item.owner_id()).await?;
    Ok(json!(item))
}

pub(super) async fn list_postgres(
    client: &ApiClient,
    ctx: &CallContext,
    args: &Map<String, Value>,
) -> Result<Value, ToolError> {
    let instances: Vec<Postgres> = list_all::<PostgresWithCursor>(client, ctx, "postgres", args).await?;
    Ok(json!(instances))
}

pub(super) async fn get_postgres(
    client: &ApiClient,
    ctx: &CallContext,
    args: &Map<String, Value>,
) -> Result<Value, ToolError> {
    let id = required_string(args, "postgresId")?;
    get_owned::<Postgres>(client, ctx, "postgres", &id).await
}

pub(super) async fn list_key_value(
    client: &ApiClient,
    ctx: &CallContext,
    args: &Map<String, Value>,
) -> Result<Value, ToolError> {
    let instances: Vec<KeyValue> = list_all::<KeyValueWithCursor>(client, ctx, "key-value", args).await?;
    Ok(json!(instances))
}

pub(super) async fn get_key_value(
    client: &ApiClient,
    ctx: &CallContext,
    args: &Map<String, Value>,
) -> Result<Value, ToolError> {
    let id = required_string(args, "keyValueId")?;
    get_owned::<KeyValue>(client, ctx, "key-value", &id).await
}

fn datastore_validation(field: &str, message: impl Into<String>) -> ToolError {
    ToolError::new(harbor_core::error::codes::VALIDATION_FAILED, message).with_field(field)
}

fn plan_choice(args: &Map<String, Value>, allowed: &[&str]) -> Result<String, ToolError> {
    if arg_optional_string(args, "plan")?.as_deref() == Some("custom") {
        return Err(datastore_validation(
            "plan",
            "Custom plans can't be created from here; use the Harbor dashboard",
        ));
    }
    required_choice(args, "plan", allowed)
}

/// 1 or a multiple of 5; the free plan takes no custom size.
fn disk_size(args: &Map<String, Value>, plan: &str) -> Result<Option<u64>, ToolError> {
    match arg_optional_u64(args, "diskSizeGb")? {
        None | Some(0) => Ok(None),
        Some(_) if plan == "free" => Err(datastore_validation(
            "diskSizeGb",
            "Free plan does not support custom disk size",
        )),
        Some(size) if size == 1 || size % 5 == 0 => Ok(Some(size)),
        Some(_) => Err(datastore_validation(
            "diskSizeGb",
            "'diskSizeGb' must be 1 or a multiple of 5",
        )),
    }
}

pub(super) async fn create_postgres(
    client: &ApiClient,
    ctx: &CallContext,
    args: &Map<String, Value>,
) -> Result<Value, ToolError> {
    let name = required_string(args, "name")?;
    let plan = plan_choice(args, &POSTGRES_PLANS)?;
    let disk_size_gb = disk_size(args, &plan)?;
    let version = match arg_optional_u64(args, "version")? {
        None => MAX_POSTGRES_VERSION,
        Some(version) if (MIN_POSTGRES_VERSION..=MAX_POSTGRES_VERSION).contains(&version) => {
            version
        }
        Some(_) => {
            return Err(datastore_validation(
                "version",
                format!("'version' must be between {MIN_POSTGRES_VERSION} and {MAX_POSTGRES_VERSION}"),
            ));
        }
    };
    let request = CreatePostgresRequest {
        name,
        owner_id: selected_owner(ctx).await?,
        plan,
        region: arg_choice(args, "region", &REGIONS)?,
        version: version.to_string(),
        disk_size_gb,
    };

    let created: Postgres = client.post_json(ctx, &["postgres"], &request).await?;
    ensure_workspace_matches(ctx, created.owner_id()).await?;
    tracing::info!(event = "postgres_created", postgres_id = %created.id, "postgres created");
    Ok(json!(created))
}

pub(super) async fn create_key_value(
    client: &ApiClient,
    ctx: &CallContext,
    args: &Map<String, Value>,
) -> Result<Value, ToolError> {
    let request = CreateKeyValueRequest {
        name: required_string(args, "name")?,
        plan: plan_choice(args, &KEY_VALUE_PLANS)?,
        region: arg_choice(args, "region", &REGIONS)?.unwrap_or_else(|| DEFAULT_REGION.to_string()),
        maxmemory_policy: arg_choice(args, "maxmemoryPolicy", &MAXMEMORY_POLICIES)?,
        owner_id: selected_owner(ctx).await?,
    };

    let created: KeyValue = client.post_json(ctx, &["key-value"], &request).await?;
    ensure_workspace_matches(ctx, created.owner_id()).await?;
    tracing::info!(event = "key_value_created", key_value_id = %created.id, "key value created");
    Ok(json!(created))
}

use harbor_core::pagination::split_page;
use harbor_core::resources::{
    CreateServiceRequest, CreatedService, Deploy, EnvVar, EnvVarWithCursor, ListEnvVarsParams,
    ListServicesParams, NativeEnvironmentDetails, Owned, QueryParams, Service, ServiceDetails,
    ServiceWithCursor, StaticSiteDetails, WebServiceDetails,
};
use harbor_core::{HarborError, fetch_all};
use serde_json::{Map, Value, json};

use super::{
    DEFAULT_REGION, REGIONS, ToolDefinition, ToolError, arg_bool, arg_choice, arg_env_vars,
    arg_optional_string, ensure_workspace_matches, env_var_schema, owner_scope, required_choice,
    required_env_vars, required_string, selected_owner,
};
use crate::client::ApiClient;
use crate::context::CallContext;

pub(super) fn definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "list_services",
            title: "List services",
            description: "List all services in the selected workspace.",
            read_only: true,
            destructive: false,
            idempotent: true,
            input_schema: json!({
                "type": "object",
                "properties": {
                    "includePreviews": {
                        "type": "boolean",
                        "default": false,
                        "description": "Whether to include preview services in the response"
                    }
                },
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "get_service",
            title: "Get service details",
            description: "Get details about a specific service.",
            read_only: true,
            destructive: false,
            idempotent: true,
            input_schema: json!({
                "type": "object",
                "properties": {
                    "serviceId": {
                        "type": "string",
                        "description": "The ID of the service to retrieve"
                    }
                },
                "required": ["serviceId"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "create_web_service",
            title: "Create web service",
            description: "Create a web service in the selected workspace from a git repository. Paid plans only; free services are created from the dashboard.",
            read_only: false,
            destructive: false,
            idempotent: false,
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "A unique name for the service" },
                    "runtime": {
                        "type": "string",
                        "enum": RUNTIMES,
                        "description": "Runtime environment the service builds and runs in"
                    },
                    "buildCommand": { "type": "string", "description": "Command that builds the service" },
                    "startCommand": { "type": "string", "description": "Command that starts the service" },
                    "repo": { "type": "string", "description": "Repository URL to deploy from" },
                    "branch": { "type": "string", "description": "Branch to deploy. Defaults to the repository's default branch." },
                    "autoDeploy": {
                        "type": "string",
                        "enum": AUTO_DEPLOY,
                        "default": "yes",
                        "description": "Whether pushes to the branch deploy automatically"
                    },
                    "plan": {
                        "type": "string",
                        "enum": PAID_PLANS,
                        "default": DEFAULT_PLAN,
                        "description": "Instance plan for the service"
                    },
                    "region": {
                        "type": "string",
                        "enum": REGIONS,
                        "default": DEFAULT_REGION,
                        "description": "Region to deploy in"
                    },
                    "envVars": env_var_schema("Environment variables to set on the service")
                },
                "required": ["name", "runtime", "buildCommand", "startCommand"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "create_static_site",
            title: "Create static site",
            description: "Create a static site in the selected workspace from a git repository.",
            read_only: false,
            destructive: false,
            idempotent: false,
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "A unique name for the site" },
                    "buildCommand": { "type": "string", "description": "Command that builds the site" },
                    "publishPath": {
                        "type": "string",
                        "default": DEFAULT_PUBLISH_PATH,
                        "description": "Directory holding the built site, relative to the repository root"
                    },
                    "repo": { "type": "string", "description": "Repository URL to deploy from" },
                    "branch": { "type": "string", "description": "Branch to deploy. Defaults to the repository's default branch." },
                    "autoDeploy": {
                        "type": "string",
                        "enum": AUTO_DEPLOY,
                        "default": "yes",
                        "description": "Whether pushes to the branch deploy automatically"
                    },
                    "envVars": env_var_schema("Environment variables available at build time")
                },
                "required": ["name", "buildCommand"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "update_environment_variables",
            title: "Update environment variables",
            description: "Update a service's environment variables and trigger a deploy to apply them. Variables are merged into the existing set by key unless 'replace' is true, in which case the provided list becomes the whole set.",
            read_only: false,
            destructive: true,
            idempotent: false,
            input_schema: json!({
                "type": "object",
                "properties": {
                    "serviceId": { "type": "string", "description": "The ID of the service to update" },
                    "envVars": env_var_schema("Environment variables to set"),
                    "replace": {
                        "type": "boolean",
                        "default": false,
                        "description": "Replace every existing variable with the provided list instead of merging"
                    }
                },
                "required": ["serviceId", "envVars"],
                "additionalProperties": false
            }),
        },
    ]
}

const RUNTIMES: [&str; 7] = ["node", "python", "go", "rust", "ruby", "elixir", "docker"];
const PAID_PLANS: [&str; 6] = ["starter", "standard", "pro", "pro_max", "pro_plus", "pro_ultra"];
const DEFAULT_PLAN: &str = "starter";
const AUTO_DEPLOY: [&str; 2] = ["yes", "no"];
const DEFAULT_PUBLISH_PATH: &str = "public";
const ENV_VARS_UPDATED: &str =
    "Environment variables updated. A new deploy has been triggered to pick up the changes.";

pub(crate) async fn fetch_services(
    client: &ApiClient,
    ctx: &CallContext,
    include_previews: bool,
) -> Result<Vec<Service>, HarborError> {
    let params = ListServicesParams {
        owner_id: owner_scope(ctx).await?,
        include_previews: Some(include_previews),
        ..Default::default()
    };
    fetch_all(params, |params: ListServicesParams| async move {
        let envelopes: Vec<ServiceWithCursor> = client
            .get_json(ctx, &["services"], &params.query_pairs())
            .await?;
        Ok(split_page(envelopes))
    })
    .await
}

pub(super) async fn list_services(
    client: &ApiClient,
    ctx: &CallContext,
    args: &Map<String, Value>,
) -> Result<Value, ToolError> {
    let include_previews = arg_bool(args, "includePreviews", false)?;
    let services = fetch_services(client, ctx, include_previews).await?;
    Ok(json!(services))
}

pub(super) async fn get_service(
    client: &ApiClient,
    ctx: &CallContext,
    args: &Map<String, Value>,
) -> Result<Value, ToolError> {
    let service_id = required_string(args, "serviceId")?;
    let service: Service = client.get_json(ctx, &["services", &service_id], &[]).await?;
    ensure_workspace_matches(ctx, service.owner_id()).await?;
    Ok(json!(service))
}

/// Fields shared by every service type.
async fn service_request(
    ctx: &CallContext,
    args: &Map<String, Value>,
    service_type: &str,
    service_details: ServiceDetails,
) -> Result<CreateServiceRequest, ToolError> {
    let name = required_string(args, "name")?;
    let repo = arg_optional_string(args, "repo")?;
    let branch = arg_optional_string(args, "branch")?;
    let auto_deploy = arg_choice(args, "autoDeploy", &AUTO_DEPLOY)?;
    let env_vars = arg_env_vars(args, "envVars")?;
    let owner_id = selected_owner(ctx).await?;
    Ok(CreateServiceRequest {
        name,
        owner_id,
        service_type: service_type.to_string(),
        repo,
        branch,
        auto_deploy,
        env_vars,
        service_details,
    })
}

async fn create_service(
    client: &ApiClient,
    ctx: &CallContext,
    request: &CreateServiceRequest,
) -> Result<Value, ToolError> {
    let created: CreatedService = client.post_json(ctx, &["services"], request).await?;
    ensure_workspace_matches(ctx, created.service.owner_id()).await?;
    tracing::info!(
        event = "service_created",
        service_id = %created.service.id,
        service_type = %created.service.service_type,
        "service created"
    );
    Ok(json!(created.service))
}

pub(super) async fn create_web_service(
    client: &ApiClient,
    ctx: &CallContext,
    args: &Map<String, Value>,
) -> Result<Value, ToolError> {
    if arg_optional_string(args, "plan")?.as_deref() == Some("free") {
        return Err(ToolError::new(
            harbor_core::error::codes::VALIDATION_FAILED,
            "Free plans can't be created from here; use the Harbor dashboard for free services",
        )
        .with_field("plan"));
    }
    let details = WebServiceDetails {
        runtime: required_choice(args, "runtime", &RUNTIMES)?,
        plan: arg_choice(args, "plan", &PAID_PLANS)?.unwrap_or_else(|| DEFAULT_PLAN.to_string()),
        region: arg_choice(args, "region", &REGIONS)?.unwrap_or_else(|| DEFAULT_REGION.to_string()),
        env_specific_details: NativeEnvironmentDetails {
            build_command: required_string(args, "buildCommand")?,
            start_command: required_string(args, "startCommand")?,
        },
    };
    let request =
        service_request(ctx, args, "web_service", ServiceDetails::WebService(details)).await?;
    create_service(client, ctx, &request).await
}

pub(super) async fn create_static_site(
    client: &ApiClient,
    ctx: &CallContext,
    args: &Map<String, Value>,
) -> Result<Value, ToolError> {
    let details = StaticSiteDetails {
        build_command: required_string(args, "buildCommand")?,
        publish_path: arg_optional_string(args, "publishPath")?
            .unwrap_or_else(|| DEFAULT_PUBLISH_PATH.to_string()),
    };
    let request =
        service_request(ctx, args, "static_site", ServiceDetails::StaticSite(details)).await?;
    create_service(client, ctx, &request).await
}

/// Overlays `updates` onto `current` by key. Existing keys keep their
/// position; new keys follow in the order given.
fn merge_env_vars(current: Vec<EnvVar>, updates: Vec<EnvVar>) -> Vec<EnvVar> {
    let mut merged = current;
    for update in updates {
        match merged.iter_mut().find(|existing| existing.key == update.key) {
            Some(existing) => existing.value = update.value,
            None => merged.push(update),
        }
    }
    merged
}

async fn fetch_env_vars(
    client: &ApiClient,
    ctx: &CallContext,
    service_id: &str,
) -> Result<Vec<EnvVar>, HarborError> {
    fetch_all(ListEnvVarsParams::default(), |params: ListEnvVarsParams| async move {
        let envelopes: Vec<EnvVarWithCursor> = client
            .get_json(ctx, &["services", service_id, "env-vars"], &params.query_pairs())
            .await?;
        Ok(split_page(envelopes))
    })
    .await
}

pub(super) async fn update_env_vars(
    client: &ApiClient,
    ctx: &CallContext,
    args: &Map<String, Value>,
) -> Result<Value, ToolError> {
    let service_id = required_string(args, "serviceId")?;
    let updates = required_env_vars(args, "envVars")?;
    let replace = arg_bool(args, "replace", false)?;

    let service: Service = client.get_json(ctx, &["services", &service_id], &[]).await?;
    ensure_workspace_matches(ctx, service.owner_id()).await?;

    let env_vars = if replace {
        updates
    } else {
        merge_env_vars(fetch_env_vars(client, ctx, &service_id).await?, updates)
    };
    let _: Value = client
        .put_json(ctx, &["services", &service_id, "env-vars"], &env_vars)
        .await?;
    let deploy: Deploy = client
        .post_json(ctx, &["services", &service_id, "deploys"], &json!({}))
        .await?;
    tracing::info!(
        event = "env_vars_updated",
        service_id = %service_id,
        count = env_vars.len(),
        replace,
        deploy_id = %deploy.id,
        "environment variables updated"
    );

    Ok(Value::String(format!(
        "{ENV_VARS_UPDATED}\n\nDeploy triggered:\n{}",
        super::to_pretty_json(&json!(deploy))
    )))
}

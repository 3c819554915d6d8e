//! MCP tool surface: definitions, argument parsing and dispatch.

use harbor_core::error::{ErrorKind, codes};
use harbor_core::HarborError;
use harbor_core::resources::EnvVar;
use serde_json::{Map, Value, json};

use crate::client::ApiClient;
use crate::context::CallContext;

mod datastores;
mod deploys;
mod logs;
mod metrics;
mod services;
mod workspaces;

pub use logs::tail_logs;

#[derive(Debug)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub read_only: bool,
    pub destructive: bool,
    pub idempotent: bool,
    pub input_schema: Value,
}

impl ToolDefinition {
    pub fn to_value(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema,
            "annotations": {
                "title": self.title,
                "readOnlyHint": self.read_only,
                "destructiveHint": self.destructive,
                "idempotentHint": self.idempotent,
                "openWorldHint": true
            }
        })
    }
}

pub fn tool_definitions() -> Vec<ToolDefinition> {
    let mut tools = workspaces::definitions();
    tools.extend(services::definitions());
    tools.extend(deploys::definitions());
    tools.extend(logs::definitions());
    tools.extend(datastores::definitions());
    tools.extend(metrics::definitions());
    tools
}

pub async fn execute_tool(
    client: &ApiClient,
    ctx: &CallContext,
    name: &str,
    args: &Map<String, Value>,
) -> Result<Value, ToolError> {
    match name {
        "list_workspaces" => workspaces::list_workspaces(client, ctx).await,
        "select_workspace" => workspaces::select_workspace(ctx, args).await,
        "get_selected_workspace" => workspaces::get_selected_workspace(ctx).await,
        "list_services" => services::list_services(client, ctx, args).await,
        "get_service" => services::get_service(client, ctx, args).await,
        "create_web_service" => services::create_web_service(client, ctx, args).await,
        "create_static_site" => services::create_static_site(client, ctx, args).await,
        "update_environment_variables" => services::update_env_vars(client, ctx, args).await,
        "list_deploys" => deploys::list_deploys(client, ctx, args).await,
        "get_deploy" => deploys::get_deploy(client, ctx, args).await,
        "list_logs" => logs::list_logs(client, ctx, args).await,
        "list_log_label_values" => logs::list_log_label_values(client, ctx, args).await,
        "tail_logs" => logs::tail_logs_tool(client, ctx, args).await,
        "list_postgres_instances" => datastores::list_postgres(client, ctx, args).await,
        "get_postgres" => datastores::get_postgres(client, ctx, args).await,
        "list_key_value" => datastores::list_key_value(client, ctx, args).await,
        "get_key_value" => datastores::get_key_value(client, ctx, args).await,
        "create_postgres" => datastores::create_postgres(client, ctx, args).await,
        "create_key_value" => datastores::create_key_value(client, ctx, args).await,
        "get_metrics" => metrics::get_metrics(client, ctx, args).await,
        _ => Err(ToolError::new("unknown_tool", format!("Unknown tool '{name}'"))
            .with_field("name")
            .with_docs_hint("Call tools/list for the available tools.")),
    }
}

/// MCP `tools/call` result for a handler outcome.
pub fn build_tool_call_response(outcome: Result<Value, ToolError>) -> Value {
    match outcome {
        Ok(Value::String(text)) => json!({
            "content": [{ "type": "text", "text": text }]
        }),
        Ok(payload) => {
            let mut response = json!({
                "content": [{ "type": "text", "text": to_pretty_json(&payload) }]
            });
            if payload.is_object() {
                response["structuredContent"] = payload;
            }
            response
        }
        Err(err) => {
            let mut text = err.message.clone();
            if let Some(hint) = &err.docs_hint {
                text = format!("{text}\n\n{hint}");
            }
            json!({
                "isError": true,
                "content": [{ "type": "text", "text": text }],
                "structuredContent": err.to_value()
            })
        }
    }
}

pub(crate) fn to_pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

#[derive(Debug, Clone)]
pub struct ToolError {
    pub code: String,
    pub message: String,
    pub field: Option<String>,
    pub docs_hint: Option<String>,
}

impl ToolError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            field: None,
            docs_hint: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_docs_hint(mut self, docs_hint: impl Into<String>) -> Self {
        self.docs_hint = Some(docs_hint.into());
        self
    }

    pub fn to_value(&self) -> Value {
        let mut payload = json!({
            "error": self.code,
            "message": self.message
        });
        if let Some(field) = &self.field {
            payload["field"] = Value::String(field.clone());
        }
        if let Some(docs_hint) = &self.docs_hint {
            payload["docs_hint"] = Value::String(docs_hint.clone());
        }
        payload
    }
}

impl From<HarborError> for ToolError {
    fn from(err: HarborError) -> Self {
        let hint = match err.kind() {
            ErrorKind::NoWorkspace => Some(
                "Call list_workspaces, ask the user which workspace to use, then call select_workspace.",
            ),
            ErrorKind::NotAuthenticated => {
                Some("Create an API key in the Harbor dashboard under Account Settings.")
            }
            _ => match &err {
                HarborError::Unauthorized => Some("The API key was rejected; verify HARBOR_API_KEY."),
                HarborError::Forbidden => {
                    Some("The API key has no access to this resource or workspace.")
                }
                _ => None,
            },
        };
        let tool_error = ToolError::new(err.code(), err.to_string());
        match hint {
            Some(hint) => tool_error.with_docs_hint(hint),
            None => tool_error,
        }
    }
}

/// Fails when the selected workspace differs from the resource's owner.
///
/// A session without a selection fails with [`HarborError::NoWorkspace`].
/// Only a call with no session at all (scoping disabled) skips the check.
pub(crate) async fn ensure_workspace_matches(
    ctx: &CallContext,
    resource_owner: &str,
) -> Result<(), HarborError> {
    match ctx.workspace_scope().await? {
        Some(selected) if selected != resource_owner => Err(HarborError::WorkspaceMismatch {
            selected,
            resource: resource_owner.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Owner filter for list calls: the selected workspace, or none when scoping
/// is disabled for this call.
pub(crate) async fn owner_scope(ctx: &CallContext) -> Result<Vec<String>, HarborError> {
    Ok(ctx.workspace_scope().await?.into_iter().collect())
}

/// Workspace that owns what a call creates or reads workspace-wide. Unlike
/// [`owner_scope`], a call with no session cannot proceed.
pub(crate) async fn selected_owner(ctx: &CallContext) -> Result<String, HarborError> {
    ctx.workspace_scope()
        .await?
        .ok_or(HarborError::SessionUnavailable)
}

pub(crate) const REGIONS: [&str; 5] = ["oregon", "frankfurt", "singapore", "ohio", "virginia"];
pub(crate) const DEFAULT_REGION: &str = "oregon";

fn validation_error(key: &str, message: String) -> ToolError {
    ToolError::new(codes::VALIDATION_FAILED, message).with_field(key)
}

pub(crate) fn arg_bool(args: &Map<String, Value>, key: &str, default: bool) -> Result<bool, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(v)) => Ok(*v),
        Some(_) => Err(validation_error(key, format!("'{key}' must be a boolean"))),
    }
}

pub(crate) fn required_string(args: &Map<String, Value>, key: &str) -> Result<String, ToolError> {
    let value = args
        .get(key)
        .ok_or_else(|| validation_error(key, format!("Missing required field '{key}'")))?;
    match value {
        Value::String(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        Value::String(_) => Err(validation_error(key, format!("'{key}' must not be empty"))),
        _ => Err(validation_error(key, format!("'{key}' must be a string"))),
    }
}

pub(crate) fn arg_optional_string(
    args: &Map<String, Value>,
    key: &str,
) -> Result<Option<String>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(v)) if v.trim().is_empty() => Ok(None),
        Some(Value::String(v)) => Ok(Some(v.trim().to_string())),
        Some(_) => Err(validation_error(key, format!("'{key}' must be a string"))),
    }
}

pub(crate) fn arg_optional_u64(
    args: &Map<String, Value>,
    key: &str,
) -> Result<Option<u64>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64))
            .map(Some)
            .ok_or_else(|| validation_error(key, format!("'{key}' must be an unsigned integer"))),
        Some(_) => Err(validation_error(
            key,
            format!("'{key}' must be an unsigned integer"),
        )),
    }
}

/// Optional array of strings; blank items are dropped.
pub(crate) fn arg_string_array(
    args: &Map<String, Value>,
    key: &str,
) -> Result<Vec<String>, ToolError> {
    let Some(value) = args.get(key) else {
        return Ok(Vec::new());
    };
    if value.is_null() {
        return Ok(Vec::new());
    }
    let items = value
        .as_array()
        .ok_or_else(|| validation_error(key, format!("'{key}' must be an array of strings")))?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let text = item
            .as_str()
            .ok_or_else(|| validation_error(key, format!("'{key}' items must be strings")))?;
        let normalized = text.trim();
        if !normalized.is_empty() {
            out.push(normalized.to_string());
        }
    }
    Ok(out)
}

/// Optional string restricted to `allowed`.
pub(crate) fn arg_choice(
    args: &Map<String, Value>,
    key: &str,
    allowed: &[&str],
) -> Result<Option<String>, ToolError> {
    arg_optional_string(args, key)?
        .map(|value| one_of(key, value, allowed))
        .transpose()
}

pub(crate) fn required_choice(
    args: &Map<String, Value>,
    key: &str,
    allowed: &[&str],
) -> Result<String, ToolError> {
    one_of(key, required_string(args, key)?, allowed)
}

fn one_of(key: &str, value: String, allowed: &[&str]) -> Result<String, ToolError> {
    if allowed.contains(&value.as_str()) {
        Ok(value)
    } else {
        Err(validation_error(
            key,
            format!("'{key}' must be one of: {}", allowed.join(", ")),
        ))
    }
}

pub(crate) fn arg_optional_f64(
    args: &Map<String, Value>,
    key: &str,
) -> Result<Option<f64>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(_) => Err(validation_error(key, format!("'{key}' must be a number"))),
    }
}

/// `[{ "key": ..., "value": ... }]`; absent or null reads as empty.
pub(crate) fn arg_env_vars(args: &Map<String, Value>, key: &str) -> Result<Vec<EnvVar>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => serde_json::from_value(value.clone()).map_err(|_| {
            validation_error(
                key,
                format!("'{key}' must be an array of objects with string 'key' and 'value'"),
            )
        }),
    }
}

pub(crate) fn required_env_vars(
    args: &Map<String, Value>,
    key: &str,
) -> Result<Vec<EnvVar>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Err(validation_error(
            key,
            format!("Missing required field '{key}'"),
        )),
        Some(_) => arg_env_vars(args, key),
    }
}

pub(crate) fn env_var_schema(description: &str) -> Value {
    json!({
        "type": "array",
        "description": description,
        "items": {
            "type": "object",
            "properties": {
                "key": { "type": "string" },
                "value": { "type": "string" }
            },
            "required": ["key", "value"],
            "additionalProperties": false
        }
    })
}

/// Bounded integer argument with a default.
pub(crate) fn arg_bounded_u64(
    args: &Map<String, Value>,
    key: &str,
    default: u64,
    max: u64,
) -> Result<u64, ToolError> {
    match arg_optional_u64(args, key)? {
        None => Ok(default),
        Some(0) => Err(validation_error(key, format!("'{key}' must be at least 1"))),
        Some(value) if value > max => Err(validation_error(
            key,
            format!("'{key}' must be at most {max}"),
        )),
        Some(value) => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::InMemoryStore;
    use crate::testing::open_session;
    use std::collections::HashSet;

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn tool_names_are_unique_and_schemas_are_objects() {
        let definitions = tool_definitions();
        let names: HashSet<_> = definitions.iter().map(|tool| tool.name).collect();
        assert_eq!(names.len(), definitions.len());
        for tool in &definitions {
            assert_eq!(tool.input_schema["type"], "object", "{}", tool.name);
        }
        assert!(names.contains("select_workspace"));
        assert!(names.contains("tail_logs"));
        for name in [
            "create_web_service",
            "create_static_site",
            "update_environment_variables",
            "create_postgres",
            "create_key_value",
            "list_log_label_values",
            "get_metrics",
        ] {
            assert!(names.contains(name), "{name}");
        }
    }

    #[test]
    fn annotations_follow_the_definition() {
        let definitions = tool_definitions();
        let find = |name: &str| {
            definitions
                .iter()
                .find(|tool| tool.name == name)
                .map(ToolDefinition::to_value)
                .unwrap()
        };
        let read = find("list_services");
        assert_eq!(read["annotations"]["readOnlyHint"], true);
        assert_eq!(read["annotations"]["idempotentHint"], true);

        let create = find("create_postgres");
        assert_eq!(create["annotations"]["readOnlyHint"], false);
        assert_eq!(create["annotations"]["idempotentHint"], false);

        let update = find("update_environment_variables");
        assert_eq!(update["annotations"]["destructiveHint"], true);
    }

    #[test]
    fn argument_validation() {
        let a = args(json!({
            "id": "  srv-1 ",
            "blank": " ",
            "flag": true,
            "n": 5,
            "neg": -1,
            "list": ["a", " ", "b"],
            "bad_list": [1]
        }));
        assert_eq!(required_string(&a, "id").unwrap(), "srv-1");
        assert_eq!(required_string(&a, "missing").unwrap_err().field.as_deref(), Some("missing"));
        assert!(required_string(&a, "blank").is_err());
        assert_eq!(arg_optional_string(&a, "blank").unwrap(), None);
        assert!(arg_bool(&a, "flag", false).unwrap());
        assert!(arg_bool(&a, "n", false).is_err());
        assert_eq!(arg_optional_u64(&a, "n").unwrap(), Some(5));
        assert!(arg_optional_u64(&a, "neg").is_err());
        assert_eq!(arg_string_array(&a, "list").unwrap(), vec!["a", "b"]);
        assert!(arg_string_array(&a, "bad_list").is_err());
        assert_eq!(arg_bounded_u64(&a, "n", 10, 100).unwrap(), 5);
        assert_eq!(arg_bounded_u64(&a, "missing", 10, 100).unwrap(), 10);
        assert!(arg_bounded_u64(&a, "n", 10, 3).is_err());

        let c = args(json!({
            "region": "ohio",
            "bad_region": "mars",
            "q": 0.5,
            "env": [{ "key": "A", "value": "1" }],
            "bad_env": [{ "key": "A" }]
        }));
        assert_eq!(arg_choice(&c, "region", &REGIONS).unwrap().as_deref(), Some("ohio"));
        assert_eq!(arg_choice(&c, "missing", &REGIONS).unwrap(), None);
        assert_eq!(required_choice(&c, "region", &REGIONS).unwrap(), "ohio");
        assert!(required_choice(&c, "missing", &REGIONS).is_err());
        let err = arg_choice(&c, "bad_region", &REGIONS).unwrap_err();
        assert!(err.message.contains("oregon"));
        assert_eq!(arg_optional_f64(&c, "q").unwrap(), Some(0.5));
        assert!(arg_optional_f64(&c, "region").is_err());
        assert_eq!(arg_env_vars(&c, "env").unwrap()[0].value, "1");
        assert!(arg_env_vars(&c, "missing").unwrap().is_empty());
        assert!(required_env_vars(&c, "missing").is_err());
        assert_eq!(arg_env_vars(&c, "bad_env").unwrap_err().field.as_deref(), Some("bad_env"));
    }

    #[test]
    fn harbor_errors_become_instructive_tool_errors() {
        let err = ToolError::from(HarborError::NoWorkspace);
        assert_eq!(err.code, codes::NO_WORKSPACE);
        assert!(err.docs_hint.unwrap().contains("select_workspace"));

        let err = ToolError::from(HarborError::Api {
            status: 404,
            message: "not found".to_string(),
        });
        assert_eq!(err.message, "received response code 404: not found");
        assert_eq!(err.docs_hint, None);
    }

    #[test]
    fn tool_call_response_shapes() {
        let text = build_tool_call_response(Ok(Value::String("Workspace selected".to_string())));
        assert_eq!(text["content"][0]["text"], "Workspace selected");
        assert!(text.get("isError").is_none());

        let object = build_tool_call_response(Ok(json!({ "id": "srv-1" })));
        assert_eq!(object["structuredContent"]["id"], "srv-1");

        let error = build_tool_call_response(Err(ToolError::from(HarborError::NotAuthenticated)));
        assert_eq!(error["isError"], true);
        assert_eq!(error["structuredContent"]["error"], codes::NOT_AUTHENTICATED);
        let text = error["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("HARBOR_API_KEY"));
    }

    #[tokio::test]
    async fn workspace_match_rules() {
        let no_session = CallContext::new();
        assert!(ensure_workspace_matches(&no_session, "tea-1").await.is_ok());

        let store = InMemoryStore::new();
        let ctx = CallContext::new().with_session(open_session(&store, "c").await);
        assert!(matches!(
            ensure_workspace_matches(&ctx, "tea-1").await,
            Err(HarborError::NoWorkspace)
        ));

        ctx.select_workspace("tea-1").await.unwrap();
        assert!(ensure_workspace_matches(&ctx, "tea-1").await.is_ok());
        let err = ensure_workspace_matches(&ctx, "tea-2").await.unwrap_err();
        assert!(matches!(err, HarborError::WorkspaceMismatch { .. }));
        let text = err.to_string();
        assert!(text.contains("tea-1") && text.contains("tea-2"));
    }
}

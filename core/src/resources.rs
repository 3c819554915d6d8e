//! Harbor API models and list parameters.
//!
//! Only the fields the tool surface reads are typed; everything else the API
//! returns is kept in `extra` so tool output stays lossless.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::pagination::{Cursor, CursorEnvelope, PageParams};

/// Anything that belongs to a workspace.
pub trait Owned {
    fn owner_id(&self) -> &str;
}

/// A workspace (user or team account).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Owner {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub owner_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    #[serde(rename = "type", default)]
    pub service_type: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Owned for Service {
    fn owner_id(&self) -> &str {
        &self.owner_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deploy {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Postgres {
    pub id: String,
    pub name: String,
    pub owner: Owner,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Owned for Postgres {
    fn owner_id(&self) -> &str {
        &self.owner.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyValue {
    pub id: String,
    pub name: String,
    pub owner: Owner,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Owned for KeyValue {
    fn owner_id(&self) -> &str {
        &self.owner.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogLabel {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    #[serde(default)]
    pub id: Option<String>,
    pub timestamp: String,
    pub message: String,
    #[serde(default)]
    pub labels: Vec<LogLabel>,
}

/// One page of the time-windowed log listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsPage {
    #[serde(default)]
    pub has_more: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_end_time: Option<String>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
}

/// Body of `POST /services`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateServiceRequest {
    pub name: String,
    pub owner_id: String,
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// `yes` or `no`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_deploy: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env_vars: Vec<EnvVar>,
    pub service_details: ServiceDetails,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ServiceDetails {
    WebService(WebServiceDetails),
    StaticSite(StaticSiteDetails),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebServiceDetails {
    pub runtime: String,
    pub plan: String,
    pub region: String,
    pub env_specific_details: NativeEnvironmentDetails,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeEnvironmentDetails {
    pub build_command: String,
    pub start_command: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticSiteDetails {
    pub build_command: String,
    pub publish_path: String,
}

/// 201 body of `POST /services`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedService {
    pub service: Service,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_id: Option<String>,
}

/// Body of `POST /postgres`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePostgresRequest {
    pub name: String,
    pub owner_id: String,
    pub plan: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Major version, sent as a string.
    pub version: String,
    #[serde(rename = "diskSizeGB", skip_serializing_if = "Option::is_none")]
    pub disk_size_gb: Option<u64>,
}

/// Body of `POST /key-value`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateKeyValueRequest {
    pub name: String,
    pub owner_id: String,
    pub plan: String,
    pub region: String,
    #[serde(rename = "maxmemoryPolicy", skip_serializing_if = "Option::is_none")]
    pub maxmemory_policy: Option<String>,
}

macro_rules! cursor_envelope {
    ($name:ident, $field:ident, $item:ty) => {
        #[derive(Debug, Clone, Serialize, Deserialize)]
        #[serde(rename_all = "camelCase")]
        pub struct $name {
            pub cursor: Cursor,
            pub $field: $item,
        }

        impl CursorEnvelope for $name {
            type Item = $item;

            fn into_parts(self) -> ($item, Cursor) {
                (self.$field, self.cursor)
            }
        }
    };
}

cursor_envelope!(OwnerWithCursor, owner, Owner);
cursor_envelope!(ServiceWithCursor, service, Service);
cursor_envelope!(DeployWithCursor, deploy, Deploy);
cursor_envelope!(PostgresWithCursor, postgres, Postgres);
cursor_envelope!(KeyValueWithCursor, key_value, KeyValue);
cursor_envelope!(EnvVarWithCursor, env_var, EnvVar);

/// Query string pairs for a list request.
pub trait QueryParams {
    fn query_pairs(&self) -> Vec<(&'static str, String)>;
}

fn push_paging(pairs: &mut Vec<(&'static str, String)>, cursor: &Option<Cursor>, limit: Option<u32>) {
    if let Some(cursor) = cursor {
        pairs.push(("cursor", cursor.to_string()));
    }
    if let Some(limit) = limit {
        pairs.push(("limit", limit.to_string()));
    }
}

fn push_all(pairs: &mut Vec<(&'static str, String)>, key: &'static str, values: &[String]) {
    pairs.extend(values.iter().map(|value| (key, value.clone())));
}

#[derive(Debug, Clone, Default)]
pub struct ListOwnersParams {
    pub cursor: Option<Cursor>,
    pub limit: Option<u32>,
}

impl PageParams for ListOwnersParams {
    fn set_cursor(&mut self, cursor: Option<Cursor>) {
        self.cursor = cursor;
    }

    fn set_limit(&mut self, limit: u32) {
        self.limit = Some(limit);
    }
}

impl QueryParams for ListOwnersParams {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        push_paging(&mut pairs, &self.cursor, self.limit);
        pairs
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListServicesParams {
    pub owner_id: Vec<String>,
    pub include_previews: Option<bool>,
    pub cursor: Option<Cursor>,
    pub limit: Option<u32>,
}

impl PageParams for ListServicesParams {
    fn set_cursor(&mut self, cursor: Option<Cursor>) {
        self.cursor = cursor;
    }

    fn set_limit(&mut self, limit: u32) {
        self.limit = Some(limit);
    }
}

impl QueryParams for ListServicesParams {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        push_all(&mut pairs, "ownerId", &self.owner_id);
        if let Some(include_previews) = self.include_previews {
            pairs.push(("includePreviews", include_previews.to_string()));
        }
        push_paging(&mut pairs, &self.cursor, self.limit);
        pairs
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListDeploysParams {
    pub cursor: Option<Cursor>,
    pub limit: Option<u32>,
}

impl PageParams for ListDeploysParams {
    fn set_cursor(&mut self, cursor: Option<Cursor>) {
        self.cursor = cursor;
    }

    fn set_limit(&mut self, limit: u32) {
        self.limit = Some(limit);
    }
}

impl QueryParams for ListDeploysParams {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        push_paging(&mut pairs, &self.cursor, self.limit);
        pairs
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListEnvVarsParams {
    pub cursor: Option<Cursor>,
    pub limit: Option<u32>,
}

impl PageParams for ListEnvVarsParams {
    fn set_cursor(&mut self, cursor: Option<Cursor>) {
        self.cursor = cursor;
    }

    fn set_limit(&mut self, limit: u32) {
        self.limit = Some(limit);
    }
}

impl QueryParams for ListEnvVarsParams {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        push_paging(&mut pairs, &self.cursor, self.limit);
        pairs
    }
}

/// Shared by the Postgres and Key Value listings.
#[derive(Debug, Clone, Default)]
pub struct ListDatastoreParams {
    pub owner_id: Vec<String>,
    pub name: Vec<String>,
    pub cursor: Option<Cursor>,
    pub limit: Option<u32>,
}

impl PageParams for ListDatastoreParams {
    fn set_cursor(&mut self, cursor: Option<Cursor>) {
        self.cursor = cursor;
    }

    fn set_limit(&mut self, limit: u32) {
        self.limit = Some(limit);
    }
}

impl QueryParams for ListDatastoreParams {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        push_all(&mut pairs, "ownerId", &self.owner_id);
        push_all(&mut pairs, "name", &self.name);
        push_paging(&mut pairs, &self.cursor, self.limit);
        pairs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogDirection {
    Backward,
    Forward,
}

impl LogDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Backward => "backward",
            Self::Forward => "forward",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "backward" => Some(Self::Backward),
            "forward" => Some(Self::Forward),
            _ => None,
        }
    }
}

/// Filters for both the log listing and the log stream.
#[derive(Debug, Clone, Default)]
pub struct ListLogsParams {
    pub owner_id: String,
    pub resource: Vec<String>,
    pub level: Vec<String>,
    pub log_type: Vec<String>,
    pub instance: Vec<String>,
    pub host: Vec<String>,
    pub status_code: Vec<String>,
    pub method: Vec<String>,
    pub path: Vec<String>,
    pub text: Vec<String>,
    /// RFC3339 timestamps.
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub direction: Option<LogDirection>,
    pub limit: Option<u32>,
}

impl QueryParams for ListLogsParams {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("ownerId", self.owner_id.clone())];
        push_all(&mut pairs, "resource", &self.resource);
        push_all(&mut pairs, "level", &self.level);
        push_all(&mut pairs, "type", &self.log_type);
        push_all(&mut pairs, "instance", &self.instance);
        push_all(&mut pairs, "host", &self.host);
        push_all(&mut pairs, "statusCode", &self.status_code);
        push_all(&mut pairs, "method", &self.method);
        push_all(&mut pairs, "path", &self.path);
        push_all(&mut pairs, "text", &self.text);
        if let Some(start_time) = &self.start_time {
            pairs.push(("startTime", start_time.clone()));
        }
        if let Some(end_time) = &self.end_time {
            pairs.push(("endTime", end_time.clone()));
        }
        if let Some(direction) = self.direction {
            pairs.push(("direction", direction.as_str().to_string()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        pairs
    }
}

/// Query for one metric endpoint. `aggregation_method` only applies to CPU
/// usage; the HTTP fields only to request counts and latency.
#[derive(Debug, Clone, Default)]
pub struct MetricsQuery {
    pub resource: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub resolution_seconds: Option<u64>,
    pub aggregation_method: Option<String>,
    pub aggregate_by: Option<String>,
    pub quantile: Option<f64>,
    pub host: Option<String>,
    pub path: Option<String>,
}

impl QueryParams for MetricsQuery {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("resource", self.resource.clone())];
        let optional = [
            ("startTime", &self.start_time),
            ("endTime", &self.end_time),
            ("aggregationMethod", &self.aggregation_method),
            ("aggregateBy", &self.aggregate_by),
            ("host", &self.host),
            ("path", &self.path),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                pairs.push((key, value.clone()));
            }
        }
        if let Some(resolution) = self.resolution_seconds {
            pairs.push(("resolutionSeconds", resolution.to_string()));
        }
        if let Some(quantile) = self.quantile {
            pairs.push(("quantile", quantile.to_string()));
        }
        pairs
    }
}

//! Time series metrics for services and datastores.

use harbor_core::resources::{MetricsQuery, QueryParams};
use serde_json::{Map, Value, json};

use super::logs::arg_timestamp;
use super::{
    ToolDefinition, ToolError, arg_choice, arg_optional_f64, arg_optional_string,
    arg_optional_u64, arg_string_array, required_string, selected_owner,
};
use crate::client::ApiClient;
use crate::context::CallContext;

const MIN_RESOLUTION_SECONDS: u64 = 30;
const DEFAULT_LATENCY_QUANTILE: f64 = 0.95;
const AGGREGATION_METHODS: [&str; 3] = ["AVG", "MAX", "MIN"];
const HTTP_AGGREGATIONS: [&str; 2] = ["host", "statusCode"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetricType {
    CpuUsage,
    MemoryUsage,
    HttpRequestCount,
    ActiveConnections,
    InstanceCount,
    HttpLatency,
    CpuLimit,
    CpuTarget,
    MemoryLimit,
    MemoryTarget,
}

impl MetricType {
    const ALL: [MetricType; 10] = [
        Self::CpuUsage,
        Self::MemoryUsage,
        Self::HttpRequestCount,
        Self::ActiveConnections,
        Self::InstanceCount,
        Self::HttpLatency,
        Self::CpuLimit,
        Self::CpuTarget,
        Self::MemoryLimit,
        Self::MemoryTarget,
    ];

    fn as_str(self) -> &'static str {
        match self {
            Self::CpuUsage => "cpu_usage",
            Self::MemoryUsage => "memory_usage",
            Self::HttpRequestCount => "http_request_count",
            Self::ActiveConnections => "active_connections",
            Self::InstanceCount => "instance_count",
            Self::HttpLatency => "http_latency",
            Self::CpuLimit => "cpu_limit",
            Self::CpuTarget => "cpu_target",
            Self::MemoryLimit => "memory_limit",
            Self::MemoryTarget => "memory_target",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|metric| metric.as_str() == raw)
    }

    /// Path segment under `metrics/`.
    fn endpoint(self) -> &'static str {
        match self {
            Self::CpuUsage => "cpu",
            Self::MemoryUsage => "memory",
            Self::HttpRequestCount => "http-requests",
            Self::ActiveConnections => "active-connections",
            Self::InstanceCount => "instance-count",
            Self::HttpLatency => "http-latency",
            Self::CpuLimit => "cpu-limit",
            Self::CpuTarget => "cpu-target",
            Self::MemoryLimit => "memory-limit",
            Self::MemoryTarget => "memory-target",
        }
    }
}

pub(super) fn definitions() -> Vec<ToolDefinition> {
    let metric_names: Vec<&str> = MetricType::ALL.iter().map(|metric| metric.as_str()).collect();
    vec![ToolDefinition {
        name: "get_metrics",
        title: "Get metrics",
        description: "Get performance metrics for a service, Postgres or Key Value instance: CPU and memory usage and their limits and targets, instance counts, HTTP request counts and latency, and datastore connections.",
        read_only: true,
        destructive: false,
        idempotent: true,
        input_schema: json!({
            "type": "object",
            "properties": {
                "resourceId": {
                    "type": "string",
                    "description": "ID of the service, Postgres or Key Value instance"
                },
                "metricTypes": {
                    "type": "array",
                    "items": { "type": "string", "enum": metric_names },
                    "minItems": 1,
                    "description": "Metrics to fetch. HTTP metrics apply to web services, active_connections to datastores."
                },
                "startTime": {
                    "type": "string",
                    "description": "Start of the window (RFC3339), within the last 30 days. Defaults to one hour ago."
                },
                "endTime": {
                    "type": "string",
                    "description": "End of the window (RFC3339), within the last 30 days. Defaults to now."
                },
                "resolution": {
                    "type": "integer",
                    "minimum": MIN_RESOLUTION_SECONDS,
                    "description": "Seconds between data points; the API defaults to 60. Raise it if the API reports too many points."
                },
                "cpuUsageAggregationMethod": {
                    "type": "string",
                    "enum": AGGREGATION_METHODS,
                    "default": "AVG",
                    "description": "How cpu_usage values are aggregated within each interval"
                },
                "aggregateHttpRequestCountsBy": {
                    "type": "string",
                    "enum": HTTP_AGGREGATIONS,
                    "description": "Split http_request_count by host or status code. Totals when omitted."
                },
                "httpLatencyQuantile": {
                    "type": "number",
                    "minimum": 0,
                    "maximum": 1,
                    "default": DEFAULT_LATENCY_QUANTILE,
                    "description": "Latency quantile for http_latency, e.g. 0.5 or 0.99"
                },
                "httpHost": {
                    "type": "string",
                    "description": "Only count requests to this host (HTTP metrics only)"
                },
                "httpPath": {
                    "type": "string",
                    "description": "Only count requests to this path (HTTP metrics only)"
                }
            },
            "required": ["resourceId", "metricTypes"],
            "additionalProperties": false
        }),
    }]
}

fn metrics_validation(field: &str, message: impl Into<String>) -> ToolError {
    ToolError::new(harbor_core::error::codes::VALIDATION_FAILED, message).with_field(field)
}

/// Validated arguments, shared by every metric fetched in one call.
#[derive(Debug)]
struct MetricsRequest {
    resource_id: String,
    metric_types: Vec<MetricType>,
    start_time: Option<String>,
    end_time: Option<String>,
    resolution_seconds: Option<u64>,
    aggregation_method: Option<String>,
    aggregate_by: Option<String>,
    quantile: f64,
    host: Option<String>,
    path: Option<String>,
}

impl MetricsRequest {
    fn from_args(args: &Map<String, Value>) -> Result<Self, ToolError> {
        let resource_id = required_string(args, "resourceId")?;
        let mut metric_types = Vec::new();
        for raw in arg_string_array(args, "metricTypes")? {
            let metric = MetricType::parse(&raw).ok_or_else(|| {
                metrics_validation("metricTypes", format!("unsupported metric type '{raw}'"))
            })?;
            if !metric_types.contains(&metric) {
                metric_types.push(metric);
            }
        }
        if metric_types.is_empty() {
            return Err(metrics_validation(
                "metricTypes",
                "'metricTypes' must list at least one metric",
            ));
        }

        let resolution_seconds = match arg_optional_u64(args, "resolution")? {
            Some(seconds) if seconds < MIN_RESOLUTION_SECONDS => {
                return Err(metrics_validation(
                    "resolution",
                    format!("'resolution' must be at least {MIN_RESOLUTION_SECONDS} seconds"),
                ));
            }
            resolution => resolution,
        };
        let quantile = match arg_optional_f64(args, "httpLatencyQuantile")? {
            None => DEFAULT_LATENCY_QUANTILE,
            Some(quantile) if (0.0..=1.0).contains(&quantile) => quantile,
            Some(_) => {
                return Err(metrics_validation(
                    "httpLatencyQuantile",
                    "'httpLatencyQuantile' must be between 0 and 1",
                ));
            }
        };

        Ok(Self {
            resource_id,
            metric_types,
            start_time: arg_timestamp(args, "startTime")?,
            end_time: arg_timestamp(args, "endTime")?,
            resolution_seconds,
            aggregation_method: arg_choice(args, "cpuUsageAggregationMethod", &AGGREGATION_METHODS)?,
            aggregate_by: arg_choice(args, "aggregateHttpRequestCountsBy", &HTTP_AGGREGATIONS)?,
            quantile,
            host: arg_optional_string(args, "httpHost")?,
            path: arg_optional_string(args, "httpPath")?,
        })
    }

    /// Query for one metric; options only reach the endpoints that take them.
    fn query_for(&self, metric: MetricType) -> MetricsQuery {
        let mut query = MetricsQuery {
            resource: self.resource_id.clone(),
            start_time: self.start_time.clone(),
            end_time: self.end_time.clone(),
            resolution_seconds: self.resolution_seconds,
            ..Default::default()
        };
        match metric {
            MetricType::CpuUsage => query.aggregation_method = self.aggregation_method.clone(),
            MetricType::HttpRequestCount => {
                query.aggregate_by = self.aggregate_by.clone();
                query.host = self.host.clone();
                query.path = self.path.clone();
            }
            MetricType::HttpLatency => {
                query.quantile = Some(self.quantile);
                query.host = self.host.clone();
                query.path = self.path.clone();
            }
            _ => {}
        }
        query
    }
}

async fn fetch_metric(
    client: &ApiClient,
    ctx: &CallContext,
    request: &MetricsRequest,
    metric: MetricType,
) -> Result<Value, ToolError> {
    let query = request.query_for(metric).query_pairs();
    let response = client
        .get::<Value>(ctx, &["metrics", metric.endpoint()], &query)
        .await?;
    // Latency is a paid-tier metric; other tiers get a 400.
    if metric == MetricType::HttpLatency && response.status() == 400 {
        tracing::debug!(event = "metric_unavailable", metric = metric.as_str(), "latency not available");
        return Ok(json!([]));
    }
    Ok(response.into_result()?)
}

pub(super) async fn get_metrics(
    client: &ApiClient,
    ctx: &CallContext,
    args: &Map<String, Value>,
) -> Result<Value, ToolError> {
    let request = MetricsRequest::from_args(args)?;
    selected_owner(ctx).await?;

    let mut metrics = Vec::with_capacity(request.metric_types.len());
    for metric in &request.metric_types {
        let data = fetch_metric(client, ctx, &request, *metric)
            .await
            .map_err(|mut err| {
                err.message = format!("failed to fetch {} metrics: {}", metric.as_str(), err.message);
                err
            })?;
        metrics.push(json!({ "type": metric.as_str(), "data": data }));
    }

    let mut time_range = Map::new();
    if let Some(start) = &request.start_time {
        time_range.insert("start".to_string(), json!(start));
    }
    if let Some(end) = &request.end_time {
        time_range.insert("end".to_string(), json!(end));
    }
    Ok(json!({
        "resourceId": request.resource_id,
        "timeRange": time_range,
        "metrics": metrics,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::InMemoryStore;
    use crate::testing::{open_session, serve, test_client};
    use axum::extract::{Path, Query};
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    async fn scoped_ctx() -> CallContext {
        let store = InMemoryStore::new();
        let ctx = CallContext::new()
            .with_api_token("k")
            .with_session(open_session(&store, "c").await);
        ctx.select_workspace("tea-1").await.unwrap();
        ctx
    }

    type Seen = Arc<Mutex<Vec<(String, HashMap<String, String>)>>>;

    /// Answers every metric endpoint with one point, except latency which
    /// answers with `latency_status`.
    fn metrics_api(seen: Seen, latency_status: StatusCode) -> Router {
        Router::new().route(
            "/v1/metrics/{kind}",
            get(move |Path(kind): Path<String>, Query(query): Query<HashMap<String, String>>| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().unwrap().push((kind.clone(), query));
                    if kind == "http-latency" && latency_status != StatusCode::OK {
                        return (latency_status, Json(json!({ "message": "not on this plan" })))
                            .into_response();
                    }
                    Json(json!([{ "labels": [], "values": [{ "timestamp": "2026-01-01T00:00:00Z", "value": 1.5 }] }]))
                        .into_response()
                }
            }),
        )
    }

    #[tokio::test]
    async fn options_only_reach_their_endpoints() {
        let seen: Seen = Arc::default();
        let client = test_client(&serve(metrics_api(Arc::clone(&seen), StatusCode::OK)).await);
        let ctx = scoped_ctx().await;

        let result = get_metrics(
            &client,
            &ctx,
            &args(json!({
                "resourceId": "srv-1",
                "metricTypes": ["cpu_usage", "http_request_count", "http_latency", "memory_limit"],
                "startTime": "2026-01-01T00:00:00Z",
                "resolution": 60,
                "cpuUsageAggregationMethod": "MAX",
                "aggregateHttpRequestCountsBy": "statusCode",
                "httpPath": "/api"
            })),
        )
        .await
        .unwrap();
        assert_eq!(result["resourceId"], "srv-1");
        assert_eq!(result["timeRange"]["start"], "2026-01-01T00:00:00Z");
        assert!(result["timeRange"].get("end").is_none());
        let types: Vec<&str> = result["metrics"]
            .as_array()
            .unwrap()
            .iter()
            .map(|metric| metric["type"].as_str().unwrap())
            .collect();
        assert_eq!(types, ["cpu_usage", "http_request_count", "http_latency", "memory_limit"]);
        assert_eq!(result["metrics"][0]["data"][0]["values"][0]["value"], 1.5);

        let seen = seen.lock().unwrap();
        let (kind, cpu) = &seen[0];
        assert_eq!(kind, "cpu");
        assert_eq!(cpu["resource"], "srv-1");
        assert_eq!(cpu["aggregationMethod"], "MAX");
        assert_eq!(cpu["resolutionSeconds"], "60");
        assert!(!cpu.contains_key("path"));

        let (kind, requests) = &seen[1];
        assert_eq!(kind, "http-requests");
        assert_eq!(requests["aggregateBy"], "statusCode");
        assert_eq!(requests["path"], "/api");
        assert!(!requests.contains_key("aggregationMethod"));

        let (kind, latency) = &seen[2];
        assert_eq!(kind, "http-latency");
        assert_eq!(latency["quantile"], "0.95");

        let (kind, limit) = &seen[3];
        assert_eq!(kind, "memory-limit");
        assert!(!limit.contains_key("quantile"));
    }

    #[tokio::test]
    async fn latency_on_a_free_tier_reads_as_empty() {
        let seen: Seen = Arc::default();
        let client = test_client(&serve(metrics_api(seen, StatusCode::BAD_REQUEST)).await);
        let ctx = scoped_ctx().await;

        let result = get_metrics(
            &client,
            &ctx,
            &args(json!({ "resourceId": "srv-1", "metricTypes": ["http_latency"] })),
        )
        .await
        .unwrap();
        assert_eq!(result["metrics"][0]["data"], json!([]));
    }

    #[tokio::test]
    async fn failing_metric_names_itself() {
        let router = Router::new().route(
            "/v1/metrics/{kind}",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "message": "too many points" }))) }),
        );
        let client = test_client(&serve(router).await);
        let ctx = scoped_ctx().await;

        let err = get_metrics(
            &client,
            &ctx,
            &args(json!({ "resourceId": "srv-1", "metricTypes": ["memory_usage"] })),
        )
        .await
        .unwrap_err();
        assert_eq!(
            err.message,
            "failed to fetch memory_usage metrics: received response code 500: too many points"
        );
    }

    #[tokio::test]
    async fn arguments_are_checked_before_any_request() {
        let client = test_client("http://127.0.0.1:9/v1/");
        let ctx = scoped_ctx().await;
        let cases = [
            (json!({ "resourceId": "srv-1", "metricTypes": [] }), "metricTypes"),
            (json!({ "resourceId": "srv-1", "metricTypes": ["disk_usage"] }), "metricTypes"),
            (json!({ "resourceId": "srv-1", "metricTypes": ["cpu_usage"], "resolution": 10 }), "resolution"),
            (json!({ "resourceId": "srv-1", "metricTypes": ["http_latency"], "httpLatencyQuantile": 1.5 }), "httpLatencyQuantile"),
            (json!({ "resourceId": "srv-1", "metricTypes": ["cpu_usage"], "endTime": "now" }), "endTime"),
        ];
        for (input, field) in cases {
            let err = get_metrics(&client, &ctx, &args(input)).await.unwrap_err();
            assert_eq!(err.field.as_deref(), Some(field));
        }

        let store = InMemoryStore::new();
        let unselected = CallContext::new()
            .with_api_token("k")
            .with_session(open_session(&store, "c").await);
        let err = get_metrics(
            &client,
            &unselected,
            &args(json!({ "resourceId": "srv-1", "metricTypes": ["cpu_usage"] })),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, harbor_core::error::codes::NO_WORKSPACE);
    }
}

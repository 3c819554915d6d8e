use std::time::Duration;

use chrono::DateTime;
use futures_util::{Stream, StreamExt};
use harbor_core::resources::{ListLogsParams, LogDirection, LogEntry, LogsPage, QueryParams};
use harbor_core::{HarborError, PAGE_SIZE};
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{
    ToolDefinition, ToolError, arg_bounded_u64, arg_optional_string, arg_string_array,
    required_choice, selected_owner,
};
use crate::client::ApiClient;
use crate::context::CallContext;

const DEFAULT_LOG_LIMIT: u64 = 20;
const DEFAULT_TAIL_SECONDS: u64 = 10;
const MAX_TAIL_SECONDS: u64 = 60;
const DEFAULT_TAIL_ENTRIES: u64 = 100;
const MAX_TAIL_ENTRIES: u64 = 500;
const TAIL_CHANNEL_CAPACITY: usize = 64;

const LABELS: [&str; 6] = ["host", "instance", "level", "method", "statusCode", "type"];

/// (argument, description) for every array filter shared by list and tail.
const LOG_FILTERS: [(&str, &str); 8] = [
    ("level", "Filter logs by severity level. Wildcards and regex are supported."),
    ("type", "Filter logs by type: app, request or build."),
    ("instance", "Filter logs by the id of the instance that emitted them."),
    ("host", "Filter request logs by host. Wildcards and regex are supported."),
    ("statusCode", "Filter request logs by status code. Wildcards and regex are supported."),
    ("method", "Filter request logs by request method."),
    ("path", "Filter request logs by path. Wildcards and regex are supported."),
    ("text", "Filter by log text. Wildcards and regex are supported."),
];

fn filter_properties() -> Map<String, Value> {
    let mut properties = Map::new();
    properties.insert(
        "resource".to_string(),
        json!({
            "type": "array",
            "items": { "type": "string" },
            "minItems": 1,
            "description": "Resources to read logs for: ids of services, cron jobs, Postgres or Key Value instances."
        }),
    );
    for (name, description) in LOG_FILTERS {
        properties.insert(
            name.to_string(),
            json!({ "type": "array", "items": { "type": "string" }, "description": description }),
        );
    }
    properties
}

pub(super) fn definitions() -> Vec<ToolDefinition> {
    let mut list_properties = filter_properties();
    list_properties.insert(
        "startTime".to_string(),
        json!({ "type": "string", "description": "Start of the window (RFC3339). Defaults to one hour ago." }),
    );
    list_properties.insert(
        "endTime".to_string(),
        json!({ "type": "string", "description": "End of the window (RFC3339). Defaults to now." }),
    );
    list_properties.insert(
        "direction".to_string(),
        json!({
            "type": "string",
            "enum": ["backward", "forward"],
            "default": "backward",
            "description": "backward returns the most recent logs first, forward starts with the oldest."
        }),
    );
    list_properties.insert(
        "limit".to_string(),
        json!({ "type": "integer", "minimum": 1, "maximum": PAGE_SIZE, "default": DEFAULT_LOG_LIMIT }),
    );

    let mut label_properties = filter_properties();
    label_properties.insert(
        "label".to_string(),
        json!({
            "type": "string",
            "enum": LABELS,
            "description": "The label whose values to list"
        }),
    );
    for key in ["startTime", "endTime", "direction"] {
        label_properties.insert(key.to_string(), list_properties[key].clone());
    }

    let mut tail_properties = filter_properties();
    tail_properties.insert(
        "durationSeconds".to_string(),
        json!({ "type": "integer", "minimum": 1, "maximum": MAX_TAIL_SECONDS, "default": DEFAULT_TAIL_SECONDS }),
    );
    tail_properties.insert(
        "maxEntries".to_string(),
        json!({ "type": "integer", "minimum": 1, "maximum": MAX_TAIL_ENTRIES, "default": DEFAULT_TAIL_ENTRIES }),
    );

    vec![
        ToolDefinition {
            name: "list_logs",
            title: "List logs",
            description: "List logs matching the provided filters. Logs are paginated by time: when hasMore is true, call again with the returned nextStartTime and nextEndTime.",
            read_only: true,
            destructive: false,
            idempotent: true,
            input_schema: json!({
                "type": "object",
                "properties": list_properties,
                "required": ["resource"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "list_log_label_values",
            title: "List log label values",
            description: "List the values a log label takes for the given resources and filters, such as every level or status code seen. Useful for narrowing list_logs filters.",
            read_only: true,
            destructive: false,
            idempotent: true,
            input_schema: json!({
                "type": "object",
                "properties": label_properties,
                "required": ["label", "resource"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "tail_logs",
            title: "Tail logs",
            description: "Stream new logs matching the filters for a short period and return what arrived.",
            read_only: true,
            destructive: false,
            idempotent: true,
            input_schema: json!({
                "type": "object",
                "properties": tail_properties,
                "required": ["resource"],
                "additionalProperties": false
            }),
        },
    ]
}

async fn filters_from_args(
    ctx: &CallContext,
    args: &Map<String, Value>,
) -> Result<ListLogsParams, ToolError> {
    let owner_id = selected_owner(ctx).await?;

    let resource = arg_string_array(args, "resource")?;
    if resource.is_empty() {
        return Err(ToolError::new(
            harbor_core::error::codes::VALIDATION_FAILED,
            "'resource' must list at least one resource id",
        )
        .with_field("resource"));
    }

    Ok(ListLogsParams {
        owner_id,
        resource,
        level: arg_string_array(args, "level")?,
        log_type: arg_string_array(args, "type")?,
        instance: arg_string_array(args, "instance")?,
        host: arg_string_array(args, "host")?,
        status_code: arg_string_array(args, "statusCode")?,
        method: arg_string_array(args, "method")?,
        path: arg_string_array(args, "path")?,
        text: arg_string_array(args, "text")?,
        ..Default::default()
    })
}

pub(super) fn arg_timestamp(args: &Map<String, Value>, key: &str) -> Result<Option<String>, ToolError> {
    let Some(raw) = arg_optional_string(args, key)? else {
        return Ok(None);
    };
    DateTime::parse_from_rfc3339(&raw).map_err(|err| {
        ToolError::new(
            harbor_core::error::codes::VALIDATION_FAILED,
            format!("'{key}' must be an RFC3339 timestamp: {err}"),
        )
        .with_field(key)
    })?;
    Ok(Some(raw))
}

/// Filters plus the optional time window and direction.
async fn windowed_filters(
    ctx: &CallContext,
    args: &Map<String, Value>,
) -> Result<ListLogsParams, ToolError> {
    let mut params = filters_from_args(ctx, args).await?;
    params.start_time = arg_timestamp(args, "startTime")?;
    params.end_time = arg_timestamp(args, "endTime")?;
    params.direction = match arg_optional_string(args, "direction")? {
        None => None,
        Some(raw) => Some(LogDirection::parse(&raw).ok_or_else(|| {
            ToolError::new(
                harbor_core::error::codes::VALIDATION_FAILED,
                "'direction' must be 'backward' or 'forward'",
            )
            .with_field("direction")
        })?),
    };
    Ok(params)
}

pub(super) async fn list_logs(
    client: &ApiClient,
    ctx: &CallContext,
    args: &Map<String, Value>,
) -> Result<Value, ToolError> {
    let mut params = windowed_filters(ctx, args).await?;
    params.limit = Some(arg_bounded_u64(args, "limit", DEFAULT_LOG_LIMIT, u64::from(PAGE_SIZE))? as u32);

    let page: LogsPage = client.get_json(ctx, &["logs"], &params.query_pairs()).await?;
    Ok(json!(page))
}

pub(super) async fn list_log_label_values(
    client: &ApiClient,
    ctx: &CallContext,
    args: &Map<String, Value>,
) -> Result<Value, ToolError> {
    let label = required_choice(args, "label", &LABELS)?;
    let params = windowed_filters(ctx, args).await?;
    let mut query = vec![("label", label)];
    query.extend(params.query_pairs());

    let values: Value = client.get_json(ctx, &["logs", "values"], &query).await?;
    Ok(values)
}

/// Subscribes to new log entries. Entries arrive on the returned channel until
/// the context is cancelled or the stream ends or fails; the channel closes in
/// every case.
pub async fn tail_logs(
    client: &ApiClient,
    ctx: &CallContext,
    params: &ListLogsParams,
) -> Result<mpsc::Receiver<LogEntry>, HarborError> {
    let response = client
        .open_stream(ctx, &["logs", "subscribe"], &params.query_pairs())
        .await?;
    let (tx, rx) = mpsc::channel(TAIL_CHANNEL_CAPACITY);
    tokio::spawn(pump_log_stream(
        response.bytes_stream(),
        tx,
        ctx.cancellation().clone(),
    ));
    Ok(rx)
}

/// Splits the NDJSON body into entries until cancellation, end of stream, a
/// bad entry, or the receiver going away.
async fn pump_log_stream<S, B, E>(stream: S, tx: mpsc::Sender<LogEntry>, cancel: CancellationToken)
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    tracing::debug!(event = "log_tail_started", "log tail started");
    let mut stream = std::pin::pin!(stream);
    let mut buffer: Vec<u8> = Vec::new();

    let reason = 'pump: loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => break 'pump "cancelled",
            _ = tx.closed() => break 'pump "receiver dropped",
            chunk = stream.next() => chunk,
        };
        match chunk {
            Some(Ok(bytes)) => buffer.extend_from_slice(bytes.as_ref()),
            Some(Err(err)) => {
                tracing::warn!(event = "log_tail_read_failed", error = %err, "log stream failed");
                break 'pump "stream error";
            }
            None => {
                if let Err(reason) = forward_line(&buffer, &tx, &cancel).await {
                    break 'pump reason;
                }
                break 'pump "stream ended";
            }
        }

        while let Some(newline) = buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = buffer.drain(..=newline).collect();
            if let Err(reason) = forward_line(&line, &tx, &cancel).await {
                break 'pump reason;
            }
        }
    };

    tracing::debug!(event = "log_tail_stopped", reason, "log tail stopped");
}

async fn forward_line(
    line: &[u8],
    tx: &mpsc::Sender<LogEntry>,
    cancel: &CancellationToken,
) -> Result<(), &'static str> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return Ok(());
    }
    let entry: LogEntry = serde_json::from_slice(line).map_err(|err| {
        tracing::warn!(event = "log_tail_malformed", error = %err, "undecodable log entry");
        "malformed entry"
    })?;
    tokio::select! {
        _ = cancel.cancelled() => Err("cancelled"),
        sent = tx.send(entry) => sent.map_err(|_| "receiver dropped"),
    }
}

pub(super) async fn tail_logs_tool(
    client: &ApiClient,
    ctx: &CallContext,
    args: &Map<String, Value>,
) -> Result<Value, ToolError> {
    let params = filters_from_args(ctx, args).await?;
    let seconds = arg_bounded_u64(args, "durationSeconds", DEFAULT_TAIL_SECONDS, MAX_TAIL_SECONDS)?;
    let max_entries =
        arg_bounded_u64(args, "maxEntries", DEFAULT_TAIL_ENTRIES, MAX_TAIL_ENTRIES)? as usize;

    let tail_ctx = ctx.child();
    let mut rx = tail_logs(client, &tail_ctx, &params).await?;

    let deadline = tokio::time::sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);
    let mut entries = Vec::new();
    let mut stream_ended = false;
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            entry = rx.recv() => match entry {
                Some(entry) => {
                    entries.push(entry);
                    if entries.len() >= max_entries {
                        break;
                    }
                }
                None => {
                    stream_ended = true;
                    break;
                }
            },
        }
    }
    tail_ctx.cancellation().cancel();

    Ok(json!({
        "logs": entries,
        "streamEnded": stream_ended,
    }))
}

//! Streamable-HTTP style JSON-RPC endpoint at `POST /mcp`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::binder::HttpContextFn;
use crate::connection::InboundRequest;
use crate::context::CallContext;
use crate::{McpServer, parse_error_response};

pub const MCP_PATH: &str = "/mcp";
pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

#[derive(Clone)]
struct HttpState {
    server: McpServer,
    binder: Arc<dyn HttpContextFn>,
    shutdown: CancellationToken,
}

/// Router for the MCP endpoint. In-flight calls are cancelled with `shutdown`.
pub fn router(
    server: McpServer,
    binder: Arc<dyn HttpContextFn>,
    shutdown: CancellationToken,
) -> Router {
    let state = HttpState {
        server,
        binder,
        shutdown,
    };
    Router::new()
        .route(MCP_PATH, post(mcp_post).get(mcp_get))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serves `app` until `shutdown` is cancelled, then drains open requests.
pub async fn serve_http(
    listener: TcpListener,
    app: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(event = "http_listening", %addr, "serving MCP over HTTP");
    }
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await
}

async fn mcp_get() -> Response {
    StatusCode::METHOD_NOT_ALLOWED.into_response()
}

fn connection_id(headers: &HeaderMap) -> String {
    headers
        .get(MCP_SESSION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::now_v7().to_string())
}

async fn mcp_post(
    State(state): State<HttpState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let connection_id = connection_id(&headers);

    let incoming: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::debug!(
                event = "http_parse_error",
                connection_id = %connection_id,
                error = %err,
                "undecodable request body"
            );
            let response = (StatusCode::OK, Json(parse_error_response())).into_response();
            return with_session_header(response, &connection_id);
        }
    };

    let is_batch = incoming.is_array();
    let request = InboundRequest::new(headers, peer.to_string());
    let ctx = CallContext::new()
        .with_connection_id(connection_id.clone())
        .with_cancellation(state.shutdown.child_token());
    let ctx = state.binder.apply(ctx, &request).await;

    let mut responses = state.server.handle_incoming_message(&ctx, incoming).await;

    let response = if responses.is_empty() {
        StatusCode::ACCEPTED.into_response()
    } else if is_batch {
        (StatusCode::OK, Json(Value::Array(responses))).into_response()
    } else {
        let single = responses.pop().unwrap_or(Value::Null);
        (StatusCode::OK, Json(single)).into_response()
    };
    with_session_header(response, &connection_id)
}

fn with_session_header(mut response: Response, connection_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(connection_id) {
        response.headers_mut().insert(MCP_SESSION_ID_HEADER, value);
    }
    response
}

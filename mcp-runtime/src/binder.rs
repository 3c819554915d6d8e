//! Context binders run by the transports before a call reaches the tools.
//!
//! Each transport owns one chain of binders. Binders run in registration
//! order and each receives the context produced by the previous one.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ConfigStore;
use crate::connection::{ConnectionMetadata, InboundRequest};
use crate::context::CallContext;
use crate::session::{SessionStore, StdioSession};

#[async_trait]
pub trait StdioContextFn: Send + Sync {
    async fn apply(&self, ctx: CallContext) -> CallContext;
}

#[async_trait]
pub trait HttpContextFn: Send + Sync {
    async fn apply(&self, ctx: CallContext, request: &InboundRequest) -> CallContext;
}

#[derive(Default, Clone)]
pub struct MultiStdioContextFn {
    fns: Vec<Arc<dyn StdioContextFn>>,
}

impl MultiStdioContextFn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, binder: impl StdioContextFn + 'static) -> Self {
        self.fns.push(Arc::new(binder));
        self
    }
}

#[async_trait]
impl StdioContextFn for MultiStdioContextFn {
    async fn apply(&self, mut ctx: CallContext) -> CallContext {
        for binder in &self.fns {
            ctx = binder.apply(ctx).await;
        }
        ctx
    }
}

#[derive(Default, Clone)]
pub struct MultiHttpContextFn {
    fns: Vec<Arc<dyn HttpContextFn>>,
}

impl MultiHttpContextFn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, binder: impl HttpContextFn + 'static) -> Self {
        self.fns.push(Arc::new(binder));
        self
    }
}

#[async_trait]
impl HttpContextFn for MultiHttpContextFn {
    async fn apply(&self, mut ctx: CallContext, request: &InboundRequest) -> CallContext {
        for binder in &self.fns {
            ctx = binder.apply(ctx, request).await;
        }
        ctx
    }
}

/// Attaches a fresh config-file session to every stdio call.
pub struct StdioSessionBinder {
    config: ConfigStore,
}

impl StdioSessionBinder {
    pub fn new(config: ConfigStore) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StdioContextFn for StdioSessionBinder {
    async fn apply(&self, ctx: CallContext) -> CallContext {
        ctx.with_session(Arc::new(StdioSession::new(self.config.clone())))
    }
}

/// Attaches the API key resolved from the environment or config file.
pub struct ConfigTokenBinder {
    token: Option<String>,
}

impl ConfigTokenBinder {
    pub fn new(config: &ConfigStore) -> Self {
        let token = match config.resolve_token() {
            Ok(token) => Some(token),
            Err(err) => {
                tracing::warn!(event = "api_key_missing", error = %err, "no API key configured");
                None
            }
        };
        Self { token }
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }
}

#[async_trait]
impl StdioContextFn for ConfigTokenBinder {
    async fn apply(&self, ctx: CallContext) -> CallContext {
        match &self.token {
            Some(token) => ctx.with_api_token(token.clone()),
            None => ctx,
        }
    }
}

/// Looks up the store session for the call's connection id.
///
/// Store failures are logged and the call continues without a session, which
/// disables workspace scoping for it.
pub struct HttpSessionBinder {
    store: Arc<dyn SessionStore>,
}

impl HttpSessionBinder {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl HttpContextFn for HttpSessionBinder {
    async fn apply(&self, ctx: CallContext, _request: &InboundRequest) -> CallContext {
        let Some(connection_id) = ctx.connection_id().map(str::to_string) else {
            tracing::debug!(event = "session_skipped", "call has no connection id");
            return ctx;
        };
        let lookup = self.store.get(&connection_id, ctx.cancellation()).await;
        match lookup {
            Ok(session) => ctx.with_session(session),
            Err(err) => {
                tracing::warn!(
                    event = "session_store_unavailable",
                    connection_id = %connection_id,
                    error = %err,
                    "continuing without a session"
                );
                ctx
            }
        }
    }
}

pub struct ConnectionMetadataBinder;

#[async_trait]
impl HttpContextFn for ConnectionMetadataBinder {
    async fn apply(&self, ctx: CallContext, request: &InboundRequest) -> CallContext {
        ctx.with_connection_metadata(ConnectionMetadata::from_request(request))
    }
}

/// Takes the caller's API key from the `Authorization` header.
pub struct HeaderTokenBinder;

#[async_trait]
impl HttpContextFn for HeaderTokenBinder {
    async fn apply(&self, ctx: CallContext, request: &InboundRequest) -> CallContext {
        match request.header("authorization").and_then(bearer_token) {
            Some(token) => ctx.with_api_token(token),
            None => ctx,
        }
    }
}

fn bearer_token(raw: &str) -> Option<String> {
    let raw = raw.trim_start();
    let token = match raw.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => &raw[7..],
        _ => raw,
    }
    .trim();
    (!token.is_empty()).then(|| token.to_string())
}

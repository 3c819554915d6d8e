use std::fmt;
use std::sync::Arc;

use harbor_core::{HarborError, Result};
use tokio_util::sync::CancellationToken;

use crate::connection::ConnectionMetadata;
use crate::session::Session;

/// Per-call state handed to every tool handler.
///
/// Built by the transport, then filled in by the context binders.
#[derive(Clone, Default)]
pub struct CallContext {
    connection_id: Option<String>,
    session: Option<Arc<dyn Session>>,
    connection: ConnectionMetadata,
    api_token: Option<String>,
    cancel: CancellationToken,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connection_id(mut self, connection_id: impl Into<String>) -> Self {
        self.connection_id = Some(connection_id.into());
        self
    }

    pub fn with_session(mut self, session: Arc<dyn Session>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_connection_metadata(mut self, connection: ConnectionMetadata) -> Self {
        self.connection = connection;
        self
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    pub fn session(&self) -> Option<&Arc<dyn Session>> {
        self.session.as_ref()
    }

    /// Zero value when the transport attached no metadata.
    pub fn connection_metadata(&self) -> &ConnectionMetadata {
        &self.connection
    }

    pub fn api_token(&self) -> Option<&str> {
        self.api_token.as_deref().filter(|token| !token.is_empty())
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// A copy of this context whose token is a child of the current one.
    pub fn child(&self) -> Self {
        let mut child = self.clone();
        child.cancel = self.cancel.child_token();
        child
    }

    /// Workspace the call is scoped to.
    ///
    /// `Ok(None)` means no session is attached (session storage was down), so
    /// scoping is disabled for this call.
    pub async fn workspace_scope(&self) -> Result<Option<String>> {
        match &self.session {
            Some(session) => session.selected_workspace(&self.cancel).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn select_workspace(&self, workspace_id: &str) -> Result<()> {
        let session = self.session.as_ref().ok_or(HarborError::SessionUnavailable)?;
        session.select_workspace(&self.cancel, workspace_id).await
    }

    pub async fn selected_workspace(&self) -> Result<String> {
        let session = self.session.as_ref().ok_or(HarborError::SessionUnavailable)?;
        session.selected_workspace(&self.cancel).await
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("connection_id", &self.connection_id)
            .field("has_session", &self.session.is_some())
            .field("connection", &self.connection)
            .field("has_api_token", &self.api_token.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

use serde::{Deserialize, Serialize};

/// Error type shared by the session layer, the API client and the tool surface.
///
/// Display strings are user facing: tool handlers forward them unchanged, so
/// the selection and authentication variants spell out what to do next.
#[derive(Debug, thiserror::Error)]
pub enum HarborError {
    #[error(
        "no workspace set. Prompt the user to select a workspace. Do NOT try to select a workspace for them, as it may be destructive"
    )]
    NoWorkspace,

    #[error(
        "not authenticated. Set HARBOR_API_KEY or send an `Authorization: Bearer <api key>` header with each request"
    )]
    NotAuthenticated,

    #[error(
        "workspace selection is unavailable for this connection because session storage could not be reached. Retry later or use a workspace-independent tool"
    )]
    SessionUnavailable,

    #[error("session store error: {0}")]
    SessionStore(String),

    #[error("request to the Harbor API failed: {0}")]
    Transport(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("received response code {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unknown error")]
    UnknownApi,

    #[error("unexpected response from the Harbor API (status {status}): {detail}")]
    MalformedResponse { status: u16, detail: String },

    #[error(
        "the selected workspace {selected} does not match the workspace {resource} of this resource. Ask the user whether to switch workspaces before calling select_workspace"
    )]
    WorkspaceMismatch { selected: String, resource: String },

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, HarborError>;

/// Coarse classification used by callers that only need to branch on the
/// failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NoWorkspace,
    NotAuthenticated,
    BackendUnavailable,
    RemoteRejected,
    MalformedResponse,
    Cancelled,
    InvalidRequest,
}

impl HarborError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoWorkspace => ErrorKind::NoWorkspace,
            Self::NotAuthenticated => ErrorKind::NotAuthenticated,
            Self::SessionUnavailable | Self::SessionStore(_) | Self::Transport(_) => {
                ErrorKind::BackendUnavailable
            }
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Unauthorized | Self::Forbidden | Self::Api { .. } | Self::UnknownApi => {
                ErrorKind::RemoteRejected
            }
            Self::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            Self::WorkspaceMismatch { .. } | Self::Config(_) => ErrorKind::InvalidRequest,
        }
    }

    /// Stable machine-readable code, see [`codes`].
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoWorkspace => codes::NO_WORKSPACE,
            Self::NotAuthenticated => codes::NOT_AUTHENTICATED,
            Self::SessionUnavailable | Self::SessionStore(_) => codes::SESSION_UNAVAILABLE,
            Self::Transport(_) => codes::CONNECTION_ERROR,
            Self::Cancelled => codes::CANCELLED,
            Self::Unauthorized => codes::UNAUTHORIZED,
            Self::Forbidden => codes::FORBIDDEN,
            Self::Api { .. } => codes::API_ERROR,
            Self::UnknownApi => codes::UNKNOWN_ERROR,
            Self::MalformedResponse { .. } => codes::MALFORMED_RESPONSE,
            Self::WorkspaceMismatch { .. } => codes::WORKSPACE_MISMATCH,
            Self::Config(_) => codes::CONFIG_ERROR,
        }
    }

    pub fn is_no_workspace(&self) -> bool {
        matches!(self, Self::NoWorkspace)
    }
}

/// Error codes surfaced to MCP clients
pub mod codes {
    pub const NO_WORKSPACE: &str = "no_workspace";
    pub const NOT_AUTHENTICATED: &str = "not_authenticated";
    pub const SESSION_UNAVAILABLE: &str = "session_unavailable";
    pub const CONNECTION_ERROR: &str = "connection_error";
    pub const CANCELLED: &str = "cancelled";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const FORBIDDEN: &str = "forbidden";
    pub const API_ERROR: &str = "api_error";
    pub const UNKNOWN_ERROR: &str = "unknown_error";
    pub const MALFORMED_RESPONSE: &str = "malformed_response";
    pub const WORKSPACE_MISMATCH: &str = "workspace_mismatch";
    pub const CONFIG_ERROR: &str = "config_error";
    pub const VALIDATION_FAILED: &str = "validation_failed";
}

//! Per-connection workspace selection.
//!
//! A [`Session`] holds the workspace selected on one logical connection. A
//! [`SessionStore`] creates or returns the session for a connection id. Stdio
//! calls bypass the store and use the machine-level config file instead, see
//! [`stdio::StdioSession`].

use std::sync::Arc;

use async_trait::async_trait;
use harbor_core::{HarborError, Result};
use tokio_util::sync::CancellationToken;

pub mod memory;
pub mod redis;
pub mod stdio;

pub use memory::InMemoryStore;
pub use redis::RedisStore;
pub use stdio::StdioSession;

/// Every operation takes the calling request's cancellation token and fails
/// with [`HarborError::Cancelled`] once it fires, even mid round trip.
#[async_trait]
pub trait Session: Send + Sync {
    /// The selected workspace, or [`HarborError::NoWorkspace`] if none was set.
    async fn selected_workspace(&self, cancel: &CancellationToken) -> Result<String>;

    async fn select_workspace(&self, cancel: &CancellationToken, workspace_id: &str) -> Result<()>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns the session handle for `connection_id`. Looking a session up
    /// never allocates storage; only a selection does.
    async fn get(&self, connection_id: &str, cancel: &CancellationToken) -> Result<Arc<dyn Session>>;
}

/// Fails fast when the call was already cancelled.
pub(crate) fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(HarborError::Cancelled);
    }
    Ok(())
}

/// Which backend holds HTTP sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Redis { url: String },
}

impl StoreBackend {
    /// Resolves the backend from its name plus an optional Redis URL.
    pub fn from_parts(kind: &str, redis_url: Option<&str>) -> Result<Self> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" => Ok(Self::Memory),
            "redis" => match redis_url.map(str::trim).filter(|url| !url.is_empty()) {
                Some(url) => Ok(Self::Redis {
                    url: url.to_string(),
                }),
                None => Err(HarborError::Config(
                    "the redis session store requires HARBOR_REDIS_URL".to_string(),
                )),
            },
            other => Err(HarborError::Config(format!(
                "unknown session store '{other}', expected 'memory' or 'redis'"
            ))),
        }
    }
}

pub async fn build_store(backend: &StoreBackend) -> Result<Arc<dyn SessionStore>> {
    match backend {
        StoreBackend::Memory => Ok(Arc::new(InMemoryStore::new())),
        StoreBackend::Redis { url } => Ok(Arc::new(RedisStore::connect(url).await?)),
    }
}

#[cfg(test)]
pub(crate) mod conformance {
    use super::*;

    /// Selection on one connection id is visible to later lookups of the same
    /// id and never to other ids.
    pub(crate) async fn assert_isolated(store: &dyn SessionStore, one: &str, two: &str) {
        let cancel = CancellationToken::new();
        let first = store.get(one, &cancel).await.unwrap();
        assert!(matches!(
            first.selected_workspace(&cancel).await,
            Err(HarborError::NoWorkspace)
        ));
        first.select_workspace(&cancel, "workspace-one").await.unwrap();
        assert_eq!(first.selected_workspace(&cancel).await.unwrap(), "workspace-one");

        let again = store.get(one, &cancel).await.unwrap();
        assert_eq!(again.selected_workspace(&cancel).await.unwrap(), "workspace-one");

        let second = store.get(two, &cancel).await.unwrap();
        assert!(matches!(
            second.selected_workspace(&cancel).await,
            Err(HarborError::NoWorkspace)
        ));
        second.select_workspace(&cancel, "workspace-two").await.unwrap();

        let last = store.get(one, &cancel).await.unwrap();
        assert_eq!(last.selected_workspace(&cancel).await.unwrap(), "workspace-one");
        assert_eq!(
            store
                .get(two, &cancel)
                .await
                .unwrap()
                .selected_workspace(&cancel)
                .await
                .unwrap(),
            "workspace-two"
        );
    }

    /// A cancelled token fails every operation with `Cancelled`.
    pub(crate) async fn assert_cancellable(store: &dyn SessionStore) {
        let live = CancellationToken::new();
        let session = store.get("cancellable", &live).await.unwrap();

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        assert!(matches!(
            store.get("cancellable", &cancelled).await,
            Err(HarborError::Cancelled)
        ));
        assert!(matches!(
            session.selected_workspace(&cancelled).await,
            Err(HarborError::Cancelled)
        ));
        assert!(matches!(
            session.select_workspace(&cancelled, "tea-1").await,
            Err(HarborError::Cancelled)
        ));
        assert!(matches!(
            session.selected_workspace(&live).await,
            Err(HarborError::NoWorkspace)
        ));
    }
}

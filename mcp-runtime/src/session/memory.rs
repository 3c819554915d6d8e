use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use harbor_core::{HarborError, Result};
use tokio_util::sync::CancellationToken;

use super::{Session, SessionStore, check_cancelled};

type Selections = Arc<RwLock<HashMap<String, String>>>;

/// Process-local session store.
///
/// Only connections that selected a workspace take an entry, so requests that
/// never touch the selection (pings, tool listings, fresh connection ids)
/// leave the map untouched. Entries live until the process exits.
#[derive(Default)]
pub struct InMemoryStore {
    selections: Selections,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.selections
            .read()
            .map(|selections| selections.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn get(&self, connection_id: &str, cancel: &CancellationToken) -> Result<Arc<dyn Session>> {
        check_cancelled(cancel)?;
        Ok(Arc::new(InMemorySession {
            selections: Arc::clone(&self.selections),
            connection_id: connection_id.to_string(),
        }))
    }
}

/// Handle onto one connection's entry in an [`InMemoryStore`].
pub struct InMemorySession {
    selections: Selections,
    connection_id: String,
}

#[async_trait]
impl Session for InMemorySession {
    async fn selected_workspace(&self, cancel: &CancellationToken) -> Result<String> {
        check_cancelled(cancel)?;
        let selections = self
            .selections
            .read()
            .map_err(|_| HarborError::SessionStore("session map poisoned".to_string()))?;
        selections
            .get(&self.connection_id)
            .filter(|workspace| !workspace.is_empty())
            .cloned()
            .ok_or(HarborError::NoWorkspace)
    }

    async fn select_workspace(&self, cancel: &CancellationToken, workspace_id: &str) -> Result<()> {
        check_cancelled(cancel)?;
        let mut selections = self
            .selections
            .write()
            .map_err(|_| HarborError::SessionStore("session map poisoned".to_string()))?;
        if workspace_id.is_empty() {
            selections.remove(&self.connection_id);
        } else {
            selections.insert(self.connection_id.clone(), workspace_id.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::conformance::{assert_cancellable, assert_isolated};

    #[tokio::test]
    async fn sessions_are_isolated_per_connection() {
        let store = InMemoryStore::new();
        assert_isolated(&store, "one", "two").await;
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn cancelled_calls_fail() {
        assert_cancellable(&InMemoryStore::new()).await;
    }

    #[tokio::test]
    async fn lookup_returns_the_same_session() {
        let store = InMemoryStore::new();
        let cancel = CancellationToken::new();
        let a = store.get("conn", &cancel).await.unwrap();
        let b = store.get("conn", &cancel).await.unwrap();
        a.select_workspace(&cancel, "tea-1").await.unwrap();
        assert_eq!(b.selected_workspace(&cancel).await.unwrap(), "tea-1");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn lookups_and_reads_take_no_entry() {
        let store = InMemoryStore::new();
        let cancel = CancellationToken::new();
        for i in 0..200 {
            let session = store.get(&format!("conn-{i}"), &cancel).await.unwrap();
            assert!(session.selected_workspace(&cancel).await.is_err());
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn concurrent_first_lookups_share_one_session() {
        let store = Arc::new(InMemoryStore::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let cancel = CancellationToken::new();
                let session = store.get("shared", &cancel).await.unwrap();
                if i == 0 {
                    session.select_workspace(&cancel, "tea-race").await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.len(), 1);
        let cancel = CancellationToken::new();
        let session = store.get("shared", &cancel).await.unwrap();
        assert_eq!(session.selected_workspace(&cancel).await.unwrap(), "tea-race");
    }

    #[tokio::test]
    async fn empty_selection_reads_as_unset() {
        let store = InMemoryStore::new();
        let cancel = CancellationToken::new();
        let session = store.get("conn", &cancel).await.unwrap();
        session.select_workspace(&cancel, "tea-1").await.unwrap();
        session.select_workspace(&cancel, "").await.unwrap();
        assert!(matches!(
            session.selected_workspace(&cancel).await,
            Err(HarborError::NoWorkspace)
        ));
        assert!(store.is_empty());
    }
}

use async_trait::async_trait;
use harbor_core::{HarborError, Result};
use tokio_util::sync::CancellationToken;

use super::{Session, check_cancelled};
use crate::config::ConfigStore;

/// Session for single-user stdio servers, backed by the config file so the
/// selection is shared with every other local process reading it.
#[derive(Debug, Clone)]
pub struct StdioSession {
    config: ConfigStore,
}

impl StdioSession {
    pub fn new(config: ConfigStore) -> Self {
        Self { config }
    }

    /// Runs a config file operation on the blocking pool.
    async fn on_config<T, F>(&self, cancel: &CancellationToken, operation: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&ConfigStore) -> Result<T> + Send + 'static,
    {
        check_cancelled(cancel)?;
        let config = self.config.clone();
        let task = tokio::task::spawn_blocking(move || operation(&config));
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(HarborError::Cancelled),
            joined = task => joined.map_err(|err| {
                HarborError::Config(format!("config file task failed: {err}"))
            })?,
        }
    }
}

#[async_trait]
impl Session for StdioSession {
    async fn selected_workspace(&self, cancel: &CancellationToken) -> Result<String> {
        self.on_config(cancel, ConfigStore::current_workspace_id).await
    }

    async fn select_workspace(&self, cancel: &CancellationToken, workspace_id: &str) -> Result<()> {
        let workspace_id = workspace_id.to_string();
        self.on_config(cancel, move |config| config.persist_workspace_id(&workspace_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn selection_round_trips_through_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigStore::at(dir.path().join("mcp-server.json"));
        let cancel = CancellationToken::new();

        let session = StdioSession::new(config.clone());
        assert!(matches!(
            session.selected_workspace(&cancel).await,
            Err(HarborError::NoWorkspace)
        ));
        session.select_workspace(&cancel, "tea-local").await.unwrap();

        let fresh = StdioSession::new(config.clone());
        assert_eq!(fresh.selected_workspace(&cancel).await.unwrap(), "tea-local");
        assert_eq!(config.current_workspace_id().unwrap(), "tea-local");
    }

    #[tokio::test]
    async fn cancelled_calls_leave_the_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigStore::at(dir.path().join("mcp-server.json"));
        let session = StdioSession::new(config.clone());

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            session.select_workspace(&cancel, "tea-local").await,
            Err(HarborError::Cancelled)
        ));
        assert!(matches!(
            session.selected_workspace(&cancel).await,
            Err(HarborError::Cancelled)
        ));
        assert!(!config.path().exists());
    }
}

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use harbor_core::{HarborError, Result};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio_util::sync::CancellationToken;

use super::{Session, SessionStore, check_cancelled};

const WORKSPACE_FIELD: &str = "workspaceID";
const OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Sessions kept in Redis hashes so that several server processes share them.
///
/// Each session is a hash at `session:<connection id>` with the selection in
/// the `workspaceID` field. Handles hold no state of their own; every read and
/// write is a round trip, abandoned as soon as the call is cancelled.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(store_error)?;
        let conn = timed(ConnectionManager::new(client)).await?;
        tracing::info!(event = "session_store_connected", backend = "redis", "connected to redis");
        Ok(Self { conn })
    }
}

#[async_trait]
impl SessionStore for RedisStore {
    async fn get(&self, connection_id: &str, cancel: &CancellationToken) -> Result<Arc<dyn Session>> {
        check_cancelled(cancel)?;
        Ok(Arc::new(RedisSession {
            conn: self.conn.clone(),
            key: session_key(connection_id),
        }))
    }
}

pub struct RedisSession {
    conn: ConnectionManager,
    key: String,
}

#[async_trait]
impl Session for RedisSession {
    async fn selected_workspace(&self, cancel: &CancellationToken) -> Result<String> {
        let mut conn = self.conn.clone();
        let workspace: Option<String> =
            bounded(cancel, conn.hget(&self.key, WORKSPACE_FIELD)).await?;
        workspace
            .filter(|workspace| !workspace.is_empty())
            .ok_or(HarborError::NoWorkspace)
    }

    async fn select_workspace(&self, cancel: &CancellationToken, workspace_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        bounded(
            cancel,
            conn.hset::<_, _, _, ()>(&self.key, WORKSPACE_FIELD, workspace_id),
        )
        .await
    }
}

fn session_key(connection_id: &str) -> String {
    format!("session:{connection_id}")
}

/// Runs one round trip until it answers, the call is cancelled or the
/// operation timeout passes, whichever comes first.
async fn bounded<T>(
    cancel: &CancellationToken,
    operation: impl Future<Output = redis::RedisResult<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(HarborError::Cancelled),
        result = timed(operation) => result,
    }
}

async fn timed<T>(operation: impl Future<Output = redis::RedisResult<T>>) -> Result<T> {
    match tokio::time::timeout(OPERATION_TIMEOUT, operation).await {
        Ok(result) => result.map_err(store_error),
        Err(_) => Err(HarborError::SessionStore(format!(
            "redis did not answer within {}s",
            OPERATION_TIMEOUT.as_secs()
        ))),
    }
}

fn store_error(err: redis::RedisError) -> HarborError {
    HarborError::SessionStore(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::conformance::{assert_cancellable, assert_isolated};
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const TEST_REDIS_URL_ENV: &str = "HARBOR_TEST_REDIS_URL";

    fn test_redis_url() -> Option<String> {
        std::env::var(TEST_REDIS_URL_ENV).ok().filter(|url| !url.is_empty())
    }

    #[test]
    fn key_layout() {
        assert_eq!(session_key("abc-123"), "session:abc-123");
    }

    #[tokio::test]
    async fn invalid_url_is_a_store_error() {
        let err = RedisStore::connect("definitely not a url").await.err().unwrap();
        assert!(matches!(err, HarborError::SessionStore(_)));
    }

    #[tokio::test]
    async fn unreachable_server_is_a_store_error() {
        let err = RedisStore::connect("redis://127.0.0.1:1").await.err().unwrap();
        assert!(matches!(err, HarborError::SessionStore(_)));
        assert!(!err.is_no_workspace());
    }

    #[tokio::test]
    async fn sessions_are_isolated_per_connection() {
        let Some(url) = test_redis_url() else {
            return;
        };
        let store = RedisStore::connect(&url).await.unwrap();
        let suffix = uuid::Uuid::now_v7();
        assert_isolated(&store, &format!("one-{suffix}"), &format!("two-{suffix}")).await;
    }

    #[tokio::test]
    async fn independent_stores_observe_each_other() {
        let Some(url) = test_redis_url() else {
            return;
        };
        let writer = RedisStore::connect(&url).await.unwrap();
        let reader = RedisStore::connect(&url).await.unwrap();
        let id = format!("shared-{}", uuid::Uuid::now_v7());

        let cancel = CancellationToken::new();
        writer
            .get(&id, &cancel)
            .await
            .unwrap()
            .select_workspace(&cancel, "tea-shared")
            .await
            .unwrap();
        let seen = reader
            .get(&id, &cancel)
            .await
            .unwrap()
            .selected_workspace(&cancel)
            .await;
        assert_eq!(seen.unwrap(), "tea-shared");
    }

    /// A server that completes the connection handshake with `+OK` replies but
    /// never answers the session hash commands.
    async fn stalled_redis() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(answer_all_but_hashes(socket));
            }
        });
        format!("redis://{addr}")
    }

    async fn answer_all_but_hashes(mut socket: TcpStream) {
        let mut buffer = Vec::new();
        let mut chunk = [0_u8; 1024];
        loop {
            let read = match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(read) => read,
            };
            buffer.extend_from_slice(&chunk[..read]);
            while let Some((command, used)) = next_command(&buffer) {
                buffer.drain(..used);
                let stalls = command.eq_ignore_ascii_case("HGET") || command.eq_ignore_ascii_case("HSET");
                if !stalls && socket.write_all(b"+OK\r\n").await.is_err() {
                    return;
                }
            }
        }
    }

    /// Name of the first complete RESP command in `buffer` and its length.
    fn next_command(buffer: &[u8]) -> Option<(String, usize)> {
        let mut pos = 0;
        let count: usize = resp_line(buffer, &mut pos)?.strip_prefix('*')?.parse().ok()?;
        let mut name = String::new();
        for i in 0..count {
            let len: usize = resp_line(buffer, &mut pos)?.strip_prefix('$')?.parse().ok()?;
            let arg = buffer.get(pos..pos + len)?;
            if i == 0 {
                name = String::from_utf8_lossy(arg).to_string();
            }
            pos += len + 2;
        }
        (buffer.len() >= pos).then_some((name, pos))
    }

    fn resp_line(buffer: &[u8], pos: &mut usize) -> Option<String> {
        let rest = buffer.get(*pos..)?;
        let end = rest.windows(2).position(|pair| pair == b"\r\n")?;
        *pos += end + 2;
        Some(String::from_utf8_lossy(&rest[..end]).to_string())
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_stalled_round_trip() {
        let store = RedisStore::connect(&stalled_redis().await).await.unwrap();
        let cancel = CancellationToken::new();
        let session = store.get("stalled", &cancel).await.unwrap();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result = session.selected_workspace(&cancel).await;
        assert!(matches!(result, Err(HarborError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn cancelled_calls_never_reach_the_server() {
        let store = RedisStore::connect(&stalled_redis().await).await.unwrap();
        assert_cancellable_without_selection(&store).await;
    }

    /// The stalled server cannot answer reads, so only the cancelled half of
    /// the shared check applies here.
    async fn assert_cancellable_without_selection(store: &RedisStore) {
        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let session = store.get("stalled", &CancellationToken::new()).await.unwrap();

        let started = Instant::now();
        assert!(matches!(
            store.get("stalled", &cancelled).await,
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
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn live_server_honours_cancellation() {
        let Some(url) = test_redis_url() else {
            return;
        };
        assert_cancellable(&RedisStore::connect(&url).await.unwrap()).await;
    }
}

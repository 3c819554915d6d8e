//! Test helpers: a throwaway Harbor API on a loopback port, plus session setup.

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::client::{ApiClient, RequestDecorator};
use crate::session::{Session, SessionStore};

/// Serves `router` on 127.0.0.1 and returns the API base URL (`.../v1/`).
pub(crate) async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}/v1/")
}

pub(crate) fn test_client(base: &str) -> ApiClient {
    ApiClient::with_decorator(base, RequestDecorator::with_platform("9.9.9", "TestOS")).unwrap()
}

/// Session handle for `connection_id`, looked up with a live token.
pub(crate) async fn open_session(store: &dyn SessionStore, connection_id: &str) -> Arc<dyn Session> {
    store
        .get(connection_id, &CancellationToken::new())
        .await
        .unwrap()
}

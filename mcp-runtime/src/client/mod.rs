//! Authenticated access to the Harbor REST API.

use std::time::Duration;

use harbor_core::{ApiResponse, HarborError, Result, error_from_response};
use reqwest::header::HeaderMap;
use reqwest::{Method, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::context::CallContext;

pub mod headers;
pub mod platform;

pub use headers::RequestDecorator;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    decorator: RequestDecorator,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_decorator(base_url, RequestDecorator::new(env!("CARGO_PKG_VERSION")))
    }

    pub fn with_decorator(base_url: &str, decorator: RequestDecorator) -> Result<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|err| HarborError::Config(format!("invalid API host '{base_url}': {err}")))?;
        if base_url.cannot_be_a_base() {
            return Err(HarborError::Config(format!(
                "API host '{base_url}' cannot carry a path"
            )));
        }
        base_url.set_query(None);

        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|err| HarborError::Config(format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            http,
            base_url,
            decorator,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn decorator(&self) -> &RequestDecorator {
        &self.decorator
    }

    /// Base URL plus percent-encoded path segments and query pairs.
    pub fn endpoint(&self, segments: &[&str], query: &[(&str, String)]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| HarborError::Config("API host cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(key, value)| (*key, value.as_str())));
        }
        Ok(url)
    }

    async fn request(
        &self,
        ctx: &CallContext,
        method: Method,
        url: Url,
    ) -> Result<reqwest::RequestBuilder> {
        let token = ctx.api_token().ok_or(HarborError::NotAuthenticated)?;
        self.decorator.resolve_platform().await;
        let mut headers = HeaderMap::new();
        self.decorator
            .decorate(&mut headers, ctx.connection_metadata(), token)?;
        Ok(self.http.request(method, url).headers(headers))
    }

    /// Issues a request and returns the raw status and body, whatever the status.
    pub async fn send<T, B>(
        &self,
        ctx: &CallContext,
        method: Method,
        segments: &[&str],
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<ApiResponse<T>>
    where
        B: Serialize + ?Sized,
    {
        let url = self.endpoint(segments, query)?;
        tracing::debug!(event = "api_request", method = %method, path = %url.path(), "calling Harbor API");
        let mut request = self
            .request(ctx, method, url)
            .await?
            .timeout(REQUEST_TIMEOUT);
        if let Some(body) = body {
            request = request.json(body);
        }

        let exchange = async {
            let response = request.send().await.map_err(transport_error)?;
            let status = response.status().as_u16();
            let body = response.bytes().await.map_err(transport_error)?;
            Ok(ApiResponse::new(status, body.to_vec()))
        };

        tokio::select! {
            _ = ctx.cancellation().cancelled() => Err(HarborError::Cancelled),
            result = exchange => result,
        }
    }

    pub async fn get<T>(
        &self,
        ctx: &CallContext,
        segments: &[&str],
        query: &[(&str, String)],
    ) -> Result<ApiResponse<T>> {
        self.send::<T, ()>(ctx, Method::GET, segments, query, None)
            .await
    }

    /// GET, error normalization and payload decoding in one step.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        ctx: &CallContext,
        segments: &[&str],
        query: &[(&str, String)],
    ) -> Result<T> {
        self.get::<T>(ctx, segments, query).await?.into_result()
    }

    /// POST a JSON body and decode the normalized response.
    pub async fn post_json<B, T>(&self, ctx: &CallContext, segments: &[&str], body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send::<T, B>(ctx, Method::POST, segments, &[], Some(body))
            .await?
            .into_result()
    }

    /// PUT a JSON body and decode the normalized response.
    pub async fn put_json<B, T>(&self, ctx: &CallContext, segments: &[&str], body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send::<T, B>(ctx, Method::PUT, segments, &[], Some(body))
            .await?
            .into_result()
    }

    /// Opens a streaming GET. Error statuses are read in full and normalized.
    ///
    /// No total timeout applies; the stream lives until the caller cancels.
    pub async fn open_stream(
        &self,
        ctx: &CallContext,
        segments: &[&str],
        query: &[(&str, String)],
    ) -> Result<reqwest::Response> {
        let url = self.endpoint(segments, query)?;
        let request = self.request(ctx, Method::GET, url).await?;

        let open = async {
            let response = request.send().await.map_err(transport_error)?;
            let status = response.status().as_u16();
            if status < 400 {
                return Ok(response);
            }
            let body = response.bytes().await.map_err(transport_error)?;
            error_from_response(&ApiResponse::<()>::new(status, body.to_vec()))?;
            Err(HarborError::UnknownApi)
        };

        tokio::select! {
            _ = ctx.cancellation().cancelled() => Err(HarborError::Cancelled),
            result = open => result,
        }
    }
}

fn transport_error(err: reqwest::Error) -> HarborError {
    HarborError::Transport(err.to_string())
}

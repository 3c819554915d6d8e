use std::sync::OnceLock;

use harbor_core::{HarborError, Result};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};

use super::platform;
use crate::connection::{ConnectionMetadata, FORWARDED_FOR_HEADER};

pub const PRODUCT: &str = "harbor-mcp-server";

/// Stamps outbound API requests with identity and provenance headers.
#[derive(Debug)]
pub struct RequestDecorator {
    version: String,
    platform: OnceLock<String>,
}

impl RequestDecorator {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            platform: OnceLock::new(),
        }
    }

    /// Decorator with a fixed platform descriptor instead of probing the host.
    pub fn with_platform(version: impl Into<String>, platform: impl Into<String>) -> Self {
        let decorator = Self::new(version);
        let _ = decorator.platform.set(platform.into());
        decorator
    }

    pub fn platform(&self) -> &str {
        self.platform.get_or_init(platform::detect)
    }

    /// Detects the platform on the blocking pool unless it is already known.
    /// Detection may spawn a subprocess, so async callers go through here.
    pub async fn resolve_platform(&self) {
        if self.platform.get().is_some() {
            return;
        }
        let detected = tokio::task::spawn_blocking(platform::detect)
            .await
            .unwrap_or_else(|_| std::env::consts::OS.to_string());
        let _ = self.platform.set(detected);
    }

    /// `harbor-mcp-server/<version> (<platform>)`, followed by the caller's
    /// own user agent when one was forwarded.
    pub fn user_agent(&self, connection: &ConnectionMetadata) -> String {
        let base = format!("{PRODUCT}/{} ({})", self.version, self.platform());
        if connection.user_agent.is_empty() {
            base
        } else {
            format!("{base} {}", connection.user_agent)
        }
    }

    pub fn decorate(
        &self,
        headers: &mut HeaderMap,
        connection: &ConnectionMetadata,
        token: &str,
    ) -> Result<()> {
        let user_agent = self.user_agent(connection);
        let user_agent = match HeaderValue::from_str(&user_agent) {
            Ok(value) => value,
            Err(_) => {
                tracing::debug!(
                    event = "client_user_agent_dropped",
                    "forwarded user agent is not a valid header value"
                );
                HeaderValue::from_str(&self.user_agent(&ConnectionMetadata::default()))
                    .map_err(|err| HarborError::Config(format!("invalid user agent: {err}")))?
            }
        };
        headers.insert(USER_AGENT, user_agent);

        let mut authorization = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
            HarborError::Config("the API key contains characters not allowed in a header".to_string())
        })?;
        authorization.set_sensitive(true);
        headers.insert(AUTHORIZATION, authorization);

        if !connection.forwarded_for.is_empty() {
            match HeaderValue::from_str(&connection.forwarded_for) {
                Ok(value) => {
                    headers.insert(FORWARDED_FOR_HEADER, value);
                }
                Err(_) => tracing::debug!(
                    event = "forwarded_for_dropped",
                    "proxy chain is not a valid header value"
                ),
            }
        }

        Ok(())
    }
}

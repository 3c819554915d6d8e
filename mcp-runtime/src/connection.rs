use axum::http::HeaderMap;
use axum::http::header::USER_AGENT;

pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// The parts of an inbound HTTP request the context binders read.
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    pub headers: HeaderMap,
    /// Peer address as reported by the listener, usually `ip:port`.
    pub remote_addr: String,
}

impl InboundRequest {
    pub fn new(headers: HeaderMap, remote_addr: impl Into<String>) -> Self {
        Self {
            headers,
            remote_addr: remote_addr.into(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

/// Caller identity and proxy chain of the inbound request, forwarded on
/// outbound API calls. Empty on stdio.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionMetadata {
    pub user_agent: String,
    pub forwarded_for: String,
}

impl ConnectionMetadata {
    pub fn from_request(request: &InboundRequest) -> Self {
        Self {
            user_agent: request
                .headers
                .get(USER_AGENT)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string(),
            forwarded_for: build_forwarded_for(
                request.header(FORWARDED_FOR_HEADER).unwrap_or_default(),
                &request.remote_addr,
            ),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.user_agent.is_empty() && self.forwarded_for.is_empty()
    }
}

/// Appends the peer address to an existing `X-Forwarded-For` chain unless it
/// already is the last hop.
pub(crate) fn build_forwarded_for(existing: &str, remote_addr: &str) -> String {
    let client_ip = client_ip(remote_addr);
    if client_ip.is_empty() {
        return existing.to_string();
    }
    if existing.is_empty() {
        return client_ip.to_string();
    }
    if last_forwarded_entry(existing) == client_ip {
        return existing.to_string();
    }
    format!("{existing}, {client_ip}")
}

/// Peer host with the port stripped; unparseable addresses are used verbatim.
pub(crate) fn client_ip(remote_addr: &str) -> &str {
    if remote_addr.is_empty() {
        return "";
    }
    match split_host(remote_addr) {
        Some(host) => host,
        None => {
            tracing::debug!(
                event = "remote_addr_unparsed",
                remote_addr,
                "peer address is not host:port, using it verbatim"
            );
            remote_addr
        }
    }
}

/// Host part of `host:port` or `[v6]:port`. Bare IPv6 and portless values
/// are rejected.
fn split_host(addr: &str) -> Option<&str> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        let port = after.strip_prefix(':')?;
        if port.contains(['[', ']']) {
            return None;
        }
        return Some(host);
    }
    let (host, _port) = addr.rsplit_once(':')?;
    if host.contains([':', '[', ']']) {
        return None;
    }
    Some(host)
}

fn last_forwarded_entry(chain: &str) -> &str {
    chain.rsplit(',').next().unwrap_or_default().trim()
}

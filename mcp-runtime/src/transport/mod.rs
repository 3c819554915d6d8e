pub mod http;
pub mod stdio;

pub use http::{MCP_PATH, MCP_SESSION_ID_HEADER, router, serve_http};
pub use stdio::{StdioTransport, serve_stdio};

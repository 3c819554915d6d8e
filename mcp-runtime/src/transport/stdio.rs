//! JSON-RPC over stdin/stdout.
//!
//! Accepts both `Content-Length` framed messages and newline-delimited JSON,
//! and answers each message in the framing it arrived in.

use std::io;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::binder::StdioContextFn;
use crate::context::CallContext;
use crate::{McpServer, parse_error_response};

pub const STDIO_CONNECTION_ID: &str = "stdio";

/// Largest `Content-Length` accepted; anything bigger is a framing error.
pub const MAX_MESSAGE_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    ContentLength,
    Lines,
}

#[derive(Debug)]
pub struct InboundMessage {
    pub framing: Framing,
    pub payload: Result<Value, serde_json::Error>,
}

/// Reads the next message. `Ok(None)` on a clean EOF between messages.
///
/// A payload that is not valid JSON is returned as `Err` in `payload` so the
/// caller can answer it; only framing problems fail the read itself.
pub async fn read_message<R>(reader: &mut R) -> io::Result<Option<InboundMessage>>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut in_headers = false;

    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            if !in_headers {
                return Ok(None);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "unexpected EOF while reading message headers",
            ));
        }

        let trimmed = line.trim();
        if !in_headers {
            if trimmed.is_empty() {
                continue;
            }
            if !looks_like_header(trimmed) {
                return Ok(Some(InboundMessage {
                    framing: Framing::Lines,
                    payload: serde_json::from_str(trimmed),
                }));
            }
            in_headers = true;
        }

        if trimmed.is_empty() {
            break;
        }
        let Some((name, value)) = trimmed.split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            let parsed = value.trim().parse::<usize>().map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidData, "invalid Content-Length header")
            })?;
            content_length = Some(parsed);
        }
    }

    let content_length = content_length.ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "missing Content-Length header")
    })?;
    if content_length > MAX_MESSAGE_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Content-Length {content_length} exceeds the {MAX_MESSAGE_BYTES} byte limit"),
        ));
    }
    let mut payload = vec![0_u8; content_length];
    reader.read_exact(&mut payload).await?;

    Ok(Some(InboundMessage {
        framing: Framing::ContentLength,
        payload: serde_json::from_slice(&payload),
    }))
}

fn looks_like_header(line: &str) -> bool {
    !line.starts_with(['{', '[']) && line.contains(':')
}

pub async fn write_message<W>(writer: &mut W, value: &Value, framing: Framing) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(value)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    match framing {
        Framing::ContentLength => {
            let header = format!(
                "Content-Length: {}\r\nContent-Type: application/json\r\n\r\n",
                body.len()
            );
            writer.write_all(header.as_bytes()).await?;
            writer.write_all(&body).await?;
        }
        Framing::Lines => {
            writer.write_all(&body).await?;
            writer.write_all(b"\n").await?;
        }
    }
    writer.flush().await
}

pub struct StdioTransport {
    server: McpServer,
    binder: Arc<dyn StdioContextFn>,
    root: CancellationToken,
}

impl StdioTransport {
    pub fn new(server: McpServer, binder: Arc<dyn StdioContextFn>) -> Self {
        Self {
            server,
            binder,
            root: CancellationToken::new(),
        }
    }

    /// Token cancelled when the transport stops; every call runs under a child.
    pub fn root_token(&self) -> &CancellationToken {
        &self.root
    }

    pub async fn serve<R, W>(&self, reader: &mut R, writer: &mut W) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        tracing::info!(event = "stdio_started", "serving MCP over stdio");
        let result = self.serve_loop(reader, writer).await;
        self.root.cancel();
        tracing::info!(event = "stdio_stopped", "stdio transport stopped");
        result
    }

    async fn serve_loop<R, W>(&self, reader: &mut R, writer: &mut W) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        loop {
            let message = tokio::select! {
                _ = self.root.cancelled() => return Ok(()),
                message = read_message(reader) => message?,
            };
            let Some(message) = message else {
                return Ok(());
            };

            let incoming = match message.payload {
                Ok(incoming) => incoming,
                Err(err) => {
                    tracing::debug!(event = "stdio_parse_error", error = %err, "undecodable message");
                    write_message(writer, &parse_error_response(), message.framing).await?;
                    continue;
                }
            };

            let is_batch = incoming.is_array();
            let ctx = CallContext::new()
                .with_connection_id(STDIO_CONNECTION_ID)
                .with_cancellation(self.root.child_token());
            let ctx = self.binder.apply(ctx).await;

            let mut responses = self.server.handle_incoming_message(&ctx, incoming).await;
            if is_batch && !responses.is_empty() {
                write_message(writer, &Value::Array(responses), message.framing).await?;
            } else if let Some(response) = responses.pop() {
                write_message(writer, &response, message.framing).await?;
            }
        }
    }
}

/// Serves on the process's stdin and stdout until EOF.
pub async fn serve_stdio(transport: &StdioTransport) -> io::Result<()> {
    let mut reader = BufReader::new(tokio::io::stdin());
    let mut writer = tokio::io::stdout();
    transport.serve(&mut reader, &mut writer).await
}

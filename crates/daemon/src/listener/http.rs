// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Minimal HTTP surface for workload reports.
//!
//! The boot script only has `curl`, so heartbeats and instruction pulls
//! arrive as plain HTTP on the daemon's TCP port:
//!
//!   POST /heartbeat      {"agent_id": ..., "status": ..., "message": ...}
//!   GET  /instructions?id=<agent_id>
//!
//! Authentication is the bearer token (the `fleet-auth-token` credential
//! value, which the boot script reads from its injection slot). This is
//! deliberately not a web server: one request per connection, no
//! keep-alive, bounded head and body sizes.

use fleet_core::{AgentId, Clock, HeartbeatStatus, OrchestratorError};
use fleet_provider::Provider;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use super::{ConnectionError, ListenCtx};

/// Bounds on hostile input: curl requests are a few hundred bytes.
const MAX_HEAD_BYTES: usize = 8 * 1024;
const MAX_BODY_BYTES: usize = 64 * 1024;

pub(crate) fn is_http_prefix(prefix: &[u8; 4]) -> bool {
    prefix == b"POST" || prefix == b"GET "
}

/// One parsed request.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct HttpHead {
    pub method: String,
    pub path: String,
    pub bearer: Option<String>,
    pub content_length: usize,
}

#[derive(Debug, Deserialize)]
struct HeartbeatBody {
    agent_id: AgentId,
    status: HeartbeatStatus,
    #[serde(default)]
    message: Option<String>,
}

pub(crate) async fn handle<R, W, P, C>(
    prefix: [u8; 4],
    mut reader: R,
    mut writer: W,
    ctx: &ListenCtx<P, C>,
) -> Result<(), ConnectionError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
    P: Provider,
    C: Clock,
{
    let (head, body) = match read_request(prefix, &mut reader).await {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!(error = %e, "malformed http request");
            respond(&mut writer, 400, "Bad Request", r#"{"error":"malformed request"}"#).await?;
            return Ok(());
        }
    };

    if let Some(expected) = &ctx.auth_token {
        if head.bearer.as_deref() != Some(expected.as_str()) {
            warn!(path = %head.path, "rejected http request with bad bearer token");
            respond(&mut writer, 401, "Unauthorized", r#"{"error":"unauthorized"}"#).await?;
            return Ok(());
        }
    }

    match (head.method.as_str(), head.path.split('?').next().unwrap_or("")) {
        ("POST", "/heartbeat") => {
            let parsed: HeartbeatBody = match serde_json::from_slice(&body) {
                Ok(parsed) => parsed,
                Err(e) => {
                    debug!(error = %e, "unparseable heartbeat body");
                    respond(&mut writer, 400, "Bad Request", r#"{"error":"invalid body"}"#)
                        .await?;
                    return Ok(());
                }
            };
            // The boot script sends "" when it has no message.
            let message = parsed.message.filter(|m| !m.is_empty());
            match ctx.orchestrator.heartbeat(&parsed.agent_id, parsed.status, message).await {
                Ok(()) => respond(&mut writer, 200, "OK", r#"{"ok":true}"#).await?,
                Err(e) => respond_error(&mut writer, &e).await?,
            }
        }
        ("GET", "/instructions") => {
            let Some(id) = query_param(&head.path, "id") else {
                respond(&mut writer, 400, "Bad Request", r#"{"error":"missing id"}"#).await?;
                return Ok(());
            };
            match ctx.orchestrator.pull_instructions(&AgentId::from_string(id)).await {
                Ok(instructions) => {
                    let body = serde_json::to_string(&instructions)
                        .unwrap_or_else(|_| "[]".to_string());
                    respond(&mut writer, 200, "OK", &body).await?;
                }
                Err(e) => respond_error(&mut writer, &e).await?,
            }
        }
        _ => respond(&mut writer, 404, "Not Found", r#"{"error":"no such route"}"#).await?,
    }
    Ok(())
}

/// Read head (through the blank line) and body, starting after the
/// already-consumed 4-byte prefix.
async fn read_request<R: AsyncRead + Unpin>(
    prefix: [u8; 4],
    reader: &mut R,
) -> Result<(HttpHead, Vec<u8>), std::io::Error> {
    let mut buf: Vec<u8> = prefix.to_vec();
    let head_end = loop {
        if let Some(pos) = find_head_end(&buf) {
            break pos;
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "head too large"));
        }
        let mut chunk = [0u8; 1024];
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed mid-head",
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head_text = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let head = parse_head(&head_text)
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "bad request line"))?;
    if head.content_length > MAX_BODY_BYTES {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "body too large"));
    }

    let mut body: Vec<u8> = buf[head_end + 4..].to_vec();
    while body.len() < head.content_length {
        let mut chunk = vec![0u8; head.content_length - body.len()];
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed mid-body",
            ));
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(head.content_length);
    Ok((head, body))
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Parse the request line and the headers the routes care about.
pub(crate) fn parse_head(head: &str) -> Option<HttpHead> {
    let mut lines = head.lines();
    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut bearer = None;
    let mut content_length = 0usize;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else { continue };
        let value = value.trim();
        if name.eq_ignore_ascii_case("authorization") {
            bearer = value.strip_prefix("Bearer ").map(str::to_string);
        } else if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse().ok()?;
        }
    }
    Some(HttpHead { method, path, bearer, content_length })
}

/// `?name=value` lookup; values are plain ids, no percent-decoding needed.
pub(crate) fn query_param<'a>(path: &'a str, name: &str) -> Option<&'a str> {
    let (_, query) = path.split_once('?')?;
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == name).then_some(v)
    })
}

async fn respond<W: AsyncWrite + Unpin>(
    writer: &mut W,
    status: u16,
    reason: &str,
    body: &str,
) -> Result<(), ConnectionError> {
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len(),
    );
    writer.write_all(response.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

async fn respond_error<W: AsyncWrite + Unpin>(
    writer: &mut W,
    err: &OrchestratorError,
) -> Result<(), ConnectionError> {
    let (status, reason) = match err {
        OrchestratorError::NotFound(_) => (404, "Not Found"),
        OrchestratorError::Conflict(_) => (409, "Conflict"),
        _ => (502, "Bad Gateway"),
    };
    let body = format!(
        r#"{{"error":{},"kind":"{}"}}"#,
        serde_json::to_string(&err.to_string()).unwrap_or_else(|_| "\"error\"".to_string()),
        err.kind(),
    );
    respond(writer, status, reason, &body).await
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;

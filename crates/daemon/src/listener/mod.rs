// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Listener task for handling socket I/O.
//!
//! Two transports share the TCP port: the framed request protocol (CLI and
//! tooling) and a minimal HTTP surface for workload reports, which only
//! have `curl` on the remote side. The first four bytes of a TCP
//! connection disambiguate — an HTTP method prefix routes to the HTTP
//! handler, anything else is a frame length. The Unix socket speaks only
//! the framed protocol and is trusted; TCP requires the auth token, either
//! in the Hello handshake or as a bearer header.

mod http;

use fleet_core::Clock;
use fleet_provider::Provider;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::env::{ipc_timeout, PROTOCOL_VERSION};
use crate::orchestrator::Orchestrator;
use crate::protocol::{self, AgentView, Request, Response};
use crate::reconciler::Reconciler;

/// Shared daemon context for all request handlers.
pub struct ListenCtx<P: Provider, C: Clock> {
    pub orchestrator: Arc<Orchestrator<P, C>>,
    pub reconciler: Arc<Reconciler<P, C>>,
    pub shutdown: Arc<Notify>,
    /// Auth token for TCP connections (from `FLEET_AUTH_TOKEN`).
    /// When set, TCP clients must present it: framed clients in the Hello
    /// handshake, HTTP clients as a bearer header.
    pub auth_token: Option<String>,
}

/// Listener task for accepting socket connections.
pub struct Listener<P: Provider, C: Clock> {
    unix: UnixListener,
    tcp: Option<TcpListener>,
    ctx: Arc<ListenCtx<P, C>>,
}

/// Errors from connection handling.
#[derive(Debug, Error)]
pub(crate) enum ConnectionError {
    #[error("protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl<P: Provider, C: Clock> Listener<P, C> {
    /// Create a new listener with Unix socket only.
    pub fn new(unix: UnixListener, ctx: Arc<ListenCtx<P, C>>) -> Self {
        Self { unix, tcp: None, ctx }
    }

    /// Create a new listener with both Unix socket and TCP.
    pub fn with_tcp(unix: UnixListener, tcp: TcpListener, ctx: Arc<ListenCtx<P, C>>) -> Self {
        Self { unix, tcp: Some(tcp), ctx }
    }

    /// Run the listener loop, spawning a task per connection.
    pub async fn run(mut self) {
        match self.tcp.take() {
            Some(tcp) => self.run_dual(tcp).await,
            None => self.run_unix_only().await,
        }
    }

    async fn run_unix_only(self) {
        loop {
            match self.unix.accept().await {
                Ok((stream, _)) => {
                    let ctx = Arc::clone(&self.ctx);
                    tokio::spawn(async move {
                        let (reader, writer) = stream.into_split();
                        if let Err(e) = handle_framed(reader, writer, false, &ctx).await {
                            log_connection_error(e);
                        }
                    });
                }
                Err(e) => error!("unix accept error: {}", e),
            }
        }
    }

    async fn run_dual(self, tcp: TcpListener) {
        loop {
            tokio::select! {
                result = self.unix.accept() => {
                    match result {
                        Ok((stream, _)) => {
                            let ctx = Arc::clone(&self.ctx);
                            tokio::spawn(async move {
                                let (reader, writer) = stream.into_split();
                                if let Err(e) = handle_framed(reader, writer, false, &ctx).await {
                                    log_connection_error(e);
                                }
                            });
                        }
                        Err(e) => error!("unix accept error: {}", e),
                    }
                }
                result = tcp.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!("tcp connection from {}", addr);
                            let ctx = Arc::clone(&self.ctx);
                            tokio::spawn(async move {
                                let (reader, writer) = stream.into_split();
                                if let Err(e) = handle_tcp(reader, writer, &ctx).await {
                                    log_connection_error(e);
                                }
                            });
                        }
                        Err(e) => error!("tcp accept error: {}", e),
                    }
                }
            }
        }
    }
}

fn log_connection_error(e: ConnectionError) {
    match e {
        ConnectionError::Protocol(protocol::ProtocolError::ConnectionClosed) => {
            debug!("client disconnected")
        }
        ConnectionError::Protocol(protocol::ProtocolError::Timeout) => {
            warn!("connection timeout")
        }
        _ => error!("connection error: {}", e),
    }
}

/// Handle one TCP connection: sniff the first four bytes to pick the
/// transport, then hand off.
async fn handle_tcp<R, W, P, C>(
    mut reader: R,
    writer: W,
    ctx: &ListenCtx<P, C>,
) -> Result<(), ConnectionError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
    P: Provider,
    C: Clock,
{
    let mut prefix = [0u8; 4];
    if let Err(e) = reader.read_exact(&mut prefix).await {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            return Err(protocol::ProtocolError::ConnectionClosed.into());
        }
        return Err(e.into());
    }

    if http::is_http_prefix(&prefix) {
        return http::handle(prefix, reader, writer, ctx).await;
    }

    let request = read_framed_after_prefix(&mut reader, prefix).await?;
    dispatch_framed(request, reader, writer, true, ctx).await
}

/// Framed connection where the 4-byte prefix was already consumed.
async fn read_framed_after_prefix<R: AsyncRead + Unpin>(
    reader: &mut R,
    prefix: [u8; 4],
) -> Result<Request, protocol::ProtocolError> {
    let len = u32::from_be_bytes(prefix);
    if len > protocol::MAX_MESSAGE_BYTES {
        return Err(protocol::ProtocolError::TooLarge(len));
    }
    let payload = tokio::time::timeout(ipc_timeout(), async {
        let mut payload = vec![0u8; len as usize];
        reader.read_exact(&mut payload).await?;
        Ok::<_, std::io::Error>(payload)
    })
    .await
    .map_err(|_| protocol::ProtocolError::Timeout)?
    .map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            protocol::ProtocolError::ConnectionClosed
        } else {
            protocol::ProtocolError::Io(e)
        }
    })?;
    protocol::decode(&payload)
}

/// Handle one framed connection from the first byte.
async fn handle_framed<R, W, P, C>(
    mut reader: R,
    writer: W,
    tcp: bool,
    ctx: &ListenCtx<P, C>,
) -> Result<(), ConnectionError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
    P: Provider,
    C: Clock,
{
    let request = protocol::read_request(&mut reader, ipc_timeout()).await?;
    dispatch_framed(request, reader, writer, tcp, ctx).await
}

async fn dispatch_framed<R, W, P, C>(
    request: Request,
    mut reader: R,
    mut writer: W,
    tcp: bool,
    ctx: &ListenCtx<P, C>,
) -> Result<(), ConnectionError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
    P: Provider,
    C: Clock,
{
    // TCP connections must authenticate via Hello as the first request.
    if tcp {
        if let Request::Hello { ref token, .. } = request {
            if let Some(ref expected) = ctx.auth_token {
                if token.as_deref() != Some(expected.as_str()) {
                    let response = Response::Error {
                        kind: "unauthorized".to_string(),
                        message: "unauthorized".to_string(),
                    };
                    let _ = protocol::write_response(&mut writer, &response, ipc_timeout()).await;
                    return Ok(());
                }
            }
        } else {
            let response = Response::Error {
                kind: "unauthorized".to_string(),
                message: "TCP connections must start with Hello".to_string(),
            };
            let _ = protocol::write_response(&mut writer, &response, ipc_timeout()).await;
            return Ok(());
        }
    }

    if matches!(request, Request::GetAgent { .. } | Request::ListAgents { .. }) {
        debug!(request = ?request, "received query");
    } else {
        info!(request = ?request, "received request");
    }

    // Race the handler against client disconnect so a dropped CLI doesn't
    // leave a provider call running on its behalf.
    let response = tokio::select! {
        response = handle_request(request, ctx) => response,
        _ = detect_client_disconnect(&mut reader) => {
            debug!("client disconnected, abandoning request");
            return Ok(());
        }
    };

    protocol::write_response(&mut writer, &response, ipc_timeout()).await?;
    Ok(())
}

/// In the request-response protocol the client sends one request then
/// waits; a read returning EOF means it went away.
async fn detect_client_disconnect<R: AsyncReadExt + Unpin>(reader: &mut R) {
    let mut buf = [0u8; 1];
    let _ = reader.read(&mut buf).await;
}

/// Handle a single request and return a response.
pub(crate) async fn handle_request<P: Provider, C: Clock>(
    request: Request,
    ctx: &ListenCtx<P, C>,
) -> Response {
    match request {
        Request::Ping => Response::Pong,

        // Auth for TCP happens at the transport layer before dispatch.
        Request::Hello { .. } => Response::Hello { version: PROTOCOL_VERSION.to_string() },

        Request::CreateAgent { id, task, backend } => {
            if let Some(requested) = backend {
                let configured = ctx.orchestrator.provider().backend();
                if requested != configured {
                    return Response::Error {
                        kind: "conflict".to_string(),
                        message: format!(
                            "daemon is configured for the {configured} backend, not {requested}"
                        ),
                    };
                }
            }
            match ctx.orchestrator.create(id, task).await {
                Ok(record) => Response::Agent { agent: view(ctx, &record) },
                Err(e) => Response::from_error(&e),
            }
        }

        Request::GetAgent { id } => match ctx.orchestrator.get(&id) {
            Ok(record) => Response::Agent { agent: view(ctx, &record) },
            Err(e) => Response::from_error(&e),
        },

        Request::ListAgents { status } => {
            let agents =
                ctx.orchestrator.list(status).iter().map(|r| view(ctx, r)).collect();
            Response::Agents { agents }
        }

        Request::StopAgent { id } => match ctx.orchestrator.stop(&id).await {
            Ok(record) => Response::Agent { agent: view(ctx, &record) },
            Err(e) => Response::from_error(&e),
        },

        Request::DeleteAgent { id } => match ctx.orchestrator.delete(&id).await {
            Ok(_) => Response::Ok,
            Err(e) => Response::from_error(&e),
        },

        Request::TellAgent { id, instruction } => {
            match ctx.orchestrator.tell(&id, instruction).await {
                Ok(_) => Response::Ok,
                Err(e) => Response::from_error(&e),
            }
        }

        Request::Heartbeat { id, status, message } => {
            match ctx.orchestrator.heartbeat(&id, status, message).await {
                Ok(()) => Response::Ok,
                Err(e) => Response::from_error(&e),
            }
        }

        Request::PullInstructions { id } => match ctx.orchestrator.pull_instructions(&id).await {
            Ok(instructions) => Response::Instructions { instructions },
            Err(e) => Response::from_error(&e),
        },

        Request::Resync => match ctx.reconciler.resync().await {
            Ok(()) => Response::Ok,
            Err(e) => Response::from_error(&e),
        },

        Request::Shutdown => {
            ctx.shutdown.notify_one();
            Response::ShuttingDown
        }
    }
}

/// Build the client-facing view of a record: derived unresponsive label
/// plus the pending instruction count.
fn view<P: Provider, C: Clock>(
    ctx: &ListenCtx<P, C>,
    record: &fleet_core::AgentRecord,
) -> AgentView {
    let now = ctx.orchestrator.clock().epoch_ms();
    AgentView::from_record(
        record,
        ctx.reconciler.unresponsive(record, now),
        ctx.orchestrator.pending_instruction_count(&record.id),
    )
}

#[cfg(test)]
#[path = "../listener_tests.rs"]
mod tests;

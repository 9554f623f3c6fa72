//! Per-connection session handling.
//!
//! A session moves through four phases:
//!
//! - awaiting version: write the version header, read the client's
//!   selection, serve the legacy re-ask round trip if asked.
//! - handshake: synchronous request/response steps — the version-2
//!   `Parameters` exchange and the `Begin` call that issues a session id.
//!   Everything up to here runs under one bounded deadline, so a silent
//!   client cannot pin a client slot.
//! - steady state: the receive loop. Each inbound frame is matched to a
//!   handler in the per-session registry and spawned onto the worker pool;
//!   the loop re-arms immediately and never blocks on handler work.
//! - closed: transport error, EOF or `Terminate`. All subscriptions are
//!   unregistered from the backend and the writer task winds down.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context};
use registry_core::{ErrorObject, ManagementRegistry, OperationErrorKind};
use registry_protocol::{
    check_magic, decode_frame, encode_error_object, encode_response, profile_for,
    VersionHeader, VersionProfile, WireMessage, Frame, MessageType, Param, ResponseFrame,
    MAX_STRING_LEN, RESPONSE_FLAG, SHORT_LIST_LIMIT,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::framing::{read_prefixed, write_prefixed};
use crate::handlers::{Handler, HandlerRegistry};
use crate::notifications::NotificationBridge;
use crate::types::{ConnectionId, OutboundRx, SessionCtx};

/// Process-unique suffix for issued session ids.
static NEXT_SESSION_SEQ: AtomicU64 = AtomicU64::new(1);

/// Drive one client connection from version negotiation to teardown.
pub async fn serve_connection<S>(
    conn_id: ConnectionId,
    stream: S,
    registry: Arc<dyn ManagementRegistry>,
    config: Config,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    debug!(conn = conn_id.0, "session started");

    let bootstrap = bootstrap(&mut reader, &mut writer, conn_id, &config);
    let (version, session_id) =
        match tokio::time::timeout(config.handshake_timeout, bootstrap).await {
            Ok(Ok(Some(established))) => established,
            // Client said goodbye before Begin; nothing to tear down.
            Ok(Ok(None)) => return Ok(()),
            Ok(Err(e)) => return Err(e),
            Err(_) => bail!(
                "handshake not completed within {:?}",
                config.handshake_timeout
            ),
        };

    info!(conn = conn_id.0, version, session = %session_id, "session established");

    // From here on the writer task owns the stream's write half; handlers
    // and the notification bridge only enqueue encoded frames.
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    tokio::spawn(run_writer(writer, out_rx));

    let ctx = Arc::new(SessionCtx {
        id: conn_id,
        registry: registry.clone(),
        outbound: out_tx.clone(),
        notifications: NotificationBridge::new(registry.clone(), out_tx),
    });

    let result = receive_loop(&mut reader, &ctx).await;

    debug!(conn = conn_id.0, "tearing down");
    ctx.notifications.remove_all();
    registry.connection_closed();
    result
}

/// Version negotiation plus the handshake, up to the issued session id.
/// `None` means the client terminated cleanly before `Begin`.
async fn bootstrap<R, W>(
    reader: &mut R,
    writer: &mut W,
    conn_id: ConnectionId,
    config: &Config,
) -> anyhow::Result<Option<(u8, String)>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let version = negotiate(reader, writer, config).await?;
    let profile =
        profile_for(version).with_context(|| format!("no profile for version {}", version))?;
    debug!(conn = conn_id.0, version, "version negotiated");

    Ok(run_handshake(reader, writer, conn_id, profile, config)
        .await?
        .map(|session_id| (version, session_id)))
}

// ============================================================================
// AwaitingVersion
// ============================================================================

async fn negotiate<R, W>(reader: &mut R, writer: &mut W, config: &Config) -> anyhow::Result<u8>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let offered = registry_protocol::effective_versions(&config.excluded_versions);
    if offered.is_empty() {
        bail!("every supported protocol version is excluded by configuration");
    }

    // A list too long for the short header form is announced via the
    // legacy marker: offer 0 plus the highest versions that fit, and hand
    // out the full list on re-ask.
    let short_form = if offered.len() > SHORT_LIST_LIMIT {
        let mut versions = vec![0u8];
        versions.extend_from_slice(&offered[offered.len() - SHORT_LIST_LIMIT..]);
        versions
    } else {
        offered.clone()
    };

    write_header(writer, &short_form, config.snapshot, None).await?;

    let mut chosen = read_selection(reader).await?;
    if chosen == 0 {
        let client_version = read_reask_string(reader).await?;
        debug!(client_version = %client_version, "re-ask from client");
        write_header(
            writer,
            &offered,
            config.snapshot,
            Some(&config.server_version),
        )
        .await?;
        chosen = read_selection(reader).await?;
        if chosen == 0 {
            bail!("client repeated the re-ask selector");
        }
    }

    if !offered.contains(&chosen) {
        bail!("client selected unoffered version {}", chosen);
    }
    Ok(chosen)
}

async fn write_header<W>(
    writer: &mut W,
    versions: &[u8],
    snapshot: bool,
    full_version: Option<&str>,
) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let header = VersionHeader {
        versions: versions.to_vec(),
        snapshot,
        full_version: full_version.map(str::to_string),
    };
    let mut buf = Vec::new();
    header.encode(&mut buf).context("encoding version header")?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_selection<R>(reader: &mut R) -> anyhow::Result<u8>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).await?;
    check_magic(&buf).context("client version selection")?;
    Ok(buf[3])
}

async fn read_reask_string<R>(reader: &mut R) -> anyhow::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = i32::from_be_bytes(len_buf);
    if len < 0 || len as usize > MAX_STRING_LEN {
        bail!("client version string length {} out of range", len);
    }
    let mut bytes = vec![0u8; len as usize];
    reader.read_exact(&mut bytes).await?;
    String::from_utf8(bytes).context("client version string")
}

// ============================================================================
// Handshake
// ============================================================================

/// Run the handshake steps. Returns the issued session id, or `None` if
/// the client terminated cleanly before `Begin`.
async fn run_handshake<R, W>(
    reader: &mut R,
    writer: &mut W,
    conn_id: ConnectionId,
    profile: VersionProfile,
    config: &Config,
) -> anyhow::Result<Option<String>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut parameters_done = false;

    loop {
        let body = read_prefixed(reader).await?;
        let frame = match decode_frame(&body) {
            Ok(WireMessage::Request(frame)) => frame,
            Ok(WireMessage::Response(_)) => bail!("response frame during handshake"),
            Err(e) => bail!("malformed handshake frame: {}", e),
        };

        match frame.msg_type {
            MessageType::Parameters if profile.parameter_exchange && !parameters_done => {
                let offered = match frame.params.as_slice() {
                    [Param::StringArray(items)] => items.clone(),
                    _ => bail!("malformed parameters frame"),
                };
                let accepted = accept_parameters(&offered, config);
                debug!(conn = conn_id.0, ?accepted, "parameter exchange");
                respond(
                    writer,
                    &frame,
                    Ok(Some(Param::StringArray(accepted))),
                )
                .await?;
                parameters_done = true;
            }
            MessageType::Begin => {
                let seq = NEXT_SESSION_SEQ.fetch_add(1, Ordering::Relaxed);
                let session_id = format!("session-{}-{}", conn_id.0, seq);
                respond(writer, &frame, Ok(Some(Param::String(session_id.clone())))).await?;
                return Ok(Some(session_id));
            }
            MessageType::Terminate => return Ok(None),
            other => bail!("unexpected {:?} frame during handshake", other),
        }
    }
}

/// Keep every offered parameter except excluded authentication mechanisms.
fn accept_parameters(offered: &[String], config: &Config) -> Vec<String> {
    offered
        .iter()
        .filter(|entry| match entry.strip_prefix("auth.mechanism=") {
            Some(mech) => !config.excluded_auth_mechs.iter().any(|m| m == mech),
            None => true,
        })
        .cloned()
        .collect()
}

async fn respond<W>(
    writer: &mut W,
    request: &Frame,
    outcome: Result<Option<Param>, Vec<u8>>,
) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut body = Vec::new();
    encode_response(
        &ResponseFrame {
            msg_type: request.msg_type,
            correlation_id: request.correlation_id,
            outcome,
        },
        &mut body,
    )
    .context("encoding handshake response")?;
    write_prefixed(writer, &body).await?;
    Ok(())
}

// ============================================================================
// SteadyState
// ============================================================================

async fn receive_loop<R>(reader: &mut R, ctx: &Arc<SessionCtx>) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
{
    let handlers = HandlerRegistry::new();

    loop {
        let body = match read_prefixed(reader).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!(conn = ctx.id.0, "client disconnected");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        if body.is_empty() {
            continue;
        }

        match decode_frame(&body) {
            Ok(WireMessage::Request(frame)) => match frame.msg_type {
                MessageType::Terminate => {
                    debug!(conn = ctx.id.0, "terminate received");
                    return Ok(());
                }
                MessageType::Notification => {
                    warn!(conn = ctx.id.0, "notification frame from client dropped");
                }
                msg_type => match handlers.lookup(msg_type) {
                    Some(handler) => {
                        // Fan out and re-arm immediately; one slow handler
                        // must not starve the channel.
                        let ctx = ctx.clone();
                        tokio::spawn(run_handler(ctx, handler, frame));
                    }
                    None => {
                        warn!(conn = ctx.id.0, ?msg_type, "no handler for message type");
                        if frame.correlation_id != 0 {
                            send_failure(
                                ctx,
                                msg_type,
                                frame.correlation_id,
                                "unsupported message type",
                            );
                        }
                    }
                },
            },
            Ok(WireMessage::Response(resp)) => {
                debug!(conn = ctx.id.0, id = resp.correlation_id, "stale response frame dropped");
            }
            Err(e) => {
                // Frame-fatal, not channel-fatal. If the header survived,
                // answer with a failure so the remote caller is not left
                // hanging; otherwise log and drop.
                warn!(conn = ctx.id.0, error = %e, "malformed frame");
                if let Some((msg_type, correlation_id)) = salvage_header(&body) {
                    if correlation_id != 0 {
                        send_failure(ctx, msg_type, correlation_id, "malformed frame");
                    }
                }
            }
        }
    }
}

/// Best-effort header recovery from a frame that failed to decode.
fn salvage_header(body: &[u8]) -> Option<(MessageType, i32)> {
    if body.len() < 5 {
        return None;
    }
    let msg_type = MessageType::from_u8(body[0] & !RESPONSE_FLAG)?;
    let correlation_id = i32::from_be_bytes(body[1..5].try_into().ok()?);
    Some((msg_type, correlation_id))
}

fn send_failure(ctx: &Arc<SessionCtx>, msg_type: MessageType, correlation_id: i32, message: &str) {
    let error = ErrorObject::new(OperationErrorKind::OperationFailed, message);
    let mut body = Vec::new();
    if encode_response(
        &ResponseFrame {
            msg_type,
            correlation_id,
            outcome: Err(encode_error_object(&error)),
        },
        &mut body,
    )
    .is_ok()
    {
        let _ = ctx.outbound.send(body);
    }
}

/// Execute one handler on the worker pool and send its response.
///
/// A backend error becomes a failure response, sanitized to the kinds the
/// operation declares. Failures on a fire-and-forget frame (id 0) are
/// logged only; there is nobody to answer.
async fn run_handler(ctx: Arc<SessionCtx>, handler: Handler, frame: Frame) {
    let msg_type = frame.msg_type;
    let correlation_id = frame.correlation_id;

    let result = handler(ctx.clone(), frame).await;

    if correlation_id == 0 {
        if let Err(e) = result {
            debug!(conn = ctx.id.0, ?msg_type, error = %e, "one-way operation failed");
        }
        return;
    }

    let outcome = match result {
        Ok(param) => Ok(param),
        Err(err) => {
            let sanitized = ErrorObject::sanitized(&err, msg_type.declared_error_kinds());
            debug!(conn = ctx.id.0, ?msg_type, kind = ?sanitized.kind, "operation failed");
            Err(encode_error_object(&sanitized))
        }
    };

    let mut body = Vec::new();
    match encode_response(
        &ResponseFrame {
            msg_type,
            correlation_id,
            outcome,
        },
        &mut body,
    ) {
        Ok(()) => {
            let _ = ctx.outbound.send(body);
        }
        Err(e) => warn!(conn = ctx.id.0, error = %e, "failed to encode response frame"),
    }
}

// ============================================================================
// Writer task
// ============================================================================

async fn run_writer<W>(mut writer: W, mut rx: OutboundRx)
where
    W: AsyncWrite + Unpin,
{
    while let Some(body) = rx.recv().await {
        if let Err(e) = write_prefixed(&mut writer, &body).await {
            debug!(error = %e, "write failed; stopping writer");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

//! Client side of version negotiation and the session handshake.
//!
//! Runs sequentially on the raw stream before the receive loop exists:
//! read the server's version header, optionally take the legacy re-ask
//! round trip, pick the highest common version, answer with a selection
//! record, then execute the chosen profile's handshake steps (version 2:
//! `Parameters` exchange, then `Begin`; version 1: `Begin` only). Only
//! after `Begin` returns a session id does the channel enter steady state.

use registry_core::OperationErrorKind;
use registry_protocol::{
    check_magic, decode_error_object, decode_frame, encode_request, offers_reask, profile_for,
    select_version, CodecError, Frame, MessageType, Param, VersionHeader, VersionProfile,
    VersionSelection, WireMessage, MAX_STRING_LEN,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::RemoteError;
use crate::framing::{read_prefixed, write_prefixed};

/// Authentication mechanisms advertised in the version-2 parameter
/// exchange, minus whatever the configuration excludes.
const DEFAULT_AUTH_MECHS: &[&str] = &["anonymous", "token"];

/// Outcome of a completed bootstrap.
#[derive(Debug, Clone)]
pub(crate) struct Negotiated {
    pub version: u8,
    pub session_id: String,
}

/// Negotiate a version and run the handshake. The caller bounds the whole
/// bootstrap with the handshake timeout.
pub(crate) async fn establish<S>(
    stream: &mut S,
    config: &ClientConfig,
) -> Result<Negotiated, RemoteError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let profile = negotiate(stream, config).await?;
    let session_id = run_handshake(stream, profile, config).await?;
    Ok(Negotiated {
        version: profile.version,
        session_id,
    })
}

async fn negotiate<S>(stream: &mut S, config: &ClientConfig) -> Result<VersionProfile, RemoteError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let supported = registry_protocol::effective_versions(&config.excluded_versions);
    if supported.is_empty() {
        return Err(RemoteError::Negotiation(
            "every supported protocol version is excluded by configuration".into(),
        ));
    }

    let mut header = read_version_header(stream, false).await?;
    debug!(offered = ?header.versions, snapshot = header.snapshot, "server version header");

    if offers_reask(&header.versions) {
        // Legacy escape path: the short list is incomplete. Send selector 0
        // with our version string and re-read the full header. Exactly one
        // round trip; a second 0 offer is ignored below.
        send_selection(
            stream,
            VersionSelection {
                version: 0,
                client_version: Some(config.client_version.clone()),
            },
        )
        .await?;
        header = read_version_header(stream, true).await?;
        debug!(
            offered = ?header.versions,
            server = header.full_version.as_deref().unwrap_or(""),
            "full version header after re-ask"
        );
    }

    let chosen = select_version(&header.versions, &supported).ok_or_else(|| {
        RemoteError::Negotiation(format!(
            "no common protocol version (server offered {:?}, we support {:?})",
            header.versions, supported
        ))
    })?;

    send_selection(
        stream,
        VersionSelection {
            version: chosen,
            client_version: None,
        },
    )
    .await?;

    profile_for(chosen).ok_or_else(|| {
        RemoteError::Negotiation(format!("no profile for negotiated version {}", chosen))
    })
}

async fn read_version_header<R>(
    reader: &mut R,
    expect_full_string: bool,
) -> Result<VersionHeader, RemoteError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 7];
    reader.read_exact(&mut prefix).await?;
    check_magic(&prefix).map_err(RemoteError::Protocol)?;

    let count = i32::from_be_bytes(prefix[3..7].try_into().unwrap());
    if !(0..=255).contains(&count) {
        return Err(RemoteError::Protocol(CodecError::InvalidField(
            "version count",
        )));
    }

    let mut versions = vec![0u8; count as usize];
    reader.read_exact(&mut versions).await?;

    let mut stability = [0u8; 1];
    reader.read_exact(&mut stability).await?;

    let full_version = if expect_full_string {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await?;
        let len = i32::from_be_bytes(len_buf);
        if len < 0 || len as usize > MAX_STRING_LEN {
            return Err(RemoteError::Protocol(CodecError::Oversize(
                "full version string",
            )));
        }
        let mut bytes = vec![0u8; len as usize];
        reader.read_exact(&mut bytes).await?;
        Some(String::from_utf8(bytes).map_err(|_| RemoteError::Protocol(CodecError::InvalidUtf8))?)
    } else {
        None
    };

    Ok(VersionHeader {
        versions,
        snapshot: stability[0] != 0,
        full_version,
    })
}

async fn send_selection<W>(writer: &mut W, selection: VersionSelection) -> Result<(), RemoteError>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    selection.encode(&mut buf)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

async fn run_handshake<S>(
    stream: &mut S,
    profile: VersionProfile,
    config: &ClientConfig,
) -> Result<String, RemoteError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut next_id = 1i32;

    if profile.parameter_exchange {
        let sent = client_parameters(config);
        let reply = handshake_step(
            stream,
            MessageType::Parameters,
            vec![Param::StringArray(sent)],
            &mut next_id,
        )
        .await?;
        match reply {
            Some(Param::StringArray(accepted)) => {
                debug!(?accepted, "parameter exchange complete");
            }
            _ => {
                return Err(RemoteError::Protocol(CodecError::InvalidField(
                    "parameters response",
                )))
            }
        }
    }

    let reply = handshake_step(stream, MessageType::Begin, vec![], &mut next_id).await?;
    match reply {
        Some(Param::String(session_id)) => Ok(session_id),
        _ => Err(RemoteError::Protocol(CodecError::InvalidField(
            "begin response",
        ))),
    }
}

fn client_parameters(config: &ClientConfig) -> Vec<String> {
    let mut out = vec![format!("client.version={}", config.client_version)];
    for mech in DEFAULT_AUTH_MECHS {
        if !config.excluded_auth_mechs.iter().any(|m| m == mech) {
            out.push(format!("auth.mechanism={}", mech));
        }
    }
    out
}

/// One synchronous request/response step on the raw stream.
async fn handshake_step<S>(
    stream: &mut S,
    msg_type: MessageType,
    params: Vec<Param>,
    next_id: &mut i32,
) -> Result<Option<Param>, RemoteError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let id = *next_id;
    *next_id += 1;

    let mut body = Vec::new();
    encode_request(
        &Frame {
            msg_type,
            correlation_id: id,
            params,
        },
        &mut body,
    )?;
    write_prefixed(stream, &body).await?;

    let reply = read_prefixed(stream).await?;
    match decode_frame(&reply)? {
        WireMessage::Response(resp) if resp.correlation_id == id && resp.msg_type == msg_type => {
            match resp.outcome {
                Ok(param) => Ok(param),
                Err(bytes) => {
                    let obj = decode_error_object(&bytes)?;
                    let kind = obj
                        .resolve(msg_type.declared_error_kinds())
                        .unwrap_or(OperationErrorKind::OperationFailed);
                    Err(RemoteError::Operation {
                        kind,
                        message: obj.message,
                    })
                }
            }
        }
        _ => Err(RemoteError::Protocol(CodecError::InvalidField(
            "handshake response",
        ))),
    }
}

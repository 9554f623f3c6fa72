//! The client receive loop.
//!
//! One task per channel reads length-prefixed frames and routes them:
//! responses complete the matching pending call (a cheap table operation,
//! never blocking), push frames run the subscriber's listener right on the
//! loop so events for one subscription arrive in wire order, and malformed
//! frames are dropped with a diagnostic — frame errors are fatal to the
//! frame, not the channel.
//!
//! When the stream ends or errors, the loop cancels every pending call
//! with the same transport error and clears the subscription table.

use std::sync::Arc;

use registry_core::Notification;
use registry_protocol::{decode_frame, Frame, MessageType, Param, WireMessage};
use tokio::io::AsyncRead;
use tracing::{debug, info, warn};

use crate::calls::ClientShared;
use crate::correlation::CallOutcome;
use crate::framing::read_prefixed;

pub(crate) async fn run_receive_loop<R>(mut reader: R, shared: Arc<ClientShared>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let reason = receive_frames(&mut reader, &shared).await;
    info!(%reason, "channel closed; tearing down");
    shared.correlation.cancel_all(&reason);
    shared.subscriptions.clear();
}

async fn receive_frames<R>(reader: &mut R, shared: &Arc<ClientShared>) -> String
where
    R: AsyncRead + Unpin,
{
    loop {
        let body = match read_prefixed(reader).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return "connection closed by peer".into();
            }
            Err(e) => return format!("transport error: {}", e),
        };
        if body.is_empty() {
            continue;
        }

        match decode_frame(&body) {
            Ok(WireMessage::Response(resp)) => {
                let outcome = match resp.outcome {
                    Ok(param) => CallOutcome::Success(param),
                    Err(error_bytes) => CallOutcome::Failure(error_bytes),
                };
                shared.correlation.complete(resp.correlation_id, outcome);
            }
            Ok(WireMessage::Request(frame)) => match frame.msg_type {
                MessageType::Notification => deliver_push(shared, frame),
                MessageType::Terminate => return "connection terminated by peer".into(),
                other => warn!(msg_type = ?other, "unexpected request frame on client channel"),
            },
            Err(e) => warn!(error = %e, "dropping malformed frame"),
        }
    }
}

/// Route one push frame to its local listener.
///
/// Runs inline on the receive loop, with no further hop: listeners are
/// required to hand the event off without blocking, and staying on the
/// loop is what keeps events for one subscription in wire order. An
/// unknown subscription id is not a fault — the server just has not
/// processed our removal yet — but we ask it to drop the id so the stream
/// of stale events ends.
fn deliver_push(shared: &Arc<ClientShared>, frame: Frame) {
    let (id, event, handback) = match <[Param; 3]>::try_from(frame.params) {
        Ok([Param::Integer(id), Param::Event(event), Param::Object(handback)]) => {
            (id, event, handback)
        }
        _ => {
            warn!("malformed push frame dropped");
            return;
        }
    };

    match shared.subscriptions.get(id) {
        Some(subscription) => {
            (subscription.listener)(Notification {
                subscription_id: id,
                event,
                handback,
            });
        }
        None => {
            debug!(id, "event for unknown subscription id; asking server to drop it");
            shared.send_oneway(MessageType::RemoveListener, vec![Param::Integer(id)]);
        }
    }
}

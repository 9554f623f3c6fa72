//! The call engine: synchronous remote calls over the shared channel.
//!
//! A call reserves a correlation id, enqueues the fully-encoded request
//! frame for the writer task, then suspends on the pending call's result
//! handle with a bounded wait. Whatever happens — value, remote failure,
//! timeout, transport loss — the id is released in a cleanup step, so ids
//! never leak.

use registry_core::OperationErrorKind;
use registry_protocol::{
    decode_error_object, encode_request, CodecError, Frame, MessageType, Param,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::correlation::{CallOutcome, CorrelationTable, Expect};
use crate::error::RemoteError;
use crate::subscriptions::SubscriptionTable;

/// State shared between the public client handle, the receive loop and the
/// writer task.
pub(crate) struct ClientShared {
    pub correlation: CorrelationTable,
    pub subscriptions: SubscriptionTable,
    pub writer_tx: mpsc::UnboundedSender<Vec<u8>>,
    pub config: ClientConfig,
}

impl ClientShared {
    /// Issue one synchronous remote call and wait for its result.
    pub async fn call(
        &self,
        msg_type: MessageType,
        params: Vec<Param>,
        expect: Expect,
    ) -> Result<Option<Param>, RemoteError> {
        let (id, rx) = self.correlation.reserve(expect);
        let result = self.call_inner(id, msg_type, params, expect, rx).await;
        // Cleanup runs on every path: success, remote failure, timeout,
        // transport loss. Releasing an already-completed id is a no-op.
        self.correlation.release(id);
        result
    }

    async fn call_inner(
        &self,
        id: i32,
        msg_type: MessageType,
        params: Vec<Param>,
        expect: Expect,
        rx: tokio::sync::oneshot::Receiver<CallOutcome>,
    ) -> Result<Option<Param>, RemoteError> {
        let mut body = Vec::new();
        encode_request(
            &Frame {
                msg_type,
                correlation_id: id,
                params,
            },
            &mut body,
        )?;
        self.writer_tx
            .send(body)
            .map_err(|_| RemoteError::Transport("connection closed".into()))?;
        debug!(id, ?msg_type, "request sent");

        let outcome = match tokio::time::timeout(self.config.call_timeout, rx).await {
            Err(_) => {
                return Err(RemoteError::Timeout {
                    elapsed: self.config.call_timeout,
                })
            }
            Ok(Err(_)) => {
                return Err(RemoteError::Transport(
                    "channel dropped without completing the call".into(),
                ))
            }
            Ok(Ok(outcome)) => outcome,
        };

        match outcome {
            CallOutcome::Success(param) => check_result(msg_type, expect, param),
            CallOutcome::Failure(error_bytes) => {
                let obj = decode_error_object(&error_bytes)?;
                let kind = obj
                    .resolve(msg_type.declared_error_kinds())
                    .unwrap_or(OperationErrorKind::OperationFailed);
                Err(RemoteError::Operation {
                    kind,
                    message: obj.message,
                })
            }
            CallOutcome::Aborted(reason) => Err(RemoteError::Transport(reason)),
        }
    }

    /// Send a request with correlation id 0: no response will ever come.
    pub fn send_oneway(&self, msg_type: MessageType, params: Vec<Param>) {
        let mut body = Vec::new();
        match encode_request(
            &Frame {
                msg_type,
                correlation_id: 0,
                params,
            },
            &mut body,
        ) {
            Ok(()) => {
                let _ = self.writer_tx.send(body);
            }
            Err(e) => warn!(error = %e, ?msg_type, "dropping unencodable one-way frame"),
        }
    }
}

fn check_result(
    msg_type: MessageType,
    expect: Expect,
    param: Option<Param>,
) -> Result<Option<Param>, RemoteError> {
    let ok = match (&expect, &param) {
        (Expect::Void, None) => true,
        (Expect::Optional(_), None) => true,
        (Expect::Value(tag), Some(p)) | (Expect::Optional(tag), Some(p)) => p.tag() == *tag,
        _ => false,
    };
    if ok {
        Ok(param)
    } else {
        warn!(?msg_type, ?expect, got = ?param.as_ref().map(|p| p.tag()), "result type mismatch");
        Err(RemoteError::Protocol(CodecError::InvalidField(
            "result type",
        )))
    }
}

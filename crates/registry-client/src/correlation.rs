//! Correlation id management.
//!
//! One table per channel maps correlation id → pending call. Every
//! operation takes the single mutex: reservation runs on caller tasks,
//! completion on the receive loop, cancellation on the error path, and
//! they must never interleave.
//!
//! Id rules: ids are positive, unique among currently-pending calls, and
//! issued by a counter that wraps to 1 (never 0) on overflow, skipping ids
//! still in use. Id 0 means "no response expected" and is reserved for
//! push and fire-and-forget frames.

use std::collections::HashMap;
use std::sync::Mutex;

use registry_protocol::{Param, ParamTag};
use tokio::sync::oneshot;
use tracing::debug;

/// What shape of success payload a pending call expects back.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Expect {
    /// No payload at all (void operation).
    Void,
    /// Exactly one parameter with this tag.
    Value(ParamTag),
    /// One parameter with this tag, or nothing (e.g. a void method invoke).
    Optional(ParamTag),
}

/// How a pending call resolved.
#[derive(Debug)]
pub(crate) enum CallOutcome {
    /// Success response, possibly carrying a result parameter.
    Success(Option<Param>),
    /// Failure response; the serialized error object.
    Failure(Vec<u8>),
    /// The channel died before a response arrived.
    Aborted(String),
}

struct PendingCall {
    tx: oneshot::Sender<CallOutcome>,
    expect: Expect,
}

struct Inner {
    next_id: i32,
    pending: HashMap<i32, PendingCall>,
}

/// The per-channel correlation table.
pub(crate) struct CorrelationTable {
    inner: Mutex<Inner>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        CorrelationTable {
            inner: Mutex::new(Inner {
                next_id: 1,
                pending: HashMap::new(),
            }),
        }
    }

    /// Atomically pick the next free id, insert a pending call under it,
    /// and hand back the receiver the caller will block on.
    pub fn reserve(&self, expect: Expect) -> (i32, oneshot::Receiver<CallOutcome>) {
        let mut inner = self.inner.lock().unwrap();
        loop {
            let id = inner.next_id;
            inner.next_id = if id == i32::MAX { 1 } else { id + 1 };
            if inner.pending.contains_key(&id) {
                continue;
            }
            let (tx, rx) = oneshot::channel();
            inner.pending.insert(id, PendingCall { tx, expect });
            return (id, rx);
        }
    }

    /// Deliver a result to a pending call, exactly once.
    ///
    /// An absent id is not an error: the call may have timed out and been
    /// released, or the response may be a duplicate. Such outcomes are
    /// dropped after a diagnostic. Returns whether a call was completed.
    pub fn complete(&self, id: i32, outcome: CallOutcome) -> bool {
        let entry = self.inner.lock().unwrap().pending.remove(&id);
        match entry {
            Some(call) => {
                debug!(id, expect = ?call.expect, "completing pending call");
                // The receiver may already be gone (caller timed out between
                // lookup and delivery); that is the same late-response case.
                call.tx.send(outcome).is_ok()
            }
            None => {
                debug!(id, "response for unknown correlation id dropped");
                false
            }
        }
    }

    /// Remove an entry without delivering anything. Callers run this in a
    /// cleanup step on every exit path so ids cannot leak.
    pub fn release(&self, id: i32) {
        self.inner.lock().unwrap().pending.remove(&id);
    }

    /// Channel teardown: complete every pending call with the same terminal
    /// error and clear the table.
    pub fn cancel_all(&self, reason: &str) {
        let drained: Vec<(i32, PendingCall)> = {
            let mut inner = self.inner.lock().unwrap();
            inner.pending.drain().collect()
        };
        if !drained.is_empty() {
            debug!(count = drained.len(), reason, "cancelling pending calls");
        }
        for (_, call) in drained {
            let _ = call.tx.send(CallOutcome::Aborted(reason.to_string()));
        }
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }

    #[cfg(test)]
    fn set_next_id(&self, id: i32) {
        self.inner.lock().unwrap().next_id = id;
    }
}

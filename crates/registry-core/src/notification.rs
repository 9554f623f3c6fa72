//! Notification payloads.

/// One asynchronous event delivered to a local listener.
///
/// Both the event body and the handback are opaque serialized payloads; the
/// engine never inspects them. The handback is whatever value the subscriber
/// supplied at registration time, echoed verbatim with every event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subscription_id: i32,
    pub event: Vec<u8>,
    pub handback: Vec<u8>,
}

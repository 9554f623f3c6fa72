//! Shared types for the registry TCP server.
//!
//! This module defines:
//! - `ConnectionId`: a lightweight handle for connected clients
//! - outbound channel aliases (encoded frames → writer task)
//! - `SessionCtx`: what a running handler can see

use std::sync::Arc;

use registry_core::ManagementRegistry;
use tokio::sync::mpsc;

use crate::notifications::NotificationBridge;

/// Identifier for a connected client.
///
/// This is intentionally opaque; we just guarantee uniqueness
/// over the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// Outbound frames (already encoded, without length prefix) from handlers
/// and the notification bridge to the per-connection writer task.
pub type OutboundTx = mpsc::UnboundedSender<Vec<u8>>;
pub type OutboundRx = mpsc::UnboundedReceiver<Vec<u8>>;

/// Per-session state handed to every handler invocation.
///
/// Built once the handshake completes and never mutated afterwards; the
/// notification bridge carries its own interior locking.
pub struct SessionCtx {
    pub id: ConnectionId,
    pub registry: Arc<dyn ManagementRegistry>,
    pub(crate) outbound: OutboundTx,
    pub(crate) notifications: NotificationBridge,
}

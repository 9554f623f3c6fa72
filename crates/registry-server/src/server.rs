//! TCP listener and top-level server wiring.
//!
//! This module:
//! - Listens on the configured address/port.
//! - Accepts new TCP connections.
//! - Assigns each connection a `ConnectionId`.
//! - Spawns a per-connection session task (negotiation, handshake,
//!   steady-state dispatch; see the `session` module).
//!
//! All sessions share one backend registry; there is no central routing
//! task, because every frame belongs to exactly one connection.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use registry_core::ManagementRegistry;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::Config;
use crate::session;
use crate::types::ConnectionId;

/// Global-ish counter for assigning unique `ConnectionId`s.
///
/// In a more elaborate setup you might encapsulate this in a struct,
/// but this is sufficient and threadsafe for our server.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

fn next_connection_id() -> ConnectionId {
    let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    ConnectionId(id)
}

/// Run the TCP server with the given configuration.
pub async fn run(config: Config, registry: Arc<dyn ManagementRegistry>) -> anyhow::Result<()> {
    let addr = config.socket_addr_string();
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, max_clients = config.max_clients, "listening");

    let active = Arc::new(AtomicUsize::new(0));

    loop {
        let (stream, peer_addr) = listener.accept().await?;

        if active.load(Ordering::SeqCst) >= config.max_clients {
            warn!(%peer_addr, max_clients = config.max_clients, "rejecting connection");
            // Just drop the stream; the client sees the connection close.
            continue;
        }

        let conn_id = next_connection_id();
        info!(conn = conn_id.0, %peer_addr, "accepted connection");
        if let Err(e) = stream.set_nodelay(true) {
            warn!(conn = conn_id.0, error = %e, "set_nodelay failed");
        }

        active.fetch_add(1, Ordering::SeqCst);
        let registry = registry.clone();
        let config = config.clone();
        let active = active.clone();

        tokio::spawn(async move {
            match session::serve_connection(conn_id, stream, registry, config).await {
                Ok(()) => info!(conn = conn_id.0, "connection closed"),
                Err(e) => warn!(conn = conn_id.0, error = %e, "connection failed"),
            }
            active.fetch_sub(1, Ordering::SeqCst);
        });
    }
}

//! Binary TCP server for the remote management registry.

use std::sync::Arc;

use registry_core::{InMemoryRegistry, RegistryError};
use registry_server::config::Config;
use registry_server::server;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;
    info!(
        addr = %config.socket_addr_string(),
        max_clients = config.max_clients,
        "starting registry-server"
    );

    server::run(config, Arc::new(demo_registry())).await
}

/// A small backend so the server is usable out of the box.
fn demo_registry() -> InMemoryRegistry {
    let registry = InMemoryRegistry::new();
    registry.register_object("registry:type=Server");
    registry.put_attribute("registry:type=Server", "Name", b"demo".to_vec());
    registry.register_method("registry:type=Server", "echo", |args| {
        args.first()
            .cloned()
            .map(Some)
            .ok_or_else(|| RegistryError::OperationFailed("echo needs one argument".into()))
    });
    registry
}

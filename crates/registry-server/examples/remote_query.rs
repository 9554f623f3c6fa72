//! Minimal remote client: connect, list objects, read one attribute.
//!
//! Run the server first (`cargo run -p registry-server`), then:
//!
//! ```text
//! cargo run -p registry-server --example remote_query
//! ```

use registry_client::{ClientConfig, RegistryClient};
use registry_core::ObjectRef;
use tokio::net::TcpStream;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:9999".to_string());

    let stream = TcpStream::connect(&addr).await?;
    let client = RegistryClient::open(stream, ClientConfig::default()).await?;
    println!(
        "connected to {} (protocol v{}, session {})",
        addr,
        client.version(),
        client.session_id()
    );

    let names = client.query_names(None).await?;
    println!("{} registered object(s):", names.len());
    for name in &names {
        println!("  {}", name);
    }

    let object = ObjectRef::new("registry:type=Server")?;
    let name = client.get_attribute(&object, "Name").await?;
    println!("registry:type=Server Name = {}", String::from_utf8_lossy(&name));

    client.close();
    Ok(())
}

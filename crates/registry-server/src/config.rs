//! Configuration for the registry TCP server.
//!
//! For now this is intentionally simple: you can either use defaults
//! or override via a few environment variables:
//!
//! - `REGISTRY_BIND_ADDR`              (default: "0.0.0.0")
//! - `REGISTRY_PORT`                   (default: "9999")
//! - `REGISTRY_MAX_CLIENTS`            (default: "1024")
//! - `REGISTRY_HANDSHAKE_TIMEOUT_SECS` (default: "30")
//! - `REGISTRY_EXCLUDED_VERSIONS`      (default: "", comma-separated bytes)
//! - `REGISTRY_EXCLUDED_AUTH_MECHS`    (default: "", comma-separated names)

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration, read once at construction.
#[derive(Debug, Clone)]
pub struct Config {
    /// IP address / interface to bind to (e.g. "0.0.0.0" or "127.0.0.1").
    pub bind_addr: String,

    /// TCP port to listen on.
    pub port: u16,

    /// Maximum number of simultaneously connected clients.
    pub max_clients: usize,

    /// Bounded wait for version negotiation plus the session handshake.
    /// A connection that has not reached steady state within this window
    /// is dropped so it cannot pin a client slot.
    pub handshake_timeout: Duration,

    /// Protocol versions never offered, even though this build speaks them.
    pub excluded_versions: Vec<u8>,

    /// Authentication mechanisms never accepted in the version-2
    /// parameter exchange.
    pub excluded_auth_mechs: Vec<String>,

    /// Build version string sent in the full (re-ask) version header.
    pub server_version: String,

    /// Stability flag advertised in the version header.
    pub snapshot: bool,
}

impl Config {
    /// Construct a `Config` from environment variables, falling back
    /// to reasonable defaults.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let bind_addr = env::var("REGISTRY_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = read_env_or_default("REGISTRY_PORT", 9999u16)?;
        let max_clients = read_env_or_default("REGISTRY_MAX_CLIENTS", 1024usize)?;
        let handshake_timeout =
            Duration::from_secs(read_env_or_default("REGISTRY_HANDSHAKE_TIMEOUT_SECS", 30u64)?);
        let excluded_versions =
            parse_version_list(&env::var("REGISTRY_EXCLUDED_VERSIONS").unwrap_or_default())?;
        let excluded_auth_mechs =
            parse_name_list(&env::var("REGISTRY_EXCLUDED_AUTH_MECHS").unwrap_or_default());

        Ok(Config {
            bind_addr,
            port,
            max_clients,
            handshake_timeout,
            excluded_versions,
            excluded_auth_mechs,
            ..Config::default()
        })
    }

    /// Convenience: `addr:port` socket string.
    pub fn socket_addr_string(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: "0.0.0.0".to_string(),
            port: 9999,
            max_clients: 1024,
            handshake_timeout: Duration::from_secs(30),
            excluded_versions: Vec::new(),
            excluded_auth_mechs: Vec::new(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            snapshot: false,
        }
    }
}

fn parse_version_list(raw: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u8>().map_err(Into::into))
        .collect()
}

fn parse_name_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn read_env_or_default<T>(key: &str, default: T) -> Result<T, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: std::error::Error + 'static,
{
    match env::var(key) {
        Ok(val) => Ok(val.parse::<T>()?),
        Err(_) => Ok(default),
    }
}

//! Client configuration.
//!
//! For now this is intentionally simple: you can either use defaults
//! or override via a few environment variables:
//!
//! - `REGISTRY_CALL_TIMEOUT_SECS`      (default: "60")
//! - `REGISTRY_HANDSHAKE_TIMEOUT_SECS` (default: "30")
//! - `REGISTRY_EXCLUDED_VERSIONS`      (default: "", comma-separated bytes)
//! - `REGISTRY_EXCLUDED_AUTH_MECHS`    (default: "", comma-separated names)

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Client configuration, read once at construction.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Bounded wait for each steady-state remote call.
    pub call_timeout: Duration,

    /// Bounded wait for version negotiation and each handshake step.
    pub handshake_timeout: Duration,

    /// Protocol versions to leave out of negotiation even though this
    /// build supports them.
    pub excluded_versions: Vec<u8>,

    /// Authentication mechanisms never advertised in the version-2
    /// parameter exchange.
    pub excluded_auth_mechs: Vec<String>,

    /// Version string sent on the legacy re-ask path.
    pub client_version: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            call_timeout: Duration::from_secs(60),
            handshake_timeout: Duration::from_secs(30),
            excluded_versions: Vec::new(),
            excluded_auth_mechs: Vec::new(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ClientConfig {
    /// Construct a `ClientConfig` from environment variables, falling back
    /// to reasonable defaults.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let call_timeout = Duration::from_secs(read_env_or_default("REGISTRY_CALL_TIMEOUT_SECS", 60u64)?);
        let handshake_timeout =
            Duration::from_secs(read_env_or_default("REGISTRY_HANDSHAKE_TIMEOUT_SECS", 30u64)?);
        let excluded_versions = parse_version_list(
            &env::var("REGISTRY_EXCLUDED_VERSIONS").unwrap_or_default(),
        )?;
        let excluded_auth_mechs = parse_name_list(
            &env::var("REGISTRY_EXCLUDED_AUTH_MECHS").unwrap_or_default(),
        );

        Ok(ClientConfig {
            call_timeout,
            handshake_timeout,
            excluded_versions,
            excluded_auth_mechs,
            ..ClientConfig::default()
        })
    }
}

/// Parse a comma-separated list of version bytes, e.g. `"1,2"`.
pub fn parse_version_list(raw: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u8>().map_err(Into::into))
        .collect()
}

/// Parse a comma-separated list of names, dropping empties.
pub fn parse_name_list(raw: &str) -> Vec<String> {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_list_parsing() {
        assert_eq!(parse_version_list("").unwrap(), Vec::<u8>::new());
        assert_eq!(parse_version_list("1,2").unwrap(), vec![1, 2]);
        assert_eq!(parse_version_list(" 2 ").unwrap(), vec![2]);
        assert!(parse_version_list("zero").is_err());
    }
}

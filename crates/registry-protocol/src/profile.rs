//! Per-version protocol profiles.
//!
//! Both protocol generations share one frame layout; what differs is the
//! secondary handshake run after version selection and before the
//! steady-state receive loop. The profile table is the single place that
//! knowledge lives.

use crate::wire_types::SUPPORTED_VERSIONS;

/// What one protocol version requires beyond the shared frame layout.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VersionProfile {
    pub version: u8,
    /// Version 2 runs a key/value `Parameters` exchange before `Begin`;
    /// version 1 goes straight to `Begin`.
    pub parameter_exchange: bool,
}

const PROFILES: &[VersionProfile] = &[
    VersionProfile {
        version: 1,
        parameter_exchange: false,
    },
    VersionProfile {
        version: 2,
        parameter_exchange: true,
    },
];

/// Look up the profile for a negotiated version.
pub fn profile_for(version: u8) -> Option<VersionProfile> {
    PROFILES.iter().copied().find(|p| p.version == version)
}

/// Compute the version set one endpoint will negotiate with: compiled-in
/// capability minus the configured exclusions, sorted ascending. Computed
/// once per endpoint and never mutated afterwards.
pub fn effective_versions(excluded: &[u8]) -> Vec<u8> {
    let mut versions: Vec<u8> = SUPPORTED_VERSIONS
        .iter()
        .copied()
        .filter(|v| !excluded.contains(v))
        .collect();
    versions.sort_unstable();
    versions
}

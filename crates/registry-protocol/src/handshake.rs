//! Version negotiation records.
//!
//! Unlike steady-state frames, the two negotiation records are written raw
//! on the stream (no length prefix); their layouts are self-describing:
//!
//! ```text
//! Server version header (server → client, immediately on open)
//! -------------------------------------------------------------
//! [0..3] : magic "JMX"
//! [3..7] : version count (i32 BE)
//! [7..]  : one byte per offered version
//! [..+1] : stability flag (0 = stable, 1 = snapshot)
//! [..]   : i32 len | utf8 full version string   (re-ask path only)
//!
//! Client version selection (client → server)
//! ------------------------------------------
//! [0..3] : magic "JMX"
//! [3]    : chosen version byte
//! [4..]  : i32 len | utf8 client version string (only when chosen == 0)
//! ```
//!
//! A server offering version `0` is the legacy escape path: "my version
//! list does not fit the short form, ask me again". The client answers with
//! chosen = 0 plus its own version string and re-reads the header, which
//! then carries the full list and the full version string.

use crate::frame_codec::CodecError;
use crate::wire_types::{MAGIC, MAX_STRING_LEN};

/// The record a server writes immediately on channel open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionHeader {
    /// Offered protocol versions. May contain 0, the re-ask marker.
    pub versions: Vec<u8>,
    /// True for snapshot/pre-release builds.
    pub snapshot: bool,
    /// Full build version string; present only on the re-ask response.
    pub full_version: Option<String>,
}

impl VersionHeader {
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        let count =
            i32::try_from(self.versions.len()).map_err(|_| CodecError::Oversize("versions"))?;
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&count.to_be_bytes());
        out.extend_from_slice(&self.versions);
        out.push(self.snapshot as u8);
        if let Some(full) = &self.full_version {
            if full.len() > MAX_STRING_LEN {
                return Err(CodecError::Oversize("full version string"));
            }
            out.extend_from_slice(&(full.len() as i32).to_be_bytes());
            out.extend_from_slice(full.as_bytes());
        }
        Ok(())
    }
}

/// The record a client writes back once it has picked a version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionSelection {
    /// Chosen version, or 0 to request the full list (re-ask).
    pub version: u8,
    /// Client build version string; present only when `version == 0`.
    pub client_version: Option<String>,
}

impl VersionSelection {
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        out.extend_from_slice(&MAGIC);
        out.push(self.version);
        if self.version == 0 {
            let s = self.client_version.as_deref().unwrap_or("");
            if s.len() > MAX_STRING_LEN {
                return Err(CodecError::Oversize("client version string"));
            }
            out.extend_from_slice(&(s.len() as i32).to_be_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        Ok(())
    }
}

/// Check the three magic bytes of a negotiation record.
pub fn check_magic(bytes: &[u8]) -> Result<(), CodecError> {
    if bytes.len() < MAGIC.len() || bytes[..MAGIC.len()] != MAGIC {
        return Err(CodecError::BadMagic);
    }
    Ok(())
}

/// Pick the highest version offered by the peer that we also support.
///
/// Version 0 (the re-ask marker) is never a candidate. Returns `None` when
/// the sets are disjoint, which is fatal to channel setup.
pub fn select_version(offered: &[u8], supported: &[u8]) -> Option<u8> {
    offered
        .iter()
        .copied()
        .filter(|v| *v != 0 && supported.contains(v))
        .max()
}

/// Whether an offered list includes the legacy re-ask marker.
pub fn offers_reask(offered: &[u8]) -> bool {
    offered.contains(&0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_highest_common_version() {
        assert_eq!(select_version(&[1, 2], &[1, 2]), Some(2));
        assert_eq!(select_version(&[1], &[1, 2]), Some(1));
        assert_eq!(select_version(&[2, 1], &[1, 2]), Some(2));
    }

    #[test]
    fn disjoint_sets_have_no_version() {
        assert_eq!(select_version(&[3, 4], &[1, 2]), None);
        assert_eq!(select_version(&[], &[1, 2]), None);
    }

    #[test]
    fn reask_marker_is_never_selected() {
        assert_eq!(select_version(&[0], &[0, 1, 2]), None);
        assert!(offers_reask(&[0, 1]));
        assert!(!offers_reask(&[1, 2]));
    }

    #[test]
    fn header_encodes_full_string_only_when_present() {
        let mut short = Vec::new();
        VersionHeader {
            versions: vec![1, 2],
            snapshot: false,
            full_version: None,
        }
        .encode(&mut short)
        .unwrap();
        assert_eq!(short, b"JMX\x00\x00\x00\x02\x01\x02\x00");

        let mut full = Vec::new();
        VersionHeader {
            versions: vec![1, 2],
            snapshot: true,
            full_version: Some("2.1".into()),
        }
        .encode(&mut full)
        .unwrap();
        assert_eq!(full, b"JMX\x00\x00\x00\x02\x01\x02\x01\x00\x00\x00\x032.1");
    }
}

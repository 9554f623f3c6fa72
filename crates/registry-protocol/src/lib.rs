//! registry-protocol
//!
//! Wire-level encoding/decoding for the remote management registry.
//!
//! This crate is responsible for turning protocol frames into bytes and
//! back again.
//!
//! - [`wire_types`]  : message types, parameter tags, constants
//! - [`frame_codec`] : request/response/push frame codec
//! - [`handshake`]   : version negotiation records
//! - [`profile`]     : per-version protocol profile table

pub mod frame_codec;
pub mod handshake;
pub mod profile;
pub mod wire_types;

pub use frame_codec::{
    decode_error_object, decode_frame, encode_error_object, encode_push, encode_request,
    encode_response, CodecError, Frame, Param, ResponseFrame, WireMessage,
};
pub use handshake::{
    check_magic, offers_reask, select_version, VersionHeader, VersionSelection,
};
pub use profile::{effective_versions, profile_for, VersionProfile};
pub use wire_types::{
    MessageType, ParamTag, MAGIC, MAX_FRAME_LEN, MAX_STRING_LEN, RESPONSE_FLAG,
    SHORT_LIST_LIMIT, SUPPORTED_VERSIONS,
};

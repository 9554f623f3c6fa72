//! Low-level wire types and constants.
//!
//! This module defines:
//! - Message type IDs and the response flag.
//! - Parameter type tags.
//! - Protocol versioning constants.
//! - Size limits for variable-length fields.
//!
//! The actual encode/decode logic lives in `frame_codec` and `handshake`.

use registry_core::OperationErrorKind;

/// Magic bytes opening both negotiation records.
pub const MAGIC: [u8; 3] = *b"JMX";

/// Protocol versions this build can speak, sorted ascending.
///
/// Version 0 is reserved as the legacy re-ask selector and is never a real
/// version; see `handshake`.
pub const SUPPORTED_VERSIONS: &[u8] = &[1, 2];

/// Offered-version lists longer than this must go through the re-ask path.
pub const SHORT_LIST_LIMIT: usize = 4;

/// Top bit of the message-type byte: set on response frames.
pub const RESPONSE_FLAG: u8 = 0x80;

/// Maximum frame length accepted off the wire (body, excluding the
/// u32 length prefix).
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Maximum length of any single string field.
pub const MAX_STRING_LEN: usize = 64 * 1024;

/// Message types (low 7 bits of the first frame byte).
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Establish a session; response carries the session id (handshake).
    Begin = 1,

    /// Read one attribute of an object.
    GetAttribute = 2,

    /// Write one attribute of an object.
    SetAttribute = 3,

    /// Invoke a named method on an object.
    Invoke = 4,

    /// List object names matching a filter.
    QueryNames = 5,

    /// Register a notification listener under a client-chosen id.
    AddListener = 6,

    /// Drop a notification listener by id.
    RemoveListener = 7,

    /// Unsolicited server → client event push (correlation id always 0).
    Notification = 8,

    /// Fire-and-forget channel goodbye; either side may send it.
    Terminate = 9,

    /// Key/value parameter exchange (version 2 handshake only).
    Parameters = 10,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(MessageType::Begin),
            2 => Some(MessageType::GetAttribute),
            3 => Some(MessageType::SetAttribute),
            4 => Some(MessageType::Invoke),
            5 => Some(MessageType::QueryNames),
            6 => Some(MessageType::AddListener),
            7 => Some(MessageType::RemoveListener),
            8 => Some(MessageType::Notification),
            9 => Some(MessageType::Terminate),
            10 => Some(MessageType::Parameters),
            _ => None,
        }
    }

    /// Error kinds this operation declares, ordered narrowest first.
    ///
    /// The client re-raises a remote failure as the first declared kind that
    /// matches; the server sanitizes anything not listed here to a generic
    /// internal error before it crosses the wire.
    pub fn declared_error_kinds(self) -> &'static [OperationErrorKind] {
        use OperationErrorKind::*;
        match self {
            MessageType::GetAttribute => &[AttributeNotFound, InstanceNotFound, OperationFailed],
            MessageType::SetAttribute => &[
                InvalidAttributeValue,
                AttributeNotFound,
                InstanceNotFound,
                OperationFailed,
            ],
            MessageType::Invoke => &[MethodNotFound, InstanceNotFound, OperationFailed],
            MessageType::QueryNames => &[OperationFailed],
            MessageType::AddListener => &[InstanceNotFound, OperationFailed],
            MessageType::RemoveListener => &[ListenerNotFound, OperationFailed],
            MessageType::Begin | MessageType::Parameters => &[OperationFailed],
            MessageType::Notification | MessageType::Terminate => &[],
        }
    }
}

/// Parameter type tags.
///
/// String, Boolean, Integer and StringArray are inlined on the wire; Object,
/// Event and Exception carry opaque serialized payloads the engine never
/// inspects.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ParamTag {
    String = 1,
    Boolean = 2,
    Integer = 3,
    StringArray = 4,
    Object = 5,
    Event = 6,
    Exception = 7,
}

impl ParamTag {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(ParamTag::String),
            2 => Some(ParamTag::Boolean),
            3 => Some(ParamTag::Integer),
            4 => Some(ParamTag::StringArray),
            5 => Some(ParamTag::Object),
            6 => Some(ParamTag::Event),
            7 => Some(ParamTag::Exception),
            _ => None,
        }
    }
}

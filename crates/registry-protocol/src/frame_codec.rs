//! Binary encoding/decoding for protocol frames.
//!
//! This module converts between raw binary frames (`&[u8]`) and the
//! [`WireMessage`] model. One buffer holds exactly one frame; a stream
//! transport is expected to length-prefix each frame (u32 BE) and hand the
//! body to [`decode_frame`].
//!
//! Framing model (single-frame buffer):
//!
//! ```text
//! Request
//! -------
//! [0]    : msg_type (MessageType as u8, top bit clear)
//! [1..5] : correlation id (i32 BE; 0 = no response expected)
//! [5..]  : parameters, each `tag byte | payload`:
//!
//!   String      (1): i32 len | utf8 bytes
//!   Boolean     (2): u8 (0/1)
//!   Integer     (3): i32 BE
//!   StringArray (4): i32 count | count * (i32 len | utf8 bytes)
//!   Object      (5): i32 len | opaque serialized bytes
//!   Event       (6): i32 len | opaque serialized bytes
//!   Exception   (7): i32 len | serialized error object
//!
//! Response
//! --------
//! [0]    : msg_type | 0x80
//! [1..5] : correlation id (i32 BE, matches the request)
//! [5]    : outcome (0 = success, 1 = failure)
//! [6..]  : on success, one tagged result parameter, or nothing at all
//!          for void operations; on failure, an Exception parameter.
//!
//! Push (notification)
//! -------------------
//! A request-shaped frame: msg_type = Notification, correlation id = 0,
//! parameters `Integer subscriptionId | Event event | Object handback`.
//! ```
//!
//! Encoding is all-or-nothing: every encode function validates before it
//! appends, and any error leaves the caller free to discard the buffer —
//! no partially encoded frame ever reaches a peer.

use std::fmt;

use registry_core::{ErrorObject, OperationErrorKind};

use crate::wire_types::{MessageType, ParamTag, MAX_FRAME_LEN, MAX_STRING_LEN, RESPONSE_FLAG};

/// Errors that can arise when encoding/decoding a binary frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Buffer too short for the expected fields.
    Truncated,
    /// Unknown or unsupported message type.
    UnknownMessageType(u8),
    /// Unknown parameter type tag.
    UnknownParamTag(u8),
    /// A length field is negative or exceeds the configured limit.
    Oversize(&'static str),
    /// Malformed UTF-8 in a string field.
    InvalidUtf8,
    /// Invalid field value or frame shape.
    InvalidField(&'static str),
    /// Magic bytes mismatch in a negotiation record.
    BadMagic,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Truncated => write!(f, "buffer truncated"),
            CodecError::UnknownMessageType(t) => write!(f, "unknown message type: {}", t),
            CodecError::UnknownParamTag(t) => write!(f, "unknown parameter tag: {}", t),
            CodecError::Oversize(field) => write!(f, "length limit exceeded: {}", field),
            CodecError::InvalidUtf8 => write!(f, "malformed utf-8 string"),
            CodecError::InvalidField(field) => write!(f, "invalid field: {}", field),
            CodecError::BadMagic => write!(f, "magic bytes mismatch"),
        }
    }
}

impl std::error::Error for CodecError {}

/// One typed frame parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    String(String),
    Boolean(bool),
    Integer(i32),
    StringArray(Vec<String>),
    Object(Vec<u8>),
    Event(Vec<u8>),
    Exception(Vec<u8>),
}

impl Param {
    pub fn tag(&self) -> ParamTag {
        match self {
            Param::String(_) => ParamTag::String,
            Param::Boolean(_) => ParamTag::Boolean,
            Param::Integer(_) => ParamTag::Integer,
            Param::StringArray(_) => ParamTag::StringArray,
            Param::Object(_) => ParamTag::Object,
            Param::Event(_) => ParamTag::Event,
            Param::Exception(_) => ParamTag::Exception,
        }
    }
}

/// A request-shaped frame (response flag clear). Push frames use this shape
/// too, with correlation id 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub msg_type: MessageType,
    pub correlation_id: i32,
    pub params: Vec<Param>,
}

/// A response frame (response flag set).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub msg_type: MessageType,
    pub correlation_id: i32,
    /// `Ok(None)` for void results; `Err` carries the serialized error object.
    pub outcome: Result<Option<Param>, Vec<u8>>,
}

/// Any frame decoded off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Request(Frame),
    Response(ResponseFrame),
}

// ============================================================================
// Encoding
// ============================================================================

/// Encode a request frame, appending to `out`.
pub fn encode_request(frame: &Frame, out: &mut Vec<u8>) -> Result<(), CodecError> {
    out.push(frame.msg_type as u8);
    out.extend_from_slice(&frame.correlation_id.to_be_bytes());
    for param in &frame.params {
        encode_param(param, out)?;
    }
    Ok(())
}

/// Encode a response frame, appending to `out`.
pub fn encode_response(frame: &ResponseFrame, out: &mut Vec<u8>) -> Result<(), CodecError> {
    out.push(frame.msg_type as u8 | RESPONSE_FLAG);
    out.extend_from_slice(&frame.correlation_id.to_be_bytes());
    match &frame.outcome {
        Ok(None) => out.push(0),
        Ok(Some(param)) => {
            out.push(0);
            encode_param(param, out)?;
        }
        Err(error_bytes) => {
            out.push(1);
            encode_param(&Param::Exception(error_bytes.clone()), out)?;
        }
    }
    Ok(())
}

/// Encode a notification push frame (correlation id 0 by construction).
pub fn encode_push(
    subscription_id: i32,
    event: &[u8],
    handback: &[u8],
    out: &mut Vec<u8>,
) -> Result<(), CodecError> {
    encode_request(
        &Frame {
            msg_type: MessageType::Notification,
            correlation_id: 0,
            params: vec![
                Param::Integer(subscription_id),
                Param::Event(event.to_vec()),
                Param::Object(handback.to_vec()),
            ],
        },
        out,
    )
}

fn encode_param(param: &Param, out: &mut Vec<u8>) -> Result<(), CodecError> {
    out.push(param.tag() as u8);
    match param {
        Param::String(s) => encode_str(s, out)?,
        Param::Boolean(b) => out.push(*b as u8),
        Param::Integer(i) => out.extend_from_slice(&i.to_be_bytes()),
        Param::StringArray(items) => {
            let count =
                i32::try_from(items.len()).map_err(|_| CodecError::Oversize("string array"))?;
            out.extend_from_slice(&count.to_be_bytes());
            for item in items {
                encode_str(item, out)?;
            }
        }
        Param::Object(bytes) | Param::Event(bytes) | Param::Exception(bytes) => {
            encode_blob(bytes, out)?;
        }
    }
    Ok(())
}

fn encode_str(s: &str, out: &mut Vec<u8>) -> Result<(), CodecError> {
    if s.len() > MAX_STRING_LEN {
        return Err(CodecError::Oversize("string"));
    }
    out.extend_from_slice(&(s.len() as i32).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn encode_blob(bytes: &[u8], out: &mut Vec<u8>) -> Result<(), CodecError> {
    if bytes.len() > MAX_FRAME_LEN {
        return Err(CodecError::Oversize("opaque payload"));
    }
    out.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode a single frame from a binary buffer.
///
/// The buffer must contain exactly one full frame (the stream layer strips
/// the length prefix). Trailing garbage is an error.
pub fn decode_frame(buf: &[u8]) -> Result<WireMessage, CodecError> {
    let mut r = Reader::new(buf);
    let first = r.take_u8()?;
    let is_response = first & RESPONSE_FLAG != 0;
    let type_byte = first & !RESPONSE_FLAG;
    let msg_type =
        MessageType::from_u8(type_byte).ok_or(CodecError::UnknownMessageType(type_byte))?;
    let correlation_id = r.take_i32()?;

    if is_response {
        let outcome = match r.take_u8()? {
            0 => {
                if r.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(decode_param(&mut r)?))
                }
            }
            1 => match decode_param(&mut r)? {
                Param::Exception(bytes) => Err(bytes),
                _ => return Err(CodecError::InvalidField("failure outcome payload")),
            },
            _ => return Err(CodecError::InvalidField("outcome")),
        };
        if !r.is_empty() {
            return Err(CodecError::InvalidField("trailing bytes"));
        }
        Ok(WireMessage::Response(ResponseFrame {
            msg_type,
            correlation_id,
            outcome,
        }))
    } else {
        let mut params = Vec::new();
        while !r.is_empty() {
            params.push(decode_param(&mut r)?);
        }
        Ok(WireMessage::Request(Frame {
            msg_type,
            correlation_id,
            params,
        }))
    }
}

fn decode_param(r: &mut Reader<'_>) -> Result<Param, CodecError> {
    let tag_byte = r.take_u8()?;
    let tag = ParamTag::from_u8(tag_byte).ok_or(CodecError::UnknownParamTag(tag_byte))?;
    Ok(match tag {
        ParamTag::String => Param::String(decode_str(r)?),
        ParamTag::Boolean => match r.take_u8()? {
            0 => Param::Boolean(false),
            1 => Param::Boolean(true),
            _ => return Err(CodecError::InvalidField("boolean")),
        },
        ParamTag::Integer => Param::Integer(r.take_i32()?),
        ParamTag::StringArray => {
            let count = r.take_i32()?;
            if count < 0 || count as usize > MAX_FRAME_LEN {
                return Err(CodecError::Oversize("string array"));
            }
            let mut items = Vec::with_capacity(count.min(1024) as usize);
            for _ in 0..count {
                items.push(decode_str(r)?);
            }
            Param::StringArray(items)
        }
        ParamTag::Object => Param::Object(decode_blob(r)?),
        ParamTag::Event => Param::Event(decode_blob(r)?),
        ParamTag::Exception => Param::Exception(decode_blob(r)?),
    })
}

fn decode_str(r: &mut Reader<'_>) -> Result<String, CodecError> {
    let len = r.take_i32()?;
    if len < 0 || len as usize > MAX_STRING_LEN {
        return Err(CodecError::Oversize("string"));
    }
    let bytes = r.take_bytes(len as usize)?;
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|_| CodecError::InvalidUtf8)
}

fn decode_blob(r: &mut Reader<'_>) -> Result<Vec<u8>, CodecError> {
    let len = r.take_i32()?;
    if len < 0 || len as usize > MAX_FRAME_LEN {
        return Err(CodecError::Oversize("opaque payload"));
    }
    Ok(r.take_bytes(len as usize)?.to_vec())
}

// ============================================================================
// Serialized error objects
// ============================================================================

/// Encode an error object: `u8 kind | i32 len | utf8 message`.
pub fn encode_error_object(err: &ErrorObject) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + err.message.len());
    out.push(err.kind as u8);
    let mut end = err.message.len().min(MAX_STRING_LEN);
    while !err.message.is_char_boundary(end) {
        end -= 1;
    }
    let msg = &err.message[..end];
    out.extend_from_slice(&(msg.len() as i32).to_be_bytes());
    out.extend_from_slice(msg.as_bytes());
    out
}

/// Decode an error object from its serialized form.
pub fn decode_error_object(buf: &[u8]) -> Result<ErrorObject, CodecError> {
    let mut r = Reader::new(buf);
    let kind_byte = r.take_u8()?;
    let kind = OperationErrorKind::from_u8(kind_byte)
        .ok_or(CodecError::InvalidField("error kind"))?;
    let message = decode_str(&mut r)?;
    Ok(ErrorObject { kind, message })
}

// -----------------------------------------------------------------------------
// Helpers
// -----------------------------------------------------------------------------

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take_u8(&mut self) -> Result<u8, CodecError> {
        let b = *self.buf.get(self.pos).ok_or(CodecError::Truncated)?;
        self.pos += 1;
        Ok(b)
    }

    fn take_i32(&mut self) -> Result<i32, CodecError> {
        let bytes = self.take_bytes(4)?;
        Ok(i32::from_be_bytes(bytes.try_into().unwrap()))
    }

    fn take_bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos.checked_add(len).ok_or(CodecError::Truncated)?;
        if end > self.buf.len() {
            return Err(CodecError::Truncated);
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }
}

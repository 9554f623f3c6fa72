//! Length-prefixed frame transport.
//!
//! Every steady-state frame travels as `u32 BE length | frame body`. The
//! body is always encoded in full before the first byte is written, so a
//! failed encode never leaves a truncated frame on the stream.

use std::io;

use bytes::{BufMut, BytesMut};
use registry_protocol::MAX_FRAME_LEN;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Write one already-encoded frame body with its length prefix.
pub(crate) async fn write_prefixed<W>(writer: &mut W, body: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(4 + body.len());
    buf.put_u32(body.len() as u32);
    buf.extend_from_slice(body);
    writer.write_all(&buf).await?;
    writer.flush().await
}

/// Read one frame body, stripping the length prefix.
pub(crate) async fn read_prefixed<R>(reader: &mut R) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame length {} exceeds limit", len),
        ));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

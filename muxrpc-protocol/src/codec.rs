//! Codec kinds and framed header/body IO.
//!
//! Binary frame layout (8-byte prefix + payload):
//!
//! ```text
//! +---------+--------+------------------+
//! | len     | crc32c | payload          |
//! | 4 bytes | 4 bytes| len bytes        |
//! +---------+--------+------------------+
//! ```
//!
//! The JSON codec writes one JSON text per value, newline-terminated, values
//! back-to-back on the stream. Every message is a header value followed by a
//! body value in the same encoding.

use crate::error::ProtocolError;
use crate::message::{ConnectOptions, Header};
use crate::{CODEC_GOB, CODEC_JSON, MAX_PAYLOAD_SIZE};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the binary frame prefix in bytes (4 len + 4 crc).
pub const FRAME_HEADER_SIZE: usize = 8;

/// Initial capacity of per-connection read buffers.
const READ_BUFFER_CAPACITY: usize = 8 * 1024;

/// A negotiated codec, resolved from its wire name at handshake time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodecKind {
    /// Checksummed length-prefixed frames carrying self-describing msgpack.
    #[default]
    Gob,
    /// Newline-delimited JSON values.
    Json,
}

impl CodecKind {
    /// Looks a codec up by its registered wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            CODEC_GOB => Some(CodecKind::Gob),
            CODEC_JSON => Some(CodecKind::Json),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CodecKind::Gob => CODEC_GOB,
            CodecKind::Json => CODEC_JSON,
        }
    }

    /// Encodes one payload value.
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        match self {
            CodecKind::Gob => Ok(rmp_serde::to_vec_named(value)?),
            CodecKind::Json => Ok(serde_json::to_vec(value)?),
        }
    }

    /// Decodes one payload value.
    pub fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, ProtocolError> {
        match self {
            CodecKind::Gob => Ok(rmp_serde::from_slice(buf)?),
            CodecKind::Json => Ok(serde_json::from_slice(buf)?),
        }
    }

    /// The sentinel body sent alongside a header that carries an error.
    pub fn empty_body(&self) -> Vec<u8> {
        #[derive(Serialize)]
        struct Empty {}
        self.encode(&Empty {}).unwrap_or_default()
    }
}

/// Appends one binary frame to `buf`.
fn encode_frame(buf: &mut BytesMut, payload: &[u8]) -> Result<(), ProtocolError> {
    if payload.len() > MAX_PAYLOAD_SIZE as usize {
        return Err(ProtocolError::FrameTooLarge {
            size: payload.len() as u32,
            max: MAX_PAYLOAD_SIZE,
        });
    }
    buf.put_u32(payload.len() as u32);
    buf.put_u32(crc32c::crc32c(payload));
    buf.put_slice(payload);
    Ok(())
}

/// Attempts to decode one binary frame from the buffer.
///
/// Returns `Ok(Some(payload))` when a complete frame was consumed, `Ok(None)`
/// when more data is needed.
fn decode_frame(buf: &mut BytesMut) -> Result<Option<Bytes>, ProtocolError> {
    if buf.len() < FRAME_HEADER_SIZE {
        return Ok(None);
    }

    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if len > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: len,
            max: MAX_PAYLOAD_SIZE,
        });
    }
    let crc_expected = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);

    let total = FRAME_HEADER_SIZE + len as usize;
    if buf.len() < total {
        return Ok(None);
    }

    buf.advance(FRAME_HEADER_SIZE);
    let payload = buf.split_to(len as usize).freeze();

    let crc_actual = crc32c::crc32c(&payload);
    if crc_actual != crc_expected {
        return Err(ProtocolError::CrcMismatch {
            expected: crc_expected,
            actual: crc_actual,
        });
    }

    Ok(Some(payload))
}

/// Splits one newline-terminated value off the front of the buffer.
fn take_line(buf: &mut BytesMut) -> Option<Bytes> {
    let pos = buf.iter().position(|&b| b == b'\n')?;
    let mut line = buf.split_to(pos + 1);
    line.truncate(pos);
    Some(line.freeze())
}

/// Reads the handshake: one JSON value terminated by a newline, parsed from
/// the raw connection. Bytes following the newline stay in `buf` for the
/// codec reader.
pub async fn read_options<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut BytesMut,
) -> Result<ConnectOptions, ProtocolError> {
    loop {
        if let Some(line) = take_line(buf) {
            return Ok(serde_json::from_slice(&line)?);
        }
        if reader.read_buf(buf).await? == 0 {
            return Err(ProtocolError::UnexpectedEof);
        }
    }
}

/// Read side of a codec: owns the read half of the connection plus an
/// accumulation buffer. Exactly one task reads from it.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    kind: CodecKind,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, kind: CodecKind) -> Self {
        Self::with_buffer(inner, kind, BytesMut::with_capacity(READ_BUFFER_CAPACITY))
    }

    /// Wraps a connection whose handshake already buffered trailing bytes.
    pub fn with_buffer(inner: R, kind: CodecKind, buf: BytesMut) -> Self {
        Self { inner, kind, buf }
    }

    pub fn kind(&self) -> CodecKind {
        self.kind
    }

    /// Reads the next message header. `Ok(None)` means the peer closed the
    /// connection cleanly at a message boundary.
    pub async fn read_header(&mut self) -> Result<Option<Header>, ProtocolError> {
        let payload = match self.next_value(true).await? {
            Some(p) => p,
            None => return Ok(None),
        };
        Ok(Some(self.kind.decode(&payload)?))
    }

    /// Reads the raw body payload of the message whose header was just read.
    /// Dropping the returned bytes discards the body; typed decoding is the
    /// caller's concern.
    pub async fn read_body(&mut self) -> Result<Bytes, ProtocolError> {
        self.next_value(false)
            .await?
            .ok_or(ProtocolError::UnexpectedEof)
    }

    async fn next_value(&mut self, at_boundary: bool) -> Result<Option<Bytes>, ProtocolError> {
        loop {
            let decoded = match self.kind {
                CodecKind::Gob => decode_frame(&mut self.buf)?,
                CodecKind::Json => take_line(&mut self.buf),
            };
            if let Some(payload) = decoded {
                return Ok(Some(payload));
            }
            if self.inner.read_buf(&mut self.buf).await? == 0 {
                if at_boundary && self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(ProtocolError::UnexpectedEof);
            }
        }
    }
}

/// Write side of a codec. Callers serialise access through a send mutex; each
/// `write` emits one complete message and flushes before returning.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
    kind: CodecKind,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W, kind: CodecKind) -> Self {
        Self { inner, kind }
    }

    pub fn kind(&self) -> CodecKind {
        self.kind
    }

    /// Sends the handshake, always as one JSON line on the raw stream.
    pub async fn write_options(&mut self, options: &ConnectOptions) -> Result<(), ProtocolError> {
        let mut line = serde_json::to_vec(options)?;
        line.push(b'\n');
        self.send(&line).await
    }

    /// Writes one `(header, body)` message. `body` must already be encoded
    /// with this writer's codec kind.
    pub async fn write(&mut self, header: &Header, body: &[u8]) -> Result<(), ProtocolError> {
        let mut buf = BytesMut::with_capacity(2 * FRAME_HEADER_SIZE + body.len() + 64);
        match self.kind {
            CodecKind::Gob => {
                let header_bytes = self.kind.encode(header)?;
                encode_frame(&mut buf, &header_bytes)?;
                encode_frame(&mut buf, body)?;
            }
            CodecKind::Json => {
                buf.extend_from_slice(&serde_json::to_vec(header)?);
                buf.put_u8(b'\n');
                buf.extend_from_slice(body);
                buf.put_u8(b'\n');
            }
        }
        self.send(&buf).await
    }

    /// Closes the transport.
    pub async fn shutdown(&mut self) -> Result<(), ProtocolError> {
        self.inner.shutdown().await.map_err(Into::into)
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        let res = self.try_send(bytes).await;
        if res.is_err() {
            // A failed write leaves the stream in an unknown state; close it.
            let _ = self.inner.shutdown().await;
        }
        res
    }

    async fn try_send(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        self.inner.write_all(bytes).await?;
        self.inner.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MAGIC_NUMBER;

    #[test]
    fn test_kind_names() {
        assert_eq!(CodecKind::from_name("application/gob"), Some(CodecKind::Gob));
        assert_eq!(
            CodecKind::from_name("application/json"),
            Some(CodecKind::Json)
        );
        assert_eq!(CodecKind::from_name("application/xml"), None);
        assert_eq!(CodecKind::Gob.name(), "application/gob");
        assert_eq!(CodecKind::Json.name(), "application/json");
    }

    #[test]
    fn test_value_roundtrip_both_kinds() {
        let header = Header::request("Math.Add", 3);
        for kind in [CodecKind::Gob, CodecKind::Json] {
            let bytes = kind.encode(&header).unwrap();
            let decoded: Header = kind.decode(&bytes).unwrap();
            assert_eq!(decoded, header);
        }
    }

    #[test]
    fn test_empty_body_is_decodable_json() {
        let body = CodecKind::Json.empty_body();
        assert_eq!(body, b"{}");
    }

    #[test]
    fn test_frame_roundtrip() {
        let mut buf = BytesMut::new();
        encode_frame(&mut buf, b"hello").unwrap();
        let payload = decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(&payload[..], b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_frame_partial_then_complete() {
        let mut encoded = BytesMut::new();
        encode_frame(&mut encoded, b"partial").unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encoded[..5]);
        assert!(decode_frame(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&encoded[5..]);
        let payload = decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(&payload[..], b"partial");
    }

    #[test]
    fn test_frame_crc_mismatch() {
        let mut buf = BytesMut::new();
        encode_frame(&mut buf, b"data").unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;
        assert!(matches!(
            decode_frame(&mut buf),
            Err(ProtocolError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn test_frame_too_large() {
        let mut buf = BytesMut::new();
        buf.put_u32(MAX_PAYLOAD_SIZE + 1);
        buf.put_u32(0);
        assert!(matches!(
            decode_frame(&mut buf),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_take_line() {
        let mut buf = BytesMut::from(&b"{\"a\":1}\n{\"b\":"[..]);
        let line = take_line(&mut buf).unwrap();
        assert_eq!(&line[..], b"{\"a\":1}");
        assert!(take_line(&mut buf).is_none());
        assert_eq!(&buf[..], b"{\"b\":");
    }

    #[tokio::test]
    async fn test_message_roundtrip_over_stream() {
        for kind in [CodecKind::Gob, CodecKind::Json] {
            let (client, server) = tokio::io::duplex(1024);
            let mut writer = FrameWriter::new(client, kind);
            let mut reader = FrameReader::new(server, kind);

            let header = Header::request("Math.Add", 1);
            let body = kind.encode(&41i64).unwrap();
            writer.write(&header, &body).await.unwrap();

            let read_header = reader.read_header().await.unwrap().unwrap();
            assert_eq!(read_header, header);
            let read_body = reader.read_body().await.unwrap();
            let value: i64 = kind.decode(&read_body).unwrap();
            assert_eq!(value, 41);
        }
    }

    #[tokio::test]
    async fn test_clean_eof_at_boundary() {
        let (client, server) = tokio::io::duplex(1024);
        let mut reader = FrameReader::new(server, CodecKind::Gob);
        drop(client);
        assert!(reader.read_header().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_mid_message_is_an_error() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut reader = FrameReader::new(server, CodecKind::Gob);

        // A header frame with no body frame behind it.
        let mut buf = BytesMut::new();
        let header_bytes = CodecKind::Gob.encode(&Header::request("Svc.M", 1)).unwrap();
        encode_frame(&mut buf, &header_bytes).unwrap();
        client.write_all(&buf).await.unwrap();
        drop(client);

        assert!(reader.read_header().await.unwrap().is_some());
        assert!(matches!(
            reader.read_body().await,
            Err(ProtocolError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn test_discarded_body_preserves_stream_position() {
        let kind = CodecKind::Json;
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(client, kind);
        let mut reader = FrameReader::new(server, kind);

        writer
            .write(&Header::request("Nope.M", 1), &kind.encode(&1i64).unwrap())
            .await
            .unwrap();
        writer
            .write(&Header::request("Math.Add", 2), &kind.encode(&2i64).unwrap())
            .await
            .unwrap();

        let first = reader.read_header().await.unwrap().unwrap();
        assert_eq!(first.seq, 1);
        drop(reader.read_body().await.unwrap());

        let second = reader.read_header().await.unwrap().unwrap();
        assert_eq!(second.seq, 2);
        let body: i64 = kind.decode(&reader.read_body().await.unwrap()).unwrap();
        assert_eq!(body, 2);
    }

    #[tokio::test]
    async fn test_handshake_preserves_trailing_bytes() {
        let kind = CodecKind::Gob;
        let (client, mut server) = tokio::io::duplex(1024);

        // Client sends the handshake and the first request in one burst.
        let mut writer = FrameWriter::new(client, kind);
        writer
            .write_options(&ConnectOptions::default())
            .await
            .unwrap();
        writer
            .write(&Header::request("Math.Add", 1), &kind.encode(&5i64).unwrap())
            .await
            .unwrap();

        let mut buf = BytesMut::new();
        let options = read_options(&mut server, &mut buf).await.unwrap();
        assert_eq!(options.magic_number, MAGIC_NUMBER);

        let mut reader = FrameReader::with_buffer(server, kind, buf);
        let header = reader.read_header().await.unwrap().unwrap();
        assert_eq!(header.service_method, "Math.Add");
        let body: i64 = kind.decode(&reader.read_body().await.unwrap()).unwrap();
        assert_eq!(body, 5);
    }
}

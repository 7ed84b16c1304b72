//! Framed transport: `0x2A | len:u32-LE | body:utf8[len]`.
//!
//! The async server decodes frames through the tokio-util codec; the
//! blocking client uses the synchronous helpers over the same layout.
//! A non-marker leading byte is fatal for the connection.

use std::io::{Read, Write};

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Result, SuperqError};

/// Marker byte prefixing every message.
pub(crate) const FRAME_MARKER: u8 = 42;

const HEADER_LEN: usize = 5;
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Codec over the marker + length + body frame.
#[derive(Debug, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = String;
    type Error = SuperqError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        if src[0] != FRAME_MARKER {
            return Err(SuperqError::MalformedRequest(format!(
                "invalid frame marker ({})",
                src[0]
            )));
        }
        let len = u32::from_le_bytes([src[1], src[2], src[3], src[4]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(SuperqError::MalformedRequest(format!(
                "frame length {len} exceeds cap"
            )));
        }
        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }
        src.advance(HEADER_LEN);
        let body = src.split_to(len);
        String::from_utf8(body.to_vec())
            .map(Some)
            .map_err(|e| SuperqError::MalformedRequest(format!("frame is not utf-8: {e}")))
    }
}

impl Encoder<String> for FrameCodec {
    type Error = SuperqError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        let len = frame_len(&item)?;
        dst.reserve(HEADER_LEN + item.len());
        dst.put_u8(FRAME_MARKER);
        dst.put_u32_le(len);
        dst.put_slice(item.as_bytes());
        Ok(())
    }
}

fn frame_len(body: &str) -> Result<u32> {
    if body.len() > MAX_FRAME_LEN {
        return Err(SuperqError::InvalidArgument(format!(
            "message of {} bytes exceeds frame cap",
            body.len()
        )));
    }
    #[allow(clippy::cast_possible_truncation)]
    Ok(body.len() as u32)
}

/// Render a complete frame.
pub(crate) fn frame_bytes(body: &str) -> Result<Vec<u8>> {
    let len = frame_len(body)?;
    let mut bytes = Vec::with_capacity(HEADER_LEN + body.len());
    bytes.push(FRAME_MARKER);
    bytes.extend_from_slice(&len.to_le_bytes());
    bytes.extend_from_slice(body.as_bytes());
    Ok(bytes)
}

/// Write one frame to a blocking stream. Partial writes are retried by
/// `write_all`; a zero-byte write surfaces as an I/O error.
pub(crate) fn write_frame<W: Write>(writer: &mut W, body: &str) -> Result<()> {
    writer.write_all(&frame_bytes(body)?)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame from a blocking stream. Short reads loop inside
/// `read_exact`; a closed connection surfaces as an I/O error.
pub(crate) fn read_frame<R: Read>(reader: &mut R) -> Result<String> {
    let mut header = [0_u8; HEADER_LEN];
    reader.read_exact(&mut header)?;
    if header[0] != FRAME_MARKER {
        return Err(SuperqError::MalformedResponse(format!(
            "invalid frame marker ({})",
            header[0]
        )));
    }
    let len = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;
    if len > MAX_FRAME_LEN {
        return Err(SuperqError::MalformedResponse(format!(
            "frame length {len} exceeds cap"
        )));
    }
    let mut body = vec![0_u8; len];
    reader.read_exact(&mut body)?;
    String::from_utf8(body)
        .map_err(|e| SuperqError::MalformedResponse(format!("frame is not utf-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        codec.encode("hello superq".to_owned(), &mut buf).unwrap();
        assert_eq!(buf[0], FRAME_MARKER);
        let decoded = codec.decode(&mut buf).unwrap();
        assert_eq!(decoded.as_deref(), Some("hello superq"));
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_waits_for_full_frame() {
        let mut codec = FrameCodec;
        let frame = frame_bytes("abcdef").unwrap();

        let mut buf = BytesMut::from(&frame[..3]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&frame[3..frame.len() - 1]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&frame[frame.len() - 1..]);
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("abcdef"));
    }

    #[test]
    fn decode_two_frames_back_to_back() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&frame_bytes("one").unwrap());
        buf.extend_from_slice(&frame_bytes("two").unwrap());
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("one"));
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("two"));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn bad_marker_is_fatal() {
        let mut codec = FrameCodec;
        let mut frame = frame_bytes("x").unwrap();
        frame[0] = 7;
        let mut buf = BytesMut::from(frame.as_slice());
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn sync_helpers_round_trip() {
        let mut sink = Vec::new();
        write_frame(&mut sink, "ping").unwrap();
        let mut cursor = std::io::Cursor::new(sink);
        assert_eq!(read_frame(&mut cursor).unwrap(), "ping");
    }

    #[test]
    fn sync_read_rejects_bad_marker() {
        let mut bytes = frame_bytes("pong").unwrap();
        bytes[0] = 0;
        let mut cursor = std::io::Cursor::new(bytes);
        assert!(matches!(
            read_frame(&mut cursor),
            Err(SuperqError::MalformedResponse(_))
        ));
    }
}

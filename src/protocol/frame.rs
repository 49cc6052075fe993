//! Wire format: frame encoding and incremental decoding.
//!
//! Every message on an application-server connection is one frame:
//!
//! ```text
//! byte 0:       marker, always 0x00
//! byte 1:       command type (u8)
//! bytes 2-3:    payload length L (u16, little-endian)
//! bytes 4..4+L: UTF-8 JSON payload
//! ```
//!
//! Decoding is incremental: [`decode`] consumes at most one complete
//! frame from a [`FrameBuffer`] and returns `None` while the header or
//! payload is still partial. A corrupt marker can never resynchronize,
//! so it terminates the connection; an unknown command byte only skips
//! that frame.

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;
use tracing::warn;

use crate::error::{Error, Result};

use super::FrameBuffer;

// ============================================================================
// Constants
// ============================================================================

/// Marker byte opening every frame.
pub const FRAME_MARKER: u8 = 0x00;

/// Size of the fixed frame header in bytes.
pub const HEADER_SIZE: usize = 4;

/// Maximum payload size representable by the u16 length field.
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

// ============================================================================
// CommandType
// ============================================================================

/// Command discriminator carried in byte 1 of the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandType {
    /// Cache invalidation event, broadcast to all bound sessions.
    CacheInvalidation = 0,
    /// Session registration carrying a signed handshake token.
    AuthSession = 1,
    /// Presence: user came online.
    Online = 2,
    /// Presence: user went offline.
    Offline = 3,
}

impl CommandType {
    /// Parses a command byte, returning `None` for unknown values.
    #[inline]
    #[must_use]
    pub const fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::CacheInvalidation),
            1 => Some(Self::AuthSession),
            2 => Some(Self::Online),
            3 => Some(Self::Offline),
            _ => None,
        }
    }

    /// Returns the wire byte for this command.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns the command name used in broadcast envelopes.
    #[inline]
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CacheInvalidation => "cache_invalidation",
            Self::AuthSession => "auth_session",
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

// ============================================================================
// Frame
// ============================================================================

/// One decoded protocol message: command type plus JSON payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Command discriminator.
    pub command: CommandType,
    /// Decoded JSON payload.
    pub payload: Value,
}

impl Frame {
    /// Creates a frame.
    #[inline]
    #[must_use]
    pub const fn new(command: CommandType, payload: Value) -> Self {
        Self { command, payload }
    }

    /// Encodes this frame into wire bytes.
    ///
    /// # Errors
    ///
    /// - [`Error::PayloadTooLarge`] if the serialized payload exceeds
    ///   the u16 length field
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode(self.command, &self.payload)
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Encodes a command and payload into wire bytes.
///
/// # Errors
///
/// - [`Error::PayloadTooLarge`] if the serialized payload exceeds the
///   u16 length field
pub fn encode(command: CommandType, payload: &Value) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(payload)?;

    if body.len() > MAX_PAYLOAD_SIZE {
        return Err(Error::payload_too_large(body.len(), MAX_PAYLOAD_SIZE));
    }

    let length = body.len() as u16;
    let mut bytes = Vec::with_capacity(HEADER_SIZE + body.len());
    bytes.push(FRAME_MARKER);
    bytes.push(command.as_u8());
    bytes.extend_from_slice(&length.to_le_bytes());
    bytes.extend_from_slice(&body);

    Ok(bytes)
}

// ============================================================================
// Decoding
// ============================================================================

/// Decodes at most one complete frame from the buffer.
///
/// Returns `Ok(None)` while the header or payload is incomplete —
/// nothing is consumed until a whole frame is buffered. Frames with an
/// unknown command byte or an undecodable payload are consumed and
/// skipped; decoding then continues with the next frame.
///
/// # Errors
///
/// - [`Error::InvalidMarker`] if byte 0 is not `0x00`; the connection
///   owning the buffer must be closed
pub fn decode(buf: &mut FrameBuffer) -> Result<Option<Frame>> {
    loop {
        let header = buf.peek(HEADER_SIZE);
        if header.len() < HEADER_SIZE {
            return Ok(None);
        }

        let marker = header[0];
        if marker != FRAME_MARKER {
            return Err(Error::invalid_marker(marker));
        }

        let command_byte = header[1];
        let length = u16::from_le_bytes([header[2], header[3]]) as usize;

        if buf.unread_size() < HEADER_SIZE + length {
            return Ok(None);
        }

        let skipped = buf.advance(HEADER_SIZE);
        debug_assert_eq!(skipped, HEADER_SIZE);
        let body = buf.read(length);
        debug_assert_eq!(body.len(), length);

        let Some(command) = CommandType::from_u8(command_byte) else {
            warn!(command = command_byte, length, "Unknown command, skipping frame");
            continue;
        };

        match serde_json::from_slice::<Value>(&body) {
            Ok(payload) => return Ok(Some(Frame::new(command, payload))),
            Err(e) => {
                warn!(error = %e, command = ?command, "Undecodable payload, skipping frame");
                continue;
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;
    use serde_json::json;

    fn frame(command: CommandType, payload: Value) -> Vec<u8> {
        encode(command, &payload).expect("encode")
    }

    #[test]
    fn test_command_type_roundtrip() {
        for byte in 0..=3u8 {
            let command = CommandType::from_u8(byte).expect("known command");
            assert_eq!(command.as_u8(), byte);
        }
        assert_eq!(CommandType::from_u8(4), None);
        assert_eq!(CommandType::from_u8(255), None);
    }

    #[test]
    fn test_command_names() {
        assert_eq!(CommandType::CacheInvalidation.name(), "cache_invalidation");
        assert_eq!(CommandType::AuthSession.name(), "auth_session");
        assert_eq!(CommandType::Online.name(), "online");
        assert_eq!(CommandType::Offline.name(), "offline");
    }

    #[test]
    fn test_encode_header_layout() {
        let payload = json!({"category": "party", "name": "rec42"});
        let bytes = frame(CommandType::CacheInvalidation, payload.clone());

        assert_eq!(bytes[0], FRAME_MARKER);
        assert_eq!(bytes[1], 0);

        let length = u16::from_le_bytes([bytes[2], bytes[3]]) as usize;
        assert_eq!(length, bytes.len() - HEADER_SIZE);
        assert_eq!(
            serde_json::from_slice::<Value>(&bytes[HEADER_SIZE..]).expect("payload json"),
            payload
        );
    }

    #[test]
    fn test_encode_length_is_little_endian() {
        // 300-byte payload exercises both length bytes.
        let payload = json!({"name": "x".repeat(280)});
        let bytes = frame(CommandType::AuthSession, payload);
        let length = (bytes.len() - HEADER_SIZE) as u16;
        assert_eq!(bytes[2], (length & 0xff) as u8);
        assert_eq!(bytes[3], (length >> 8) as u8);
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let payload = json!({"blob": "y".repeat(MAX_PAYLOAD_SIZE)});
        let err = encode(CommandType::CacheInvalidation, &payload).unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { .. }));
    }

    #[test]
    fn test_decode_incomplete_header() {
        let mut buf = FrameBuffer::new();
        buf.write(&[0x00, 0x01]);
        assert!(decode(&mut buf).expect("decode").is_none());
        assert_eq!(buf.unread_size(), 2);
    }

    #[test]
    fn test_decode_split_payload_emits_exactly_one_frame() {
        // Full header plus 2 of 10 payload bytes: nothing decodable.
        let payload = json!("12345678");
        let bytes = frame(CommandType::Online, payload.clone());
        assert_eq!(bytes.len(), HEADER_SIZE + 10);

        let mut buf = FrameBuffer::new();
        buf.write(&bytes[..6]);
        assert!(decode(&mut buf).expect("decode").is_none());

        // Remaining 8 bytes complete the frame.
        buf.write(&bytes[6..]);
        let decoded = decode(&mut buf).expect("decode").expect("one frame");
        assert_eq!(decoded.command, CommandType::Online);
        assert_eq!(decoded.payload, payload);

        assert!(decode(&mut buf).expect("decode").is_none());
    }

    #[test]
    fn test_decode_invalid_marker_is_fatal() {
        let mut buf = FrameBuffer::new();
        buf.write(&[0x01, 0x00, 0x00, 0x00]);
        let err = decode(&mut buf).unwrap_err();
        assert!(matches!(err, Error::InvalidMarker { marker: 0x01 }));
    }

    #[test]
    fn test_decode_skips_unknown_command() {
        let mut buf = FrameBuffer::new();

        // Unknown command 9 followed by a valid frame.
        buf.write(&[FRAME_MARKER, 9, 2, 0]);
        buf.write(b"{}");
        buf.write(&frame(CommandType::Offline, json!({"username": "bob"})));

        let decoded = decode(&mut buf).expect("decode").expect("valid frame");
        assert_eq!(decoded.command, CommandType::Offline);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_skips_undecodable_payload() {
        let mut buf = FrameBuffer::new();

        // Valid header, invalid UTF-8/JSON body.
        buf.write(&[FRAME_MARKER, 0, 3, 0, 0xff, 0xfe, 0xfd]);
        buf.write(&frame(CommandType::Online, json!({"username": "eve"})));

        let decoded = decode(&mut buf).expect("decode").expect("valid frame");
        assert_eq!(decoded.command, CommandType::Online);
    }

    #[test]
    fn test_multiple_frames_in_order() {
        let mut buf = FrameBuffer::new();
        buf.write(&frame(CommandType::CacheInvalidation, json!({"n": 1})));
        buf.write(&frame(CommandType::AuthSession, json!({"n": 2})));
        buf.write(&frame(CommandType::Online, json!({"n": 3})));

        let mut seen = Vec::new();
        while let Some(decoded) = decode(&mut buf).expect("decode") {
            seen.push(decoded.payload["n"].as_u64().expect("n"));
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    proptest! {
        /// Any frame sequence fed in any chunking decodes back to the
        /// original frames, in order, with identical payloads.
        #[test]
        fn prop_roundtrip_arbitrary_chunking(
            payloads in prop::collection::vec("[a-z0-9]{0,64}", 1..8),
            chunk_sizes in prop::collection::vec(1usize..17, 1..64),
        ) {
            let frames: Vec<Frame> = payloads
                .iter()
                .enumerate()
                .map(|(i, s)| Frame::new(
                    CommandType::from_u8((i % 4) as u8).expect("known"),
                    json!({"value": s}),
                ))
                .collect();

            let mut wire = Vec::new();
            for f in &frames {
                wire.extend_from_slice(&f.encode().expect("encode"));
            }

            let mut buf = FrameBuffer::new();
            let mut decoded = Vec::new();
            let mut offset = 0;
            let mut chunks = chunk_sizes.iter().cycle();

            while offset < wire.len() {
                let take = (*chunks.next().expect("cycle")).min(wire.len() - offset);
                buf.write(&wire[offset..offset + take]);
                offset += take;

                while let Some(f) = decode(&mut buf).expect("decode") {
                    decoded.push(f);
                }
            }

            prop_assert_eq!(decoded, frames);
        }
    }
}

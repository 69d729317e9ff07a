//! Binary framing for the camera snapshot port.
//!
//! Printers without an RTSP camera stream (P1 and A1 families) serve
//! JPEG stills over a TLS socket. The client authenticates with a fixed
//! 72-byte frame, then the printer answers with a 16-byte header whose
//! first four bytes hold the little-endian payload length, followed by
//! the JPEG payload itself.

use crate::error::{DeviceError, Result};

/// Size of the authentication frame sent on connect.
pub const AUTH_FRAME_LEN: usize = 72;

/// Size of the header preceding every image payload.
pub const HEADER_LEN: usize = 16;

/// Width of the zero-padded username and access code fields.
const FIELD_LEN: usize = 32;

/// Largest payload accepted from a printer.
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

/// JPEG start-of-image marker (SOI followed by the JFIF APP0 marker).
pub const JPEG_SOI: [u8; 4] = [0xff, 0xd8, 0xff, 0xe0];

/// JPEG end-of-image marker.
pub const JPEG_EOI: [u8; 2] = [0xff, 0xd9];

/// Build the authentication frame for the snapshot port.
///
/// The username is truncated to 32 bytes. An access code that does not
/// fit in 32 ASCII bytes is rejected, since truncating a credential
/// would only produce a confusing authentication failure later.
pub fn encode_auth_frame(username: &str, access_code: &str) -> Result<[u8; AUTH_FRAME_LEN]> {
    if !access_code.is_ascii() || access_code.len() > FIELD_LEN {
        return Err(DeviceError::InvalidInput(format!(
            "access code must be at most {FIELD_LEN} ASCII bytes"
        )));
    }

    let mut frame = [0u8; AUTH_FRAME_LEN];
    frame[0..4].copy_from_slice(&0x40u32.to_le_bytes());
    frame[4..8].copy_from_slice(&0x3000u32.to_le_bytes());
    // bytes 8..16 stay zero

    let user = username.as_bytes();
    let user_len = user.len().min(FIELD_LEN);
    frame[16..16 + user_len].copy_from_slice(&user[..user_len]);

    let code = access_code.as_bytes();
    frame[48..48 + code.len()].copy_from_slice(code);

    Ok(frame)
}

/// Decoder state.
#[derive(Debug)]
enum State {
    /// Waiting for the 16-byte header chunk.
    AwaitingHeader,
    /// Header parsed, accumulating payload bytes.
    AwaitingPayload { length: usize, buffer: Vec<u8> },
    /// An image was produced.
    Complete,
    /// A protocol error was reported.
    Failed,
}

/// Reduces the chunks read from the snapshot socket into one JPEG image.
///
/// One decoder handles one retrieval attempt. Once it has produced an
/// image or an error, any further chunks are ignored.
#[derive(Debug)]
pub struct FrameDecoder {
    state: State,
}

impl FrameDecoder {
    /// Create a decoder waiting for a header.
    pub fn new() -> Self {
        Self {
            state: State::AwaitingHeader,
        }
    }

    /// Feed one received chunk.
    ///
    /// Returns `Ok(Some(image))` exactly once, when the payload is
    /// complete and carries the JPEG markers. Returns `Ok(None)` while
    /// more bytes are needed and after the decoder has finished.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<Vec<u8>>> {
        let result = self.advance(chunk);
        if result.is_err() {
            self.state = State::Failed;
        }
        result
    }

    /// Whether the decoder has produced an image or failed.
    pub fn is_finished(&self) -> bool {
        matches!(self.state, State::Complete | State::Failed)
    }

    fn advance(&mut self, chunk: &[u8]) -> Result<Option<Vec<u8>>> {
        match &mut self.state {
            State::Complete | State::Failed => Ok(None),
            State::AwaitingHeader => {
                if chunk.len() != HEADER_LEN {
                    return Err(DeviceError::protocol(format!(
                        "unexpected data format: expected {HEADER_LEN}-byte header, got {} bytes",
                        chunk.len()
                    )));
                }

                let length = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as usize;
                if length > MAX_PAYLOAD_LEN {
                    return Err(DeviceError::protocol(format!(
                        "payload length {length} exceeds maximum {MAX_PAYLOAD_LEN}"
                    )));
                }

                self.state = State::AwaitingPayload {
                    length,
                    buffer: Vec::with_capacity(length),
                };

                // A zero-length payload cannot hold the markers, fail now.
                if length == 0 {
                    return self.advance(&[]);
                }
                Ok(None)
            }
            State::AwaitingPayload { length, buffer } => {
                let wanted = *length - buffer.len();
                buffer.extend_from_slice(&chunk[..chunk.len().min(wanted)]);

                if buffer.len() < *length {
                    return Ok(None);
                }

                let image = std::mem::take(buffer);
                validate_jpeg(&image)?;
                self.state = State::Complete;
                Ok(Some(image))
            }
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_jpeg(image: &[u8]) -> Result<()> {
    if image.len() >= JPEG_SOI.len() + JPEG_EOI.len()
        && image.starts_with(&JPEG_SOI)
        && image.ends_with(&JPEG_EOI)
    {
        Ok(())
    } else {
        Err(DeviceError::protocol(
            "format error: missing start/end markers",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(length: u32) -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];
        header[0..4].copy_from_slice(&length.to_le_bytes());
        header
    }

    fn jpeg(body_len: usize) -> Vec<u8> {
        let mut image = JPEG_SOI.to_vec();
        image.extend(std::iter::repeat(0x42).take(body_len));
        image.extend_from_slice(&JPEG_EOI);
        image
    }

    #[test]
    fn test_auth_frame_layout() {
        let frame = encode_auth_frame("bblp", "12345678").unwrap();

        assert_eq!(frame.len(), AUTH_FRAME_LEN);
        assert_eq!(&frame[0..4], &[0x40, 0, 0, 0]);
        assert_eq!(&frame[4..8], &[0x00, 0x30, 0, 0]);
        assert_eq!(&frame[8..16], &[0u8; 8]);
        assert_eq!(&frame[16..20], b"bblp");
        assert!(frame[20..48].iter().all(|&b| b == 0));
        assert_eq!(&frame[48..56], b"12345678");
        assert!(frame[56..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_auth_frame_rejects_long_access_code() {
        let code = "x".repeat(33);
        assert!(matches!(
            encode_auth_frame("bblp", &code),
            Err(DeviceError::InvalidInput(_))
        ));

        let exact = "y".repeat(32);
        let frame = encode_auth_frame("bblp", &exact).unwrap();
        assert_eq!(&frame[48..], exact.as_bytes());
    }

    #[test]
    fn test_decode_single_payload_chunk() {
        let image = jpeg(100);
        let mut decoder = FrameDecoder::new();

        assert_eq!(decoder.push(&header(image.len() as u32)).unwrap(), None);
        assert_eq!(decoder.push(&image).unwrap(), Some(image));
        assert!(decoder.is_finished());
    }

    #[test]
    fn test_decode_fragmented_payload() {
        let image = jpeg(1000);
        let mut decoder = FrameDecoder::new();
        decoder.push(&header(image.len() as u32)).unwrap();

        let mut result = None;
        for chunk in image.chunks(37) {
            if let Some(done) = decoder.push(chunk).unwrap() {
                result = Some(done);
            }
        }

        assert_eq!(result, Some(image));
    }

    #[test]
    fn test_decode_header_of_wrong_size() {
        let mut decoder = FrameDecoder::new();
        let err = decoder.push(&[0u8; 20]).unwrap_err();

        assert!(matches!(err, DeviceError::Protocol(_)));
        assert!(decoder.is_finished());
    }

    #[test]
    fn test_decode_missing_markers() {
        let mut image = jpeg(10);
        image[0] = 0x00;
        let mut decoder = FrameDecoder::new();
        decoder.push(&header(image.len() as u32)).unwrap();

        let err = decoder.push(&image).unwrap_err();
        assert!(err.to_string().contains("missing start/end markers"));

        let mut truncated = jpeg(10);
        truncated.pop();
        let mut decoder = FrameDecoder::new();
        decoder.push(&header(truncated.len() as u32)).unwrap();
        assert!(decoder.push(&truncated).is_err());
    }

    #[test]
    fn test_decode_ignores_chunks_after_completion() {
        let image = jpeg(8);
        let mut decoder = FrameDecoder::new();
        decoder.push(&header(image.len() as u32)).unwrap();
        decoder.push(&image).unwrap();

        assert_eq!(decoder.push(&header(8)).unwrap(), None);
        assert_eq!(decoder.push(b"garbage").unwrap(), None);
    }

    #[test]
    fn test_decode_ignores_chunks_after_error() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"short").is_err());
        assert_eq!(decoder.push(&header(8)).unwrap(), None);
    }

    #[test]
    fn test_decode_discards_overshoot() {
        let image = jpeg(16);
        let mut chunk = image.clone();
        chunk.extend_from_slice(&header(99));

        let mut decoder = FrameDecoder::new();
        decoder.push(&header(image.len() as u32)).unwrap();
        assert_eq!(decoder.push(&chunk).unwrap(), Some(image));
    }

    #[test]
    fn test_decode_rejects_oversized_and_empty_payloads() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(&header(MAX_PAYLOAD_LEN as u32 + 1)).is_err());

        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(&header(0)).is_err());
    }
}

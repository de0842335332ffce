//! Length-prefixed framing over any blocking byte stream.
//!
//! Wire format (8 bytes overhead, big-endian):
//! ```text
//! [u16: protocol_version][u16: message_type][u32: body_len][body bytes]
//! ```
//!
//! The fixed header lets a receiver always find the message boundary no
//! matter how the stream was segmented.

use std::io::{self, Read, Write};

/// Current protocol version.
pub const PROTOCOL_VERSION: u16 = 1;

/// Maximum body size (16 MB).
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Fixed header size (version + type + length).
pub const HEADER_LEN: usize = 2 + 2 + 4;

/// Errors from reading a frame off a stream.
#[derive(Debug)]
pub enum FrameError {
    /// The stream hit EOF before any header byte arrived.
    Closed,
    /// The stream hit EOF partway through a frame.
    Truncated { expected: usize, actual: usize },
    /// Header carried a protocol version this side does not speak.
    Version(u16),
    /// Header announced a body larger than [`MAX_FRAME_SIZE`].
    TooLarge(u32),
    Io(io::Error),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::Closed => f.write_str("stream closed before frame header"),
            FrameError::Truncated { expected, actual } => {
                write!(f, "frame truncated: expected {expected} bytes, got {actual}")
            }
            FrameError::Version(v) => {
                write!(f, "unsupported protocol version {v} (expected {PROTOCOL_VERSION})")
            }
            FrameError::TooLarge(len) => {
                write!(f, "frame size {len} exceeds maximum {MAX_FRAME_SIZE}")
            }
            FrameError::Io(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for FrameError {}

/// Build the fixed header for a body of `body_len` bytes.
pub fn encode_header(msg_type: u16, body_len: usize) -> io::Result<[u8; HEADER_LEN]> {
    let len = u32::try_from(body_len)
        .ok()
        .filter(|len| *len <= MAX_FRAME_SIZE)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame size {body_len} exceeds maximum {MAX_FRAME_SIZE}"),
            )
        })?;

    let mut header = [0u8; HEADER_LEN];
    header[0..2].copy_from_slice(&PROTOCOL_VERSION.to_be_bytes());
    header[2..4].copy_from_slice(&msg_type.to_be_bytes());
    header[4..8].copy_from_slice(&len.to_be_bytes());
    Ok(header)
}

/// Write one complete frame. A short write surfaces as an error; the
/// caller must not try to resume a partially written frame.
pub fn write_frame<W: Write>(writer: &mut W, msg_type: u16, body: &[u8]) -> io::Result<()> {
    let header = encode_header(msg_type, body.len())?;
    let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
    buf.extend_from_slice(&header);
    buf.extend_from_slice(body);
    writer.write_all(&buf)?;
    writer.flush()
}

/// Read one complete frame, returning `(message_type, body)`.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<(u16, Vec<u8>), FrameError> {
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        match reader.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Err(FrameError::Closed),
            Ok(0) => {
                return Err(FrameError::Truncated {
                    expected: HEADER_LEN,
                    actual: filled,
                });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(FrameError::Io(e)),
        }
    }

    let version = u16::from_be_bytes([header[0], header[1]]);
    if version != PROTOCOL_VERSION {
        return Err(FrameError::Version(version));
    }
    let msg_type = u16::from_be_bytes([header[2], header[3]]);
    let body_len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    if body_len > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge(body_len));
    }

    let mut body = vec![0u8; body_len as usize];
    let mut read = 0;
    while read < body.len() {
        match reader.read(&mut body[read..]) {
            Ok(0) => {
                return Err(FrameError::Truncated {
                    expected: body.len(),
                    actual: read,
                });
            }
            Ok(n) => read += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(FrameError::Io(e)),
        }
    }

    Ok((msg_type, body))
}

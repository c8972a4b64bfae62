//! Checksummed page frames.
//!
//! ```text
//! | body_len: u32 LE | kind: u8 | page_id: u64 LE | body | crc32: u32 LE |
//! ```
//!
//! The checksum covers every byte that precedes it.

use crate::error::{CodecError, CodecResult};

/// Size of the fixed frame header in bytes.
pub const FRAME_HEADER_SIZE: usize = 4 + 1 + 8;

/// Size of the frame trailer (checksum) in bytes.
pub const FRAME_TRAILER_SIZE: usize = 4;

/// Smallest possible frame: header and trailer around an empty body.
pub const MIN_FRAME_SIZE: usize = FRAME_HEADER_SIZE + FRAME_TRAILER_SIZE;

/// Largest body a frame may carry.
pub const MAX_BODY_SIZE: usize = 256 * 1024 * 1024;

/// What a frame holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    /// The encoded values of one object.
    Object = 1,
    /// A version root: page table plus catalog.
    Root = 2,
}

impl FrameKind {
    /// Returns the on-disk tag.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Parses an on-disk tag.
    ///
    /// # Errors
    ///
    /// Returns `UnknownFrameKind` for unrecognized tags.
    pub fn from_byte(byte: u8) -> CodecResult<Self> {
        match byte {
            1 => Ok(Self::Object),
            2 => Ok(Self::Root),
            other => Err(CodecError::UnknownFrameKind(other)),
        }
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame kind.
    pub kind: FrameKind,
    /// Page the frame belongs to.
    pub page_id: u64,
    /// Frame body.
    pub body: Vec<u8>,
}

impl Frame {
    /// Creates a frame.
    #[must_use]
    pub fn new(kind: FrameKind, page_id: u64, body: Vec<u8>) -> Self {
        Self {
            kind,
            page_id,
            body,
        }
    }

    /// Total encoded size of this frame.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        MIN_FRAME_SIZE + self.body.len()
    }

    /// Encodes the frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the body exceeds `MAX_BODY_SIZE`.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        if self.body.len() > MAX_BODY_SIZE {
            return Err(CodecError::encoding_failed(format!(
                "frame body of {} bytes exceeds limit of {MAX_BODY_SIZE}",
                self.body.len()
            )));
        }

        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&(self.body.len() as u32).to_le_bytes());
        buf.push(self.kind.as_byte());
        buf.extend_from_slice(&self.page_id.to_le_bytes());
        buf.extend_from_slice(&self.body);
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Decodes and verifies a frame occupying exactly `bytes`.
    ///
    /// # Errors
    ///
    /// Returns an error on truncation, trailing data, bad kind or checksum.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let total = frame_len(bytes)?;
        if bytes.len() < total {
            return Err(CodecError::Truncated {
                needed: total,
                available: bytes.len(),
            });
        }
        if bytes.len() > total {
            return Err(CodecError::invalid_frame(format!(
                "{} trailing bytes after frame",
                bytes.len() - total
            )));
        }

        let payload_end = total - FRAME_TRAILER_SIZE;
        let expected = read_u32(&bytes[payload_end..]);
        let actual = crc32fast::hash(&bytes[..payload_end]);
        if expected != actual {
            return Err(CodecError::ChecksumMismatch { expected, actual });
        }

        let kind = FrameKind::from_byte(bytes[4])?;
        let page_id = read_u64(&bytes[5..FRAME_HEADER_SIZE]);
        Ok(Self {
            kind,
            page_id,
            body: bytes[FRAME_HEADER_SIZE..payload_end].to_vec(),
        })
    }
}

/// Returns the total length of the frame starting at `bytes`, read from
/// its header.
///
/// # Errors
///
/// Returns `Truncated` if fewer than 4 bytes are available and
/// `InvalidFrame` if the declared body is too large.
pub fn frame_len(bytes: &[u8]) -> CodecResult<usize> {
    if bytes.len() < 4 {
        return Err(CodecError::Truncated {
            needed: 4,
            available: bytes.len(),
        });
    }
    let body_len = read_u32(bytes) as usize;
    if body_len > MAX_BODY_SIZE {
        return Err(CodecError::invalid_frame(format!(
            "declared body length {body_len} exceeds limit"
        )));
    }
    Ok(MIN_FRAME_SIZE + body_len)
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(raw)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(raw)
}

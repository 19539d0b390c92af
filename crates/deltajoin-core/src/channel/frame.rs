//! Length-prefixed frame codec.
//!
//! ```text
//! frame := u32_be(payload_length) || payload_length bytes
//! ```
//!
//! Frames are packed contiguously from byte 0 of the data region with no
//! padding or checksum. These functions work on plain byte slices so they can
//! be tested without a shared segment.

use bytes::{Buf, BufMut};

/// Size of the length prefix.
pub const FRAME_HEADER_LEN: usize = 4;

/// Framing errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Payload length does not fit the 32-bit length prefix.
    #[error("payload of {len} bytes exceeds the frame length limit")]
    PayloadTooLarge {
        /// Payload length.
        len: usize,
    },

    /// Encoding would run past the end of the buffer.
    #[error("frame at offset {offset} needs {needed} bytes, buffer has {available}")]
    NoSpace {
        /// Frame start.
        offset: usize,
        /// Bytes the frame needs.
        needed: usize,
        /// Bytes available from `offset`.
        available: usize,
    },

    /// Fewer than [`FRAME_HEADER_LEN`] bytes remain before the limit.
    #[error("truncated frame header at offset {offset} (written extent ends at {limit})")]
    Truncated {
        /// Frame start.
        offset: usize,
        /// Written extent.
        limit: usize,
    },

    /// The length prefix points past the written extent.
    #[error("frame at offset {offset} claims {length} bytes, written extent ends at {limit}")]
    LengthOverrun {
        /// Frame start.
        offset: usize,
        /// Length read from the prefix.
        length: usize,
        /// Written extent.
        limit: usize,
    },
}

/// Total bytes a frame with a `payload_len` payload occupies.
#[inline]
#[must_use]
pub const fn encoded_len(payload_len: usize) -> usize {
    FRAME_HEADER_LEN + payload_len
}

/// Writes one frame at `offset` and returns the offset just past it.
///
/// # Errors
///
/// Returns [`FrameError::PayloadTooLarge`] if the length does not fit in 32
/// bits, or [`FrameError::NoSpace`] if the frame would overrun `buf`.
pub fn encode_frame(buf: &mut [u8], offset: usize, payload: &[u8]) -> Result<usize, FrameError> {
    let len = u32::try_from(payload.len())
        .map_err(|_| FrameError::PayloadTooLarge { len: payload.len() })?;
    let needed = encoded_len(payload.len());
    let available = buf.len().saturating_sub(offset);
    if needed > available {
        return Err(FrameError::NoSpace {
            offset,
            needed,
            available,
        });
    }

    let end = offset + needed;
    let mut dst = &mut buf[offset..end];
    dst.put_u32(len);
    dst.put_slice(payload);
    Ok(end)
}

/// Reads the frame at `offset`, trusting nothing past `limit`.
///
/// `limit` is the written extent (the write cursor). Returns the payload and
/// the offset of the next frame.
///
/// # Errors
///
/// Returns [`FrameError::Truncated`] if the length prefix itself is not fully
/// written, or [`FrameError::LengthOverrun`] if the payload would extend past
/// `limit`.
pub fn decode_frame(buf: &[u8], offset: usize, limit: usize) -> Result<(&[u8], usize), FrameError> {
    let limit = limit.min(buf.len());
    if offset > limit || limit - offset < FRAME_HEADER_LEN {
        return Err(FrameError::Truncated { offset, limit });
    }

    let mut src = &buf[offset..offset + FRAME_HEADER_LEN];
    let length = src.get_u32() as usize;
    let start = offset + FRAME_HEADER_LEN;
    if length > limit - start {
        return Err(FrameError::LengthOverrun {
            offset,
            length,
            limit,
        });
    }

    let end = start + length;
    Ok((&buf[start..end], end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_pack_contiguously() {
        let mut buf = vec![0u8; 32];
        let next = encode_frame(&mut buf, 0, b"abc").unwrap();
        assert_eq!(next, 7);
        let next = encode_frame(&mut buf, next, b"").unwrap();
        assert_eq!(next, 11);
        let end = encode_frame(&mut buf, next, b"xy").unwrap();
        assert_eq!(end, 17);

        assert_eq!(&buf[0..4], &[0, 0, 0, 3]);
        assert_eq!(&buf[4..7], b"abc");

        let (p, next) = decode_frame(&buf, 0, end).unwrap();
        assert_eq!(p, b"abc");
        let (p, next) = decode_frame(&buf, next, end).unwrap();
        assert!(p.is_empty());
        let (p, next) = decode_frame(&buf, next, end).unwrap();
        assert_eq!(p, b"xy");
        assert_eq!(next, end);
    }

    #[test]
    fn test_length_prefix_is_big_endian() {
        let mut buf = vec![0u8; 300];
        encode_frame(&mut buf, 0, &[7u8; 258]).unwrap();
        assert_eq!(&buf[0..4], &[0, 0, 1, 2]);
    }

    #[test]
    fn test_encode_no_space() {
        let mut buf = vec![0u8; 8];
        let err = encode_frame(&mut buf, 2, b"abc").unwrap_err();
        assert_eq!(
            err,
            FrameError::NoSpace {
                offset: 2,
                needed: 7,
                available: 6
            }
        );
        assert_eq!(buf, vec![0u8; 8]);
    }

    #[test]
    fn test_decode_truncated_header() {
        let buf = vec![0u8; 16];
        assert_eq!(
            decode_frame(&buf, 2, 5).unwrap_err(),
            FrameError::Truncated { offset: 2, limit: 5 }
        );
        assert_eq!(
            decode_frame(&buf, 6, 5).unwrap_err(),
            FrameError::Truncated { offset: 6, limit: 5 }
        );
    }

    #[test]
    fn test_decode_rejects_overrun_length() {
        let mut buf = vec![0u8; 16];
        buf[0..4].copy_from_slice(&100u32.to_be_bytes());
        assert_eq!(
            decode_frame(&buf, 0, 12).unwrap_err(),
            FrameError::LengthOverrun {
                offset: 0,
                length: 100,
                limit: 12
            }
        );
    }

    #[test]
    fn test_decode_rejects_sign_bit_length() {
        // A length with the high bit set reads as negative in a signed decoder.
        let mut buf = vec![0u8; 16];
        buf[0..4].copy_from_slice(&[0x80, 0, 0, 1]);
        assert!(matches!(
            decode_frame(&buf, 0, 16),
            Err(FrameError::LengthOverrun { .. })
        ));
    }

    #[test]
    fn test_decode_limit_clamped_to_buffer() {
        let mut buf = vec![0u8; 6];
        buf[0..4].copy_from_slice(&4u32.to_be_bytes());
        assert!(matches!(
            decode_frame(&buf, 0, 1000),
            Err(FrameError::LengthOverrun { limit: 6, .. })
        ));
    }
}

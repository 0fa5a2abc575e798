//! Framing: 4 lowercase hex digits of total length + payload + NUL terminator.
//!
//! ```text
//! +------------------+-------------------+------+
//! | length (4 ASCII) |      payload      | 0x00 |
//! +------------------+-------------------+------+
//! ```
//!
//! The length covers the prefix itself, the payload and the terminator, so the
//! smallest valid frame is 5 bytes.

/// Size of the hex length prefix.
pub const LEN_SIZE: usize = 4;
/// Smallest declared length a receiver accepts: prefix + one byte.
pub const MIN_FRAME_LEN: usize = LEN_SIZE + 1;
/// Largest total frame length expressible in 4 hex digits.
pub const MAX_FRAME_LEN: usize = 0xFFFF;
/// Largest payload `encode_frame` accepts. The terminator counts toward the
/// length, so this is 0xFFFA rather than 0xFFFB.
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LEN - LEN_SIZE - 1;

const TERMINATOR: u8 = 0;

/// Encode a payload into a single frame: hex length + payload + terminator.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FrameEncodeError> {
    let len = LEN_SIZE + payload.len() + 1;
    if len > MAX_FRAME_LEN {
        return Err(FrameEncodeError::TooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }
    let mut out = Vec::with_capacity(len);
    out.extend_from_slice(format!("{:04x}", len).as_bytes());
    out.extend_from_slice(payload);
    out.push(TERMINATOR);
    Ok(out)
}

/// Error encoding a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("frame too large: payload {size} bytes, max {max} bytes")]
    TooLarge { size: usize, max: usize },
}

/// Read the declared total length from the front of `bytes` without consuming anything.
pub fn peek_length(bytes: &[u8]) -> Result<usize, FrameDecodeError> {
    if bytes.len() < LEN_SIZE {
        return Err(FrameDecodeError::ShortRead {
            declared: LEN_SIZE,
            available: bytes.len(),
        });
    }
    let prefix = &bytes[..LEN_SIZE];
    // from_str_radix tolerates a leading '+', the wire format does not.
    if !prefix.iter().all(u8::is_ascii_hexdigit) {
        return Err(FrameDecodeError::Malformed("length prefix is not hex"));
    }
    let text = std::str::from_utf8(prefix)
        .map_err(|_| FrameDecodeError::Malformed("length prefix is not hex"))?;
    let len = u16::from_str_radix(text, 16)
        .map_err(|_| FrameDecodeError::Malformed("length prefix is not hex"))?
        as usize;
    if len < MIN_FRAME_LEN {
        return Err(FrameDecodeError::Malformed("declared length below minimum"));
    }
    Ok(len)
}

/// Decode one frame from the front of `bytes`. Returns the payload and the number of bytes consumed.
///
/// Bytes past the declared length are left alone; a datagram carrying more than
/// it declares is truncated to the declared size, as a sized receive would.
pub fn decode_frame(bytes: &[u8]) -> Result<(Vec<u8>, usize), FrameDecodeError> {
    let len = peek_length(bytes)?;
    if bytes.len() < len {
        return Err(FrameDecodeError::ShortRead {
            declared: len,
            available: bytes.len(),
        });
    }
    let mut payload = &bytes[LEN_SIZE..len];
    if let Some((&TERMINATOR, rest)) = payload.split_last() {
        payload = rest;
    }
    Ok((payload.to_vec(), len))
}

/// Error decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("short read: frame declares {declared} bytes, {available} available")]
    ShortRead { declared: usize, available: usize },
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
}

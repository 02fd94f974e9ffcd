//! Wire format encoding and decoding.
//!
//! Every frame starts with a 5-byte header:
//! ```text
//! ┌───────────┬────────┬─────────────────────┐
//! │ Stream ID │ Type   │ Payload ...         │
//! │ 4 bytes   │ 1 byte │ rest of the message │
//! │ uint32 LE │        │                     │
//! └───────────┴────────┴─────────────────────┘
//! ```
//!
//! The payload length is not encoded: each frame travels as one discrete
//! message of the underlying transport, so the payload is whatever follows
//! the header.

use crate::error::{MuxError, Result};

/// Header size in bytes (fixed, exactly 5).
pub const HEADER_SIZE: usize = 5;

/// Size of the credit value carried by OPEN and ACK frames.
pub const CREDIT_SIZE: usize = 4;

/// Frame type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Open request carrying the initiator's receive window.
    Open = 0,
    /// Stream data.
    Data = 1,
    /// Credit grant (and acceptance, when it is the first one).
    Ack = 2,
    /// Half-close.
    Fin = 3,
}

impl FrameType {
    /// Wire value of this type.
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = MuxError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(FrameType::Open),
            1 => Ok(FrameType::Data),
            2 => Ok(FrameType::Ack),
            3 => Ok(FrameType::Fin),
            other => Err(MuxError::MalformedFrame(format!(
                "unknown frame type {}",
                other
            ))),
        }
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Stream the frame belongs to.
    pub stream_id: u32,
    /// Frame type.
    pub frame_type: FrameType,
}

impl Header {
    /// Create a new header.
    pub fn new(stream_id: u32, frame_type: FrameType) -> Self {
        Self {
            stream_id,
            frame_type,
        }
    }

    /// Encode header to bytes (Little Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use wsmux::protocol::{FrameType, Header};
    ///
    /// let bytes = Header::new(7, FrameType::Ack).encode();
    /// assert_eq!(bytes, [7, 0, 0, 0, 2]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (5 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.stream_id.to_le_bytes());
        buf[4] = self.frame_type.as_u8();
    }

    /// Decode header from bytes (Little Endian).
    ///
    /// Fails with `MalformedFrame` if the buffer is too short or the type
    /// byte is unknown.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(MuxError::MalformedFrame(format!(
                "frame of {} bytes is shorter than the {}-byte header",
                buf.len(),
                HEADER_SIZE
            )));
        }
        Ok(Self {
            stream_id: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            frame_type: FrameType::try_from(buf[4])?,
        })
    }
}

/// Encode a credit value (Little Endian).
#[inline]
pub fn encode_credit(credit: u32) -> [u8; CREDIT_SIZE] {
    credit.to_le_bytes()
}

/// Decode a credit payload; it must be exactly `CREDIT_SIZE` bytes.
pub fn decode_credit(payload: &[u8]) -> Result<u32> {
    let bytes: [u8; CREDIT_SIZE] = payload.try_into().map_err(|_| {
        MuxError::MalformedFrame(format!(
            "credit payload must be {} bytes, got {}",
            CREDIT_SIZE,
            payload.len()
        ))
    })?;
    Ok(u32::from_le_bytes(bytes))
}

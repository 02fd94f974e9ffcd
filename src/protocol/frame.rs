//! Frame struct with typed constructors.
//!
//! Represents one complete protocol frame: header plus payload.
//! Uses `bytes::Bytes` for zero-copy payload sharing between the decoder,
//! the stream buffer and the writer task.
//!
//! # Example
//!
//! ```
//! use wsmux::protocol::{Frame, FrameType};
//! use bytes::Bytes;
//!
//! let frame = Frame::data(3, Bytes::from_static(b"hello"));
//! let wire = frame.encode();
//!
//! let decoded = Frame::decode(wire).unwrap();
//! assert_eq!(decoded.stream_id(), 3);
//! assert_eq!(decoded.frame_type(), FrameType::Data);
//! assert_eq!(decoded.payload(), b"hello");
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{decode_credit, encode_credit, FrameType, Header, HEADER_SIZE};
use crate::error::{MuxError, Result};

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from header and payload.
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Open request advertising the initiator's receive window.
    pub fn open(stream_id: u32, window: u32) -> Self {
        Self::new(
            Header::new(stream_id, FrameType::Open),
            Bytes::copy_from_slice(&encode_credit(window)),
        )
    }

    /// Data frame.
    pub fn data(stream_id: u32, payload: Bytes) -> Self {
        Self::new(Header::new(stream_id, FrameType::Data), payload)
    }

    /// Credit grant of `credit` bytes.
    pub fn ack(stream_id: u32, credit: u32) -> Self {
        Self::new(
            Header::new(stream_id, FrameType::Ack),
            Bytes::copy_from_slice(&encode_credit(credit)),
        )
    }

    /// Half-close.
    pub fn fin(stream_id: u32) -> Self {
        Self::new(Header::new(stream_id, FrameType::Fin), Bytes::new())
    }

    /// Get the stream ID.
    #[inline]
    pub fn stream_id(&self) -> u32 {
        self.header.stream_id
    }

    /// Get the frame type.
    #[inline]
    pub fn frame_type(&self) -> FrameType {
        self.header.frame_type
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Credit carried by an OPEN or ACK frame.
    ///
    /// Only meaningful for those two types; decoding already guarantees
    /// their payload is a well-formed credit.
    pub fn credit(&self) -> Result<u32> {
        decode_credit(&self.payload)
    }

    /// Total encoded size (header + payload).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Encode the frame into a single message.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.size());
        buf.put_slice(&self.header.encode());
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Decode a frame from one received message.
    ///
    /// The payload is a zero-copy slice of `message`. OPEN and ACK frames
    /// must carry exactly a 4-byte credit and FIN frames nothing.
    pub fn decode(mut message: Bytes) -> Result<Self> {
        let header = Header::decode(&message)?;
        let payload = message.split_off(HEADER_SIZE);

        match header.frame_type {
            FrameType::Open | FrameType::Ack => {
                decode_credit(&payload)?;
            }
            FrameType::Fin if !payload.is_empty() => {
                return Err(MuxError::MalformedFrame(format!(
                    "FIN frame for stream {} carries {} payload bytes",
                    header.stream_id,
                    payload.len()
                )));
            }
            _ => {}
        }

        Ok(Self { header, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_frame_encoding() {
        let wire = Frame::open(1, 1024).encode();
        assert_eq!(&wire[..], &[1, 0, 0, 0, 0, 0, 4, 0, 0]);
    }

    #[test]
    fn test_ack_frame_encoding() {
        let wire = Frame::ack(2, 5).encode();
        assert_eq!(&wire[..], &[2, 0, 0, 0, 2, 5, 0, 0, 0]);
    }

    #[test]
    fn test_fin_frame_encoding() {
        let frame = Frame::fin(9);
        assert_eq!(frame.size(), HEADER_SIZE);
        assert_eq!(&frame.encode()[..], &[9, 0, 0, 0, 3]);
    }

    #[test]
    fn test_data_frame_decode_shares_payload() {
        let wire = Frame::data(5, Bytes::from_static(b"payload")).encode();
        let frame = Frame::decode(wire).unwrap();

        assert_eq!(frame.stream_id(), 5);
        assert_eq!(frame.frame_type(), FrameType::Data);
        assert_eq!(frame.payload_len(), 7);
        assert_eq!(frame.payload(), b"payload");
    }

    #[test]
    fn test_empty_data_frame() {
        let frame = Frame::decode(Bytes::from_static(&[4, 0, 0, 0, 1])).unwrap();
        assert_eq!(frame.frame_type(), FrameType::Data);
        assert!(frame.payload().is_empty());
    }

    #[test]
    fn test_ack_credit() {
        let frame = Frame::decode(Frame::ack(3, 70000).encode()).unwrap();
        assert_eq!(frame.credit().unwrap(), 70000);
    }

    #[test]
    fn test_decode_ack_with_short_credit() {
        let result = Frame::decode(Bytes::from_static(&[3, 0, 0, 0, 2, 1, 0]));
        assert!(matches!(result, Err(MuxError::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_open_without_credit() {
        let result = Frame::decode(Bytes::from_static(&[3, 0, 0, 0, 0]));
        assert!(matches!(result, Err(MuxError::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_fin_with_payload() {
        let result = Frame::decode(Bytes::from_static(&[3, 0, 0, 0, 3, 1]));
        assert!(matches!(result, Err(MuxError::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_unknown_type() {
        let result = Frame::decode(Bytes::from_static(&[3, 0, 0, 0, 9]));
        assert!(matches!(result, Err(MuxError::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_truncated_header() {
        let result = Frame::decode(Bytes::from_static(&[3, 0]));
        assert!(matches!(result, Err(MuxError::MalformedFrame(_))));
    }
}

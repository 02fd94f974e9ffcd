//! Protocol module - wire format and frame types.
//!
//! This module implements the multiplexer's frame codec:
//! - 5-byte header encoding/decoding
//! - Frame struct with per-type constructors and validation

mod frame;
mod wire_format;

pub use frame::Frame;
pub use wire_format::{
    decode_credit, encode_credit, FrameType, Header, CREDIT_SIZE, HEADER_SIZE,
};

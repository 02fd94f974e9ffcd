//! Bounded FIFO byte buffer used as a stream's inbound staging area.
//!
//! Backed by a single `bytes::BytesMut`: writes append at the tail, reads
//! consume from the head, and storage grows on demand up to the configured
//! capacity. The buffer is not synchronized; the owning stream serializes
//! access and handles waiting.

use bytes::{Buf, BytesMut};

use crate::error::{MuxError, Result};

/// Storage reserved up front, regardless of capacity.
const INITIAL_ALLOCATION: usize = 512;

/// Bounded, growable FIFO of bytes.
#[derive(Debug)]
pub struct ByteBuffer {
    /// Unread bytes, head at index 0.
    data: BytesMut,
    /// Maximum number of unread bytes.
    capacity: usize,
}

impl ByteBuffer {
    /// Create an empty buffer holding at most `capacity` unread bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity.min(INITIAL_ALLOCATION)),
            capacity,
        }
    }

    /// Append `buf`, growing storage as needed.
    ///
    /// Fails with `NoCapacity`, without writing anything, if the bytes would
    /// not fit within the capacity.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if buf.len() > self.available() {
            return Err(MuxError::NoCapacity {
                capacity: self.capacity(),
            });
        }
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    /// Drain up to `buf.len()` bytes in FIFO order.
    ///
    /// Returns 0 when the buffer is empty.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.data.len());
        buf[..n].copy_from_slice(&self.data[..n]);
        self.data.advance(n);
        n
    }

    /// Discard every unread byte, returning how many were dropped.
    pub fn clear(&mut self) -> usize {
        let n = self.data.len();
        self.data.clear();
        n
    }

    /// Number of unread bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if there are no unread bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Maximum number of unread bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes that can still be written.
    #[inline]
    pub fn available(&self) -> usize {
        self.capacity - self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_buffer_is_empty() {
        let buffer = ByteBuffer::new(16);
        assert!(buffer.is_empty());
        assert_eq!(buffer.len(), 0);
        assert_eq!(buffer.capacity(), 16);
        assert_eq!(buffer.available(), 16);
    }

    #[test]
    fn test_write_then_read() {
        let mut buffer = ByteBuffer::new(16);
        assert_eq!(buffer.write(b"hello").unwrap(), 5);
        assert_eq!(buffer.len(), 5);

        let mut out = [0u8; 5];
        assert_eq!(buffer.read(&mut out), 5);
        assert_eq!(&out, b"hello");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_read_empty_returns_zero() {
        let mut buffer = ByteBuffer::new(8);
        let mut out = [0u8; 4];
        assert_eq!(buffer.read(&mut out), 0);
    }

    #[test]
    fn test_partial_reads_preserve_order() {
        let mut buffer = ByteBuffer::new(32);
        buffer.write(b"abcdef").unwrap();

        let mut out = [0u8; 4];
        assert_eq!(buffer.read(&mut out), 4);
        assert_eq!(&out, b"abcd");

        buffer.write(b"ghij").unwrap();

        let mut rest = [0u8; 16];
        let n = buffer.read(&mut rest);
        assert_eq!(&rest[..n], b"efghij");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_grows_past_initial_allocation() {
        let mut buffer = ByteBuffer::new(4096);
        let chunk: Vec<u8> = (0..=255u8).collect();
        for _ in 0..16 {
            buffer.write(&chunk).unwrap();
        }
        assert_eq!(buffer.len(), 4096);
        assert_eq!(buffer.available(), 0);

        let mut out = vec![0u8; 4096];
        assert_eq!(buffer.read(&mut out), 4096);
        for (i, byte) in out.iter().enumerate() {
            assert_eq!(*byte, (i % 256) as u8);
        }
    }

    #[test]
    fn test_write_beyond_capacity_fails() {
        let mut buffer = ByteBuffer::new(4);
        buffer.write(b"abc").unwrap();

        let result = buffer.write(b"de");
        assert!(matches!(result, Err(MuxError::NoCapacity { capacity: 4 })));
        // Nothing from the failed write was kept.
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_capacity_freed_by_read() {
        let mut buffer = ByteBuffer::new(4);
        buffer.write(b"abcd").unwrap();

        let mut out = [0u8; 2];
        buffer.read(&mut out);
        assert_eq!(buffer.available(), 2);
        assert!(buffer.write(b"ef").is_ok());
    }

    #[test]
    fn test_clear() {
        let mut buffer = ByteBuffer::new(8);
        buffer.write(b"1234").unwrap();
        assert_eq!(buffer.clear(), 4);
        assert!(buffer.is_empty());
    }
}

use bytes::{Bytes, BytesMut};

/// In-memory request buffer with a fill watermark.
///
/// The session stops re-enabling the client read side once the buffer reaches the
/// watermark, which bounds memory per session.
#[derive(Debug)]
pub struct IoBuffer {
    buf: BytesMut,
    watermark: usize,
}

impl IoBuffer {
    pub fn with_watermark(watermark: usize) -> Self {
        Self { buf: BytesMut::new(), watermark }
    }

    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn avail(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn below_watermark(&self) -> bool {
        self.buf.len() < self.watermark
    }

    /// Removes and returns the first `n` bytes (all of them if fewer are buffered).
    pub fn consume(&mut self, n: usize) -> Bytes {
        let n = n.min(self.buf.len());
        self.buf.split_to(n).freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watermark_and_consume() {
        let mut buffer = IoBuffer::with_watermark(8);
        assert!(buffer.is_empty());

        buffer.append(b"hello");
        assert!(buffer.below_watermark());
        buffer.append(b" world");
        assert!(!buffer.below_watermark());
        assert_eq!(buffer.avail(), 11);

        assert_eq!(buffer.consume(6), Bytes::from_static(b"hello "));
        assert!(buffer.below_watermark());
        assert_eq!(buffer.consume(100), Bytes::from_static(b"world"));
        assert!(buffer.is_empty());
    }
}

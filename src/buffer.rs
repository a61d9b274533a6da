//! Growable contiguous byte accumulator for codec frame reassembly
//!
//! Socket reads arrive in arbitrary chunks that rarely line up with codec
//! frame boundaries. The frame buffer accumulates those chunks so the
//! decoder always sees one contiguous window starting at offset 0, and
//! lets the caller drop exactly the prefix the decoder consumed.

/// Contiguous byte store with a write end and a consume end.
///
/// Stored bytes always occupy offsets `0..len()`; consuming `n` bytes
/// shifts the remainder back to offset 0.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    data: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    /// Append bytes at the write end, growing capacity geometrically.
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Remove the first `n` bytes and shift the remainder to offset 0.
    ///
    /// Panics if `n` exceeds the stored length; that is a caller bug, not
    /// a recoverable condition.
    pub fn consume(&mut self, n: usize) {
        let len = self.data.len();
        assert!(n <= len, "consume({n}) exceeds stored length {len}");
        self.data.copy_within(n.., 0);
        self.data.truncate(len - n);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

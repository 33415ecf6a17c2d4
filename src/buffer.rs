//! Fixed-size owned byte buffer.

use crate::traits::{CaptureError, Result};

/// An owned byte buffer whose size is fixed at construction.
///
/// `copy_from` refuses sources of any other size, which is what keeps a
/// frame of the wrong layout out of a capture target.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemoryBuffer {
    bytes: Box<[u8]>,
}

impl MemoryBuffer {
    /// Allocate `size` zeroed bytes.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0; size].into_boxed_slice(),
        }
    }

    /// Size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the buffer holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Read access to the contents.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Write access to the contents. The size cannot change through it.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Set every byte to `value`.
    pub fn fill(&mut self, value: u8) {
        self.bytes.fill(value);
    }

    /// Copy `source` in. Fails without touching the buffer unless the sizes match exactly.
    pub fn copy_from(&mut self, source: &[u8]) -> Result<()> {
        if source.len() != self.bytes.len() {
            return Err(CaptureError::BufferSizeMismatch {
                expected: self.bytes.len(),
                actual: source.len(),
            });
        }
        self.bytes.copy_from_slice(source);
        Ok(())
    }

    /// Copy the contents of another buffer of the same size.
    pub fn copy_from_buffer(&mut self, other: &Self) -> Result<()> {
        self.copy_from(other.as_bytes())
    }
}

//! Shared Byte Views
//!
//! Zero-copy windows onto one backing buffer (usually the memory-mapped dump).
//! Slicing a view never copies; bytes are only materialized on `to_vec`,
//! iteration, formatting or word unpacking.

use byteorder::ByteOrder;
use std::fmt;
use std::sync::Arc;

use crate::error::{HeapError, Result};
use crate::word::WordSize;

/// Backing storage shared by every view derived from it.
pub type Backing = Arc<dyn AsRef<[u8]> + Send + Sync>;

fn backing_slice(src: &Backing) -> &[u8] {
    AsRef::<[u8]>::as_ref(&**src)
}

/// A `[start, end)` window onto a shared backing buffer.
#[derive(Clone)]
pub struct SharedBytes {
    src: Backing,
    start: usize,
    end: usize,
}

impl SharedBytes {
    /// Wrap an owned buffer; the view spans all of it.
    pub fn new<B>(buf: B) -> Self
    where
        B: AsRef<[u8]> + Send + Sync + 'static,
    {
        Self::from_backing(Arc::new(buf))
    }

    /// View the whole of an already shared buffer.
    pub fn from_backing(src: Backing) -> Self {
        let end = backing_slice(&src).len();
        Self { src, start: 0, end }
    }

    /// View an absolute `[start, end)` range of a shared buffer, clamped to its length.
    pub fn window(src: Backing, start: usize, end: usize) -> Self {
        let total = backing_slice(&src).len();
        let end = end.min(total);
        let start = start.min(end);
        Self { src, start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Absolute offsets of this window within the backing buffer.
    pub fn offsets(&self) -> (usize, usize) {
        (self.start, self.end)
    }

    /// True if both views read from the same backing buffer.
    pub fn shares_backing(&self, other: &SharedBytes) -> bool {
        Arc::ptr_eq(&self.src, &other.src)
    }

    /// Relative index to a clamped offset within this window.
    fn resolve(&self, index: isize) -> usize {
        let len = self.len();
        if index < 0 {
            len.saturating_sub(index.unsigned_abs())
        } else {
            (index as usize).min(len)
        }
    }

    /// Sub-view relative to this window.
    ///
    /// `None` bounds are open, negative bounds count from the end of this
    /// window. Out-of-range bounds clamp; an inverted range yields an empty view.
    pub fn slice(&self, start: Option<isize>, end: Option<isize>) -> SharedBytes {
        let rel_start = start.map_or(0, |i| self.resolve(i));
        let rel_end = end.map_or(self.len(), |i| self.resolve(i)).max(rel_start);
        SharedBytes {
            src: Arc::clone(&self.src),
            start: self.start + rel_start,
            end: self.start + rel_end,
        }
    }

    /// Byte at a relative index; negative indices wrap from the end.
    pub fn get(&self, index: isize) -> Option<u8> {
        let offset = if index < 0 {
            self.len().checked_sub(index.unsigned_abs())?
        } else {
            index as usize
        };
        if offset >= self.len() {
            return None;
        }
        Some(backing_slice(&self.src)[self.start + offset])
    }

    /// Borrow the window without copying.
    pub fn as_slice(&self) -> &[u8] {
        &backing_slice(&self.src)[self.start..self.end]
    }

    /// Copy the window into an owned buffer.
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.as_slice().iter().copied()
    }

    /// Read one unsigned word of `width` bytes at a relative offset.
    pub fn read_word<B: ByteOrder>(&self, offset: usize, width: WordSize) -> Option<u64> {
        let end = offset.checked_add(width.bytes())?;
        let bytes = self.as_slice().get(offset..end)?;
        Some(B::read_uint(bytes, width.bytes()))
    }

    /// Unpack the window as consecutive words; a trailing partial word is ignored.
    pub fn unpack_words<B: ByteOrder>(&self, width: WordSize) -> Vec<u64> {
        self.as_slice()
            .chunks_exact(width.bytes())
            .map(|chunk| B::read_uint(chunk, width.bytes()))
            .collect()
    }

    /// Pack values into words of `width` bytes.
    pub fn pack_words<B: ByteOrder>(values: &[u64], width: WordSize) -> Result<Vec<u8>> {
        let size = width.bytes();
        let mut out = vec![0u8; values.len() * size];
        for (chunk, &value) in out.chunks_exact_mut(size).zip(values) {
            if !width.fits(value) {
                return Err(HeapError::ValueOutOfRange {
                    value,
                    word_size: size,
                });
            }
            B::write_uint(chunk, value, size);
        }
        Ok(out)
    }
}

impl fmt::Debug for SharedBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBytes")
            .field("start", &self.start)
            .field("end", &self.end)
            .field("bytes", &self.as_slice())
            .finish()
    }
}

impl fmt::LowerHex for SharedBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.as_slice() {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl PartialEq for SharedBytes {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for SharedBytes {}

//! Allocator Models
//!
//! Per-allocator-family knowledge of how chunks are laid out in a heap
//! mapping. A model is a stateless value chosen once, by name, when a
//! [`HeapFinder`](crate::HeapFinder) is built.

use byteorder::LE;
use std::fmt;
use tracing::debug;

use crate::error::{HeapError, Result};
use crate::mapping::Mapping;
use crate::word::WordSize;

/// One chunk reported by an allocator model, header excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkEntry {
    pub address: u64,
    pub size: u64,
    pub is_free: bool,
}

/// An inconsistent chunk header found while enumerating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFault {
    /// Address of the chunk header
    pub address: u64,
    pub reason: String,
}

impl ChunkFault {
    fn new(address: u64, reason: impl Into<String>) -> Self {
        Self {
            address,
            reason: reason.into(),
        }
    }
}

/// A field of the chunk header, for downstream structure validators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderField {
    pub name: &'static str,
    pub offset: usize,
    pub size: usize,
}

/// Chunk header layout descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderLayout {
    pub name: &'static str,
    pub size: usize,
    pub fields: Vec<HeaderField>,
}

pub type ChunkIter<'a> = Box<dyn Iterator<Item = std::result::Result<ChunkEntry, ChunkFault>> + 'a>;

/// Trait for allocator-family specific heap knowledge
pub trait AllocatorModel: fmt::Debug + Send + Sync {
    /// Registry name of this model
    fn name(&self) -> &'static str;

    fn word_size(&self) -> WordSize;

    /// Lazily enumerate chunks in address order.
    ///
    /// Enumeration stops after the first fault.
    fn chunks<'a>(&self, mapping: &'a Mapping) -> ChunkIter<'a>;

    /// Chunk header layout
    fn header_layout(&self) -> HeaderLayout;

    /// Check whether `mapping` looks like a heap managed by this allocator.
    ///
    /// Walks at most `depth` chunks. A fault within that budget rejects the
    /// mapping; a clean walk of at least one chunk accepts it.
    fn detect(&self, mapping: &Mapping, depth: usize) -> bool {
        let mut seen = 0;
        for entry in self.chunks(mapping).take(depth) {
            match entry {
                Ok(_) => seen += 1,
                Err(fault) => {
                    debug!(
                        "{}: rejecting {} after {} chunks: {} at {:#x}",
                        self.name(),
                        mapping,
                        seen,
                        fault.reason,
                        fault.address
                    );
                    return false;
                }
            }
        }
        seen > 0
    }
}

/// Names accepted by [`allocator_by_name`]
pub const ALLOCATOR_NAMES: &[&str] = &["libc", "glibc", "ptmalloc"];

/// Look up an allocator model by registry name
pub fn allocator_by_name(name: &str, word_size: WordSize) -> Result<Box<dyn AllocatorModel>> {
    match name.to_ascii_lowercase().as_str() {
        "libc" | "glibc" | "ptmalloc" => Ok(Box::new(LibcModel::new(word_size))),
        other => Err(HeapError::config(format!(
            "unknown allocator model '{}' (known: {})",
            other,
            ALLOCATOR_NAMES.join(", ")
        ))),
    }
}

/// glibc ptmalloc chunk flags, stored in the low bits of the size field
mod flags {
    pub const PREV_INUSE: u64 = 0x1;
    pub const IS_MMAPPED: u64 = 0x2;
    pub const NON_MAIN_ARENA: u64 = 0x4;
    pub const MASK: u64 = PREV_INUSE | IS_MMAPPED | NON_MAIN_ARENA;
}

/// glibc ptmalloc heap layout (little-endian targets).
///
/// Each chunk starts with `prev_size` and `size` words. Whether a chunk is in
/// use is recorded in the PREV_INUSE bit of the *next* chunk, so the last
/// chunk of the mapping (the top chunk) is never reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LibcModel {
    word_size: WordSize,
}

impl LibcModel {
    pub fn new(word_size: WordSize) -> Self {
        Self { word_size }
    }

    fn header_size(&self) -> usize {
        2 * self.word_size.bytes()
    }
}

impl AllocatorModel for LibcModel {
    fn name(&self) -> &'static str {
        "libc"
    }

    fn word_size(&self) -> WordSize {
        self.word_size
    }

    fn chunks<'a>(&self, mapping: &'a Mapping) -> ChunkIter<'a> {
        Box::new(LibcChunks {
            mapping,
            word: self.word_size,
            header: self.header_size(),
            offset: 0,
            done: false,
        })
    }

    fn header_layout(&self) -> HeaderLayout {
        let word = self.word_size.bytes();
        HeaderLayout {
            name: "malloc_chunk",
            size: self.header_size(),
            fields: vec![
                HeaderField {
                    name: "prev_size",
                    offset: 0,
                    size: word,
                },
                HeaderField {
                    name: "size",
                    offset: word,
                    size: word,
                },
            ],
        }
    }
}

struct LibcChunks<'a> {
    mapping: &'a Mapping,
    word: WordSize,
    header: usize,
    offset: usize,
    done: bool,
}

impl LibcChunks<'_> {
    fn read_word(&self, offset: usize) -> Option<u64> {
        self.mapping.bytes().read_word::<LE>(offset, self.word)
    }

    fn step(&mut self) -> std::result::Result<Option<ChunkEntry>, ChunkFault> {
        let len = self.mapping.bytes().len();
        let offset = self.offset;
        let address = self.mapping.start + offset as u64;

        if offset == len {
            return Ok(None);
        }
        let size_field = self
            .read_word(offset + self.word.bytes())
            .ok_or_else(|| ChunkFault::new(address, "truncated chunk header"))?;
        let size = size_field & !flags::MASK;

        if offset == 0 && size_field & flags::PREV_INUSE == 0 {
            return Err(ChunkFault::new(address, "first chunk lacks PREV_INUSE"));
        }
        if size_field & flags::IS_MMAPPED != 0 {
            return Err(ChunkFault::new(address, "mmapped chunk inside heap"));
        }
        if size < self.header as u64 {
            return Err(ChunkFault::new(
                address,
                format!("chunk size {:#x} below minimum", size),
            ));
        }
        if size % self.header as u64 != 0 {
            return Err(ChunkFault::new(
                address,
                format!("chunk size {:#x} is misaligned", size),
            ));
        }
        let next = match (offset as u64).checked_add(size) {
            Some(next) if next <= len as u64 => next as usize,
            _ => {
                return Err(ChunkFault::new(
                    address,
                    format!("chunk size {:#x} runs past end of mapping", size),
                ))
            }
        };
        if next == len {
            // Top chunk: unused wilderness, not tracked as a free chunk.
            self.offset = next;
            return Ok(None);
        }

        let next_size_field = self
            .read_word(next + self.word.bytes())
            .ok_or_else(|| ChunkFault::new(address, "successor header truncated"))?;
        let is_free = next_size_field & flags::PREV_INUSE == 0;
        if is_free {
            let prev_size = self
                .read_word(next)
                .ok_or_else(|| ChunkFault::new(address, "successor header truncated"))?;
            if prev_size != size {
                return Err(ChunkFault::new(
                    address,
                    format!(
                        "free chunk size {:#x} disagrees with successor prev_size {:#x}",
                        size, prev_size
                    ),
                ));
            }
        }

        self.offset = next;
        Ok(Some(ChunkEntry {
            address: address + self.header as u64,
            size: size - self.header as u64,
            is_free,
        }))
    }
}

impl Iterator for LibcChunks<'_> {
    type Item = std::result::Result<ChunkEntry, ChunkFault>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.step() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(fault) => {
                self.done = true;
                Some(Err(fault))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::bytes::SharedBytes;

    /// Build a little-endian 64-bit ptmalloc heap.
    ///
    /// `chunks` holds (chunk size including header, is_free); a 32-byte top
    /// chunk is appended.
    pub(crate) fn build_heap(chunks: &[(u64, bool)]) -> Vec<u8> {
        let mut data = Vec::new();
        let mut prev: Option<(u64, bool)> = None;
        for &(size, is_free) in chunks.iter().chain(std::iter::once(&(32, false))) {
            let (prev_size, prev_inuse) = match prev {
                Some((prev_len, true)) => (prev_len, 0),
                _ => (0, flags::PREV_INUSE),
            };
            let start = data.len();
            data.extend_from_slice(&prev_size.to_le_bytes());
            data.extend_from_slice(&(size | prev_inuse).to_le_bytes());
            data.resize(start + size as usize, 0);
            prev = Some((size, is_free));
        }
        data
    }

    pub(crate) fn heap_mapping(start: u64, data: Vec<u8>, path: Option<&str>) -> Mapping {
        let end = start + data.len() as u64;
        Mapping::new(start, end, "rw-p", path, SharedBytes::new(data))
    }

    #[test]
    fn test_libc_chunks_three_chunk_heap() {
        let mapping = heap_mapping(0x1000, build_heap(&[(32, false), (48, true), (32, false)]), None);
        let model = LibcModel::new(WordSize::Eight);
        let entries: Vec<ChunkEntry> = model.chunks(&mapping).map(|e| e.unwrap()).collect();
        assert_eq!(
            entries,
            vec![
                ChunkEntry { address: 0x1010, size: 16, is_free: false },
                ChunkEntry { address: 0x1030, size: 32, is_free: true },
                ChunkEntry { address: 0x1060, size: 16, is_free: false },
            ]
        );
    }

    #[test]
    fn test_libc_chunks_size_past_end() {
        let mut data = build_heap(&[(32, false), (32, false)]);
        // Second chunk claims 0x1000 bytes
        data[40..48].copy_from_slice(&(0x1000u64 | 1).to_le_bytes());
        let mapping = heap_mapping(0x1000, data, None);
        let model = LibcModel::new(WordSize::Eight);
        let results: Vec<_> = model.chunks(&mapping).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        let fault = results[1].clone().unwrap_err();
        assert_eq!(fault.address, 0x1020);
        assert!(fault.reason.contains("past end"));
    }

    #[test]
    fn test_libc_chunks_huge_size_does_not_wrap() {
        let mut data = build_heap(&[(32, false), (32, false)]);
        data[40..48].copy_from_slice(&0xffff_ffff_ffff_fff1u64.to_le_bytes());
        let mapping = heap_mapping(0x1000, data, None);
        let model = LibcModel::new(WordSize::Eight);
        let results: Vec<_> = model.chunks(&mapping).take(10).collect();
        assert_eq!(results.len(), 2);
        assert_eq!(
            results[0].clone().unwrap(),
            ChunkEntry { address: 0x1010, size: 16, is_free: false }
        );
        let fault = results[1].clone().unwrap_err();
        assert_eq!(fault.address, 0x1020);
        assert!(fault.reason.contains("past end"));
    }

    #[test]
    fn test_libc_chunks_zero_size_is_fault() {
        let mapping = heap_mapping(0x1000, vec![0u8; 64], None);
        let model = LibcModel::new(WordSize::Eight);
        let first = model.chunks(&mapping).next().unwrap();
        assert!(first.is_err());
    }

    #[test]
    fn test_detect_accepts_heap_and_rejects_noise() {
        let model = LibcModel::new(WordSize::Eight);
        let heap = heap_mapping(0x1000, build_heap(&[(32, false), (48, true), (32, false)]), None);
        assert!(model.detect(&heap, 20));

        let noise = heap_mapping(0x1000, vec![0xAA; 256], None);
        assert!(!model.detect(&noise, 20));
    }

    #[test]
    fn test_detect_depth_limits_walk() {
        let model = LibcModel::new(WordSize::Eight);
        let mut data = build_heap(&[(32, false), (32, false), (32, false)]);
        // Corrupt the third chunk; a depth of 2 never reaches it
        data[64 + 8..64 + 16].copy_from_slice(&0x7u64.to_le_bytes());
        let heap = heap_mapping(0x1000, data, None);
        assert!(model.detect(&heap, 2));
        assert!(!model.detect(&heap, 20));
    }

    #[test]
    fn test_free_chunk_prev_size_mismatch() {
        let mut data = build_heap(&[(32, true), (32, false)]);
        // prev_size of the second chunk no longer matches
        data[32..40].copy_from_slice(&64u64.to_le_bytes());
        let heap = heap_mapping(0x1000, data, None);
        let model = LibcModel::new(WordSize::Eight);
        let err = model.chunks(&heap).next().unwrap().unwrap_err();
        assert!(err.reason.contains("prev_size"));
    }

    #[test]
    fn test_allocator_by_name() {
        let model = allocator_by_name("ptmalloc", WordSize::Four).unwrap();
        assert_eq!(model.name(), "libc");
        assert_eq!(model.word_size(), WordSize::Four);
        assert_eq!(model.header_layout().size, 8);

        let err = allocator_by_name("jemalloc", WordSize::Eight).unwrap_err();
        assert!(matches!(err, HeapError::Configuration(_)));
    }

    #[test]
    fn test_header_layout_fields() {
        let layout = LibcModel::new(WordSize::Eight).header_layout();
        assert_eq!(layout.name, "malloc_chunk");
        assert_eq!(layout.fields[1].name, "size");
        assert_eq!(layout.fields[1].offset, 8);
    }
}

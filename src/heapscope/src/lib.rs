//! # heapscope
//!
//! Heap recovery from static process memory dumps.
//!
//! This library provides functionality to:
//! - Classify the mappings of a dump as allocator-managed heaps
//! - Walk heap chunks to enumerate user allocations and free chunks
//! - Find heap pointers in stack and heap bytes
//! - Cache derived address lists on disk so repeated analysis is cheap
//! - Slice sorted address streams and byte buffers without copying
//!
//! ## Example
//!
//! ```no_run
//! use heapscope::{HeapFinder, LibcModel, MappingSet, WordSize};
//!
//! # fn main() -> Result<(), heapscope::HeapError> {
//! # let mappings = MappingSet::default();
//! let finder = HeapFinder::new(Box::new(LibcModel::new(WordSize::Eight)));
//!
//! for heap in finder.get_heap_mappings(&mappings) {
//!     let walker = finder.build_walker(heap);
//!     for chunk in walker.get_user_allocations()? {
//!         println!("{:#x} {}", chunk.address, chunk.size);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod allocator;
pub mod bytes;
pub mod cache;
pub mod error;
pub mod finder;
pub mod interval;
pub mod mapping;
pub mod pointers;
pub mod walker;
pub mod word;

// Re-export commonly used items
#[doc(inline)]
pub use allocator::{allocator_by_name, AllocatorModel, ChunkEntry, HeaderLayout, LibcModel};
#[doc(inline)]
pub use bytes::SharedBytes;
#[doc(inline)]
pub use cache::{cached_allocations, CacheKey, CacheKind, ResultCache};
#[doc(inline)]
pub use error::{HeapError, PartialHeap};
#[doc(inline)]
pub use finder::{HeapConfig, HeapFinder, DEFAULT_VALIDATION_DEPTH};
#[doc(inline)]
pub use interval::{closest_floor_value, dequeue, next_structure, Adjacency, Dequeue, Structure};
#[doc(inline)]
pub use mapping::{Mapping, MappingSet, MappingSource};
#[doc(inline)]
pub use pointers::{discover_heap_pointers, PointerDiscovery, PointerEnumerator, WordScanner};
#[doc(inline)]
pub use walker::{Chunk, ChunkLists, HeapWalker};
#[doc(inline)]
pub use word::WordSize;

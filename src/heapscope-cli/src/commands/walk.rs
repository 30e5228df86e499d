//! Heap walk command handler
//!
//! Handles the `walk` subcommand: lists user allocations (from the result
//! cache when present) or free chunks of one or every heap.

use anyhow::{bail, Result};
use heapscope::{
    cached_allocations, Chunk, HeapError, HeapWalker, Mapping, MappingSource, ResultCache,
};
use std::path::Path;

use super::parse_address;

/// Chunks listed for one heap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapChunks {
    pub start: u64,
    pub chunks: Vec<Chunk>,
    /// Address of the malformed chunk that cut the walk short
    pub fault: Option<u64>,
}

/// Keep the heap containing `address`, or all heaps if none is given
pub fn select_heaps<'m>(heaps: Vec<&'m Mapping>, address: Option<u64>) -> Result<Vec<&'m Mapping>> {
    let Some(address) = address else {
        return Ok(heaps);
    };
    match heaps.into_iter().find(|m| m.contains(address)) {
        Some(heap) => Ok(vec![heap]),
        None => bail!("No heap contains address {:#x}", address),
    }
}

/// Allocations or free chunks of one heap, keeping partial results of a
/// malformed walk
pub fn heap_chunks(cache: &ResultCache, walker: &HeapWalker<'_>, free: bool) -> Result<HeapChunks> {
    let start = walker.mapping().start;
    let result = if free {
        walker.get_free_chunks().map(<[Chunk]>::to_vec)
    } else {
        cached_allocations(cache, walker).map(|(addrs, sizes)| {
            addrs
                .into_iter()
                .zip(sizes)
                .map(|(address, size)| Chunk::new(address, size))
                .collect()
        })
    };

    match result {
        Ok(chunks) => Ok(HeapChunks {
            start,
            chunks,
            fault: None,
        }),
        Err(HeapError::MalformedHeap(partial)) => {
            let partial = *partial;
            let chunks = if free {
                partial.free_chunks
            } else {
                partial.allocations
            };
            Ok(HeapChunks {
                start,
                chunks,
                fault: Some(partial.address),
            })
        }
        Err(e) => Err(e.into()),
    }
}

/// Handle the walk command
pub fn handle(
    dump_path: &Path,
    maps: Option<&Path>,
    start: Option<&str>,
    free: bool,
    limit: Option<usize>,
    allocator: Option<&str>,
) -> Result<()> {
    let address = start.map(parse_address).transpose()?;
    let (config, dump, finder) = super::open(dump_path, maps, allocator)?;
    let cache = ResultCache::for_dump(config.cache_dir()?, dump_path, config.word_size()?);

    let heaps = select_heaps(finder.get_heap_mappings(dump.mappings()), address)?;
    if heaps.is_empty() {
        println!("No {} heaps found", finder.allocator().name());
        return Ok(());
    }

    let kind = if free { "free chunks" } else { "allocations" };
    for heap in heaps {
        let walker = finder.build_walker(heap);
        let listed = heap_chunks(&cache, &walker, free)?;

        println!("Heap {} ({} {}):", heap, listed.chunks.len(), kind);
        let shown = limit.unwrap_or(listed.chunks.len());
        for chunk in listed.chunks.iter().take(shown) {
            println!("  {:#018x} {:>10}", chunk.address, chunk.size);
        }
        if listed.chunks.len() > shown {
            println!("  ... {} more", listed.chunks.len() - shown);
        }
        if let Some(address) = listed.fault {
            eprintln!(
                "  warning: walk stopped at malformed chunk {:#x}, list is partial",
                address
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::{write_sample_dump, HEAP_START};
    use crate::dump::DumpFile;
    use heapscope::{CacheKey, CacheKind, HeapFinder, LibcModel, SharedBytes, WordSize};

    fn finder() -> HeapFinder {
        HeapFinder::new(Box::new(LibcModel::new(WordSize::Eight)))
    }

    #[test]
    fn test_walk_sample_heap() {
        let dir = tempfile::tempdir().unwrap();
        let dump = DumpFile::open(&write_sample_dump(dir.path()), None).unwrap();
        let cache = ResultCache::new(dir.path().join("cache"), "sample.dump", WordSize::Eight);
        let finder = finder();
        let heaps = finder.get_heap_mappings(dump.mappings());
        let walker = finder.build_walker(heaps[0]);

        let allocs = heap_chunks(&cache, &walker, false).unwrap();
        assert_eq!(
            allocs.chunks,
            vec![Chunk::new(HEAP_START + 0x10, 16), Chunk::new(HEAP_START + 0x60, 16)]
        );
        assert_eq!(allocs.fault, None);
        assert!(cache.contains(CacheKey::for_region(CacheKind::ChunkAddrs, HEAP_START)));

        let free = heap_chunks(&cache, &walker, true).unwrap();
        assert_eq!(free.chunks, vec![Chunk::new(HEAP_START + 0x30, 32)]);
    }

    #[test]
    fn test_malformed_heap_keeps_partial_list() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(dir.path(), "broken", WordSize::Eight);

        // One valid 32-byte chunk followed by a header with a bogus size
        let mut data = vec![0u8; 0x40];
        data[8..16].copy_from_slice(&0x21u64.to_le_bytes());
        data[0x28..0x30].copy_from_slice(&0x7u64.to_le_bytes());
        let heap = Mapping::new(0x1000, 0x1040, "rw-p", None, SharedBytes::new(data));

        let finder = finder();
        let walker = finder.build_walker(&heap);
        let listed = heap_chunks(&cache, &walker, false).unwrap();
        assert_eq!(listed.fault, Some(0x1020));
        assert_eq!(listed.chunks, vec![Chunk::new(0x1010, 16)]);
        assert!(!cache.contains(CacheKey::for_region(CacheKind::ChunkAddrs, 0x1000)));
    }

    #[test]
    fn test_select_heaps_by_address() {
        let a = Mapping::new(0x1000, 0x2000, "rw-p", None, SharedBytes::new(vec![0u8; 0x1000]));
        let b = Mapping::new(0x8000, 0x9000, "rw-p", None, SharedBytes::new(vec![0u8; 0x1000]));

        assert_eq!(select_heaps(vec![&a, &b], None).unwrap().len(), 2);
        let picked = select_heaps(vec![&a, &b], Some(0x8010)).unwrap();
        assert_eq!(picked[0].start, 0x8000);
        assert!(select_heaps(vec![&a, &b], Some(0x5000)).is_err());
    }
}

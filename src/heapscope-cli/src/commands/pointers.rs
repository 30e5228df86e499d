//! Pointer discovery command handler
//!
//! Handles the `pointers` subcommand: finds heap pointers in the stack and
//! heap, then relates them to the allocations of each heap.

use anyhow::Result;
use heapscope::{
    cached_allocations, closest_floor_value, discover_heap_pointers, CacheKey, CacheKind, Dequeue,
    HeapFinder, MappingSource, PointerDiscovery, ResultCache, WordScanner, WordSize,
};
use std::path::Path;
use tracing::warn;

/// How the discovered pointers relate to one heap
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeapPointers {
    pub start: u64,
    pub allocations: usize,
    /// Aligned pointer values landing inside a user allocation
    pub targets: usize,
    /// Allocations with at least one pointer-holding word
    pub holders: usize,
}

/// Count `values` that fall inside one of the allocations
pub fn count_targets(values: &[u64], addrs: &[u64], sizes: &[u64]) -> usize {
    values
        .iter()
        .filter(|&&value| match closest_floor_value(value, addrs) {
            Some((address, index)) => match sizes.get(index) {
                Some(&size) => address <= value && value - address < size,
                None => false,
            },
            None => false,
        })
        .count()
}

/// Count allocations holding at least one of the ascending `heap_addrs`
pub fn count_holders(heap_addrs: &[u64], addrs: &[u64], sizes: &[u64], word_size: WordSize) -> usize {
    let mut queue = Dequeue::new(heap_addrs, word_size);
    addrs
        .iter()
        .zip(sizes)
        .filter(|&(&address, &size)| !queue.take(address, address.saturating_add(size)).is_empty())
        .count()
}

/// Discover pointers and relate them to every heap of the dump
pub fn run<M: MappingSource + ?Sized>(
    cache: &ResultCache,
    finder: &HeapFinder,
    dump: &M,
) -> Result<(PointerDiscovery, Vec<HeapPointers>)> {
    let word_size = cache.word_size();
    let scanner = WordScanner::new(dump, word_size);
    let found = discover_heap_pointers(cache, dump, &scanner, word_size)?;

    let mut heaps = Vec::new();
    for walker in finder.walkers(dump.mappings()) {
        let start = walker.mapping().start;
        let (addrs, sizes) = match cached_allocations(cache, &walker) {
            Ok(lists) => lists,
            Err(e) => {
                warn!("Skipping heap {:#x}: {}", start, e);
                continue;
            }
        };
        heaps.push(HeapPointers {
            start,
            allocations: addrs.len(),
            targets: count_targets(&found.aligned, &addrs, &sizes),
            holders: count_holders(&found.heap_addrs, &addrs, &sizes, word_size),
        });
    }

    Ok((found, heaps))
}

/// Drop the cached pointer lists of a dump
fn clear_cache(cache: &ResultCache) -> Result<()> {
    for kind in [
        CacheKind::PointerValues,
        CacheKind::HeapAddrs,
        CacheKind::StackValues,
        CacheKind::AlignedValues,
        CacheKind::UnalignedValues,
    ] {
        cache.remove(CacheKey::new(kind))?;
    }
    Ok(())
}

/// Handle the pointers command
pub fn handle(dump_path: &Path, maps: Option<&Path>, refresh: bool) -> Result<()> {
    let (config, dump, finder) = super::open(dump_path, maps, None)?;
    let cache = ResultCache::for_dump(config.cache_dir()?, dump_path, config.word_size()?);
    if refresh {
        clear_cache(&cache)?;
    }

    let (found, heaps) = run(&cache, &finder, &dump)?;

    println!("Unique pointer values: {}", found.values.len());
    if let Some(raw) = found.raw_count {
        println!("  scanned: {}", raw);
    }
    println!("  aligned: {}", found.aligned.len());
    println!("  unaligned: {}", found.not_aligned.len());
    println!("Stack pointers into heap: {}", found.stack_values.len());
    println!("Heap words holding pointers: {}", found.heap_addrs.len());

    for heap in &heaps {
        println!(
            "Heap {:#x}: {} allocations, {} pointed to, {} holding pointers",
            heap.start, heap.allocations, heap.targets, heap.holders
        );
    }

    Ok(())
}

//! Heap Pointer Discovery
//!
//! Finds pointer-valued words in the stack and heap of a dump, merges them
//! into one sorted set of unique values and splits that set by alignment.
//! Results are persisted in the [`ResultCache`] so repeated sessions over the
//! same dump skip the scan.

use byteorder::LE;
use std::collections::BTreeSet;
use std::ops::Range;
use tracing::info;

use crate::cache::{CacheKey, CacheKind, ResultCache};
use crate::error::{HeapError, Result};
use crate::mapping::{Mapping, MappingSource};
use crate::word::WordSize;

/// Trait for scanning a mapping for pointer-valued words
pub trait PointerEnumerator {
    /// Return `(source_address, pointed_value)` pairs in ascending source order.
    ///
    /// With a `target`, only values inside it are reported.
    fn scan(&self, mapping: &Mapping, target: Option<Range<u64>>) -> Vec<(u64, u64)>;
}

/// Word-aligned scanner accepting values that land inside a known mapping
#[derive(Debug, Clone)]
pub struct WordScanner {
    valid: Vec<Range<u64>>,
    word_size: WordSize,
}

impl WordScanner {
    pub fn new<M: MappingSource + ?Sized>(mappings: &M, word_size: WordSize) -> Self {
        let mut valid: Vec<Range<u64>> = mappings.mappings().iter().map(|m| m.start..m.end).collect();
        valid.sort_by_key(|r| r.start);
        Self { valid, word_size }
    }

    fn is_valid(&self, value: u64) -> bool {
        let index = self.valid.partition_point(|r| r.start <= value);
        index > 0 && self.valid[index - 1].contains(&value)
    }
}

impl PointerEnumerator for WordScanner {
    fn scan(&self, mapping: &Mapping, target: Option<Range<u64>>) -> Vec<(u64, u64)> {
        let width = self.word_size.bytes();
        let bytes = mapping.bytes();
        (0..bytes.len().saturating_sub(width - 1))
            .step_by(width)
            .filter_map(|offset| {
                let value = bytes.read_word::<LE>(offset, self.word_size)?;
                let hit = match &target {
                    Some(range) => range.contains(&value),
                    None => self.is_valid(value),
                };
                hit.then_some((mapping.start + offset as u64, value))
            })
            .collect()
    }
}

/// Heap pointers found in a dump
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PointerDiscovery {
    /// Unique pointer values from stack and heap, ascending
    pub values: Vec<u64>,
    /// Heap addresses holding a pointer
    pub heap_addrs: Vec<u64>,
    /// Heap pointer values found on the stack
    pub stack_values: Vec<u64>,
    /// Word-aligned subset of `values`
    pub aligned: Vec<u64>,
    /// Remaining values
    pub not_aligned: Vec<u64>,
    /// Pointers seen before deduplication; `None` when loaded from cache
    pub raw_count: Option<usize>,
}

/// Split ascending `values` into word-aligned and unaligned subsets
pub fn partition_aligned(values: &[u64], word_size: WordSize) -> (Vec<u64>, Vec<u64>) {
    values.iter().partition(|&&v| word_size.is_aligned(v))
}

/// Search heap pointer values in stack and heap, using the cache when possible.
///
/// The stack scan only keeps values inside the heap; the heap scan is
/// unrestricted. `word_size` decides which values count as aligned.
pub fn discover_heap_pointers<M, E>(
    cache: &ResultCache,
    mappings: &M,
    enumerator: &E,
    word_size: WordSize,
) -> Result<PointerDiscovery>
where
    M: MappingSource + ?Sized,
    E: PointerEnumerator + ?Sized,
{
    let values_key = CacheKey::new(CacheKind::PointerValues);
    let heap_key = CacheKey::new(CacheKind::HeapAddrs);
    let stack_key = CacheKey::new(CacheKind::StackValues);
    let aligned_key = CacheKey::new(CacheKind::AlignedValues);
    let unaligned_key = CacheKey::new(CacheKind::UnalignedValues);

    if let (Some(values), Some(heap_addrs), Some(aligned), Some(not_aligned)) = (
        cache.read(values_key)?,
        cache.read(heap_key)?,
        cache.read(aligned_key)?,
        cache.read(unaligned_key)?,
    ) {
        info!(
            values = values.len(),
            heap_addrs = heap_addrs.len(),
            "loaded pointers from cache"
        );
        let stack_values = cache.read(stack_key)?.unwrap_or_default();
        return Ok(PointerDiscovery {
            values,
            heap_addrs,
            stack_values,
            aligned,
            not_aligned,
            raw_count: None,
        });
    }

    let stack = mappings
        .stack()
        .ok_or_else(|| HeapError::config("dump has no stack mapping"))?;
    let heap = mappings
        .heap()
        .ok_or_else(|| HeapError::config("dump has no heap mapping"))?;

    let stack_enum = enumerator.scan(stack, Some(heap.start..heap.end));
    info!(pointers = stack_enum.len(), "scanned stack for heap pointers");

    let heap_enum = enumerator.scan(heap, None);
    info!(pointers = heap_enum.len(), "scanned heap for pointers");

    let stack_values: Vec<u64> = stack_enum.iter().map(|&(_, value)| value).collect();
    let heap_addrs: Vec<u64> = heap_enum.iter().map(|&(address, _)| address).collect();
    let raw_count = stack_enum.len() + heap_enum.len();

    let values: Vec<u64> = heap_enum
        .iter()
        .map(|&(_, value)| value)
        .chain(stack_values.iter().copied())
        .collect::<BTreeSet<u64>>()
        .into_iter()
        .collect();
    let (aligned, not_aligned) = partition_aligned(&values, word_size);

    cache.write(values_key, &values)?;
    cache.write(heap_key, &heap_addrs)?;
    cache.write(stack_key, &stack_values)?;
    cache.write(aligned_key, &aligned)?;
    cache.write(unaligned_key, &not_aligned)?;

    info!(
        values = values.len(),
        scanned = raw_count,
        aligned = aligned.len(),
        "cached heap pointers"
    );

    Ok(PointerDiscovery {
        values,
        heap_addrs,
        stack_values,
        aligned,
        not_aligned,
        raw_count: Some(raw_count),
    })
}

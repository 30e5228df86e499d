//! Heap listing command handler
//!
//! Handles the `heaps` subcommand: classifies every mapping of a dump and
//! prints a summary line per allocator heap.

use anyhow::Result;
use heapscope::{HeapFinder, Mapping, MappingSource};
use std::path::Path;

/// Walk statistics for one heap mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapSummary {
    pub start: u64,
    pub end: u64,
    pub path: Option<String>,
    pub allocations: usize,
    pub free_chunks: usize,
    pub allocated_bytes: u64,
    /// Set when the walk stopped on a malformed chunk
    pub fault: Option<u64>,
}

/// Summarize every heap in `mappings`, primary heap first
pub fn summarize(finder: &HeapFinder, mappings: &[Mapping]) -> Vec<HeapSummary> {
    finder
        .walkers(mappings)
        .iter()
        .map(|walker| {
            let mapping = walker.mapping();
            let lists = walker.chunk_lists();
            HeapSummary {
                start: mapping.start,
                end: mapping.end,
                path: mapping.path.clone(),
                allocations: lists.allocations.len(),
                free_chunks: lists.free_chunks.len(),
                allocated_bytes: walker.total_allocated(),
                fault: lists.fault.as_ref().map(|(address, _)| *address),
            }
        })
        .collect()
}

/// Handle the heaps command
pub fn handle(dump: &Path, maps: Option<&Path>, allocator: Option<&str>) -> Result<()> {
    let (_, dump, finder) = super::open(dump, maps, allocator)?;
    let heaps = summarize(&finder, dump.mappings());

    if heaps.is_empty() {
        println!("No {} heaps found", finder.allocator().name());
        return Ok(());
    }

    println!(
        "{:<18} {:<18} {:>10} {:>8} {:>8} {:>12}  PATH",
        "START", "END", "SIZE", "ALLOCS", "FREE", "IN USE"
    );
    for heap in &heaps {
        println!(
            "{:#018x} {:#018x} {:>10} {:>8} {:>8} {:>12}  {}",
            heap.start,
            heap.end,
            heap.end - heap.start,
            heap.allocations,
            heap.free_chunks,
            heap.allocated_bytes,
            heap.path.as_deref().unwrap_or("")
        );
        if let Some(address) = heap.fault {
            eprintln!("  warning: malformed chunk at {:#x}, counts are partial", address);
        }
    }

    Ok(())
}

//! Heap Walker
//!
//! Recovers user allocations and free chunks from one heap mapping. The walk
//! runs once, on first access, and its result is memoized for the lifetime
//! of the walker.

use std::cell::OnceCell;
use tracing::{debug, warn};

use crate::allocator::AllocatorModel;
use crate::error::{HeapError, PartialHeap, Result};
use crate::mapping::Mapping;

/// A user-visible chunk: address and size, header excluded
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Chunk {
    pub address: u64,
    pub size: u64,
}

impl Chunk {
    pub fn new(address: u64, size: u64) -> Self {
        Self { address, size }
    }

    pub fn end(&self) -> u64 {
        self.address + self.size
    }
}

/// Memoized result of one walk over a heap mapping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkLists {
    pub allocations: Vec<Chunk>,
    pub free_chunks: Vec<Chunk>,
    /// Set when the walk stopped on an inconsistent header
    pub fault: Option<(u64, String)>,
}

impl ChunkLists {
    /// True if the walk stopped early and the lists are partial
    pub fn is_partial(&self) -> bool {
        self.fault.is_some()
    }

    fn check(&self) -> Result<()> {
        match &self.fault {
            None => Ok(()),
            Some((address, reason)) => Err(HeapError::MalformedHeap(Box::new(PartialHeap {
                address: *address,
                reason: reason.clone(),
                allocations: self.allocations.clone(),
                free_chunks: self.free_chunks.clone(),
            }))),
        }
    }
}

/// Walks the chunks of one heap mapping with one allocator model
pub struct HeapWalker<'a> {
    mapping: &'a Mapping,
    model: &'a dyn AllocatorModel,
    lists: OnceCell<ChunkLists>,
}

impl<'a> HeapWalker<'a> {
    pub fn new(mapping: &'a Mapping, model: &'a dyn AllocatorModel) -> Self {
        debug!(
            "+ Heap @{:#x} size: {} # {}",
            mapping.start,
            mapping.size(),
            mapping
        );
        Self {
            mapping,
            model,
            lists: OnceCell::new(),
        }
    }

    pub fn mapping(&self) -> &'a Mapping {
        self.mapping
    }

    pub fn allocator(&self) -> &'a dyn AllocatorModel {
        self.model
    }

    /// User allocations in ascending address order, header excluded.
    ///
    /// On a malformed heap, the error carries every record recovered before
    /// the faulty chunk.
    pub fn get_user_allocations(&self) -> Result<&[Chunk]> {
        let lists = self.chunk_lists();
        lists.check()?;
        Ok(&lists.allocations)
    }

    /// Free chunks in ascending address order, header excluded.
    pub fn get_free_chunks(&self) -> Result<&[Chunk]> {
        let lists = self.chunk_lists();
        lists.check()?;
        Ok(&lists.free_chunks)
    }

    /// Memoized walk result, partial or not
    pub fn chunk_lists(&self) -> &ChunkLists {
        self.lists.get_or_init(|| self.walk())
    }

    /// Total bytes handed out to users
    pub fn total_allocated(&self) -> u64 {
        self.chunk_lists().allocations.iter().map(|c| c.size).sum()
    }

    fn walk(&self) -> ChunkLists {
        let mut lists = ChunkLists::default();
        for entry in self.model.chunks(self.mapping) {
            match entry {
                Ok(entry) if entry.is_free => {
                    lists.free_chunks.push(Chunk::new(entry.address, entry.size))
                }
                Ok(entry) => lists.allocations.push(Chunk::new(entry.address, entry.size)),
                Err(fault) => {
                    warn!(
                        "Heap {:#x}: {} at {:#x}, keeping {} allocations and {} free chunks",
                        self.mapping.start,
                        fault.reason,
                        fault.address,
                        lists.allocations.len(),
                        lists.free_chunks.len()
                    );
                    lists.fault = Some((fault.address, fault.reason));
                    break;
                }
            }
        }
        debug!(
            "Heap {:#x}: {} allocations, {} free chunks",
            self.mapping.start,
            lists.allocations.len(),
            lists.free_chunks.len()
        );
        lists
    }
}

//! Address Interval Utilities
//!
//! Helpers for slicing one globally sorted address stream into per-structure
//! windows and for mapping arbitrary addresses onto known structures.

use std::collections::HashMap;
use tracing::warn;

use crate::walker::Chunk;
use crate::word::WordSize;

/// Split sorted `addrs` at `cursor` into a band of in-window addresses.
///
/// Skips every address below `start`, then takes leading addresses inside
/// `[start, end - word_size]`, stopping at the first one outside. Returns the
/// new cursor and the band. The cursor only moves forward, so walking
/// ascending, non-overlapping windows touches each address once.
pub fn dequeue(
    addrs: &[u64],
    cursor: usize,
    start: u64,
    end: u64,
    word_size: WordSize,
) -> (usize, &[u64]) {
    let mut i = cursor.min(addrs.len());
    while i < addrs.len() && addrs[i] < start {
        i += 1;
    }
    let band_start = i;
    if let Some(last) = end.checked_sub(word_size.bytes() as u64) {
        while i < addrs.len() && addrs[i] <= last {
            i += 1;
        }
    }
    (i, &addrs[band_start..i])
}

/// Cursor over a sorted address stream, for repeated [`dequeue`] calls
#[derive(Debug, Clone)]
pub struct Dequeue<'a> {
    addrs: &'a [u64],
    cursor: usize,
    word_size: WordSize,
}

impl<'a> Dequeue<'a> {
    pub fn new(addrs: &'a [u64], word_size: WordSize) -> Self {
        Self {
            addrs,
            cursor: 0,
            word_size,
        }
    }

    /// Addresses inside the word-sized slots of `[start, end)`
    pub fn take(&mut self, start: u64, end: u64) -> &'a [u64] {
        let (cursor, band) = dequeue(self.addrs, self.cursor, start, end, self.word_size);
        self.cursor = cursor;
        band
    }

    /// Addresses not yet consumed
    pub fn remaining(&self) -> &'a [u64] {
        &self.addrs[self.cursor..]
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

/// Largest element of `sorted` not exceeding `val`, with its index.
///
/// When `val` is below every element this still returns index 0, so the
/// result is not a strict floor in that case. `None` only for empty input.
pub fn closest_floor_value(val: u64, sorted: &[u64]) -> Option<(u64, usize)> {
    if sorted.is_empty() {
        return None;
    }
    let index = sorted.partition_point(|&x| x <= val).saturating_sub(1);
    Some((sorted[index], index))
}

/// A decoded structure with a start address and a byte length
pub trait Structure {
    fn address(&self) -> u64;
    fn size(&self) -> u64;
}

impl Structure for Chunk {
    fn address(&self) -> u64 {
        self.address
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// How a structure's end lines up with its successor's start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjacency {
    Contiguous,
    /// Bytes between the end of one structure and the start of the next
    Gap(u64),
    /// Bytes shared by the two structures
    Overlap(u64),
}

/// Successor of a structure in address order
#[derive(Debug)]
pub struct Next<'a, S> {
    pub structure: &'a S,
    pub adjacency: Adjacency,
}

/// Structure immediately after `current` in `addresses`.
///
/// `addresses` must be ascending. Returns `None` for the last known
/// structure, or when `current` or its successor is not decoded.
pub fn next_structure<'a, S: Structure>(
    addresses: &[u64],
    structures: &'a HashMap<u64, S>,
    current: &S,
) -> Option<Next<'a, S>> {
    let index = addresses.binary_search(&current.address()).ok()?;
    let next_address = *addresses.get(index + 1)?;
    let structure = structures.get(&next_address)?;

    let end = current.address() + current.size();
    let adjacency = if end == next_address {
        Adjacency::Contiguous
    } else if end < next_address {
        Adjacency::Gap(next_address - end)
    } else {
        Adjacency::Overlap(end - next_address)
    };
    if adjacency != Adjacency::Contiguous {
        warn!(
            "structure at {:#x} is not contiguous with next at {:#x}: {:?}",
            current.address(),
            next_address,
            adjacency
        );
    }
    Some(Next {
        structure,
        adjacency,
    })
}

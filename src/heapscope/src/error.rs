//! Error types for heap recovery.

use std::path::PathBuf;
use thiserror::Error;

use crate::walker::Chunk;

/// Records recovered before a heap walk hit an inconsistent chunk header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialHeap {
    /// Address of the offending chunk header
    pub address: u64,
    /// What was wrong with it
    pub reason: String,
    /// Allocations gathered before the failure, ascending
    pub allocations: Vec<Chunk>,
    /// Free chunks gathered before the failure, ascending
    pub free_chunks: Vec<Chunk>,
}

#[derive(Error, Debug)]
pub enum HeapError {
    /// Allocator bookkeeping is inconsistent; partial records are preserved.
    #[error("Malformed heap chunk at {:#x}: {}", .0.address, .0.reason)]
    MalformedHeap(Box<PartialHeap>),

    /// Unknown allocator model, missing constraint descriptor, missing regions.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Corrupt cache file {path:?}: {len} bytes is not a multiple of word size {word_size}")]
    CorruptCache {
        path: PathBuf,
        len: u64,
        word_size: usize,
    },

    #[error("Value {value:#x} does not fit in a {word_size}-byte word")]
    ValueOutOfRange { value: u64, word_size: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HeapError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        HeapError::Configuration(message.into())
    }

    /// Partial records carried by a malformed heap error.
    pub fn partial(&self) -> Option<&PartialHeap> {
        match self {
            HeapError::MalformedHeap(partial) => Some(partial),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, HeapError>;

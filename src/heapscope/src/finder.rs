//! Heap Finder
//!
//! Classifies the mappings of a dump as allocator heaps and orders them for
//! walking.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::allocator::{allocator_by_name, AllocatorModel};
use crate::error::{HeapError, Result};
use crate::mapping::{Mapping, PRIMARY_HEAP_NAME};
use crate::walker::HeapWalker;
use crate::word::WordSize;

/// Default number of chunk hops checked before accepting a heap
pub const DEFAULT_VALIDATION_DEPTH: usize = 20;

/// Pseudo-mappings that are never heaps and cannot be read reliably
pub const IGNORED_MAPPINGS: &[&str] = &["[vdso]", "[vsyscall]", "[vvar]"];

/// Heap recovery settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapConfig {
    /// Allocator model registry name
    pub allocator: String,
    pub word_size: WordSize,
    pub validation_depth: usize,
    /// Chunk constraint file for downstream structure validation
    pub constraints: Option<PathBuf>,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            allocator: "libc".to_string(),
            word_size: WordSize::Eight,
            validation_depth: DEFAULT_VALIDATION_DEPTH,
            constraints: None,
        }
    }
}

/// Constraint descriptor handed to downstream validators; never read here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraints {
    /// Name of the constrained header structure
    pub struct_name: &'static str,
    pub path: Option<PathBuf>,
}

/// Finds allocator heaps in a mapping collection
#[derive(Debug)]
pub struct HeapFinder {
    model: Box<dyn AllocatorModel>,
    validation_depth: usize,
    constraints: Constraints,
}

impl HeapFinder {
    pub fn new(model: Box<dyn AllocatorModel>) -> Self {
        let constraints = Constraints {
            struct_name: model.header_layout().name,
            path: None,
        };
        Self {
            model,
            validation_depth: DEFAULT_VALIDATION_DEPTH,
            constraints,
        }
    }

    /// Build a finder from configuration.
    ///
    /// Fails if the allocator is unknown or the constraint file is missing.
    pub fn from_config(config: &HeapConfig) -> Result<Self> {
        let model = allocator_by_name(&config.allocator, config.word_size)?;
        let mut finder = Self::new(model).with_validation_depth(config.validation_depth);
        if let Some(path) = &config.constraints {
            finder = finder.with_constraints(path)?;
        }
        Ok(finder)
    }

    pub fn with_validation_depth(mut self, depth: usize) -> Self {
        self.validation_depth = depth;
        self
    }

    /// Attach a constraint file for downstream validators
    pub fn with_constraints(mut self, path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(HeapError::config(format!(
                "constraint file not found: {}",
                path.display()
            )));
        }
        debug!("constraint file: {}", path.display());
        self.constraints.path = Some(path.to_path_buf());
        Ok(self)
    }

    pub fn allocator(&self) -> &dyn AllocatorModel {
        self.model.as_ref()
    }

    pub fn validation_depth(&self) -> usize {
        self.validation_depth
    }

    pub fn constraints(&self) -> &Constraints {
        &self.constraints
    }

    /// Check whether a mapping is an allocator heap
    pub fn classify(&self, mapping: &Mapping) -> bool {
        if !mapping.is_readable() || !mapping.is_writable() {
            return false;
        }
        if let Some(path) = mapping.path.as_deref() {
            if IGNORED_MAPPINGS.contains(&path) {
                debug!("Ignore system mapping {}", mapping);
                return false;
            }
        }
        self.model.detect(mapping, self.validation_depth)
    }

    /// Heap mappings, primary heap first, the rest by ascending start address
    pub fn get_heap_mappings<'m, I>(&self, mappings: I) -> Vec<&'m Mapping>
    where
        I: IntoIterator<Item = &'m Mapping>,
    {
        let mut heaps: Vec<&Mapping> = mappings.into_iter().filter(|m| self.classify(m)).collect();
        heaps.sort_by_key(|m| m.start);
        if let Some(index) = heaps.iter().position(|m| m.is_named(PRIMARY_HEAP_NAME)) {
            let primary = heaps.remove(index);
            heaps.insert(0, primary);
        }
        info!("Found {} heap mappings", heaps.len());
        heaps
    }

    /// Walker bound to `mapping` and this finder's allocator model
    pub fn build_walker<'a>(&'a self, mapping: &'a Mapping) -> HeapWalker<'a> {
        HeapWalker::new(mapping, self.model.as_ref())
    }

    /// Walkers for every heap mapping, in heap order
    pub fn walkers<'a, I>(&'a self, mappings: I) -> Vec<HeapWalker<'a>>
    where
        I: IntoIterator<Item = &'a Mapping>,
    {
        self.get_heap_mappings(mappings)
            .into_iter()
            .map(|m| self.build_walker(m))
            .collect()
    }
}

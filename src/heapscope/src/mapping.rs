//! Memory Mappings
//!
//! Address-space regions of a captured process, as read from /proc/pid/maps,
//! each paired with a view of its bytes in the dump.

use crate::bytes::SharedBytes;

/// Backing name of the main brk heap on Linux
pub const PRIMARY_HEAP_NAME: &str = "[heap]";

/// Backing name of the main thread stack on Linux
pub const STACK_NAME: &str = "[stack]";

/// One mapped region of the dumped address space
#[derive(Debug, Clone)]
pub struct Mapping {
    pub start: u64,
    pub end: u64,
    pub perms: String,
    pub path: Option<String>,
    bytes: SharedBytes,
}

impl Mapping {
    pub fn new(start: u64, end: u64, perms: &str, path: Option<&str>, bytes: SharedBytes) -> Self {
        Self {
            start,
            end,
            perms: perms.to_string(),
            path: path.map(str::to_string),
            bytes,
        }
    }

    pub fn size(&self) -> u64 {
        self.end - self.start
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.start && address < self.end
    }

    /// Offset of `address` from the mapping start, if it lies inside
    pub fn offset_of(&self, address: u64) -> Option<usize> {
        self.contains(address).then(|| (address - self.start) as usize)
    }

    /// Raw bytes captured for this mapping
    pub fn bytes(&self) -> &SharedBytes {
        &self.bytes
    }

    pub fn is_readable(&self) -> bool {
        self.perms.starts_with('r')
    }

    pub fn is_writable(&self) -> bool {
        self.perms.chars().nth(1) == Some('w')
    }

    pub fn is_executable(&self) -> bool {
        self.perms.chars().nth(2) == Some('x')
    }

    pub fn is_named(&self, name: &str) -> bool {
        self.path.as_deref() == Some(name)
    }
}

impl std::fmt::Display for Mapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:#x}-{:#x} {} {}",
            self.start,
            self.end,
            self.perms,
            self.path.as_deref().unwrap_or("")
        )
    }
}

/// Trait for a collection of mappings from one dump
pub trait MappingSource {
    /// All mappings, in dump order
    fn mappings(&self) -> &[Mapping];

    /// The main thread stack
    fn stack(&self) -> Option<&Mapping> {
        self.mappings().iter().find(|m| m.is_named(STACK_NAME))
    }

    /// The primary allocator heap
    fn heap(&self) -> Option<&Mapping> {
        self.mappings().iter().find(|m| m.is_named(PRIMARY_HEAP_NAME))
    }

    /// Find the mapping containing the given address
    fn find_mapping(&self, address: u64) -> Option<&Mapping> {
        self.mappings().iter().find(|m| m.contains(address))
    }

    /// True if the address falls inside any mapping
    fn is_mapped(&self, address: u64) -> bool {
        self.find_mapping(address).is_some()
    }
}

/// In-memory mapping collection
#[derive(Debug, Clone, Default)]
pub struct MappingSet {
    mappings: Vec<Mapping>,
}

impl MappingSet {
    pub fn new(mappings: Vec<Mapping>) -> Self {
        Self { mappings }
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Mapping> {
        self.mappings.iter()
    }
}

impl MappingSource for MappingSet {
    fn mappings(&self) -> &[Mapping] {
        &self.mappings
    }
}

impl<'a> IntoIterator for &'a MappingSet {
    type Item = &'a Mapping;
    type IntoIter = std::slice::Iter<'a, Mapping>;

    fn into_iter(self) -> Self::IntoIter {
        self.mappings.iter()
    }
}

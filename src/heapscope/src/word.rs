//! Target word size.

use crate::error::{HeapError, Result};

/// Native pointer width of the dumped process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WordSize {
    Four,
    #[default]
    Eight,
}

impl WordSize {
    pub fn bytes(self) -> usize {
        match self {
            WordSize::Four => 4,
            WordSize::Eight => 8,
        }
    }

    pub fn max_value(self) -> u64 {
        match self {
            WordSize::Four => u64::from(u32::MAX),
            WordSize::Eight => u64::MAX,
        }
    }

    /// True if `value` can be stored in one word.
    pub fn fits(self, value: u64) -> bool {
        value <= self.max_value()
    }

    /// True if `value` sits on a word boundary.
    pub fn is_aligned(self, value: u64) -> bool {
        value % self.bytes() as u64 == 0
    }
}

impl TryFrom<usize> for WordSize {
    type Error = HeapError;

    fn try_from(bytes: usize) -> Result<Self> {
        match bytes {
            4 => Ok(WordSize::Four),
            8 => Ok(WordSize::Eight),
            other => Err(HeapError::config(format!(
                "unsupported word size {} (expected 4 or 8)",
                other
            ))),
        }
    }
}

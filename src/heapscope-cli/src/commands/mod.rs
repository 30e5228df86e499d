//! Command handlers for heapscope CLI
//!
//! Each subcommand has its own module with handler functions.

pub mod configure;
pub mod heaps;
pub mod pointers;
pub mod walk;

use anyhow::{Context, Result};
use heapscope::HeapFinder;
use std::path::Path;

use crate::config::Config;
use crate::dump::DumpFile;

/// Parse a hex or decimal address string
pub fn parse_address(address: &str) -> Result<u64> {
    if address.starts_with("0x") || address.starts_with("0X") {
        u64::from_str_radix(&address[2..], 16).context("Invalid hex address")
    } else {
        address.parse::<u64>().context("Invalid address")
    }
}

/// Open a dump and build a heap finder from the user's configuration
pub(crate) fn open(
    dump: &Path,
    maps: Option<&Path>,
    allocator: Option<&str>,
) -> Result<(Config, DumpFile, HeapFinder)> {
    let config = Config::load()?;
    let finder = HeapFinder::from_config(&config.heap_config(allocator)?)
        .context("Failed to set up heap finder")?;
    let dump = DumpFile::open(dump, maps)?;
    Ok((config, dump, finder))
}

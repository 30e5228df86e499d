//! Core CLI definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "heapscope")]
#[command(about = "Heap recovery for process memory dumps", long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the mappings that hold an allocator heap
    #[command(visible_alias = "h")]
    Heaps {
        /// Path to raw memory dump
        dump: PathBuf,

        /// Maps file describing the dump (defaults to <dump>.maps)
        #[arg(short, long)]
        maps: Option<PathBuf>,

        /// Allocator model (uses configured default if not provided)
        #[arg(short, long, env = "HEAPSCOPE_ALLOCATOR")]
        allocator: Option<String>,
    },

    /// Walk a heap and list its user allocations
    #[command(visible_alias = "w")]
    Walk {
        /// Path to raw memory dump
        dump: PathBuf,

        /// Maps file describing the dump (defaults to <dump>.maps)
        #[arg(short, long)]
        maps: Option<PathBuf>,

        /// Heap start address (hex); walks every heap if not provided
        #[arg(short, long)]
        start: Option<String>,

        /// List free chunks instead of allocations
        #[arg(short, long)]
        free: bool,

        /// Maximum chunks to print per heap
        #[arg(short, long)]
        limit: Option<usize>,

        /// Allocator model (uses configured default if not provided)
        #[arg(short, long, env = "HEAPSCOPE_ALLOCATOR")]
        allocator: Option<String>,
    },

    /// Find heap pointers in the stack and heap
    #[command(visible_alias = "p")]
    Pointers {
        /// Path to raw memory dump
        dump: PathBuf,

        /// Maps file describing the dump (defaults to <dump>.maps)
        #[arg(short, long)]
        maps: Option<PathBuf>,

        /// Drop cached results for this dump before scanning
        #[arg(long)]
        refresh: bool,
    },

    /// Configure default settings
    #[command(visible_alias = "c")]
    Configure {
        /// Directory for cached pointer and chunk lists
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Default allocator model
        #[arg(long)]
        allocator: Option<String>,

        /// Chunks validated before a mapping counts as a heap
        #[arg(long)]
        validation_depth: Option<usize>,

        /// Target word size in bytes (4 or 8)
        #[arg(long)]
        word_size: Option<usize>,

        /// Chunk constraint file
        #[arg(long)]
        constraints: Option<PathBuf>,

        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

//! Configuration command handlers
//!
//! Handles the `configure` subcommand for setting up heapscope defaults.

use crate::config::Config;
use anyhow::{bail, Result};
use heapscope::{allocator_by_name, WordSize};
use std::path::PathBuf;

/// Values to store with `configure`
#[derive(Debug, Default)]
pub struct Settings {
    pub cache_dir: Option<PathBuf>,
    pub allocator: Option<String>,
    pub validation_depth: Option<usize>,
    pub word_size: Option<usize>,
    pub constraints: Option<PathBuf>,
}

impl Settings {
    fn is_empty(&self) -> bool {
        self.cache_dir.is_none()
            && self.allocator.is_none()
            && self.validation_depth.is_none()
            && self.word_size.is_none()
            && self.constraints.is_none()
    }
}

/// Handle the configure command
pub fn handle(settings: Settings, show: bool) -> Result<()> {
    let mut config = Config::load()?;

    if show {
        show_config(&config)?;
        return Ok(());
    }

    if settings.is_empty() {
        show_usage();
        return Ok(());
    }

    apply(&mut config, settings)?;
    config.save()?;

    println!("Configuration updated");
    if let Ok(path) = Config::config_path() {
        println!("Config saved to: {}", path.display());
    }

    Ok(())
}

/// Validate and merge new settings into `config`
fn apply(config: &mut Config, settings: Settings) -> Result<()> {
    if let Some(name) = settings.allocator {
        allocator_by_name(&name, WordSize::default())?;
        config.allocator = Some(name);
    }

    if let Some(bytes) = settings.word_size {
        WordSize::try_from(bytes)?;
        config.word_size = Some(bytes);
    }

    if let Some(depth) = settings.validation_depth {
        if depth == 0 {
            bail!("Validation depth must be at least 1");
        }
        config.validation_depth = Some(depth);
    }

    if let Some(path) = settings.constraints {
        if !path.is_file() {
            bail!("Constraints file not found: {}", path.display());
        }
        config.constraints = Some(path);
    }

    if let Some(dir) = settings.cache_dir {
        config.cache_dir = Some(dir);
    }

    Ok(())
}

/// Display current configuration
fn show_config(config: &Config) -> Result<()> {
    let heap = config.heap_config(None)?;
    println!("Allocator: {}", heap.allocator);
    println!("Word size: {} bytes", heap.word_size.bytes());
    println!("Validation depth: {}", heap.validation_depth);
    match &heap.constraints {
        Some(path) => println!("Constraints: {}", path.display()),
        None => println!("No constraints file configured"),
    }
    println!("Cache directory: {}", config.cache_dir()?.display());

    if let Ok(path) = Config::config_path() {
        println!("Config file: {}", path.display());
    }

    Ok(())
}

/// Show usage help for the configure command
fn show_usage() {
    println!("Usage: heapscope configure [--allocator NAME] [--word-size 4|8]");
    println!("                           [--validation-depth N] [--cache-dir DIR]");
    println!("                           [--constraints FILE]");
    println!("   or: heapscope configure --show");
}

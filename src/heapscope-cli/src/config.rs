//! Configuration management for heapscope CLI

use anyhow::{Context, Result};
use heapscope::{HeapConfig, WordSize, DEFAULT_VALIDATION_DEPTH};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Where derived pointer and chunk lists are cached
    pub cache_dir: Option<PathBuf>,
    /// Allocator model name (libc)
    pub allocator: Option<String>,
    /// Chunk hops validated before a mapping is accepted as a heap
    pub validation_depth: Option<usize>,
    /// Target word size in bytes (4 or 8)
    pub word_size: Option<usize>,
    /// Chunk constraint file for structure validation
    pub constraints: Option<PathBuf>,
}

impl Config {
    /// Get the path to the config file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("heapscope");

        Ok(config_dir.join("config.toml"))
    }

    /// Load configuration from file, or create default if it doesn't exist
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config from {}", config_path.display()))?;

        toml::from_str(&contents).context("Failed to parse config file")
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory at {}", parent.display())
            })?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(config_path, contents)
            .with_context(|| format!("Failed to write config to {}", config_path.display()))?;

        Ok(())
    }

    /// Cache directory from config, or the platform cache dir
    pub fn cache_dir(&self) -> Result<PathBuf> {
        match &self.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(dirs::cache_dir()
                .context("Could not determine cache directory")?
                .join("heapscope")),
        }
    }

    pub fn word_size(&self) -> Result<WordSize> {
        let bytes = self.word_size.unwrap_or(WordSize::default().bytes());
        WordSize::try_from(bytes).context("Invalid word_size in config")
    }

    /// Heap recovery settings, with `allocator` overriding the configured model
    pub fn heap_config(&self, allocator: Option<&str>) -> Result<HeapConfig> {
        Ok(HeapConfig {
            allocator: allocator
                .map(str::to_string)
                .or_else(|| self.allocator.clone())
                .unwrap_or_else(|| "libc".to_string()),
            word_size: self.word_size()?,
            validation_depth: self.validation_depth.unwrap_or(DEFAULT_VALIDATION_DEPTH),
            constraints: self.constraints.clone(),
        })
    }
}

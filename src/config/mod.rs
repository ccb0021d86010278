//! Configuration management for the surface core
//!
//! This module handles loading, parsing, and validating configuration
//! from TOML files. Each section configures one collaborator and is handed
//! to it explicitly at construction; nothing reads configuration globally.
//!
//! ```toml
//! [stream]
//! buffer_count = 3
//! allow_framedropping = false
//!
//! [import]
//! hardware = true
//! gpu = "headless"
//! max_cached_images = 64
//!
//! [compositor]
//! frame_interval_ms = 16
//! outputs = 1
//!
//! [general]
//! debug = false
//! ```

use crate::import::ImportConfig;
use crate::stream::StreamConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SurfaceCoreConfig {
    /// Per-surface buffer streams
    #[serde(default)]
    pub stream: StreamConfig,

    /// Buffer import pipeline
    #[serde(default)]
    pub import: ImportConfig,

    /// Render loop
    #[serde(default)]
    pub compositor: CompositorConfig,

    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompositorConfig {
    /// Time between composed frames in milliseconds
    pub frame_interval_ms: u64,

    /// Number of outputs (display sync groups)
    pub outputs: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GeneralConfig {
    /// Enable debug logging
    pub debug: bool,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 16,
            outputs: 1,
        }
    }
}

impl CompositorConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

/// Supported values of `import.gpu`
const GPU_DEVICES: [&str; 2] = ["headless", "none"];

impl SurfaceCoreConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let expanded_path = expand_home(path.as_ref())?;

        let contents = fs::read_to_string(&expanded_path)
            .with_context(|| format!("Failed to read config file: {}", expanded_path.display()))?;

        let config: SurfaceCoreConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", expanded_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.stream.buffer_count == 0 {
            anyhow::bail!("Invalid stream.buffer_count: a stream needs at least one buffer");
        }

        if !GPU_DEVICES.contains(&self.import.gpu.as_str()) {
            anyhow::bail!(
                "Invalid import.gpu: {} (expected one of {:?})",
                self.import.gpu,
                GPU_DEVICES
            );
        }

        if self.import.max_cached_images == 0 {
            anyhow::bail!("Invalid import.max_cached_images: must be at least 1");
        }

        if self.compositor.frame_interval_ms == 0 || self.compositor.frame_interval_ms > 1000 {
            anyhow::bail!("Invalid compositor.frame_interval_ms: must be between 1 and 1000");
        }

        if self.compositor.outputs == 0 {
            anyhow::bail!("Invalid compositor.outputs: need at least one output");
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path, contents).context("Failed to write configuration file")?;

        Ok(())
    }
}

/// Expand `~` to the home directory
fn expand_home(path: &Path) -> Result<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => {
            let home = std::env::var("HOME").context("Failed to get HOME environment variable")?;
            Ok(Path::new(&home).join(rest))
        }
        Err(_) => Ok(path.to_path_buf()),
    }
}

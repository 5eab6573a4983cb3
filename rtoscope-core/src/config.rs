//! Runtime configuration.
//!
//! Loaded from a JSON file; every key is optional.
//!
//! ```json
//! {
//!   "kernels": ["specs/my-freertos.json"],
//!   "walk_limit": 4096,
//!   "string_limit": 32,
//!   "poll_interval_ms": 250
//! }
//! ```

use crate::kernel::KernelSpec;
use crate::target::DEFAULT_STRING_LIMIT;
use crate::traverse::DEFAULT_WALK_LIMIT;
use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Bounds applied to every table refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Most elements a single list walk may visit.
    pub walk_limit: usize,
    /// Longest string read through a pointer.
    pub string_limit: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self { walk_limit: DEFAULT_WALK_LIMIT, string_limit: DEFAULT_STRING_LIMIT }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Extra kernel spec files. A spec named like a built-in replaces it.
    pub kernels: Vec<PathBuf>,
    #[serde(flatten)]
    pub limits: Limits,
    pub poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self { kernels: Vec::new(), limits: Limits::default(), poll_interval_ms: 500 }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path.display()))?;
        let mut config: Self =
            serde_json::from_str(&text).with_context(|| format!("Failed to parse config {}", path.display()))?;
        // Spec paths are relative to the config file.
        if let Some(dir) = path.parent() {
            for kernel in &mut config.kernels {
                if kernel.is_relative() {
                    *kernel = dir.join(&*kernel);
                }
            }
        }
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Built-in kernels overlaid with the configured spec files.
    pub fn kernel_specs(&self) -> Result<Vec<KernelSpec>> {
        let mut specs = crate::kernel::builtin();
        for path in &self.kernels {
            let spec = KernelSpec::load(path)?;
            match specs.iter_mut().find(|s| s.name == spec.name) {
                Some(existing) => {
                    log::info!("{} replaces built-in {}", path.display(), spec.name);
                    *existing = spec;
                }
                None => specs.push(spec),
            }
        }
        Ok(specs)
    }
}

// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! CLI configuration loaded from TOML files or defaults.
//!
//! # TOML Format
//! ```toml
//! engines = 2
//! max_memory_mb = 1200
//! ```

use std::path::Path;

/// Defaults for flags the user did not pass on the command line.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CliConfig {
    /// Number of compute engines.
    #[serde(default = "default_engines")]
    pub engines: usize,
    /// Memory ceiling in MB.
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: usize,
}

fn default_engines() -> usize {
    1
}

fn default_max_memory_mb() -> usize {
    2400
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            engines: default_engines(),
            max_memory_mb: default_max_memory_mb(),
        }
    }
}

impl CliConfig {
    /// Loads configuration from `path`, or returns the defaults when no
    /// path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    anyhow::anyhow!("cannot read config '{}': {e}", path.display())
                })?;
                let config: Self = toml::from_str(&content)
                    .map_err(|e| anyhow::anyhow!("TOML parse error: {e}"))?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = CliConfig::default();
        assert_eq!(c.engines, 1);
        assert_eq!(c.max_memory_mb, 2400);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "engines = 4\nmax_memory_mb = 512\n").unwrap();

        let c = CliConfig::load(Some(&path)).unwrap();
        assert_eq!(c.engines, 4);
        assert_eq!(c.max_memory_mb, 512);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "engines = 2\n").unwrap();

        let c = CliConfig::load(Some(&path)).unwrap();
        assert_eq!(c.engines, 2);
        assert_eq!(c.max_memory_mb, 2400);
    }
}

//! Config - Runtime Configuration Options
//!
//! Recognized options of the middle-end. Unset fields fall back to the
//! documented defaults, so partial configuration files deserialize cleanly.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration of fusion, prediction and worker resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Enables the fusion phases; when `false` every node becomes its own
    /// cluster.
    #[serde(default = "default_true")]
    pub code_fusion: bool,

    /// Enables value fixing and block forwarding.
    #[serde(default = "default_true")]
    pub prediction: bool,

    /// Number of parallel workers driving jobs.
    #[serde(default = "default_workers")]
    pub num_workers: usize,

    /// Per-worker reduction-page size in blocks.
    #[serde(default = "default_io_block")]
    pub max_io_block: usize,
}

fn default_true() -> bool {
    true
}

fn default_workers() -> usize {
    4
}

fn default_io_block() -> usize {
    64
}

impl Default for Config {
    fn default() -> Self {
        Self {
            code_fusion: true,
            prediction: true,
            num_workers: default_workers(),
            max_io_block: default_io_block(),
        }
    }
}

impl Config {
    /// Rejects configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.num_workers == 0 {
            return Err(Error::InvalidConfig {
                message: "num_workers must be at least 1".to_owned(),
            });
        }
        if self.max_io_block == 0 {
            return Err(Error::InvalidConfig {
                message: "max_io_block must be at least 1".to_owned(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        assert!(config.code_fusion && config.prediction);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = Config {
            num_workers: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}

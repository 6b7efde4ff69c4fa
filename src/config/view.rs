use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Bounds of contents views
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ViewConfig {
    /// Capacity used when the caller does not ask for one
    ///
    /// Default: 1000
    #[serde(default = "default_capacity")]
    pub default_capacity: usize,

    /// Upper bound on any requested capacity
    ///
    /// Default: 100000
    #[serde(default = "default_max_capacity")]
    pub max_capacity: usize,
}

fn default_capacity() -> usize {
    1000
}

fn default_max_capacity() -> usize {
    100_000
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            default_capacity: default_capacity(),
            max_capacity: default_max_capacity(),
        }
    }
}

impl ViewConfig {
    /// Effective capacity for a requested one
    pub fn capacity_for(
        &self,
        requested: Option<usize>,
    ) -> usize {
        requested.unwrap_or(self.default_capacity).clamp(1, self.max_capacity)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_capacity == 0 {
            return Err(Error::Config(ConfigError::Message(
                "view.default_capacity must be greater than 0".into(),
            )));
        }

        if self.max_capacity < self.default_capacity {
            return Err(Error::Config(ConfigError::Message(format!(
                "view.max_capacity ({}) must be >= default_capacity ({})",
                self.max_capacity, self.default_capacity
            ))));
        }

        Ok(())
    }
}

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Event dispatch worker pool
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DispatcherConfig {
    /// Worker threads fanning events out to generators
    ///
    /// Default: 4
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Capacity of the bounded job channel. Posters block once it is full.
    ///
    /// Default: 1024
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How long `Space::stop` lets in-flight dispatches drain (milliseconds)
    ///
    /// Default: 500
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_worker_threads() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_shutdown_grace_ms() -> u64 {
    500
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            queue_capacity: default_queue_capacity(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(Error::Config(ConfigError::Message(
                "dispatcher.worker_threads must be greater than 0".into(),
            )));
        }

        if self.queue_capacity == 0 {
            return Err(Error::Config(ConfigError::Message(
                "dispatcher.queue_capacity must be greater than 0".into(),
            )));
        }

        Ok(())
    }
}

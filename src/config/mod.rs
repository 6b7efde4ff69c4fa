//! Configuration management for the tuple space engine.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Environment variable overrides
//! - Configuration file support
//! - Component-wise validation

mod dispatcher;
mod registration;
mod search;
mod view;
pub use dispatcher::*;
pub use registration::*;
pub use search::*;
pub use view::*;


use std::env;
use std::fmt::Debug;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

/// Main configuration container for the space
///
/// Combines all subsystem configurations with hierarchical override support:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables (highest priority)
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct SpaceConfig {
    /// Event dispatch worker pool
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    /// Search fairness policy
    #[serde(default)]
    pub search: SearchConfig,
    /// Registration persistence
    #[serde(default)]
    pub registration: RegistrationConfig,
    /// Contents view bounds
    #[serde(default)]
    pub view: ViewConfig,
}

impl Debug for SpaceConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SpaceConfig")
            .field("dispatcher", &self.dispatcher)
            .field("registration", &self.registration)
            .finish_non_exhaustive()
    }
}

impl SpaceConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Sources merged in order (later overrides earlier):
    /// 1. Type defaults
    /// 2. Configuration file from `CONFIG_PATH` (if set)
    /// 3. Environment variables with `TSPACE__` prefix
    ///
    /// Callers must call [`validate`](Self::validate) once all overrides are
    /// applied.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("TSPACE__DISPATCHER__WORKER_THREADS", "8");
    /// let cfg = SpaceConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);
        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }
        builder = builder.add_source(environment());
        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies additional overrides from file without validation.
    ///
    /// Merging order: current values, then `path`, then the environment.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(environment())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates every subsystem and returns the validated instance
    pub fn validate(self) -> Result<Self> {
        self.dispatcher.validate()?;
        self.search.validate()?;
        self.registration.validate()?;
        self.view.validate()?;
        Ok(self)
    }
}

fn environment() -> Environment {
    Environment::with_prefix("TSPACE")
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("search.fifo_types")
}

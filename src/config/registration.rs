use std::path::PathBuf;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Where persistent registrations live
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegistrationStoreKind {
    /// Lost on restart
    #[default]
    Memory,
    /// sled database rooted at `path`
    Sled { path: PathBuf },
}

/// Registration persistence
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RegistrationConfig {
    /// Sequence numbers handed out between two checkpoints
    ///
    /// Default: 32
    #[serde(default = "default_save_interval")]
    pub save_interval: u64,

    /// Padding added to the checkpointed sequence number on restart. Must
    /// cover at least one save interval.
    ///
    /// Default: 1024
    #[serde(default = "default_restart_jump")]
    pub restart_jump: u64,

    /// Identifies this space in remote events
    ///
    /// Default: 1
    #[serde(default = "default_source_id")]
    pub source_id: u64,

    #[serde(default)]
    pub store: RegistrationStoreKind,
}

fn default_save_interval() -> u64 {
    32
}

fn default_restart_jump() -> u64 {
    1024
}

fn default_source_id() -> u64 {
    1
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            save_interval: default_save_interval(),
            restart_jump: default_restart_jump(),
            source_id: default_source_id(),
            store: RegistrationStoreKind::default(),
        }
    }
}

impl RegistrationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.save_interval == 0 {
            return Err(Error::Config(ConfigError::Message(
                "registration.save_interval must be greater than 0".into(),
            )));
        }

        if self.restart_jump < self.save_interval {
            return Err(Error::Config(ConfigError::Message(format!(
                "registration.restart_jump ({}) must be >= save_interval ({})",
                self.restart_jump, self.save_interval
            ))));
        }

        if let RegistrationStoreKind::Sled { path } = &self.store {
            validate_directory(path)?;
        }

        Ok(())
    }
}

fn validate_directory(path: &PathBuf) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(Error::Config(ConfigError::Message(
            "registration.store.path must not be empty".into(),
        )));
    }

    if path.exists() && !path.is_dir() {
        return Err(Error::Config(ConfigError::Message(format!(
            "registration.store.path {} is not a directory",
            path.display()
        ))));
    }

    Ok(())
}

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unable to read \"{}\"", path.display())]
    Io {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("Unable to deserialize the HLE configuration")]
    TomlDeserialize(#[from] toml::de::Error),
    #[error("Unable to serialize the HLE configuration")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Session-wide HLE settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HleConfig {
    /// Firmware version as `major * 100 + minor`. Native functions that
    /// appeared in later firmware are not registered.
    pub firmware_version: u32,
    /// Log every dispatched call together with its marshalled arguments.
    pub trace_syscalls: bool,
    pub audio: AudioConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub default_sample_count: u32,
}

impl Default for HleConfig {
    fn default() -> Self {
        Self {
            firmware_version: 150,
            trace_syscalls: false,
            audio: AudioConfig::default(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            default_sample_count: 44100,
        }
    }
}

impl HleConfig {
    pub fn from_toml(data: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(data)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
            path: path.to_path_buf(),
            error,
        })?;
        Self::from_toml(&data)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }
}

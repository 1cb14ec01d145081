//! Presentation configuration.
//!
//! [`PresentConfig`] is read from TOML, falls back to defaults when the file
//! does not exist, and can be overridden from the environment:
//!
//! - `NOVADE_KMSDRM_DOUBLE_BUFFER`: wait for each flip right after queueing it.
//! - `NOVADE_KMSDRM_DEVICE`: device node to open instead of `device_path`.
//!
//! ```toml
//! device_path = "/dev/dri/card1"
//! double_buffer = true
//! swap_interval = 0
//! ```

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{KmsError, Result};

pub const DOUBLE_BUFFER_ENV: &str = "NOVADE_KMSDRM_DOUBLE_BUFFER";
pub const DEVICE_ENV: &str = "NOVADE_KMSDRM_DEVICE";

pub(crate) fn default_device_path() -> PathBuf {
    PathBuf::from("/dev/dri/card0")
}

fn default_swap_interval() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PresentConfig {
    /// The DRM card node presentation goes through.
    pub device_path: PathBuf,
    /// Strict double buffering: block on every flip right after issuing it.
    pub double_buffer: bool,
    /// 1 syncs flips to vblank, 0 flips immediately where the driver allows.
    pub swap_interval: u32,
}

impl Default for PresentConfig {
    fn default() -> Self {
        Self {
            device_path: default_device_path(),
            double_buffer: false,
            swap_interval: default_swap_interval(),
        }
    }
}

impl PresentConfig {
    /// Parses and validates a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| KmsError::Config(format!("invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the configuration at `path`, using defaults if the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(content) => {
                let config = Self::from_toml_str(&content)?;
                info!(path = %path.display(), "Loaded presentation config");
                Ok(config)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No presentation config, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(KmsError::Config(format!("reading {}: {}", path.display(), e))),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.swap_interval > 1 {
            return Err(KmsError::Config(format!(
                "swap_interval must be 0 or 1, got {}",
                self.swap_interval
            )));
        }
        if self.device_path.as_os_str().is_empty() {
            return Err(KmsError::Config("device_path must not be empty".into()));
        }
        Ok(())
    }

    /// Applies `NOVADE_KMSDRM_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_with(|key| env::var(key).ok())
    }

    fn apply_overrides_with(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup(DOUBLE_BUFFER_ENV) {
            self.double_buffer = parse_switch(DOUBLE_BUFFER_ENV, &value)?;
        }
        if let Some(value) = lookup(DEVICE_ENV) {
            self.device_path = PathBuf::from(value);
        }
        self.validate()
    }
}

fn parse_switch(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(KmsError::Config(format!("{} must be a boolean, got {:?}", key, other))),
    }
}

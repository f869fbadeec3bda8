//! Configuration management for the MICP roles.
//!
//! This module handles loading and saving configuration from disk. The AICS
//! capability flags and instance bounds live here rather than behind cargo
//! features, so both roles check them at registration/discovery time.

use std::{env, fs, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
   error::{MicpError, Result},
   micp::protocol::{MAX_AICS_INSTANCES, MAX_REMOTE_INSTANCES},
};

/// Main configuration structure.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Config {
   #[serde(default)]
   pub mic_dev: MicDevConfig,

   #[serde(default)]
   pub mic_ctlr: MicCtlrConfig,
}

/// Mic device (server role) settings.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MicDevConfig {
   #[serde(default = "default_aics_enabled")]
   pub aics_enabled: bool,

   /// Exact number of AICS register parameters `register` expects.
   #[serde(default = "default_aics_count")]
   pub aics_instance_count: u8,
}

/// Controller (client role) settings.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MicCtlrConfig {
   #[serde(default = "default_aics_enabled")]
   pub aics_enabled: bool,

   /// Included AICS instances discovered per peer; extra ones are ignored.
   #[serde(default = "default_aics_count")]
   pub max_aics_instances: u8,

   #[serde(default = "default_max_instances")]
   pub max_instances: u8,
}

const fn default_aics_enabled() -> bool {
   true
}

const fn default_aics_count() -> u8 {
   1
}

const fn default_max_instances() -> u8 {
   MAX_REMOTE_INSTANCES as u8
}

impl Default for MicDevConfig {
   fn default() -> Self {
      Self {
         aics_enabled: default_aics_enabled(),
         aics_instance_count: default_aics_count(),
      }
   }
}

impl MicDevConfig {
   /// AICS count after applying the capability flag.
   pub fn effective_aics_count(&self) -> usize {
      if self.aics_enabled {
         self.aics_instance_count as usize
      } else {
         0
      }
   }
}

impl Default for MicCtlrConfig {
   fn default() -> Self {
      Self {
         aics_enabled: default_aics_enabled(),
         max_aics_instances: default_aics_count(),
         max_instances: default_max_instances(),
      }
   }
}

impl MicCtlrConfig {
   /// AICS discovery cap after applying the capability flag.
   pub fn effective_aics_count(&self) -> usize {
      if self.aics_enabled {
         self.max_aics_instances as usize
      } else {
         0
      }
   }
}

impl FromStr for Config {
   type Err = MicpError;

   fn from_str(s: &str) -> Result<Self> {
      let config: Self = toml::from_str(s)?;
      config.validate()?;
      Ok(config)
   }
}

impl Config {
   /// Loads configuration from disk or creates default if not exists.
   pub fn load() -> Result<Self> {
      let config_path = Self::config_path()?;

      if config_path.exists() {
         let contents = fs::read_to_string(&config_path)?;
         contents.parse()
      } else {
         let config = Self::default();
         config.save()?;
         Ok(config)
      }
   }

   /// Saves the current configuration to disk.
   pub fn save(&self) -> Result<()> {
      let config_path = Self::config_path()?;

      if let Some(parent) = config_path.parent() {
         fs::create_dir_all(parent)?;
      }

      let contents = toml::to_string_pretty(self)?;
      fs::write(&config_path, contents)?;

      Ok(())
   }

   fn config_path() -> Result<PathBuf> {
      let config_dir = if let Ok(micp_home) = env::var("MICP_HOME") {
         PathBuf::from(micp_home)
      } else if let Some(config_dir) = dirs::config_dir() {
         config_dir
      } else {
         return Err(MicpError::ConfigDirNotFound);
      };

      Ok(config_dir.join("micp").join("config.toml"))
   }

   /// Checks instance bounds against the compile-time capacities.
   pub fn validate(&self) -> Result<()> {
      if self.mic_dev.aics_instance_count as usize > MAX_AICS_INSTANCES {
         return Err(MicpError::InvalidConfig(format!(
            "mic_dev.aics_instance_count {} exceeds {MAX_AICS_INSTANCES}",
            self.mic_dev.aics_instance_count
         )));
      }
      if self.mic_ctlr.max_aics_instances as usize > MAX_AICS_INSTANCES {
         return Err(MicpError::InvalidConfig(format!(
            "mic_ctlr.max_aics_instances {} exceeds {MAX_AICS_INSTANCES}",
            self.mic_ctlr.max_aics_instances
         )));
      }
      let max_instances = self.mic_ctlr.max_instances as usize;
      if max_instances == 0 || max_instances > MAX_REMOTE_INSTANCES {
         return Err(MicpError::InvalidConfig(format!(
            "mic_ctlr.max_instances {max_instances} outside 1..={MAX_REMOTE_INSTANCES}"
         )));
      }
      Ok(())
   }
}

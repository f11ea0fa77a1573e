//! Configuration management for the noise control service.
//!
//! This module handles loading and saving configuration from disk,
//! including transport pacing, timeouts and bonded-device import rules.

use std::{env, fs, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
   bluetooth::rfcomm::SendOptions,
   error::{NoiseCtlError, Result},
   headset::profile::DeviceProfile,
};

const APP_DIR: &str = "noisectl";
const CONFIG_FILE: &str = "config.toml";
const DEVICES_FILE: &str = "devices.tsv";

/// Main configuration structure for the service.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Config {
   /// Adapter to use, `None` selects the system default.
   #[serde(default)]
   pub adapter: Option<String>,

   #[serde(default = "default_repeat_count")]
   pub repeat_count: u32,

   #[serde(default = "default_write_interval")]
   pub write_interval_ms: u64,

   #[serde(default = "default_connect_timeout")]
   pub connect_timeout_sec: u64,

   #[serde(default = "default_write_timeout")]
   pub write_timeout_sec: u64,

   /// Fixed RFCOMM channel, bypasses SDP lookup of the serial port service.
   #[serde(default)]
   pub rfcomm_channel: Option<u8>,

   #[serde(default = "default_vendor_prefixes")]
   pub vendor_prefixes: Vec<String>,

   #[serde(default = "default_import_bonded")]
   pub import_bonded: bool,

   #[serde(default)]
   pub default_profile: DeviceProfile,

   #[serde(default)]
   pub coalesce_requests: bool,

   #[serde(default)]
   pub parallel_dispatch: bool,
}

const fn default_repeat_count() -> u32 {
   3
}

const fn default_write_interval() -> u64 {
   333
}

const fn default_connect_timeout() -> u64 {
   10
}

const fn default_write_timeout() -> u64 {
   25
}

fn default_vendor_prefixes() -> Vec<String> {
   // Bose Corporation OUI
   vec!["C8:7B:23".to_string()]
}

const fn default_import_bonded() -> bool {
   true
}

impl Default for Config {
   fn default() -> Self {
      Self {
         adapter: None,
         repeat_count: default_repeat_count(),
         write_interval_ms: default_write_interval(),
         connect_timeout_sec: default_connect_timeout(),
         write_timeout_sec: default_write_timeout(),
         rfcomm_channel: None,
         vendor_prefixes: default_vendor_prefixes(),
         import_bonded: default_import_bonded(),
         default_profile: DeviceProfile::default(),
         coalesce_requests: false,
         parallel_dispatch: false,
      }
   }
}

impl Config {
   /// Loads configuration from disk or creates default if not exists.
   pub fn load() -> Result<Self> {
      let config_path = Self::config_dir()?.join(CONFIG_FILE);

      if config_path.exists() {
         let contents = fs::read_to_string(&config_path)?;
         Ok(toml::from_str(&contents)?)
      } else {
         let config = Self::default();
         config.save()?;
         Ok(config)
      }
   }

   /// Saves the current configuration to disk.
   pub fn save(&self) -> Result<()> {
      let config_dir = Self::config_dir()?;
      fs::create_dir_all(&config_dir)?;

      let contents = toml::to_string_pretty(self)?;
      fs::write(config_dir.join(CONFIG_FILE), contents)?;

      Ok(())
   }

   /// Directory holding both the configuration and the device records.
   pub fn config_dir() -> Result<PathBuf> {
      Self::config_dir_from(|key| env::var(key).ok())
   }

   fn config_dir_from(var: impl Fn(&str) -> Option<String>) -> Result<PathBuf> {
      if let Some(home) = var("NOISECTL_HOME") {
         return Ok(PathBuf::from(home));
      }

      let config_dir = if let Some(config_home) = var("XDG_CONFIG_HOME") {
         PathBuf::from(config_home)
      } else if let Some(home) = var("HOME") {
         PathBuf::from(home).join(".config")
      } else {
         dirs::config_dir().ok_or(NoiseCtlError::ConfigDirNotFound)?
      };

      Ok(config_dir.join(APP_DIR))
   }

   /// Path of the persisted device record set.
   pub fn devices_path() -> Result<PathBuf> {
      Ok(Self::config_dir()?.join(DEVICES_FILE))
   }

   /// Transport parameters for a single session.
   pub fn send_options(&self) -> SendOptions {
      SendOptions {
         repeat_count: self.repeat_count.max(1),
         write_interval: Duration::from_millis(self.write_interval_ms),
         connect_timeout: Duration::from_secs(self.connect_timeout_sec),
         write_timeout: Duration::from_secs(self.write_timeout_sec),
      }
   }
}

//! Process-wide configuration.
//!
//! A [`Config`] is built once at startup and handed by reference to every
//! component. All fields are optional in the TOML file; missing values fall
//! back to the defaults below, which match a stock ESP32 with esptool
//! installed on `PATH`.
//!
//! ```toml
//! port = "/dev/ttyUSB0"
//! baud = 921600
//! key_file = "mykey.bin"
//!
//! [layout]
//! bootloader_offset = 0x1000
//! ```
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// File looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "espmigrate.toml";

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Interpreter used to launch the tools when they are Python scripts.
    pub python: Option<PathBuf>,
    pub esptool: PathBuf,
    pub espefuse: PathBuf,
    pub espsecure: PathBuf,
    /// Serial port the board is attached to.
    pub port: String,
    pub baud: u32,
    /// Chip identifier passed to esptool's `--chip`.
    pub chip: String,
    /// Pregenerated flash encryption key.
    pub key_file: PathBuf,
    /// Directory holding staged images between the two phases.
    pub staging_dir: PathBuf,
    pub layout: FlashLayout,
}

/// Fixed flash regions read before the partition table is known.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FlashLayout {
    pub bootloader_offset: u32,
    pub bootloader_len: u32,
    pub partition_table_offset: u32,
    pub partition_table_len: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            python: None,
            esptool: PathBuf::from("esptool.py"),
            espefuse: PathBuf::from("espefuse.py"),
            espsecure: PathBuf::from("espsecure.py"),
            port: "/dev/ttyUSB0".to_string(),
            baud: 921_600,
            chip: "esp32".to_string(),
            key_file: PathBuf::from("mykey.bin"),
            staging_dir: PathBuf::from("."),
            layout: FlashLayout::default(),
        }
    }
}

impl Default for FlashLayout {
    fn default() -> Self {
        Self {
            bootloader_offset: 0x1000,
            bootloader_len: 0x7000,
            partition_table_offset: 0x8000,
            partition_table_len: 0xC00,
        }
    }
}

impl Config {
    /// Parses a configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Loads the configuration.
    ///
    /// An explicit `path` must exist. Without one, [`DEFAULT_CONFIG_FILE`] in
    /// the working directory is used if present, otherwise the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !fallback.is_file() {
                    log::debug!("no {} found, using defaults", DEFAULT_CONFIG_FILE);
                    return Ok(Self::default());
                }
                fallback
            }
        };

        let text = fs::read_to_string(&path).map_err(|e| Error::file_access(&path, e))?;
        let config = Self::from_toml(&text)?;
        log::debug!("loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Resolves a file name inside the staging directory.
    pub fn staged_path(&self, file_name: &str) -> PathBuf {
        self.staging_dir.join(file_name)
    }
}

//! Persistent configuration for walletemu.
//!
//! Stores harness settings in `~/.walletemu/config.json`. Every field has a
//! default, so a missing file or a partial document is fine: the emulator
//! command line, the transport to discover it on, and the timing knobs for
//! the readiness probe and the debug link.
//!
//! # Example
//!
//! ```no_run
//! use walletemu_core::config::HarnessConfig;
//!
//! // Load (returns defaults if file doesn't exist)
//! let config = HarnessConfig::load();
//! println!("emulator: {}", config.emulator.command_line());
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::emulator::EmulatorConfig;
use crate::transport::TransportConfig;

const CONFIG_DIRNAME: &str = ".walletemu";
const CONFIG_FILENAME: &str = "config.json";

/// Errors that can occur while loading or saving configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The home directory could not be determined.
    #[error("Could not determine home directory")]
    NoHomeDir,

    /// Reading or writing the config file failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The config file is not valid JSON for [`HarnessConfig`].
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Returns the walletemu directory (`~/.walletemu/`), if a home directory exists.
pub fn walletemu_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_DIRNAME))
}

/// Persistent harness configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// How to launch the emulator process.
    pub emulator: EmulatorConfig,
    /// Which transport the emulator is discovered on.
    pub transport: TransportConfig,
    /// Only select a debuggable transport whose path matches exactly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_filter: Option<String>,
    /// Upper bound for the post-start readiness probe, in milliseconds.
    pub startup_timeout_ms: u64,
    /// Delay between readiness probe attempts, in milliseconds.
    pub poll_interval_ms: u64,
    /// Delay between opening the debug link and sending input, in milliseconds.
    ///
    /// The bridge daemon needs a moment to propagate session state before
    /// debug commands are accepted.
    pub debug_settle_ms: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            emulator: EmulatorConfig::default(),
            transport: TransportConfig::default(),
            path_filter: None,
            startup_timeout_ms: 30_000,
            poll_interval_ms: 250,
            debug_settle_ms: 600,
        }
    }
}

impl HarnessConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn debug_settle_delay(&self) -> Duration {
        Duration::from_millis(self.debug_settle_ms)
    }

    /// Load config from `~/.walletemu/config.json`.
    ///
    /// Returns [`Default`] if the file does not exist or cannot be parsed.
    pub fn load() -> Self {
        walletemu_dir()
            .map(|dir| dir.join(CONFIG_FILENAME))
            .and_then(|path| Self::load_from(&path).ok())
            .unwrap_or_default()
    }

    /// Load config from an explicit path.
    ///
    /// Unlike [`load`](Self::load), a missing or malformed file is an error.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Save config to `~/.walletemu/config.json`, creating the directory.
    pub fn save(&self) -> Result<(), ConfigError> {
        let dir = walletemu_dir().ok_or(ConfigError::NoHomeDir)?;
        std::fs::create_dir_all(&dir)?;
        self.save_to(&dir.join(CONFIG_FILENAME))
    }

    /// Save config to an explicit path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::input::binding::{self, ResolvedBinding, DEFAULT_ACCELERATOR};
use crate::input::capture::FINALIZE_DELAY;
use crate::input::hotkey::{EngineSettings, MIN_HOLD};
use crate::input::keys::Platform;

const CONFIG_FILE: &str = ".flowcopy-hotkey.toml";

const DEFAULT_CONFIG: &str = r#"[hotkey]
accelerator = "CommandOrControl+Shift+Space"
# Raw binding written by `flowcopy-hotkey capture`; wins over `accelerator`
# raw = '{"keycode":57,"modifiers":{"ctrl":true,"alt":false,"shift":true,"meta":false}}'
min_hold_ms = 300
capture_timeout_ms = 500

[globe]
enabled = true
# helper_path = "/path/to/globe-key-listener"

[telemetry]
enabled = true
log_path = "~/.flowcopy-hotkey/hotkey.log"
"#;

/// Application configuration (`~/.flowcopy-hotkey.toml`)
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Binding and timing
    pub hotkey: HotkeyConfig,
    /// Globe/Fn helper
    pub globe: GlobeConfig,
    /// Logging
    pub telemetry: TelemetryConfig,
}

/// `[hotkey]` table
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct HotkeyConfig {
    /// Accelerator string, e.g. `"CommandOrControl+Shift+Space"`
    pub accelerator: String,
    /// Raw `{keycode, modifiers}` JSON from a capture session
    pub raw: Option<String>,
    /// Minimum hold before a key-up stops recording
    pub min_hold_ms: u64,
    /// Quiet period that finalizes a modifier-only capture
    pub capture_timeout_ms: u64,
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            accelerator: DEFAULT_ACCELERATOR.to_owned(),
            raw: None,
            min_hold_ms: u64::try_from(MIN_HOLD.as_millis()).unwrap_or(300),
            capture_timeout_ms: u64::try_from(FINALIZE_DELAY.as_millis()).unwrap_or(500),
        }
    }
}

/// `[globe]` table
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct GlobeConfig {
    /// Watch the Globe key with the helper when it is the target
    pub enabled: bool,
    /// Explicit helper location, searched before the defaults
    pub helper_path: Option<String>,
}

impl Default for GlobeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            helper_path: None,
        }
    }
}

/// `[telemetry]` table
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Log to a file instead of stdout
    pub enabled: bool,
    /// Log file location (`~/` expanded)
    pub log_path: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_path: "~/.flowcopy-hotkey/hotkey.log".to_owned(),
        }
    }
}

impl Config {
    /// Load config from ~/.flowcopy-hotkey.toml, creating it on first run
    ///
    /// # Errors
    /// Returns error if HOME is unset or the file cannot be created, read or parsed.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            Self::create_default(&config_path).context("failed to create default config")?;
        }

        let contents = fs::read_to_string(&config_path).context("failed to read config file")?;
        Self::from_toml_str(&contents)
    }

    /// Parse config TOML; missing tables and keys take defaults
    ///
    /// # Errors
    /// Returns error on malformed TOML or mistyped values.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("failed to parse config TOML")
    }

    /// Location of the config file
    ///
    /// # Errors
    /// Returns error if HOME is unset.
    pub fn config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME").context("HOME environment variable not set")?;
        Ok(PathBuf::from(home).join(CONFIG_FILE))
    }

    fn create_default(path: &Path) -> Result<()> {
        fs::write(path, DEFAULT_CONFIG).context("failed to write default config")?;
        Ok(())
    }

    /// Binding to arm: raw pair, then accelerator, then the default
    #[must_use]
    pub fn binding(&self, platform: Platform) -> ResolvedBinding {
        binding::resolve(
            self.hotkey.raw.as_deref(),
            Some(&self.hotkey.accelerator),
            platform,
        )
    }

    /// Engine tunables from `[hotkey]` and `[globe]`
    #[must_use]
    pub const fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            min_hold: Duration::from_millis(self.hotkey.min_hold_ms),
            capture_timeout: Duration::from_millis(self.hotkey.capture_timeout_ms),
            globe_enabled: self.globe.enabled,
        }
    }

    /// Configured Globe helper path, expanded
    ///
    /// # Errors
    /// Returns error if the path uses `~/` and HOME is unset.
    pub fn globe_helper_path(&self) -> Result<Option<PathBuf>> {
        self.globe
            .helper_path
            .as_deref()
            .map(Self::expand_path)
            .transpose()
    }

    /// Expand ~ in paths to home directory
    ///
    /// # Errors
    /// Returns error if the path uses `~/` and HOME is unset.
    pub fn expand_path(path: &str) -> Result<PathBuf> {
        if let Some(stripped) = path.strip_prefix("~/") {
            let home = std::env::var("HOME").context("HOME environment variable not set")?;
            Ok(PathBuf::from(home).join(stripped))
        } else {
            Ok(PathBuf::from(path))
        }
    }
}

//! Presenter configuration.
//!
//! Settings are stored as TOML. Every field has a default, so a partial file
//! (or none at all) is valid; command-line flags are applied on top by the
//! binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// File name of the configuration inside the platform config directory.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Complete presenter configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenterConfig {
    pub audio: AudioConfig,
    pub presentation: PresentationConfig,
    pub recording: RecordingConfig,
}

/// Audio device and buffering settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output device, either a numeric index or a name substring.
    pub device: Option<String>,
    /// Frames per audio block (the callback cadence).
    pub block_size: usize,
    /// Number of blocks buffered ahead of the real-time callback.
    pub buffer_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            block_size: 1024,
            buffer_size: 20,
        }
    }
}

/// Stimulus ordering and timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresentationConfig {
    pub repeats: u32,
    pub shuffle: bool,
    /// Seed for the shuffle; `None` draws from entropy.
    pub seed: Option<u64>,
    #[serde(rename = "loop")]
    pub looping: bool,
    /// Silence between stimuli, in seconds.
    pub gap: f64,
    /// Delay between starting the recording and starting playback, in seconds.
    pub warmup: f64,
    /// Duration of the synthesized sync click, in seconds.
    pub click: Option<f64>,
}

impl Default for PresentationConfig {
    fn default() -> Self {
        Self {
            repeats: 1,
            shuffle: false,
            seed: None,
            looping: false,
            gap: 2.0,
            warmup: 2.0,
            click: None,
        }
    }
}

impl PresentationConfig {
    pub fn gap_duration(&self) -> Result<Duration> {
        seconds("gap", self.gap)
    }

    pub fn warmup_duration(&self) -> Result<Duration> {
        seconds("warmup", self.warmup)
    }
}

/// Recording system endpoint and recording naming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// ZeroMQ endpoint of the recording system, e.g. `tcp://localhost:5556`.
    /// Without an address the controller runs in dummy mode.
    pub address: Option<String>,
    pub rec_dir: String,
    pub prepend: String,
    pub append: String,
    /// Receive timeout for each request, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            address: None,
            rec_dir: String::new(),
            prepend: String::new(),
            append: String::new(),
            timeout_ms: 5000,
        }
    }
}

impl RecordingConfig {
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl PresenterConfig {
    /// Platform default location of the configuration file, if one can be determined.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "open-ephys", "oeaudio")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Load a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&text)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Load the given file, else the platform default file if it exists, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| Error::Config(format!("Invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML text.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(format!("Failed to serialize: {e}")))
    }

    /// Write the configuration, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.audio.block_size == 0 {
            return Err(Error::Config("block_size must be positive".to_string()));
        }
        if self.audio.buffer_size == 0 {
            return Err(Error::Config("buffer_size must be positive".to_string()));
        }
        if self.presentation.repeats == 0 {
            return Err(Error::NonPositiveRepeats);
        }
        self.presentation.gap_duration()?;
        self.presentation.warmup_duration()?;
        if let Some(click) = self.presentation.click {
            seconds("click", click)?;
        }
        Ok(())
    }
}

/// Seconds as a `Duration`; negative, non-finite and overflowing values are rejected.
fn seconds(name: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        Error::Config(format!(
            "{name} must be a non-negative number of seconds, got {value}"
        ))
    })
}

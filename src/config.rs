use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// What ingestion does when a single file's metadata cannot be extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Stop the whole run and return the error.
    Abort,
    /// Log it, list it in the report and carry on with the next file.
    Skip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg_path: PathBuf,
    #[serde(default = "default_ffprobe")]
    pub ffprobe_path: PathBuf,
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default = "default_parallel_extraction")]
    pub parallel_extraction: bool,
    #[serde(default = "default_on_decode_error")]
    pub on_decode_error: ErrorPolicy,
    #[serde(default = "default_on_probe_error")]
    pub on_probe_error: ErrorPolicy,
}

fn app_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".galleria")
}

fn default_cache_dir() -> PathBuf {
    app_dir().join("cache")
}

fn default_database_path() -> PathBuf {
    app_dir().join("galleria.db")
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_tool_timeout_secs() -> u64 {
    30
}

fn default_parallel_extraction() -> bool {
    true
}

// A corrupt image usually means a bad disk or a bad copy; stop and look.
fn default_on_decode_error() -> ErrorPolicy {
    ErrorPolicy::Abort
}

fn default_on_probe_error() -> ErrorPolicy {
    ErrorPolicy::Skip
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            database_path: default_database_path(),
            ffmpeg_path: default_ffmpeg(),
            ffprobe_path: default_ffprobe(),
            tool_timeout_secs: default_tool_timeout_secs(),
            parallel_extraction: default_parallel_extraction(),
            on_decode_error: default_on_decode_error(),
            on_probe_error: default_on_probe_error(),
        }
    }
}

impl Config {
    /// Load config from `path`, or from `~/.galleria/config.toml` when none is
    /// given. A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => get_config_path(),
        };

        if !config_path.exists() {
            tracing::debug!(path = %config_path.display(), "No config file; using defaults");
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(&config_path).map_err(|e| Error::io(&config_path, e))?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        fs::write(path, toml_string).map_err(|e| Error::io(path, e))?;

        Ok(())
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn thumbnail_dir(&self) -> PathBuf {
        self.cache_dir.join("thumbnails")
    }

    fn validate(&self) -> Result<()> {
        if self.tool_timeout_secs == 0 {
            return Err(Error::Config("tool_timeout_secs must be at least 1".to_string()));
        }
        Ok(())
    }
}

pub fn get_config_path() -> PathBuf {
    app_dir().join("config.toml")
}

//! Engine configuration (`flok.toml`).
//!
//! Every field has a default, so an empty file (or no file at all) is a
//! valid configuration:
//!
//! ```toml
//! max_ops = 50000
//! max_call_depth = 64
//! tick_millis = 50
//! actor_prefix = "player-"
//! scripts_dir = "scripts"
//! script_extension = "fk"
//! data_file = "data.json"
//! debug = false
//! autosave_seconds = 300
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::script::Limits;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Operation budget per top-level invocation.
    pub max_ops: u64,
    pub max_call_depth: usize,
    /// Length of one scheduler tick.
    pub tick_millis: u64,
    /// Prefix under which actor attributes are exposed to scripts.
    pub actor_prefix: String,
    pub scripts_dir: PathBuf,
    /// Script file extension, without the dot.
    pub script_extension: String,
    pub data_file: PathBuf,
    pub debug: bool,
    /// Interval between periodic store saves; 0 disables them.
    pub autosave_seconds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let limits = Limits::default();
        EngineConfig {
            max_ops: limits.max_ops,
            max_call_depth: limits.max_call_depth,
            tick_millis: 50,
            actor_prefix: limits.actor_prefix,
            scripts_dir: PathBuf::from("scripts"),
            script_extension: "fk".to_owned(),
            data_file: PathBuf::from("data.json"),
            debug: false,
            autosave_seconds: 300,
        }
    }
}

impl EngineConfig {
    pub fn load_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let config = Self::load_str(&text)?;
        info!(target: "flok", "loaded config from {}", path.display());
        Ok(config)
    }

    /// `flok.toml` in the platform config directory, if one can be determined.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "flok").map(|d| d.config_dir().join("flok.toml"))
    }

    /// Load `path` if given, else the default path if it exists, else defaults.
    pub fn discover(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load_file(p),
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(p) => Self::load_file(&p),
                None => Ok(Self::default()),
            },
        }
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_ops: self.max_ops,
            max_call_depth: self.max_call_depth,
            actor_prefix: self.actor_prefix.clone(),
        }
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_millis(self.tick_millis.max(1))
    }

    pub fn autosave_interval(&self) -> Option<Duration> {
        (self.autosave_seconds > 0).then(|| Duration::from_secs(self.autosave_seconds))
    }
}

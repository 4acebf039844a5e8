//! `heatline.toml` config loading.

use serde::{Deserialize, Serialize};

use std::path::Path;
use std::time::Duration;

use crate::{ColorMode, HeatlineError, HeatlineResult, ProfilerCommand};

pub const DEFAULT_PROFILE_FORMAT: &str = "[%calls] %exec_time";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Which measurement drives the line color.
    #[serde(default)]
    pub color_selection: ColorMode,

    /// Per-line label template (`%calls`, `%exec_time`, `%total_time`).
    #[serde(default = "default_profile_format")]
    pub profile_format: String,

    #[serde(default)]
    pub profiler: ProfilerCommand,

    /// Only documents whose path ends with this are profiled.
    #[serde(default = "default_source_extension")]
    pub source_extension: String,

    /// Bounded wait for the profiler; `0` waits forever.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_profile_format() -> String {
    DEFAULT_PROFILE_FORMAT.to_string()
}

fn default_source_extension() -> String {
    ".py".to_string()
}

fn default_timeout_ms() -> u64 {
    300_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            color_selection: ColorMode::default(),
            profile_format: default_profile_format(),
            profiler: ProfilerCommand::default(),
            source_extension: default_source_extension(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> HeatlineResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Missing file means defaults; an unreadable or invalid one is warned about and ignored.
    pub fn load_optional(path: &Path) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(HeatlineError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                Self::default()
            }
            Err(err) => {
                tracing::warn!("ignoring config {}: {err}", path.display());
                Self::default()
            }
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    pub fn is_profilable(&self, path: &str) -> bool {
        !self.source_extension.is_empty() && path.ends_with(&self.source_extension)
    }
}

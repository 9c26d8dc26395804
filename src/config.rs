use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, Result};

/// Overlap scoring weights and resolution bands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlapConfig {
    pub name_weight: f64,
    pub capability_weight: f64,
    /// Scores above this are reported as overlapping work.
    pub overlap_threshold: f64,
    /// Scores above this (and up to `merge_threshold`) become dependencies.
    pub dependency_threshold: f64,
    /// Scores above this are merge advisories.
    pub merge_threshold: f64,
}

impl Default for OverlapConfig {
    fn default() -> Self {
        Self {
            name_weight: 0.4,
            capability_weight: 0.6,
            overlap_threshold: 0.3,
            dependency_threshold: 0.4,
            merge_threshold: 0.7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Upper bound on live (pending + in progress) tasks.
    pub max_tasks: usize,
    pub heartbeat_timeout_secs: u64,
    pub monitor_interval_secs: u64,
    /// Periodic conflict analysis; `None` means on demand only.
    pub analysis_interval_secs: Option<u64>,
    pub persist_retries: u32,
    pub persist_timeout_ms: u64,
    pub state_path: Option<String>,
    pub overlap: OverlapConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_tasks: 100,
            heartbeat_timeout_secs: 120,
            monitor_interval_secs: 30,
            analysis_interval_secs: None,
            persist_retries: 2,
            persist_timeout_ms: 2_000,
            state_path: None,
            overlap: OverlapConfig::default(),
        }
    }
}

impl Config {
    pub fn home_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".tasklane"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::home_dir()?.join("tasklane.toml"))
    }

    pub fn log_path() -> Result<PathBuf> {
        Ok(Self::home_dir()?.join("tasklane.log"))
    }

    /// Where the JSON state snapshot lives.
    pub fn effective_state_path(&self) -> Result<PathBuf> {
        match &self.state_path {
            Some(path) => Ok(expand_tilde(path)),
            None => Ok(Self::home_dir()?.join("state.json")),
        }
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn analysis_interval(&self) -> Option<Duration> {
        self.analysis_interval_secs.map(Duration::from_secs)
    }

    pub fn persist_timeout(&self) -> Duration {
        Duration::from_millis(self.persist_timeout_ms)
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Config::load");
        if !path.exists() {
            tracing::debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        tracing::debug!(?config, "Config loaded");
        Ok(config)
    }

    /// Reject configurations whose bands overlap or fall outside [0, 1], and
    /// zero intervals or timeouts.
    pub fn validate(&self) -> Result<()> {
        let o = &self.overlap;
        let ordered = 0.0 <= o.overlap_threshold
            && o.overlap_threshold <= o.dependency_threshold
            && o.dependency_threshold <= o.merge_threshold
            && o.merge_threshold <= 1.0;
        if !ordered {
            return Err(Error::Validation(
                "overlap thresholds must satisfy 0 <= overlap <= dependency <= merge <= 1"
                    .to_string(),
            ));
        }
        if (o.name_weight + o.capability_weight - 1.0).abs() > 1e-6 {
            return Err(Error::Validation(
                "overlap weights must sum to 1".to_string(),
            ));
        }
        if self.max_tasks == 0 {
            return Err(Error::Validation("max_tasks must be positive".to_string()));
        }
        let intervals = [
            ("heartbeat_timeout_secs", Some(self.heartbeat_timeout_secs)),
            ("monitor_interval_secs", Some(self.monitor_interval_secs)),
            ("analysis_interval_secs", self.analysis_interval_secs),
        ];
        if let Some((field, _)) = intervals.iter().find(|(_, secs)| *secs == Some(0)) {
            return Err(Error::Validation(format!("{} must be positive", field)));
        }
        if self.persist_timeout_ms == 0 {
            return Err(Error::Validation("persist_timeout_ms must be positive".to_string()));
        }
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

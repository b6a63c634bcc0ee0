use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::circuit::{CircuitBreakerConfig, DEFAULT_COOLDOWN_PERIOD, DEFAULT_MAX_FAILURES};
use crate::score::ScoreConfig;
use crate::{zlog_debug, Error, Result};

pub const DEFAULT_BEAD_PREFIX: &str = "gt";
pub const DEFAULT_PATROL_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_COLLABORATOR_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSection {
    pub max_failures: u32,
    pub cooldown_secs: u64,
}

impl Default for CircuitBreakerSection {
    fn default() -> Self {
        Self {
            max_failures: DEFAULT_MAX_FAILURES,
            cooldown_secs: DEFAULT_COOLDOWN_PERIOD.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Workspace root. Discovered from the current directory when unset.
    pub workspace: Option<String>,
    pub bead_prefix: String,
    pub patrol_interval_secs: u64,
    pub collaborator_timeout_secs: u64,
    pub circuit_breaker: CircuitBreakerSection,
    pub score: ScoreConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            bead_prefix: DEFAULT_BEAD_PREFIX.to_string(),
            patrol_interval_secs: DEFAULT_PATROL_INTERVAL_SECS,
            collaborator_timeout_secs: DEFAULT_COLLABORATOR_TIMEOUT_SECS,
            circuit_breaker: CircuitBreakerSection::default(),
            score: ScoreConfig::default(),
        }
    }
}

impl Config {
    pub fn rigwatch_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".rigwatch"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::rigwatch_dir()?.join("rigwatch.toml"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load and validate a config file; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        zlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            zlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        zlog_debug!(
            "Config loaded: workspace={:?}, prefix={}, interval={}s, max_failures={}",
            config.workspace,
            config.bead_prefix,
            config.patrol_interval_secs,
            config.circuit_breaker.max_failures
        );
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                zlog_debug!("Creating config directory: {}", parent.display());
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        zlog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.bead_prefix.is_empty() {
            return Err(Error::Validation("bead_prefix must not be empty".to_string()));
        }
        if self.patrol_interval_secs == 0 {
            return Err(Error::Validation(
                "patrol_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.collaborator_timeout_secs == 0 {
            return Err(Error::Validation(
                "collaborator_timeout_secs must be at least 1".to_string(),
            ));
        }
        self.circuit_breaker().validate()?;
        self.score.validate()
    }

    pub fn workspace_path(&self) -> Option<PathBuf> {
        self.workspace.as_deref().map(expand_tilde)
    }

    pub fn circuit_breaker(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            max_failures: self.circuit_breaker.max_failures,
            cooldown_period: Duration::from_secs(self.circuit_breaker.cooldown_secs),
        }
    }

    pub fn patrol_interval(&self) -> Duration {
        Duration::from_secs(self.patrol_interval_secs)
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_secs(self.collaborator_timeout_secs)
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

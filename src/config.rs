use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::agent::{AgentRole, AgentSpec};
use crate::{mlog_debug, Error, Result};

fn default_tick_interval() -> u64 {
    30
}

fn default_idle_threshold() -> u64 {
    300
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_check_timeout() -> u64 {
    5
}

fn default_capture_lines() -> u16 {
    50
}

fn default_retry_delay_ms() -> u64 {
    500
}

/// One agent in the configured roster. The roster is configuration, not
/// runtime state: it describes which agents the coordinator should track,
/// while status and heartbeats live only in memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterEntry {
    pub id: String,
    pub session: String,
    pub window: u32,
    pub role: AgentRole,
}

impl RosterEntry {
    pub fn to_spec(&self) -> AgentSpec {
        AgentSpec {
            id: self.id.clone(),
            session: self.session.clone(),
            window: self.window,
            role: self.role,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Seconds between coordination loop ticks.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// Seconds of unchanged output before an Active agent is considered Idle.
    #[serde(default = "default_idle_threshold")]
    pub idle_threshold_secs: u64,
    /// Consecutive failed checks before an Unresponsive agent becomes Error.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds allowed for a single agent's health check.
    #[serde(default = "default_check_timeout")]
    pub check_timeout_secs: u64,
    /// Pane lines captured per health check.
    #[serde(default = "default_capture_lines")]
    pub capture_lines: u16,
    /// Milliseconds to wait before the single dispatch retry.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default, rename = "agents")]
    pub roster: Vec<RosterEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            idle_threshold_secs: default_idle_threshold(),
            failure_threshold: default_failure_threshold(),
            check_timeout_secs: default_check_timeout(),
            capture_lines: default_capture_lines(),
            retry_delay_ms: default_retry_delay_ms(),
            roster: Vec::new(),
        }
    }
}

impl Config {
    pub fn marshal_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".marshal"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::marshal_dir()?.join("marshal.toml"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        mlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            mlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        mlog_debug!(
            "Config loaded: tick={}s idle={}s failures={} agents={}",
            config.tick_interval_secs,
            config.idle_threshold_secs,
            config.failure_threshold,
            config.roster.len()
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                mlog_debug!("Creating config directory: {}", parent.display());
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        mlog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Add an agent to the roster. Fails on a duplicate id without touching
    /// the existing entry.
    pub fn add_roster_entry(&mut self, entry: RosterEntry) -> Result<()> {
        if self.roster.iter().any(|e| e.id == entry.id) {
            return Err(Error::DuplicateAgent(entry.id));
        }
        self.roster.push(entry);
        Ok(())
    }

    /// Remove an agent from the roster. Returns whether an entry was removed;
    /// removing an absent id is not an error.
    pub fn remove_roster_entry(&mut self, id: &str) -> bool {
        let before = self.roster.len();
        self.roster.retain(|e| e.id != id);
        self.roster.len() != before
    }
}

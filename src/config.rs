//! Runtime settings.
//!
//! Every tunable lives in [`Settings`] and is handed to the operations that
//! need it. Values come from built-in defaults, then an optional JSON file at
//! `<config dir>/portctl/config.json` (or `$PORTCTL_CONFIG`), then a couple of
//! environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::port::PortRange;
use crate::utils::{parse_duration, parse_range, validate_port};
use crate::{Error, Result};

pub const CONFIG_ENV: &str = "PORTCTL_CONFIG";
pub const LOCK_DIR_ENV: &str = "PORTCTL_LOCK_DIR";
pub const TOOL_TIMEOUT_ENV: &str = "PORTCTL_TOOL_TIMEOUT";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Deadline for each external tool invocation.
    pub tool_timeout: Duration,
    /// Default grace period before `kill` escalates to SIGKILL.
    pub kill_timeout: Duration,
    /// How often `kill` re-checks the port while waiting to escalate.
    pub kill_poll_interval: Duration,
    /// How often `check --wait` re-checks the port.
    pub check_poll_interval: Duration,
    /// Directory holding the per-port advisory lock files.
    pub lock_dir: PathBuf,
    /// Preferred ports for `pick`/`run` when `--prefer` is absent.
    pub default_prefer: Vec<u16>,
    /// Fallback range for `pick`/`run` when `--range` is absent.
    pub default_range: PortRange,
    /// Maximum concurrent per-pid `lsof` calls during enrichment.
    pub enrich_fanout: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tool_timeout: Duration::from_secs(5),
            kill_timeout: Duration::from_secs(2),
            kill_poll_interval: Duration::from_millis(150),
            check_poll_interval: Duration::from_millis(200),
            lock_dir: default_lock_dir(),
            default_prefer: vec![3000],
            default_range: PortRange::new(3000, 3999).unwrap_or(PortRange::FULL),
            enrich_fanout: 4,
        }
    }
}

/// On-disk shape of the config file. Durations are strings such as `"2s"`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SettingsFile {
    tool_timeout: Option<String>,
    kill_timeout: Option<String>,
    kill_poll_interval: Option<String>,
    check_poll_interval: Option<String>,
    lock_dir: Option<PathBuf>,
    default_prefer: Option<Vec<u16>>,
    default_range: Option<String>,
    enrich_fanout: Option<usize>,
}

impl Settings {
    /// Load settings from the default config location and the process
    /// environment.
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .or_else(default_config_path);
        Self::from_sources(path.as_deref(), |key| std::env::var(key).ok())
    }

    /// Build settings from an optional config file and an environment lookup.
    ///
    /// A missing file is not an error; a malformed one is.
    pub fn from_sources<F>(config_path: Option<&Path>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Settings::default();

        if let Some(path) = config_path.filter(|p| p.exists()) {
            let file = read_settings_file(path)
                .map_err(|e| Error::InvalidInput(format!("invalid config file: {e:#}")))?;
            settings.apply_file(file)?;
        }

        if let Some(dir) = env(LOCK_DIR_ENV).filter(|v| !v.is_empty()) {
            settings.lock_dir = PathBuf::from(dir);
        }
        if let Some(timeout) = env(TOOL_TIMEOUT_ENV).filter(|v| !v.is_empty()) {
            settings.tool_timeout = parse_duration(&timeout)?;
        }

        settings.validate()?;
        Ok(settings)
    }

    fn apply_file(&mut self, file: SettingsFile) -> Result<()> {
        if let Some(v) = file.tool_timeout {
            self.tool_timeout = parse_duration(&v)?;
        }
        if let Some(v) = file.kill_timeout {
            self.kill_timeout = parse_duration(&v)?;
        }
        if let Some(v) = file.kill_poll_interval {
            self.kill_poll_interval = parse_duration(&v)?;
        }
        if let Some(v) = file.check_poll_interval {
            self.check_poll_interval = parse_duration(&v)?;
        }
        if let Some(dir) = file.lock_dir {
            self.lock_dir = dir;
        }
        if let Some(prefer) = file.default_prefer {
            for port in &prefer {
                validate_port(*port)?;
            }
            self.default_prefer = prefer;
        }
        if let Some(range) = file.default_range {
            self.default_range = parse_range(&range)?;
        }
        if let Some(fanout) = file.enrich_fanout {
            self.enrich_fanout = fanout;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.tool_timeout.is_zero() {
            return Err(Error::InvalidInput(
                "tool_timeout must be greater than zero".to_string(),
            ));
        }
        if self.kill_poll_interval.is_zero() || self.check_poll_interval.is_zero() {
            return Err(Error::InvalidInput(
                "poll intervals must be greater than zero".to_string(),
            ));
        }
        if self.enrich_fanout == 0 {
            return Err(Error::InvalidInput(
                "enrich_fanout must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn read_settings_file(path: &Path) -> anyhow::Result<SettingsFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

/// `<config dir>/portctl/config.json`, when the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("portctl").join("config.json"))
}

/// `<cache dir>/portctl/locks`, falling back to the temp dir.
pub fn default_lock_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("portctl")
        .join("locks")
}

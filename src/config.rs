use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Header written above a freshly saved config file.
const CONFIG_HEADER: &str = "\
# linkwatchd configuration
#
# [network]
#   target_address       host probed once per cycle
#   probe_interval_secs  seconds between probes
#   probe_timeout_secs   upper bound for a single probe
#   failure_threshold    consecutive failed probes before the countdown is armed
#
# [action]
#   countdown_secs       grace period between arming and running the command
#   command              shell command line run when the countdown expires
#   hide_after_recovery  hide the console status once the link is back
";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Snapshot of everything one watchdog cycle needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub target_address: String,
    pub probe_interval_secs: u64,
    pub probe_timeout_secs: u64,
    pub failure_threshold: u32,
    pub countdown_secs: u64,
    pub action_command: String,
    pub hide_after_recovery: bool,
}

impl MonitorConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.probe_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "probe_interval_secs must be greater than zero".into(),
            ));
        }
        if self.probe_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "probe_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "failure_threshold must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        let network = NetworkSection::default();
        let action = ActionSection::default();
        Self {
            target_address: network.target_address,
            probe_interval_secs: network.probe_interval_secs,
            probe_timeout_secs: network.probe_timeout_secs,
            failure_threshold: network.failure_threshold,
            countdown_secs: action.countdown_secs,
            action_command: action.command,
            hide_after_recovery: action.hide_after_recovery,
        }
    }
}

/// On‑disk TOML layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    network: NetworkSection,
    #[serde(default)]
    action: ActionSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct NetworkSection {
    target_address: String,
    probe_interval_secs: u64,
    probe_timeout_secs: u64,
    failure_threshold: u32,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            target_address: "192.168.123.1".into(),
            probe_interval_secs: 5,
            probe_timeout_secs: 2,
            failure_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct ActionSection {
    countdown_secs: u64,
    command: String,
    hide_after_recovery: bool,
}

impl Default for ActionSection {
    fn default() -> Self {
        Self {
            countdown_secs: 180,
            command: default_action_command().into(),
            hide_after_recovery: true,
        }
    }
}

#[cfg(target_os = "windows")]
fn default_action_command() -> &'static str {
    "shutdown /h"
}

#[cfg(not(target_os = "windows"))]
fn default_action_command() -> &'static str {
    "shutdown -h now"
}

impl From<ConfigFile> for MonitorConfig {
    fn from(file: ConfigFile) -> Self {
        Self {
            target_address: file.network.target_address,
            probe_interval_secs: file.network.probe_interval_secs,
            probe_timeout_secs: file.network.probe_timeout_secs,
            failure_threshold: file.network.failure_threshold,
            countdown_secs: file.action.countdown_secs,
            action_command: file.action.command,
            hide_after_recovery: file.action.hide_after_recovery,
        }
    }
}

impl From<&MonitorConfig> for ConfigFile {
    fn from(cfg: &MonitorConfig) -> Self {
        Self {
            network: NetworkSection {
                target_address: cfg.target_address.clone(),
                probe_interval_secs: cfg.probe_interval_secs,
                probe_timeout_secs: cfg.probe_timeout_secs,
                failure_threshold: cfg.failure_threshold,
            },
            action: ActionSection {
                countdown_secs: cfg.countdown_secs,
                command: cfg.action_command.clone(),
                hide_after_recovery: cfg.hide_after_recovery,
            },
        }
    }
}

/// Parse a config document. Missing keys take their defaults.
pub fn parse(text: &str, path: &Path) -> Result<MonitorConfig, ConfigError> {
    let file: ConfigFile = toml::from_str(text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let cfg = MonitorConfig::from(file);
    cfg.validate()?;
    Ok(cfg)
}

pub fn render(cfg: &MonitorConfig) -> Result<String, ConfigError> {
    let body = toml::to_string_pretty(&ConfigFile::from(cfg))?;
    Ok(format!("{CONFIG_HEADER}\n{body}"))
}

/// Resolve the config path the same way for every subcommand.
pub fn resolve_path(explicit: Option<PathBuf>, use_system: bool) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    if use_system {
        return Ok(PathBuf::from("/etc/linkwatchd/linkwatchd.toml"));
    }
    let config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
        .join("linkwatchd");
    Ok(config_dir.join("linkwatchd.toml"))
}

/// Default directory for the daily event log, next to the config file.
pub fn default_log_dir(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .map(|p| p.join("log"))
        .unwrap_or_else(|| PathBuf::from("log"))
}

/// Shared, lock‑protected config plus the file it is persisted to.
///
/// Readers take a full snapshot so they never observe a half-applied update.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    inner: RwLock<MonitorConfig>,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>, cfg: MonitorConfig) -> Self {
        Self {
            path: path.into(),
            inner: RwLock::new(cfg),
        }
    }

    /// Load the config at `path`, writing the defaults there first if it does not exist.
    pub fn load_or_create(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        if !path.exists() {
            log::info!(
                "Config not found at {}, creating default configuration",
                path.display()
            );
            let store = Self::new(path, MonitorConfig::default());
            store.save()?;
            return Ok(store);
        }

        let text = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let cfg = parse(&text, &path)?;
        Ok(Self::new(path, cfg))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> MonitorConfig {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swap the monitored target and persist it.
    ///
    /// The in-memory value is updated even when writing the file fails, so
    /// monitoring continues against the new target either way.
    pub fn update_target(&self, address: &str) -> Result<(), ConfigError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(ConfigError::Invalid("target address must not be empty".into()));
        }
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        guard.target_address = address.to_string();
        write_file(&self.path, &guard)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        write_file(&self.path, &guard)
    }
}

fn write_file(path: &Path, cfg: &MonitorConfig) -> Result<(), ConfigError> {
    let io_err = |source: std::io::Error| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    fs::write(path, render(cfg)?).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let cfg = parse(
            "[network]\ntarget_address = \"10.0.0.1\"\n",
            Path::new("mem.toml"),
        )
        .unwrap();
        assert_eq!(cfg.target_address, "10.0.0.1");
        assert_eq!(cfg.failure_threshold, 3);
        assert_eq!(cfg.countdown_secs, 180);
        assert!(cfg.hide_after_recovery);
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let err = parse("[network]\nfailure_threshold = 0\n", Path::new("mem.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn load_or_create_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("linkwatchd.toml");

        let store = ConfigStore::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(store.snapshot(), MonitorConfig::default());

        let reloaded = ConfigStore::load_or_create(&path).unwrap();
        assert_eq!(reloaded.snapshot(), MonitorConfig::default());
    }

    #[test]
    fn update_target_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("linkwatchd.toml");
        let store = ConfigStore::load_or_create(&path).unwrap();

        store.update_target(" 10.1.2.3 ").unwrap();
        assert_eq!(store.snapshot().target_address, "10.1.2.3");

        let reloaded = ConfigStore::load_or_create(&path).unwrap();
        assert_eq!(reloaded.snapshot().target_address, "10.1.2.3");
    }

    #[test]
    fn failed_write_keeps_in_memory_target() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be makes the write fail.
        let path = dir.path().join("occupied");
        fs::create_dir(&path).unwrap();
        let store = ConfigStore::new(&path, MonitorConfig::default());

        let err = store.update_target("10.9.9.9").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert_eq!(store.snapshot().target_address, "10.9.9.9");
    }

    #[test]
    fn empty_target_is_rejected() {
        let store = ConfigStore::new("unused.toml", MonitorConfig::default());
        assert!(store.update_target("   ").is_err());
        assert_eq!(store.snapshot().target_address, "192.168.123.1");
    }
}

use crate::defaults;
use anyhow::{Context, Result};
use config::ConfigError;
use reportor_fs::ensure_directory_exists;
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub node: Node,
    pub cache: Cache,
    pub store: Store,
    pub sync: SyncSettings,
}

impl Config {
    pub fn read<D>(config_file: D) -> Result<Self, ConfigError>
    where
        D: AsRef<OsStr>,
    {
        let config_file = Path::new(&config_file);

        let config: Config = config::Config::builder()
            .add_source(config::File::from(config_file).format(config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;

        config
            .sync
            .validate()
            .map_err(|e| ConfigError::Message(e.to_string()))?;

        Ok(config)
    }
}

/// How this node names itself in the shared stores.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Node {
    /// Salt mixed into the hardware id so the raw machine id is never published.
    pub app_id: String,
    /// First segment of every node-scoped key.
    pub owner_prefix: String,
}

impl Default for Node {
    fn default() -> Self {
        Self {
            app_id: defaults::APP_ID.to_owned(),
            owner_prefix: defaults::OWNER_PREFIX.to_owned(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Cache {
    pub hosts: Vec<String>,
    pub mode: String,
    pub password: String,
    pub pool_size: u32,
}

impl Cache {
    pub fn is_configured(&self) -> bool {
        !self.hosts.is_empty()
    }

    pub fn mode(&self) -> Result<CacheMode, ModeUnrecognized> {
        self.mode.parse()
    }

    pub fn password(&self) -> Option<&str> {
        non_empty(&self.password)
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            mode: defaults::CACHE_MODE.to_owned(),
            password: String::new(),
            pool_size: defaults::CACHE_POOL_SIZE,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheMode {
    Node,
    Cluster,
}

impl FromStr for CacheMode {
    type Err = ModeUnrecognized;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "node" => Ok(CacheMode::Node),
            "cluster" => Ok(CacheMode::Cluster),
            _ => Err(ModeUnrecognized(s.to_owned())),
        }
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheMode::Node => write!(f, "node"),
            CacheMode::Cluster => write!(f, "cluster"),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("cache mode {0:?} is neither \"node\" nor \"cluster\"")]
pub struct ModeUnrecognized(pub String);

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Store {
    pub endpoints: Vec<String>,
    pub username: String,
    pub password: String,
    pub dial_timeout_secs: u64,
}

impl Store {
    pub fn is_configured(&self) -> bool {
        !self.endpoints.is_empty()
    }

    /// Credentials are only sent when a username is set.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        non_empty(&self.username).map(|username| (username, self.password.as_str()))
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }
}

impl Default for Store {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            username: String::new(),
            password: String::new(),
            dial_timeout_secs: defaults::STORE_DIAL_TIMEOUT_SECS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSettings {
    pub interval_secs: u64,
    pub service_interval_secs: u64,
    pub ttl_secs: u64,
    pub write_timeout_secs: u64,
    pub probe_timeout_ms: u64,
}

impl SyncSettings {
    /// Period of the device and stream loop.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Period of the service heartbeat loop.
    pub fn service_interval(&self) -> Duration {
        Duration::from_secs(self.service_interval_secs)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// A zero period would turn a loop into back-to-back publishing and a
    /// zero TTL would expire records as they are written.
    pub fn validate(&self) -> Result<(), InvalidSyncSettings> {
        for (field, value) in [
            ("interval_secs", self.interval_secs),
            ("service_interval_secs", self.service_interval_secs),
            ("ttl_secs", self.ttl_secs),
        ] {
            if value == 0 {
                return Err(InvalidSyncSettings { field });
            }
        }

        Ok(())
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("sync.{field} must be at least 1")]
pub struct InvalidSyncSettings {
    pub field: &'static str,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_secs: defaults::SYNC_INTERVAL_SECS,
            service_interval_secs: defaults::SYNC_SERVICE_INTERVAL_SECS,
            ttl_secs: defaults::SYNC_TTL_SECS,
            write_timeout_secs: defaults::WRITE_TIMEOUT_SECS,
            probe_timeout_ms: defaults::PROBE_TIMEOUT_MS,
        }
    }
}

fn non_empty(value: &str) -> Option<&str> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy)]
#[error("config not initialized")]
pub struct ConfigNotInitialized {}

pub fn read_config(config_path: PathBuf) -> Result<Result<Config, ConfigNotInitialized>> {
    if config_path.exists() {
        info!("Using config file at {}", config_path.display());
    } else {
        return Ok(Err(ConfigNotInitialized {}));
    }

    let file = Config::read(&config_path)
        .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;

    Ok(Ok(file))
}

pub fn initial_setup<F>(config_path: PathBuf, config_file: F) -> Result<()>
where
    F: Fn() -> Result<Config>,
{
    info!("Config file not found, running initial setup...");
    ensure_directory_exists(config_path.as_path())?;
    let initial_config = config_file()?;

    let toml = toml::to_string(&initial_config)?;
    fs::write(&config_path, toml)?;

    info!(
        "Initial setup complete, config file created at {} ",
        config_path.as_path().display()
    );
    Ok(())
}

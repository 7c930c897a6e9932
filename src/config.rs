use crate::prelude::*;

use serde::Deserialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub inverter: Inverter,

    #[serde(default = "Config::default_logging")]
    pub logging: Logging,

    #[serde(default = "Config::default_events")]
    pub events: Events,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,
}

// Inverter {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Inverter {
    pub host: String,

    #[serde(default = "Config::default_port")]
    pub port: u16,

    #[serde(default = "Config::default_unit_id")]
    pub unit_id: u8,

    #[serde(default = "Config::default_register_base")]
    pub register_base: u16,

    #[serde(default = "Config::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Inverter {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn register_base(&self) -> u16 {
        self.register_base
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
} // }}}

// Logging {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Logging {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    #[serde(default = "Config::default_log_directory")]
    pub directory: String,

    #[serde(default = "Config::default_file_prefix")]
    pub file_prefix: String,

    #[serde(default = "Config::default_log_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "Config::default_max_file_size_mb")]
    pub max_file_size_mb: u64,
}

impl Logging {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn directory(&self) -> PathBuf {
        PathBuf::from(&self.directory)
    }

    pub fn file_prefix(&self) -> &str {
        &self.file_prefix
    }

    /// Minimum wall-clock spacing between persisted rows.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Rotation ceiling in bytes.
    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
} // }}}

// Events {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Events {
    #[serde(default = "Config::default_log_directory")]
    pub directory: String,
}

impl Events {
    pub fn directory(&self) -> PathBuf {
        PathBuf::from(&self.directory)
    }
} // }}}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("error reading config file {}: {}", file, err))?;

        let config: Self = serde_yaml::from_str(&content)
            .map_err(|err| anyhow!("error parsing config file {}: {}", file, err))?;

        Ok(config)
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }

    fn default_enabled() -> bool {
        true
    }

    fn default_port() -> u16 {
        502
    }

    fn default_unit_id() -> u8 {
        1
    }

    fn default_register_base() -> u16 {
        0
    }

    fn default_poll_interval_ms() -> u64 {
        500
    }

    fn default_log_directory() -> String {
        "./logs".to_string()
    }

    fn default_file_prefix() -> String {
        "inverter_log".to_string()
    }

    fn default_log_interval_ms() -> u64 {
        1000
    }

    fn default_max_file_size_mb() -> u64 {
        100
    }

    fn default_logging() -> Logging {
        Logging {
            enabled: true,
            directory: Self::default_log_directory(),
            file_prefix: Self::default_file_prefix(),
            interval_ms: Self::default_log_interval_ms(),
            max_file_size_mb: Self::default_max_file_size_mb(),
        }
    }

    fn default_events() -> Events {
        Events {
            directory: Self::default_log_directory(),
        }
    }
}

pub struct ConfigWrapper {
    config: Arc<Mutex<Config>>,
}

impl Clone for ConfigWrapper {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
        }
    }
}

impl ConfigWrapper {
    pub fn new(file: String) -> Result<Self> {
        Ok(Self::from_config(Config::new(file)?))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
        }
    }

    pub fn inverter(&self) -> Inverter {
        self.config.lock().unwrap().inverter.clone()
    }

    pub fn logging(&self) -> Logging {
        self.config.lock().unwrap().logging.clone()
    }

    pub fn events(&self) -> Events {
        self.config.lock().unwrap().events.clone()
    }

    pub fn loglevel(&self) -> String {
        self.config.lock().unwrap().loglevel.clone()
    }
}

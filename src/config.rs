use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::jobs::MAX_ACTION_TIMEOUT;
use crate::paths::{default_data_dir, DataPaths};

const DEFAULT_LISTEN_PORT: u16 = 7331;
const DEFAULT_MAX_PROFILES: usize = 3;
const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(2 * 60);
const DEFAULT_ENABLE_TIMEOUT: Duration = Duration::from_secs(20 * 60);
const DEFAULT_PORT_MIN: u16 = 8080;
const DEFAULT_PORT_MAX: u16 = 9000;
const DEFAULT_IMAGE_REPOSITORY: &str = "kimmio/kimmio-app";

/// Launcher configuration, built once at startup and shared by reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Port reserved for the launcher itself; profiles may not claim it.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default = "default_max_profiles")]
    pub max_profiles: usize,
    #[serde(default = "default_action_timeout", with = "humantime_serde")]
    pub action_timeout: Duration,
    #[serde(default = "default_enable_timeout", with = "humantime_serde")]
    pub enable_timeout: Duration,
    #[serde(default = "default_port_min")]
    pub profile_port_min: u16,
    #[serde(default = "default_port_max")]
    pub profile_port_max: u16,
    #[serde(default = "default_image_repository")]
    pub image_repository: String,
}

fn default_listen_port() -> u16 {
    DEFAULT_LISTEN_PORT
}

fn default_max_profiles() -> usize {
    DEFAULT_MAX_PROFILES
}

fn default_action_timeout() -> Duration {
    DEFAULT_ACTION_TIMEOUT
}

fn default_enable_timeout() -> Duration {
    DEFAULT_ENABLE_TIMEOUT
}

fn default_port_min() -> u16 {
    DEFAULT_PORT_MIN
}

fn default_port_max() -> u16 {
    DEFAULT_PORT_MAX
}

fn default_image_repository() -> String {
    DEFAULT_IMAGE_REPOSITORY.to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            listen_port: DEFAULT_LISTEN_PORT,
            max_profiles: DEFAULT_MAX_PROFILES,
            action_timeout: DEFAULT_ACTION_TIMEOUT,
            enable_timeout: DEFAULT_ENABLE_TIMEOUT,
            profile_port_min: DEFAULT_PORT_MIN,
            profile_port_max: DEFAULT_PORT_MAX,
            image_repository: DEFAULT_IMAGE_REPOSITORY.to_string(),
        }
    }
}

impl AppConfig {
    /// Build the configuration from defaults, `<dataDir>/config.toml` and the
    /// `KIMMIO_*` environment, with `data_dir_override` taking precedence.
    pub fn load(data_dir_override: Option<PathBuf>) -> Result<Self> {
        let lookup = |key: &str| std::env::var(key).ok();
        let data_dir = data_dir_override
            .or_else(|| non_empty(lookup("KIMMIO_DATA_DIR")).map(PathBuf::from))
            .unwrap_or_else(default_data_dir);

        let mut config = Self::load_file(&DataPaths::new(&data_dir))?;
        config.apply_overrides(lookup);
        config.data_dir = data_dir;
        config.normalize();
        Ok(config)
    }

    /// Configuration rooted at `data_dir` with every other value defaulted.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self {
            data_dir: data_dir.into(),
            ..Self::default()
        };
        config.normalize();
        config
    }

    fn load_file(paths: &DataPaths) -> Result<Self> {
        let path = paths.config_file();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path).map_err(|e| AppError::config(e.to_string()))?;
        toml::from_str(&content).map_err(|e| {
            AppError::config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Apply `KIMMIO_*` overrides. Unparsable values keep the current setting.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_env(&lookup, "KIMMIO_PORT") {
            self.listen_port = v;
        }
        if let Some(v) = parse_env(&lookup, "KIMMIO_MAX_PROFILES") {
            self.max_profiles = v;
        }
        if let Some(v) = duration_env(&lookup, "KIMMIO_ACTION_TIMEOUT") {
            self.action_timeout = v;
        }
        if let Some(v) = duration_env(&lookup, "KIMMIO_ENABLE_TIMEOUT") {
            self.enable_timeout = v;
        }
        if let Some(v) = parse_env(&lookup, "KIMMIO_PROFILE_PORT_MIN") {
            self.profile_port_min = v;
        }
        if let Some(v) = parse_env(&lookup, "KIMMIO_PROFILE_PORT_MAX") {
            self.profile_port_max = v;
        }
    }

    fn normalize(&mut self) {
        if self.max_profiles < 1 {
            self.max_profiles = 1;
        }
        if self.profile_port_min < 1024 {
            self.profile_port_min = 1024;
        }
        if self.profile_port_max <= self.profile_port_min {
            self.profile_port_max = self.profile_port_min.saturating_add(1000);
        }
        self.action_timeout = self.action_timeout.min(MAX_ACTION_TIMEOUT);
        self.enable_timeout = self.enable_timeout.min(MAX_ACTION_TIMEOUT);
        if self.enable_timeout < self.action_timeout {
            self.enable_timeout = self.action_timeout;
        }
        if self.image_repository.trim().is_empty() {
            self.image_repository = default_image_repository();
        }
    }

    pub fn paths(&self) -> DataPaths {
        DataPaths::new(&self.data_dir)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env<F, T>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let raw = non_empty(lookup(key))?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("Ignoring invalid value for {}: {}", key, raw);
            None
        }
    }
}

fn duration_env<F>(lookup: &F, key: &str) -> Option<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = non_empty(lookup(key))?;
    match humantime::parse_duration(&raw) {
        Ok(v) => Some(v),
        Err(e) => {
            log::warn!("Ignoring invalid duration for {}: {} ({})", key, raw, e);
            None
        }
    }
}

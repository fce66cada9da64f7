use serde::{Deserialize, Serialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use displayd_common::error::ConfigError;
use displayd_common::ipc::{default_socket_path, CONTROL_SOCKET_NAME, HELPER_SOCKET_NAME};
use displayd_common::video::{RefreshRateOption, ResolutionOption};
use displayd_common::{DisplaydError, RefreshRate, Resolution, Result, StaticVideoConfig};

// Custom deserialization for Duration from human-readable strings
fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let duration_str = String::deserialize(deserializer)?;
    displayd_common::duration::parse_duration(&duration_str)
        .map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub video: StaticVideoConfig,
    #[serde(default)]
    pub helper: HelperConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HelperConfig {
    /// Path or name of the helper binary. Looked up on PATH when unset.
    #[serde(default)]
    pub executable: Option<PathBuf>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub socket: Option<PathBuf>,
    #[serde(default = "default_feature_enabled")]
    pub feature_enabled: bool,
    #[serde(
        default = "default_startup_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "humantime_serde::serialize"
    )]
    pub startup_timeout: Duration,
    /// Upper bound on a single helper request before the helper counts as hung.
    #[serde(
        default = "default_request_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "humantime_serde::serialize"
    )]
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(
        default = "default_retry_delay",
        deserialize_with = "deserialize_duration",
        serialize_with = "humantime_serde::serialize"
    )]
    pub retry_delay: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub socket: Option<PathBuf>,
}

// Default values
fn default_feature_enabled() -> bool {
    true
}

fn default_startup_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_request_timeout() -> Duration {
    displayd_common::ipc::DEFAULT_IPC_TIMEOUT
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(2)
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            executable: None,
            args: Vec::new(),
            socket: None,
            feature_enabled: default_feature_enabled(),
            startup_timeout: default_startup_timeout(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay: default_retry_delay(),
        }
    }
}

impl HelperConfig {
    pub fn socket_path(&self) -> PathBuf {
        self.socket
            .clone()
            .unwrap_or_else(|| default_socket_path(HELPER_SOCKET_NAME))
    }
}

impl DaemonConfig {
    pub fn socket_path(&self) -> PathBuf {
        self.socket
            .clone()
            .unwrap_or_else(|| default_socket_path(CONTROL_SOCKET_NAME))
    }
}

impl Config {
    /// Load the user's config file, or defaults when there is none.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            log::info!("No configuration at {:?}, using defaults", config_path);
            return Ok(Self::default());
        }

        Self::load_from_path(&config_path)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DisplaydError::Config(ConfigError::FileRead {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "File not found"),
            }));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| DisplaydError::Config(ConfigError::FileRead {
                path: path.to_path_buf(),
                source: e,
            }))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| DisplaydError::Config(ConfigError::TomlParse {
                message: e.to_string(),
            }))?;

        log::debug!("Parsed configuration from {:?}: {:?}", path, config);

        config.validate()?;
        Ok(config)
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or(DisplaydError::Config(ConfigError::NoConfigDir))?
            .join("displayd");

        Ok(config_dir.join("config.toml"))
    }

    fn validate(&self) -> Result<()> {
        self.validate_video()?;

        if self.recovery.max_attempts == 0 {
            return Err(DisplaydError::Config(ConfigError::InvalidValue {
                field: "recovery.max_attempts".to_string(),
                value: self.recovery.max_attempts.to_string(),
            }));
        }

        if let Some(executable) = &self.helper.executable {
            if executable.as_os_str().is_empty() {
                return Err(DisplaydError::Config(ConfigError::InvalidValue {
                    field: "helper.executable".to_string(),
                    value: String::new(),
                }));
            }
        }

        if self.helper.startup_timeout.is_zero() {
            return Err(DisplaydError::Config(ConfigError::InvalidValue {
                field: "helper.startup_timeout".to_string(),
                value: format!("{:?}", self.helper.startup_timeout),
            }));
        }

        if self.helper.request_timeout.is_zero() {
            return Err(DisplaydError::Config(ConfigError::InvalidValue {
                field: "helper.request_timeout".to_string(),
                value: format!("{:?}", self.helper.request_timeout),
            }));
        }

        Ok(())
    }

    fn validate_video(&self) -> Result<()> {
        let video = &self.video;

        if video.resolution_option == ResolutionOption::Manual {
            let value = video.manual_resolution.as_deref().unwrap_or_default();
            if value.parse::<Resolution>().is_err() {
                return Err(DisplaydError::Config(ConfigError::InvalidValue {
                    field: "video.manual_resolution".to_string(),
                    value: value.to_string(),
                }));
            }
        }

        if video.refresh_rate_option == RefreshRateOption::Manual {
            let value = video.manual_refresh_rate.as_deref().unwrap_or_default();
            if value.parse::<RefreshRate>().is_err() {
                return Err(DisplaydError::Config(ConfigError::InvalidValue {
                    field: "video.manual_refresh_rate".to_string(),
                    value: value.to_string(),
                }));
            }
        }

        Ok(())
    }
}

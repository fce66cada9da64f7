use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for displayd operations
#[derive(Error, Debug)]
pub enum DisplaydError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    #[error("Display helper error: {0}")]
    Helper(#[from] HelperError),

    #[error("Virtual display error: {0}")]
    VirtualDisplay(#[from] VirtualDisplayError),

    #[error("System error: {0}")]
    System(#[from] SystemError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {path:?}")]
    FileRead { path: PathBuf, source: std::io::Error },

    #[error("Failed to parse TOML configuration: {message}")]
    TomlParse { message: String },

    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Could not determine config directory")]
    NoConfigDir,
}

/// IPC communication errors
#[derive(Error, Debug)]
pub enum IpcError {
    #[error("Failed to connect to {endpoint}")]
    Connection { endpoint: String },

    #[error("No reply from {endpoint} within {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },

    #[error("Invalid IPC message format")]
    InvalidMessage,

    #[error("Unexpected IPC response: {response}")]
    UnexpectedResponse { response: String },
}

/// Display helper process errors
#[derive(Error, Debug)]
pub enum HelperError {
    #[error("Display helper executable not found: {name}")]
    ExecutableNotFound { name: String },

    #[error("Failed to spawn display helper: {path:?}")]
    Spawn { path: PathBuf, source: std::io::Error },

    #[error("Display helper exited with status {code:?}")]
    Exited { code: Option<i32> },

    #[error("Display helper rejected request: {message}")]
    Rejected { message: String },
}

/// Virtual display lifecycle errors
#[derive(Error, Debug)]
pub enum VirtualDisplayError {
    #[error("Virtual display creation failed: {message}")]
    Creation { message: String },

    #[error("Virtual display {guid} has no resolvable device id")]
    DeviceIdUnresolved { guid: uuid::Uuid },

    #[error("Virtual display {guid} is not tracked")]
    NotTracked { guid: uuid::Uuid },

    #[error("Virtual display removal failed: {message}")]
    Removal { message: String },
}

/// System-level errors
#[derive(Error, Debug)]
pub enum SystemError {
    #[error("Failed to access file system")]
    FileSystem,

    #[error("Insufficient permissions")]
    Permissions,
}

/// Validation errors
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid resolution: {value}")]
    InvalidResolution { value: String },

    #[error("Invalid refresh rate: {value}")]
    InvalidRefreshRate { value: String },

    #[error("Invalid duration: {duration}")]
    InvalidDuration { duration: String },
}

pub type Result<T> = std::result::Result<T, DisplaydError>;

impl From<std::io::Error> for DisplaydError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => DisplaydError::System(SystemError::Permissions),
            _ => DisplaydError::System(SystemError::FileSystem),
        }
    }
}

impl From<serde_json::Error> for DisplaydError {
    fn from(_err: serde_json::Error) -> Self {
        DisplaydError::Ipc(IpcError::InvalidMessage)
    }
}

impl From<toml::de::Error> for DisplaydError {
    fn from(err: toml::de::Error) -> Self {
        DisplaydError::Config(ConfigError::TomlParse {
            message: err.to_string(),
        })
    }
}

// Error reporting utilities
pub trait ErrorReporting {
    fn log_error(&self, context: &str);
    fn user_friendly_message(&self) -> String;
}

impl ErrorReporting for DisplaydError {
    fn log_error(&self, context: &str) {
        log::error!("{}: {:?}", context, self);
    }

    fn user_friendly_message(&self) -> String {
        match self {
            DisplaydError::Config(ConfigError::FileRead { path, .. }) => {
                format!("Configuration file not found: {:?}", path)
            }
            DisplaydError::Config(ConfigError::TomlParse { message }) => {
                format!("Invalid configuration format: {}", message)
            }
            DisplaydError::Helper(HelperError::ExecutableNotFound { name }) => {
                format!("Display helper '{}' was not found. Set [helper] executable in the config.", name)
            }
            DisplaydError::Ipc(IpcError::Connection { endpoint }) => {
                format!("Could not reach {}. Is it running?", endpoint)
            }
            DisplaydError::Ipc(IpcError::Timeout { endpoint, .. }) => {
                format!("{} accepted the request but never answered", endpoint)
            }
            DisplaydError::VirtualDisplay(VirtualDisplayError::DeviceIdUnresolved { guid }) => {
                format!("Virtual display {} was created but never showed up as a display device", guid)
            }
            _ => self.to_string(),
        }
    }
}

// Error types for configuration loading

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid value for \"{key}\": {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Environment variable error: {0}")]
    EnvError(#[from] std::env::VarError),
}

impl From<ConfigError> for sprig_core::Error {
    fn from(err: ConfigError) -> Self {
        sprig_core::Error::Logic(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

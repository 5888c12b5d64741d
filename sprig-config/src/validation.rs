// Configuration validation

use crate::{AppConfig, ConfigError, LoggingSettings, Result};
use sprig_core::Charset;
use sprig_core::logging::{LogFormat, LogLevel};
use std::str::FromStr;

/// Checks a loaded configuration before it is used
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.into(),
    }
}

impl Validate for AppConfig {
    fn validate(&self) -> Result<()> {
        if Charset::from_name(&self.charset).is_none() {
            return Err(invalid("charset", format!("unsupported charset \"{}\"", self.charset)));
        }
        if self.http_port == 0 {
            return Err(invalid("http_port", "must not be 0"));
        }
        if self.https_port == 0 {
            return Err(invalid("https_port", "must not be 0"));
        }
        self.logging.validate()
    }
}

impl Validate for LoggingSettings {
    fn validate(&self) -> Result<()> {
        LogLevel::from_str(&self.level).map_err(|e| invalid("logging.level", e.to_string()))?;
        LogFormat::from_str(&self.format).map_err(|e| invalid("logging.format", e.to_string()))?;
        if self.file.as_deref() == Some("") {
            return Err(invalid("logging.file", "must not be empty"));
        }
        Ok(())
    }
}

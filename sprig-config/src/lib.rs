// Configuration management for Sprig applications

pub mod env;
pub mod error;
pub mod loader;
pub mod provider;
pub mod validation;

pub use env::EnvLoader;
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};
pub use provider::ConfigServiceProvider;
pub use validation::Validate;

use serde::{Deserialize, Serialize};
use sprig_core::logging::{LogConfig, LogFormat, LogLevel, LogOutput};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

/// Application settings mirrored into the container parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub debug: bool,
    pub charset: String,
    pub http_port: u16,
    pub https_port: u16,
    pub logging: LoggingSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            debug: false,
            charset: "UTF-8".to_string(),
            http_port: 80,
            https_port: 443,
            logging: LoggingSettings::default(),
        }
    }
}

/// `[logging]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log every request, response and error
    pub enabled: bool,
    pub level: String,
    pub format: String,
    /// Write to this file instead of stdout
    pub file: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            level: "info".to_string(),
            format: "json".to_string(),
            file: None,
        }
    }
}

impl LoggingSettings {
    /// Subscriber settings for these values
    pub fn to_log_config(&self) -> Result<LogConfig> {
        let level = LogLevel::from_str(&self.level)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        let format = LogFormat::from_str(&self.format)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        let output = match &self.file {
            Some(path) => LogOutput::File(path.clone()),
            None => LogOutput::Stdout,
        };
        Ok(LogConfig::new().level(level).format(format).output(output))
    }
}

impl AppConfig {
    /// Load a file, picking the format from its extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = FileFormat::from_path(path)?;
        let value = ConfigLoader::new(format).load_file(path)?;
        Self::from_value(value, format)
    }

    pub fn parse(content: &str, format: FileFormat) -> Result<Self> {
        let value = ConfigLoader::new(format).parse(content)?;
        Self::from_value(value, format)
    }

    fn from_value(value: serde_json::Value, format: FileFormat) -> Result<Self> {
        match format {
            FileFormat::Env => {
                let vars = EnvLoader::default().collect(
                    value
                        .as_object()
                        .into_iter()
                        .flatten()
                        .map(|(k, v)| (k.clone(), v.as_str().unwrap_or_default().to_string())),
                );
                Self::default().apply_vars(&vars)
            }
            _ => serde_json::from_value(value)
                .map_err(|e| ConfigError::ParseError(e.to_string())),
        }
    }

    /// Overlay `<PREFIX>_DEBUG`, `<PREFIX>_CHARSET`, `<PREFIX>_HTTP_PORT`,
    /// `<PREFIX>_HTTPS_PORT` and `<PREFIX>_LOG_*` from the environment
    pub fn load_env(self, prefix: &str) -> Result<Self> {
        let vars = EnvLoader::new(Some(prefix.to_string())).load();
        self.apply_vars(&vars)
    }

    /// Same overlay, read from a `.env` file
    pub fn load_dotenv(self, path: impl AsRef<Path>, prefix: Option<&str>) -> Result<Self> {
        let vars = EnvLoader::new(prefix.map(str::to_string)).load_dotenv(path.as_ref())?;
        self.apply_vars(&vars)
    }

    /// Overlay normalized variables (lowercase, prefix stripped)
    pub fn apply_vars(mut self, vars: &HashMap<String, String>) -> Result<Self> {
        for (key, value) in vars {
            match key.as_str() {
                "debug" => self.debug = parse_bool(key, value)?,
                "charset" => self.charset = value.clone(),
                "http_port" => self.http_port = parse_port(key, value)?,
                "https_port" => self.https_port = parse_port(key, value)?,
                "log_enabled" => self.logging.enabled = parse_bool(key, value)?,
                "log_level" => self.logging.level = value.clone(),
                "log_format" => self.logging.format = value.clone(),
                "log_file" => self.logging.file = Some(value.clone()),
                _ => {}
            }
        }
        Ok(self)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("\"{}\" is not a boolean", other),
        }),
    }
}

fn parse_port(key: &str, value: &str) -> Result<u16> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: format!("\"{}\" is not a port number", value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_with_partial_sections() {
        let config = AppConfig::parse(
            "debug = true\nhttp_port = 8080\n[logging]\nenabled = true\n",
            FileFormat::Toml,
        )
        .unwrap();

        assert!(config.debug);
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.https_port, 443);
        assert_eq!(config.charset, "UTF-8");
        assert!(config.logging.enabled);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_json() {
        let config = AppConfig::parse(r#"{"charset": "US-ASCII"}"#, FileFormat::Json).unwrap();
        assert_eq!(config.charset, "US-ASCII");
        assert!(!config.debug);
    }

    #[test]
    fn test_env_format() {
        let config = AppConfig::parse("DEBUG=yes\nHTTPS_PORT=8443\nLOG_LEVEL=debug\n", FileFormat::Env)
            .unwrap();
        assert!(config.debug);
        assert_eq!(config.https_port, 8443);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_bad_values() {
        assert!(matches!(
            AppConfig::parse("DEBUG=maybe", FileFormat::Env),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(AppConfig::parse("HTTP_PORT=99999", FileFormat::Env).is_err());
        assert!(AppConfig::parse("http_port = \"eighty\"", FileFormat::Toml).is_err());
    }

    #[test]
    fn test_to_log_config() {
        let settings = LoggingSettings {
            enabled: true,
            level: "warn".to_string(),
            format: "pretty".to_string(),
            file: Some("/var/log/app.log".to_string()),
        };
        let config = settings.to_log_config().unwrap();
        assert_eq!(config.level, LogLevel::Warn);
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.output, LogOutput::File("/var/log/app.log".to_string()));

        let settings = LoggingSettings {
            level: "chatty".to_string(),
            ..LoggingSettings::default()
        };
        assert!(settings.to_log_config().is_err());
    }
}

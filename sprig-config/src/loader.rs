// Configuration file parsing

use crate::{ConfigError, Result};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Toml,
    /// `KEY=value` lines, as in a `.env` file
    Env,
}

impl FileFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "json" => Some(FileFormat::Json),
            "toml" => Some(FileFormat::Toml),
            "env" => Some(FileFormat::Env),
            _ => None,
        }
    }

    /// Detect the format of `path`; a bare `.env` file counts as `Env`
    pub fn from_path(path: &Path) -> Result<Self> {
        if path.file_name().and_then(|n| n.to_str()) == Some(".env") {
            return Ok(FileFormat::Env);
        }
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| ConfigError::LoadError(format!("{} has no extension", path.display())))?;
        Self::from_extension(ext)
            .ok_or_else(|| ConfigError::LoadError(format!("Unsupported format: {}", ext)))
    }
}

/// Reads a file into a JSON tree
pub struct ConfigLoader {
    format: FileFormat,
}

impl ConfigLoader {
    pub fn new(format: FileFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    pub fn load_file(&self, path: &Path) -> Result<Value> {
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigError::LoadError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        self.parse(&content)
    }

    pub fn parse(&self, content: &str) -> Result<Value> {
        match self.format {
            FileFormat::Json => serde_json::from_str(content)
                .map_err(|e| ConfigError::ParseError(format!("JSON parse error: {}", e))),
            FileFormat::Toml => {
                let value: toml::Value = toml::from_str(content)
                    .map_err(|e| ConfigError::ParseError(format!("TOML parse error: {}", e)))?;
                serde_json::to_value(value)
                    .map_err(|e| ConfigError::ParseError(format!("TOML conversion error: {}", e)))
            }
            FileFormat::Env => Ok(parse_env(content)),
        }
    }
}

// Flat object of strings; keys keep their case
fn parse_env(content: &str) -> Value {
    let mut map = serde_json::Map::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            map.insert(key.trim().to_string(), Value::String(value.to_string()));
        }
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_toml_tables() {
        let loader = ConfigLoader::new(FileFormat::Toml);
        let value = loader
            .parse("debug = true\n[logging]\nlevel = \"debug\"\n")
            .unwrap();
        assert_eq!(value["debug"], Value::Bool(true));
        assert_eq!(value["logging"]["level"], Value::from("debug"));
    }

    #[test]
    fn test_parse_env_lines() {
        let loader = ConfigLoader::new(FileFormat::Env);
        let value = loader
            .parse("# comment\nDEBUG=1\nexport CHARSET=\"ISO-8859-1\"\n\nBROKEN\n")
            .unwrap();
        assert_eq!(value["DEBUG"], Value::from("1"));
        assert_eq!(value["CHARSET"], Value::from("ISO-8859-1"));
        assert_eq!(value.as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_invalid_json_is_a_parse_error() {
        let loader = ConfigLoader::new(FileFormat::Json);
        assert!(matches!(loader.parse("{nope"), Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(FileFormat::from_extension("TOML"), Some(FileFormat::Toml));
        assert_eq!(FileFormat::from_extension("yaml"), None);
        assert_eq!(
            FileFormat::from_path(Path::new("/srv/app/.env")).unwrap(),
            FileFormat::Env
        );
        assert_eq!(
            FileFormat::from_path(Path::new("app.json")).unwrap(),
            FileFormat::Json
        );
        assert!(FileFormat::from_path(Path::new("Makefile")).is_err());
    }
}

// Environment variable loading

use crate::{ConfigError, Result};
use std::collections::HashMap;
use std::env;
use std::path::Path;

/// Reads variables from the process environment or a `.env` file.
///
/// With a prefix, only `PREFIX_*` variables are kept and the prefix is
/// stripped; keys come back lowercased (`APP_HTTP_PORT` -> `http_port`).
pub struct EnvLoader {
    prefix: Option<String>,
}

impl EnvLoader {
    pub fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    /// Variables of the current process
    pub fn load(&self) -> HashMap<String, String> {
        self.collect(env::vars())
    }

    /// Variables of a `.env` file, without touching the process environment
    pub fn load_dotenv(&self, path: &Path) -> Result<HashMap<String, String>> {
        let iter = dotenvy::from_path_iter(path)
            .map_err(|e| ConfigError::LoadError(format!("{}: {}", path.display(), e)))?;
        let mut vars = Vec::new();
        for item in iter {
            vars.push(item.map_err(|e| ConfigError::ParseError(e.to_string()))?);
        }
        Ok(self.collect(vars))
    }

    /// Filter and normalize raw `(key, value)` pairs
    pub fn collect<I>(&self, vars: I) -> HashMap<String, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        vars.into_iter()
            .filter_map(|(key, value)| {
                let key = match &self.prefix {
                    Some(prefix) => key.strip_prefix(prefix.as_str())?.strip_prefix('_')?.to_string(),
                    None => key,
                };
                Some((key.to_lowercase(), value))
            })
            .collect()
    }

    /// Read one variable, prefix applied
    pub fn load_var(&self, key: &str) -> Result<String> {
        let full_key = match &self.prefix {
            Some(prefix) => format!("{}_{}", prefix, key.to_uppercase()),
            None => key.to_uppercase(),
        };
        env::var(&full_key).map_err(ConfigError::EnvError)
    }

    pub fn load_var_or(&self, key: &str, default: &str) -> String {
        self.load_var(key).unwrap_or_else(|_| default.to_string())
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::new(None)
    }
}

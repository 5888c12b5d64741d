// Exposes an AppConfig to the application container

use crate::{AppConfig, Result, Validate};
use sprig_core::{Application, Error, ServiceProvider};
use std::path::Path;
use tracing::debug;

/// Registers the configuration as container parameters.
///
/// Sets `debug`, `charset`, `request.http_port`, `request.https_port` and
/// `logger.enabled`, plus a `config` entry holding the whole [`AppConfig`].
/// Parameters given at registration still win over these values.
pub struct ConfigServiceProvider {
    config: AppConfig,
}

impl ConfigServiceProvider {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(AppConfig::from_file(path)?))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

impl ServiceProvider for ConfigServiceProvider {
    fn name(&self) -> &'static str {
        "config"
    }

    fn register(&self, app: &Application) -> std::result::Result<(), Error> {
        self.config.validate()?;

        let container = app.container();
        container.set("debug", self.config.debug);
        container.set("charset", self.config.charset.clone());
        container.set("request.http_port", self.config.http_port);
        container.set("request.https_port", self.config.https_port);
        container.set("logger.enabled", self.config.logging.enabled);
        container.set("config", self.config.clone());

        debug!(debug = self.config.debug, charset = %self.config.charset, "Configuration registered");
        Ok(())
    }
}

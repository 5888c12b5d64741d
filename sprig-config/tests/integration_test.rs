//! Integration tests for sprig-config

use sprig_config::*;
use sprig_core::{Application, Error, HttpRequest, Parameters, RequestType};
use std::fs;
use std::path::PathBuf;

fn temp_file(name: &str, content: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("sprig-config-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_from_toml_file() {
    let path = temp_file(
        "app.toml",
        "debug = true\ncharset = \"ISO-8859-1\"\n[logging]\nlevel = \"debug\"\n",
    );
    let config = AppConfig::from_file(&path).unwrap();

    assert!(config.debug);
    assert_eq!(config.charset, "ISO-8859-1");
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.http_port, 80);
}

#[test]
fn test_dotenv_overlay() {
    let path = temp_file("overlay.env", "APP_DEBUG=true\nAPP_HTTP_PORT=8000\nOTHER=1\n");
    let config = AppConfig::default()
        .load_dotenv(&path, Some("APP"))
        .unwrap();

    assert!(config.debug);
    assert_eq!(config.http_port, 8000);
}

#[test]
fn test_unsupported_file() {
    let path = temp_file("app.yaml", "debug: true\n");
    assert!(matches!(
        AppConfig::from_file(&path),
        Err(ConfigError::LoadError(_))
    ));
}

#[tokio::test]
async fn test_provider_sets_parameters() {
    let config = AppConfig {
        debug: true,
        charset: "US-ASCII".to_string(),
        ..AppConfig::default()
    };
    let app = Application::new();
    app.register(ConfigServiceProvider::new(config.clone())).unwrap();

    assert!(app.is_debug());
    assert_eq!(app.charset(), "US-ASCII");
    assert_eq!(*app.container().get::<AppConfig>("config").unwrap(), config);
    assert_eq!(app.escape("é").unwrap(), "&#233;");

    // Debug error pages include the message
    let response = app
        .handle(HttpRequest::new("GET", "/missing"), RequestType::Master, true)
        .await
        .unwrap();
    assert_eq!(response.status, 404);
    assert!(response.body_string().contains("Route not found"));
}

#[test]
fn test_registration_parameters_win() {
    let app = Application::new();
    app.register_with(
        ConfigServiceProvider::new(AppConfig::default()),
        Parameters::new().with("debug", true),
    )
    .unwrap();
    assert!(app.is_debug());
}

#[test]
fn test_invalid_config_fails_registration() {
    let config = AppConfig {
        charset: "EBCDIC".to_string(),
        ..AppConfig::default()
    };
    let app = Application::new();
    let result = app.register(ConfigServiceProvider::new(config));
    assert!(matches!(result, Err(Error::Logic(_))));
}

#[test]
fn test_config_error_display() {
    let err = ConfigError::InvalidValue {
        key: "http_port".to_string(),
        reason: "must not be 0".to_string(),
    };
    assert_eq!(err.to_string(), "Invalid value for \"http_port\": must not be 0");
}

//! Configuration loader

use config::{Config, Environment, File};
use std::path::Path;

use super::types::{AppConfig, CredentialConfig};
use crate::common::errors::{CoordinatorError, Result};

/// Load configuration from file and environment variables
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with APP_)
/// 2. Configuration file (TOML format)
/// 3. Default values
pub fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    let mut builder = Config::builder();

    // Add default config file if it exists
    if let Some(path) = config_path {
        if Path::new(path).exists() {
            builder = builder.add_source(File::with_name(path).required(false));
        }
    }

    // Add environment variables with APP_ prefix
    builder = builder.add_source(
        Environment::with_prefix("APP")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder
        .build()
        .map_err(|e| CoordinatorError::Configuration(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| CoordinatorError::Configuration(e.to_string()))
}

/// Load configuration from environment variables only
///
/// Supports a single credential described by `BROKER_API_KEY`,
/// `BROKER_IDENTIFIER` and `BROKER_PASSWORD`; useful for local runs
/// without a config file.
pub fn load_from_env() -> Result<AppConfig> {
    // Try to load from .env file
    dotenvy::dotenv().ok();

    let mut config = AppConfig {
        broker: Default::default(),
        credentials: Vec::new(),
        scheduler: Default::default(),
        settings: Default::default(),
    };

    if let Ok(url) = std::env::var("BROKER_REST_URL") {
        config.broker.rest_url = url;
    }
    if let Ok(url) = std::env::var("BROKER_STREAM_URL") {
        config.broker.stream_url = url;
    }

    if let (Ok(api_key), Ok(identifier), Ok(password)) = (
        std::env::var("BROKER_API_KEY"),
        std::env::var("BROKER_IDENTIFIER"),
        std::env::var("BROKER_PASSWORD"),
    ) {
        config.credentials.push(CredentialConfig {
            id: std::env::var("BROKER_CREDENTIAL_ID").unwrap_or_else(|_| "default".to_string()),
            broker: std::env::var("BROKER_NAME").unwrap_or_else(|_| "capital".to_string()),
            api_key,
            identifier,
            password,
            demo: std::env::var("BROKER_DEMO")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            max_sessions: std::env::var("BROKER_MAX_SESSIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
        });
    }

    Ok(config)
}

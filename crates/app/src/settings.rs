//! Handles settings for the application.
//!
//! Values come from an optional `settings.toml` and are overridden by
//! `SPLITLEDGER__<SECTION>__<KEY>` environment variables, e.g.
//! `SPLITLEDGER__DATABASE__URL`.
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

const DEFAULT_CONFIG_PATH: &str = "settings";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct App {
    pub level: String,
}

impl Default for App {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Database {
    pub url: String,
}

impl Default for Database {
    fn default() -> Self {
        Self {
            url: "sqlite:./splitledger.db?mode=rwc".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app: App,
    pub database: Database,
}

impl Settings {
    pub fn new(path: Option<&str>) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name(path.unwrap_or(DEFAULT_CONFIG_PATH)).required(false))
            .add_source(Environment::with_prefix("SPLITLEDGER").separator("__"))
            .build()?;

        settings.try_deserialize()
    }
}

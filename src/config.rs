//! Configuration loading
//!
//! Handles loading configuration from embedded defaults, files, and environment.

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use deyu_asr::AsrConfig;
use deyu_chat::{ApiConfig, ChatConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Embedded default configuration (compiled into binary)
pub const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Backend API
    #[serde(default)]
    pub api: ApiConfig,
    /// Chat defaults
    #[serde(default)]
    pub chat: ChatConfig,
    /// Voice input
    #[serde(default)]
    pub asr: AsrConfig,
}

impl AppConfig {
    /// Raw auth token, empty when unset
    pub fn token(&self) -> String {
        self.api
            .token
            .as_ref()
            .map(|t| t.expose_secret().to_string())
            .unwrap_or_default()
    }
}

/// Load configuration from files and environment
pub fn load_config() -> Result<AppConfig> {
    load_config_in(Path::new("."))
}

/// Load configuration with override files resolved against `base`
pub fn load_config_in(base: &Path) -> Result<AppConfig> {
    let env_name = std::env::var("DEYU_ENV").unwrap_or_else(|_| "development".to_string());
    let file = |name: &str| {
        File::with_name(&base.join("config").join(name).to_string_lossy()).required(false)
    };

    let config = Config::builder()
        // 1. Embedded defaults (always available)
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        // 2. External overrides (optional)
        .add_source(file("default"))
        .add_source(file(&env_name))
        .add_source(file("local"))
        // 3. Environment variables (highest priority), e.g. DEYU_API__BASE_URL
        .add_source(
            Environment::with_prefix("DEYU")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    config
        .try_deserialize()
        .context("Failed to deserialize configuration")
}

use std::path::Path;

use serde::Deserialize;

use crate::{
    common::types::AnyResult,
    configs::{LoggingConfig, SessionConfig, VoiceConfig},
};

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub voice: VoiceConfig,
    pub logging: Option<LoggingConfig>,
    #[serde(default)]
    pub session: Option<SessionConfig>,
}

impl Config {
    /// Loads `path` when given, otherwise `config.toml`, then
    /// `config.default.toml`.
    pub fn load(path: Option<&Path>) -> AnyResult<Self> {
        let config_path = match path {
            Some(p) => p,
            None if Path::new("config.toml").exists() => Path::new("config.toml"),
            None if Path::new("config.default.toml").exists() => Path::new("config.default.toml"),
            None => return Err("config.toml or config.default.toml not found".into()),
        };

        let config_str = std::fs::read_to_string(config_path)?;
        if config_str.trim().is_empty() {
            return Err(format!("{} is empty", config_path.display()).into());
        }

        Self::parse(&config_str)
    }

    pub fn parse(config_str: &str) -> AnyResult<Self> {
        Ok(toml::from_str(config_str)?)
    }
}

//! Configuration file support for checkride
//!
//! Reads from .checkride/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration structure
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct Config {
    /// Text-generation backend settings
    #[serde(default)]
    pub generator: GeneratorConfig,
}

/// Settings for the chat-completions endpoint that writes scenario content
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GeneratorConfig {
    /// Base URL of an OpenAI-compatible API
    /// Default: "https://api.openai.com/v1"
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Model name sent in each request
    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable holding the API key
    /// Default: "CHECKRIDE_API_KEY"
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "CHECKRIDE_API_KEY".to_string()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_timeout() -> u64 {
    60
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            timeout_seconds: default_timeout(),
        }
    }
}

impl Config {
    /// Path to the config file, next to the database
    pub fn config_path() -> Option<PathBuf> {
        crate::db::Database::db_path()
            .parent()
            .map(|p| p.join("config.toml"))
    }

    /// Load config, falling back to defaults when the file is missing or
    /// malformed. A bad config file should never stop the engine.
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: failed to parse {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.generator.api_base, "https://api.openai.com/v1");
        assert_eq!(config.generator.api_key_env, "CHECKRIDE_API_KEY");
        assert!(config.generator.temperature > 0.0);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [generator]
            model = "llama-3.1-70b"
            api_base = "http://localhost:8080/v1"
            "#,
        )
        .unwrap();
        assert_eq!(config.generator.model, "llama-3.1-70b");
        assert_eq!(config.generator.api_base, "http://localhost:8080/v1");
        assert_eq!(config.generator.timeout_seconds, 60);
    }
}

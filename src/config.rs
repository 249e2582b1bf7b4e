//! # Configuration
//!
//! Settings are layered with `figment`, later sources winning:
//!
//! 1. built-in defaults
//! 2. a YAML file (`theory-reader.yaml`, or the path given with `--config`)
//! 3. environment variables prefixed `THEORY_READER_`, with `__` between
//!    nested keys (`THEORY_READER_ASSISTANT__MODEL=...`)
//!
//! ```yaml
//! log_level: debug
//! start_chapter: part1-ch3
//! assistant:
//!   api_key: env:GEMINI_API_KEY
//!   temperature: 0.5
//! playback:
//!   tick_millis: 20
//! ```
//!
//! Secrets may be written as `env:NAME` and are looked up when a client is built.

use crate::assistant::Sampling;
use crate::error::ConfigError;
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

pub const DEFAULT_CONFIG_FILE: &str = "theory-reader.yaml";
const ENV_PREFIX: &str = "THEORY_READER_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub assistant: AssistantConfig,
    pub images: ImagesConfig,
    pub playback: PlaybackConfig,
    pub log_level: String,
    /// Chapter opened at startup; the first chapter when unset
    pub start_chapter: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            assistant: AssistantConfig::default(),
            images: ImagesConfig::default(),
            playback: PlaybackConfig::default(),
            log_level: "info".to_string(),
            start_chapter: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub api_url: String,
    /// Literal key or `env:NAME`
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub request_timeout_secs: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        let sampling = Sampling::default();
        Self {
            api_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key: "env:GEMINI_API_KEY".to_string(),
            model: "gemini-3-flash-preview".to_string(),
            temperature: sampling.temperature,
            top_p: sampling.top_p,
            top_k: sampling.top_k,
            request_timeout_secs: 30,
        }
    }
}

impl AssistantConfig {
    pub fn sampling(&self) -> Sampling {
        Sampling {
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    pub model: String,
    pub enabled: bool,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash-image".to_string(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Period of the transport tick
    pub tick_millis: u64,
    pub sample_rate: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            tick_millis: 25,
            sample_rate: 44_100,
        }
    }
}

impl Config {
    /// Load defaults, the YAML file and the environment.
    ///
    /// An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => Yaml::file_exact(path),
            None => Yaml::file(DEFAULT_CONFIG_FILE),
        };
        Self::from_figment(Self::figment().merge(file).merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Defaults only, as a figment to layer further providers on.
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        Ok(figment.extract()?)
    }
}

/// Resolve `env:NAME` to the variable's trimmed value; anything else is returned trimmed.
///
/// A missing variable resolves to an empty string so the caller can report a
/// missing key in its own terms.
pub fn get_env_or_value(value: &str) -> String {
    match value.strip_prefix("env:") {
        Some(name) => match std::env::var(name) {
            Ok(v) => v.trim().to_string(),
            Err(_) => {
                warn!(variable = name, "Environment variable not set");
                String::new()
            }
        },
        None => value.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        let config = Config::from_figment(Config::figment()).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.assistant.model, "gemini-3-flash-preview");
        assert_eq!(config.assistant.sampling(), Sampling::default());
        assert_eq!(config.images.model, "gemini-2.5-flash-image");
        assert_eq!(config.playback.tick_millis, 25);
    }

    #[test]
    fn test_yaml_overrides_defaults() {
        let yaml = "log_level: debug\nassistant:\n  temperature: 0.2\n  top_k: 8\nimages:\n  enabled: false\n";
        let config = Config::from_figment(Config::figment().merge(Yaml::string(yaml))).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.assistant.temperature, 0.2);
        assert_eq!(config.assistant.top_k, 8);
        assert_eq!(config.assistant.top_p, 0.95);
        assert!(!config.images.enabled);
    }

    #[test]
    fn test_bad_value_is_an_error() {
        let yaml = "playback:\n  tick_millis: soon\n";
        assert!(Config::from_figment(Config::figment().merge(Yaml::string(yaml))).is_err());
    }

    #[test]
    fn test_file_then_env() {
        Jail::expect_with(|jail| {
            jail.create_file(DEFAULT_CONFIG_FILE, "start_chapter: part1-ch3\nassistant:\n  model: from-file\n")?;
            jail.set_env("THEORY_READER_ASSISTANT__MODEL", "from-env");
            jail.set_env("THEORY_READER_PLAYBACK__SAMPLE_RATE", "22050");

            let config = Config::load(None).map_err(|e| e.to_string())?;
            assert_eq!(config.start_chapter.as_deref(), Some("part1-ch3"));
            assert_eq!(config.assistant.model, "from-env");
            assert_eq!(config.playback.sample_rate, 22_050);
            Ok(())
        });
    }

    #[test]
    fn test_explicit_missing_file_fails() {
        Jail::expect_with(|_| {
            assert!(Config::load(Some(Path::new("nowhere.yaml"))).is_err());
            Ok(())
        });
    }

    #[test]
    fn test_get_env_or_value() {
        Jail::expect_with(|jail| {
            jail.set_env("READER_TEST_KEY", "  secret  ");
            assert_eq!(get_env_or_value("env:READER_TEST_KEY"), "secret");
            assert_eq!(get_env_or_value("env:READER_TEST_MISSING"), "");
            assert_eq!(get_env_or_value(" literal "), "literal");
            Ok(())
        });
    }
}

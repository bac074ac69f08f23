//! Process configuration loaded from the environment.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use vectorsmith_generation::CompletionParams;

use crate::pipeline::{GenerationSettings, MAX_GENERATION_TIMEOUT};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}

/// Service configuration. Every field has a default suitable for local
/// development; without `DATABASE_URL` the in-memory stores are used.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub bind_addr: String,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub provider_base_url: String,
    pub provider_api_key: Option<String>,
    pub generation: GenerationSettings,
    /// Outbound frame buffer per streamed request.
    pub stream_channel_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            database_url: None,
            database_max_connections: 10,
            provider_base_url: "https://openrouter.ai/api/v1".to_string(),
            provider_api_key: None,
            generation: GenerationSettings::default(),
            stream_channel_capacity: 32,
        }
    }
}

impl Settings {
    /// Load from the process environment, after an optional `.env` file.
    ///
    /// | Env Var                    | Default                              |
    /// |----------------------------|--------------------------------------|
    /// | `BIND_ADDR`                | `0.0.0.0:8080`                       |
    /// | `DATABASE_URL`             | unset (in-memory stores)             |
    /// | `DATABASE_MAX_CONNECTIONS` | `10`                                 |
    /// | `PROVIDER_BASE_URL`        | `https://openrouter.ai/api/v1`       |
    /// | `PROVIDER_API_KEY`         | unset                                |
    /// | `MODEL_STANDARD`           | `anthropic/claude-sonnet-4`          |
    /// | `MODEL_REASONING`          | `anthropic/claude-sonnet-4:thinking` |
    /// | `MODEL_FALLBACK`           | unset                                |
    /// | `GENERATION_MAX_TOKENS`    | `16000`                              |
    /// | `GENERATION_TEMPERATURE`   | `0.7`                                |
    /// | `GENERATION_TIMEOUT_SECS`  | `300` (1 to 3600)                    |
    /// | `STREAM_CHANNEL_CAPACITY`  | `32`                                 |
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Settings::from_env`], reading through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Settings::default();
        let params = defaults.generation.params;

        let timeout_secs: u64 = parse_or(&get, "GENERATION_TIMEOUT_SECS", params.timeout.as_secs())?;
        if timeout_secs > MAX_GENERATION_TIMEOUT.as_secs() {
            return Err(ConfigError::Invalid {
                key: "GENERATION_TIMEOUT_SECS",
                value: timeout_secs.to_string(),
            });
        }
        let generation = GenerationSettings {
            standard_model: get("MODEL_STANDARD").unwrap_or(defaults.generation.standard_model),
            reasoning_model: get("MODEL_REASONING").unwrap_or(defaults.generation.reasoning_model),
            fallback_model: get("MODEL_FALLBACK"),
            params: CompletionParams {
                max_tokens: parse_or(&get, "GENERATION_MAX_TOKENS", params.max_tokens)?,
                temperature: parse_or(&get, "GENERATION_TEMPERATURE", params.temperature)?,
                timeout: Duration::from_secs(timeout_secs.max(1)),
            },
        };

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or(defaults.bind_addr),
            database_url: get("DATABASE_URL"),
            database_max_connections: parse_or(&get, "DATABASE_MAX_CONNECTIONS", defaults.database_max_connections)?,
            provider_base_url: get("PROVIDER_BASE_URL").unwrap_or(defaults.provider_base_url),
            provider_api_key: get("PROVIDER_API_KEY"),
            generation,
            stream_channel_capacity: parse_or(&get, "STREAM_CHANNEL_CAPACITY", defaults.stream_channel_capacity)?,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { key, value }),
    }
}

//! Application Configuration Module
//!
//! Loads the companion's settings from environment variables (and a `.env`
//! file when present) into a single struct built once at startup.

use companion_core::chat::{DEFAULT_ENDPOINT, DEFAULT_MODEL, DEFAULT_TIMEOUT_SECS};
use companion_core::speech::VoicePreference;
use companion_native_utils::espeak::DEFAULT_ESPEAK_BIN;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// Environment variable holding the OpenRouter bearer credential.
pub const API_KEY_VAR: &str = "OPEN_ROUTER_API_KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechBackend {
    Espeak,
    Silent,
}

/// Holds all configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: Option<String>,
    pub chat_endpoint: String,
    pub chat_model: String,
    pub chat_timeout: Duration,
    pub prompts_dir: PathBuf,
    pub speech_backend: SpeechBackend,
    pub espeak_bin: String,
    pub voice: VoicePreference,
    pub output_device: Option<String>,
    pub log_level: Level,
}

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// *   `OPEN_ROUTER_API_KEY`: The bearer credential. Not validated; without it the endpoint answers 401.
    /// *   `CHAT_ENDPOINT`: (Optional) Chat-completion URL. Defaults to OpenRouter.
    /// *   `CHAT_MODEL`: (Optional) Defaults to "openai/gpt-3.5-turbo".
    /// *   `CHAT_TIMEOUT_SECS`: (Optional) Request timeout. Defaults to 60.
    /// *   `PROMPTS_DIR`: (Optional) Directory holding `persona.md`. Defaults to "prompts".
    /// *   `SPEECH_BACKEND`: (Optional) "espeak" or "silent". Defaults to "espeak".
    /// *   `ESPEAK_BIN`: (Optional) Defaults to "espeak-ng".
    /// *   `SPEECH_VOICE`, `SPEECH_LANG`, `SPEECH_FALLBACK_FIRST`: (Optional) Voice preference.
    /// *   `OUTPUT_DEVICE`: (Optional) Audio output device name.
    /// *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file. This is useful for local development and is ignored if not present.
        dotenvy::dotenv().ok();
        Self::from_vars(|key| env::var(key).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_key = var(API_KEY_VAR).filter(|key| !key.is_empty());
        let chat_endpoint = var("CHAT_ENDPOINT").unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let chat_model = var("CHAT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let chat_timeout = match var("CHAT_TIMEOUT_SECS") {
            Some(secs) => secs.trim().parse::<u64>().map(Duration::from_secs).map_err(|_| {
                ConfigError::InvalidValue(
                    "CHAT_TIMEOUT_SECS".to_string(),
                    format!("'{}' is not a number of seconds", secs),
                )
            })?,
            None => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };

        let prompts_dir = PathBuf::from(var("PROMPTS_DIR").unwrap_or_else(|| "prompts".to_string()));

        let backend_str = var("SPEECH_BACKEND").unwrap_or_else(|| "espeak".to_string());
        let speech_backend = match backend_str.to_lowercase().as_str() {
            "espeak" => SpeechBackend::Espeak,
            "silent" | "none" => SpeechBackend::Silent,
            other => {
                return Err(ConfigError::InvalidValue(
                    "SPEECH_BACKEND".to_string(),
                    format!("'{}' is not one of espeak, silent", other),
                ));
            }
        };

        let espeak_bin = var("ESPEAK_BIN").unwrap_or_else(|| DEFAULT_ESPEAK_BIN.to_string());

        let defaults = VoicePreference::default();
        let fallback_to_first = match var("SPEECH_FALLBACK_FIRST") {
            Some(flag) => parse_bool(&flag).ok_or_else(|| {
                ConfigError::InvalidValue(
                    "SPEECH_FALLBACK_FIRST".to_string(),
                    format!("'{}' is not a boolean", flag),
                )
            })?,
            None => defaults.fallback_to_first,
        };
        let voice = VoicePreference {
            name: var("SPEECH_VOICE").filter(|name| !name.is_empty()),
            lang: var("SPEECH_LANG").or(defaults.lang),
            fallback_to_first,
        };

        let output_device = var("OUTPUT_DEVICE").filter(|name| !name.is_empty());

        // Configure logging level from RUST_LOG, with a sensible default.
        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        Ok(Self {
            api_key,
            chat_endpoint,
            chat_model,
            chat_timeout,
            prompts_dir,
            speech_backend,
            espeak_bin,
            voice,
            output_device,
            log_level,
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

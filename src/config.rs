//! Runtime configuration for the recommendation service.
//!
//! Values come from the environment with sensible defaults, so the engine
//! runs (fallback-only) with no configuration at all.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::AppError;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_MAX_TOKENS: u32 = 1000;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const REQUEST_TIMEOUT_SECONDS: u64 = 30;
pub const CACHE_TTL_SECONDS: u64 = 60 * 60; // 1 hour

pub fn get_data_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("folio")
}

pub fn get_database_path() -> PathBuf {
    get_data_dir().join("folio.db")
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecommendationConfig {
    /// API key for the text-generation backend. `None` disables the primary generator.
    #[serde(skip_serializing)]
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Upper bound on a single primary generation call.
    pub request_timeout: Duration,
    /// Lifetime of a cached recommendation set.
    pub cache_ttl: Duration,
    pub database_path: PathBuf,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            openai_model: DEFAULT_OPENAI_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECONDS),
            cache_ttl: Duration::from_secs(CACHE_TTL_SECONDS),
            database_path: get_database_path(),
        }
    }
}

impl RecommendationConfig {
    /// Build a config from process environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Missing keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        config.openai_api_key = lookup("OPENAI_API_KEY")
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        if let Some(url) = lookup("OPENAI_BASE_URL") {
            config.openai_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(model) = lookup("OPENAI_MODEL") {
            config.openai_model = model;
        }
        if let Some(v) = lookup("OPENAI_MAX_TOKENS") {
            config.max_tokens = parse_var("OPENAI_MAX_TOKENS", &v)?;
        }
        if let Some(v) = lookup("OPENAI_TEMPERATURE") {
            config.temperature = parse_var("OPENAI_TEMPERATURE", &v)?;
        }
        if let Some(v) = lookup("OPENAI_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(parse_var("OPENAI_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = lookup("RECOMMENDATION_CACHE_TTL_SECS") {
            config.cache_ttl =
                Duration::from_secs(parse_var("RECOMMENDATION_CACHE_TTL_SECS", &v)?);
        }
        if let Some(path) = lookup("FOLIO_DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        Ok(config)
    }

    /// Whether the text-generation backend has credentials.
    pub fn ai_configured(&self) -> bool {
        self.openai_api_key.is_some()
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T, AppError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| AppError::Config(format!("Invalid value for {}: '{}'", key, value)))
}

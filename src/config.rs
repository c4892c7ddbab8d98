//! Startup configuration, read once and passed to the engine.

use std::fmt;

use thiserror::Error;

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_API_VERSION: &str = "v1beta";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_FALLBACK_MODELS: &[&str] =
    &["gemini-2.0-flash-lite", "gemini-1.5-flash", "gemini-1.5-pro"];

const KEY_PREFIX: &str = "GEMINI_";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("GEMINI_API_KEY is missing. Add it to .env or the environment")]
    MissingApiKey,
}

/// Sampling parameters sent with every generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub max_output_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_k: 40,
            top_p: 0.95,
            max_output_tokens: 1024,
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub api_key: String,
    pub preferred_model: String,
    pub api_version: String,
    pub fallback_models: Vec<String>,
    /// Provider host without the API version, e.g. `https://generativelanguage.googleapis.com`.
    pub base_url: String,
    pub generation: GenerationParams,
}

impl Config {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            preferred_model: DEFAULT_MODEL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            fallback_models: DEFAULT_FALLBACK_MODELS
                .iter()
                .map(|m| m.to_string())
                .collect(),
            base_url: DEFAULT_BASE_URL.to_string(),
            generation: GenerationParams::default(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup.
    ///
    /// Each key is tried as `GEMINI_<KEY>` first, then bare. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            [format!("{KEY_PREFIX}{key}"), key.to_string()]
                .iter()
                .filter_map(|name| lookup(name.as_str()))
                .map(|value| value.trim().to_string())
                .find(|value| !value.is_empty())
        };

        let api_key = get("API_KEY").ok_or(ConfigError::MissingApiKey)?;
        let mut config = Self::new(api_key);

        if let Some(model) = get("MODEL") {
            config.preferred_model = model;
        }
        if let Some(version) = get("API_VERSION") {
            config.api_version = version;
        }
        if let Some(fallbacks) = get("FALLBACK_MODELS") {
            config.fallback_models = fallbacks
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(base_url) = get("BASE_URL") {
            config.base_url = base_url.trim_end_matches('/').to_string();
        }

        Ok(config)
    }

    /// `{base_url}/{api_version}`, the prefix of every provider endpoint.
    pub fn api_base(&self) -> String {
        format!("{}/{}", self.base_url, self.api_version)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &"[REDACTED]")
            .field("preferred_model", &self.preferred_model)
            .field("api_version", &self.api_version)
            .field("fallback_models", &self.fallback_models)
            .field("base_url", &self.base_url)
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn missing_api_key_is_an_error() {
        let err = Config::from_lookup(lookup(&[("MODEL", "x")])).unwrap_err();
        assert_eq!(err, ConfigError::MissingApiKey);

        let err = Config::from_lookup(lookup(&[("GEMINI_API_KEY", "   ")])).unwrap_err();
        assert_eq!(err, ConfigError::MissingApiKey);
    }

    #[test]
    fn defaults_apply_when_only_key_is_set() {
        let config = Config::from_lookup(lookup(&[("API_KEY", "k")])).unwrap();
        assert_eq!(config.api_key, "k");
        assert_eq!(config.preferred_model, DEFAULT_MODEL);
        assert_eq!(config.api_version, "v1beta");
        assert_eq!(config.fallback_models.len(), DEFAULT_FALLBACK_MODELS.len());
        assert_eq!(
            config.api_base(),
            "https://generativelanguage.googleapis.com/v1beta"
        );
        assert_eq!(config.generation, GenerationParams::default());
    }

    #[test]
    fn prefixed_keys_win_over_bare_keys() {
        let config = Config::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "prefixed"),
            ("API_KEY", "bare"),
            ("MODEL", "gemini-1.5-pro"),
            ("GEMINI_API_VERSION", "v1"),
            ("FALLBACK_MODELS", "a, ,models/b,"),
            ("BASE_URL", "http://127.0.0.1:9000/"),
        ]))
        .unwrap();

        assert_eq!(config.api_key, "prefixed");
        assert_eq!(config.preferred_model, "gemini-1.5-pro");
        assert_eq!(config.fallback_models, vec!["a", "models/b"]);
        assert_eq!(config.api_base(), "http://127.0.0.1:9000/v1");
    }

    #[test]
    fn debug_redacts_the_key() {
        let config = Config::new("super-secret");
        assert!(!format!("{config:?}").contains("super-secret"));
    }
}

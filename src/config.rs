//! Ambient configuration surface (spec §6, §10.3).
//!
//! Loads from, in priority order: process environment (highest) > a TOML
//! file > built-in defaults. Nested keys join with `__` (env-var-safe, so
//! `model_backend.base_url` becomes `MODEL_BACKEND__BASE_URL`), the same
//! precedence and joining convention as `hi-youichi-loom`'s `from_env()`
//! constructors, generalized to a layered loader. Secrets (`api_key`) never
//! appear in `Debug` output — use `redacted_debug()` to render the struct
//! for logs/diagnostics instead.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::backend::{CircuitBreakerConfig, RetryLevel, RetryPolicy};
use crate::context::CompactionConfig;
use crate::error::ConfigurationError;
use crate::react::ReActConfig;
use crate::token::TokenizerConfig;

/// Renders a secret as its length only, never its content.
fn redact_string(secret: &str) -> String {
    format!("<redacted, {} chars>", secret.len())
}

/// Model backend connection + call parameters (spec §6 "Model backend").
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelBackendConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_seconds: f64,
    pub max_retries: u32,
    pub temperature: Option<f32>,
    pub max_tokens: u32,
}

impl Default for ModelBackendConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com".to_string(),
            api_key: None,
            model: "claude-sonnet-4-20250514".to_string(),
            timeout_seconds: 60.0,
            max_retries: 3,
            temperature: None,
            max_tokens: 4096,
        }
    }
}

impl ModelBackendConfig {
    /// A `Debug`-safe rendering with `api_key` replaced by its length, never
    /// its content (spec §10.3 / §6 "Secrets are never logged").
    pub fn redacted_debug(&self) -> String {
        format!(
            "ModelBackendConfig {{ base_url: {:?}, api_key: {}, model: {:?}, timeout_seconds: {:?}, max_retries: {:?}, temperature: {:?}, max_tokens: {:?} }}",
            self.base_url,
            self.api_key.as_deref().map(redact_string).unwrap_or_else(|| "None".to_string()),
            self.model,
            self.timeout_seconds,
            self.max_retries,
            self.temperature,
            self.max_tokens,
        )
    }
}

/// Top-level aggregate of every configuration surface named in spec §6.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub model_backend: ModelBackendConfig,
    pub context: CompactionConfig,
    /// The model's total context window, in tokens — used by the Agent
    /// Loop to detect context overflow independent of compaction triggers.
    pub context_window: u32,
    pub retry_level: RetryLevel,
    pub circuit_breaker: CircuitBreakerConfig,
    pub tokenizer: TokenizerConfig,
    pub cost_rates: HashMap<String, f64>,
    pub react: ReActConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            model_backend: ModelBackendConfig::default(),
            context: CompactionConfig::default(),
            context_window: 200_000,
            retry_level: RetryLevel::Balanced,
            circuit_breaker: CircuitBreakerConfig::default(),
            tokenizer: TokenizerConfig::default(),
            cost_rates: HashMap::new(),
            react: ReActConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Resolved retry policy for `retry_level`.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::for_level(self.retry_level)
    }

    /// Layers defaults < a TOML file (if it exists) < environment variables.
    /// `env_prefix` namespaces the environment lookups, e.g. `"AGENTRT"`
    /// yields `AGENTRT__MODEL_BACKEND__BASE_URL`.
    pub fn load(toml_path: Option<&Path>, env_prefix: &str) -> Result<Self, ConfigurationError> {
        let mut config = Self::default();

        if let Some(path) = toml_path {
            if path.exists() {
                let raw = std::fs::read_to_string(path).map_err(|e| ConfigurationError {
                    config_key: path.display().to_string(),
                    expected: "a readable TOML file".into(),
                    actual: e.to_string(),
                })?;
                let file: RawFileConfig = toml::from_str(&raw).map_err(|e| ConfigurationError {
                    config_key: path.display().to_string(),
                    expected: "valid TOML matching the configuration surface".into(),
                    actual: e.to_string(),
                })?;
                file.apply(&mut config);
            }
        }

        apply_env(&mut config, env_prefix);
        Ok(config)
    }
}

/// Shape of the optional TOML file. Every field optional — only present keys
/// override the running default.
#[derive(Debug, Default, Deserialize)]
struct RawFileConfig {
    #[serde(default)]
    model_backend: Option<RawModelBackend>,
    #[serde(default)]
    context_window: Option<u32>,
    #[serde(default)]
    retry_level: Option<u8>,
}

#[derive(Debug, Default, Deserialize)]
struct RawModelBackend {
    base_url: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    timeout_seconds: Option<f64>,
    max_retries: Option<u32>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl RawFileConfig {
    fn apply(self, config: &mut RuntimeConfig) {
        if let Some(m) = self.model_backend {
            if let Some(v) = m.base_url {
                config.model_backend.base_url = v;
            }
            if let Some(v) = m.api_key {
                config.model_backend.api_key = Some(v);
            }
            if let Some(v) = m.model {
                config.model_backend.model = v;
            }
            if let Some(v) = m.timeout_seconds {
                config.model_backend.timeout_seconds = v;
            }
            if let Some(v) = m.max_retries {
                config.model_backend.max_retries = v;
            }
            if let Some(v) = m.temperature {
                config.model_backend.temperature = Some(v);
            }
            if let Some(v) = m.max_tokens {
                config.model_backend.max_tokens = v;
            }
        }
        if let Some(v) = self.context_window {
            config.context_window = v;
        }
        if let Some(v) = self.retry_level {
            if let Some(level) = RetryLevel::from_u8(v) {
                config.retry_level = level;
            }
        }
    }
}

/// Applies environment overrides, joining nested keys with `__` as
/// `SPEC_FULL.md` §10.3 specifies: `{prefix}__MODEL_BACKEND__BASE_URL`, etc.
fn apply_env(config: &mut RuntimeConfig, prefix: &str) {
    let key = |suffix: &str| format!("{prefix}__{suffix}");

    if let Ok(v) = std::env::var(key("MODEL_BACKEND__BASE_URL")) {
        config.model_backend.base_url = v;
    }
    if let Ok(v) = std::env::var(key("MODEL_BACKEND__API_KEY")) {
        config.model_backend.api_key = Some(v);
    }
    if let Ok(v) = std::env::var(key("MODEL_BACKEND__MODEL")) {
        config.model_backend.model = v;
    }
    if let Ok(v) = std::env::var(key("MODEL_BACKEND__TIMEOUT_SECONDS")) {
        if let Ok(parsed) = v.parse() {
            config.model_backend.timeout_seconds = parsed;
        }
    }
    if let Ok(v) = std::env::var(key("MODEL_BACKEND__MAX_RETRIES")) {
        if let Ok(parsed) = v.parse() {
            config.model_backend.max_retries = parsed;
        }
    }
    if let Ok(v) = std::env::var(key("MODEL_BACKEND__TEMPERATURE")) {
        if let Ok(parsed) = v.parse() {
            config.model_backend.temperature = Some(parsed);
        }
    }
    if let Ok(v) = std::env::var(key("MODEL_BACKEND__MAX_TOKENS")) {
        if let Ok(parsed) = v.parse() {
            config.model_backend.max_tokens = parsed;
        }
    }
    if let Ok(v) = std::env::var(key("CONTEXT_WINDOW")) {
        if let Ok(parsed) = v.parse() {
            config.context_window = parsed;
        }
    }
    if let Ok(v) = std::env::var(key("RETRY_LEVEL")) {
        if let Ok(parsed) = v.parse::<u8>() {
            if let Some(level) = RetryLevel::from_u8(parsed) {
                config.retry_level = level;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = RuntimeConfig::default();
        assert_eq!(config.model_backend.max_tokens, 4096);
        assert_eq!(config.context_window, 200_000);
    }

    #[test]
    fn env_overrides_defaults() {
        std::env::set_var("AGENTRT_TEST__MODEL_BACKEND__MODEL", "gpt-4-turbo");
        std::env::set_var("AGENTRT_TEST__CONTEXT_WINDOW", "50000");
        let config = RuntimeConfig::load(None, "AGENTRT_TEST").unwrap();
        assert_eq!(config.model_backend.model, "gpt-4-turbo");
        assert_eq!(config.context_window, 50_000);
        std::env::remove_var("AGENTRT_TEST__MODEL_BACKEND__MODEL");
        std::env::remove_var("AGENTRT_TEST__CONTEXT_WINDOW");
    }

    #[test]
    fn toml_file_overrides_defaults_but_not_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agentrt.toml");
        std::fs::write(
            &path,
            r#"
            context_window = 100000

            [model_backend]
            model = "gpt-4"
            max_tokens = 8192
            "#,
        )
        .unwrap();

        std::env::set_var("AGENTRT_TEST2__MODEL_BACKEND__MAX_TOKENS", "1024");
        let config = RuntimeConfig::load(Some(&path), "AGENTRT_TEST2").unwrap();
        assert_eq!(config.model_backend.model, "gpt-4");
        assert_eq!(config.context_window, 100_000);
        // env wins over the file
        assert_eq!(config.model_backend.max_tokens, 1024);
        std::env::remove_var("AGENTRT_TEST2__MODEL_BACKEND__MAX_TOKENS");
    }

    #[test]
    fn redacted_debug_never_prints_the_raw_key() {
        let config = ModelBackendConfig {
            api_key: Some("sk-ant-super-secret-value".into()),
            ..ModelBackendConfig::default()
        };
        let rendered = config.redacted_debug();
        assert!(!rendered.contains("super-secret-value"));
    }
}

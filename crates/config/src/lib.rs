//! Configuration loading, validation, and management for ChatRecall.
//!
//! Loads configuration from `~/.chatrecall/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use chatrecall_telemetry::{FULL_HISTORY_MODEL, ModelPricing, RateTable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.chatrecall/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the OpenAI-compatible endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible endpoint
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Chat completion model
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per reply; unset lets the provider decide
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Name attached to the context directive sent with every prompt
    #[serde(default = "default_assistant_name")]
    pub assistant_name: String,

    /// Optional instructions placed at the head of every prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Where session databases and the process-wide ledger live.
    /// Defaults to `~/.chatrecall`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub retry: RetrySettings,

    /// Price overrides, keyed by model name (USD per 1M tokens)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pricing: BTreeMap<String, PriceOverride>,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-3.5-turbo".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_assistant_name() -> String {
    "ChatRecall".into()
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("assistant_name", &self.assistant_name)
            .field("system_prompt", &self.system_prompt)
            .field("data_dir", &self.data_dir)
            .field("context", &self.context)
            .field("retry", &self.retry)
            .field("pricing", &self.pricing)
            .finish()
    }
}

/// How prior exchanges are chosen for a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContextMode {
    /// Most similar plus most recent exchanges, ranked by embeddings.
    #[default]
    Embedding,
    /// Every stored exchange, in order.
    FullHistory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default)]
    pub mode: ContextMode,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Number of most similar exchanges to include
    #[serde(default = "default_similar_exchanges")]
    pub similar_exchanges: usize,

    /// Number of most recent exchanges to include
    #[serde(default = "default_recent_exchanges")]
    pub recent_exchanges: usize,
}

fn default_embedding_model() -> String {
    "text-embedding-ada-002".into()
}
fn default_similar_exchanges() -> usize {
    5
}
fn default_recent_exchanges() -> usize {
    2
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            mode: ContextMode::default(),
            embedding_model: default_embedding_model(),
            similar_exchanges: default_similar_exchanges(),
            recent_exchanges: default_recent_exchanges(),
        }
    }
}

impl ContextConfig {
    /// The model name an exchange store is pinned to. Full-history sessions
    /// pin the zero-cost sentinel, so switching mode on an existing session
    /// is caught like any other model change.
    pub fn pinned_model(&self) -> &str {
        match self.mode {
            ContextMode::Embedding => &self.embedding_model,
            ContextMode::FullHistory => FULL_HISTORY_MODEL,
        }
    }
}

/// Backoff settings for provider calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    20_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

/// Per-model price override, USD per 1M tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceOverride {
    pub input_per_m: f64,
    #[serde(default)]
    pub output_per_m: f64,
}

impl AppConfig {
    /// Load configuration from the default path (~/.chatrecall/config.toml).
    ///
    /// Environment overrides:
    /// - `CHATRECALL_API_KEY`, then `OPENAI_API_KEY`
    /// - `CHATRECALL_MODEL`
    /// - `CHATRECALL_DATA_DIR`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides, reading variables through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty("CHATRECALL_API_KEY").or_else(|| non_empty("OPENAI_API_KEY")) {
            self.api_key = Some(key);
        }
        if let Some(model) = non_empty("CHATRECALL_MODEL") {
            self.model = model;
        }
        if let Some(dir) = non_empty("CHATRECALL_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".chatrecall")
    }

    /// Root of all persisted state.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(Self::config_dir)
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.data_dir().join("sessions").join(session_id)
    }

    /// Exchange store of one session.
    pub fn session_embeddings_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("embeddings.db")
    }

    /// Usage ledger of one session.
    pub fn session_usage_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("token_usage.db")
    }

    /// Process-wide usage ledger.
    pub fn global_usage_path(&self) -> PathBuf {
        self.data_dir().join("token_usage.db")
    }

    /// Build the rate table: built-in prices with configured overrides on top.
    pub fn rate_table(&self) -> RateTable {
        self.pricing
            .iter()
            .fold(RateTable::with_defaults(), |table, (model, price)| {
                table.with(
                    model.clone(),
                    ModelPricing::new(price.input_per_m, price.output_per_m),
                )
            })
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::ValidationError("model must not be empty".into()));
        }

        if self.context.mode == ContextMode::Embedding
            && self.context.embedding_model.trim().is_empty()
        {
            return Err(ConfigError::ValidationError(
                "context.embedding_model must not be empty".into(),
            ));
        }

        if !self.assistant_name_is_valid() {
            return Err(ConfigError::ValidationError(
                "assistant_name may only contain letters, digits, '_' and '-'".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }

        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "retry.backoff_multiplier must be >= 1.0".into(),
            ));
        }

        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::ValidationError(
                "retry.initial_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }

        for (model, price) in &self.pricing {
            let valid = |p: f64| p.is_finite() && p >= 0.0;
            if !valid(price.input_per_m) || !valid(price.output_per_m) {
                return Err(ConfigError::ValidationError(format!(
                    "pricing for '{model}' must be finite and non-negative"
                )));
            }
        }

        Ok(())
    }

    /// The name travels in the message `name` field, which only accepts
    /// `[a-zA-Z0-9_-]`.
    fn assistant_name_is_valid(&self) -> bool {
        !self.assistant_name.is_empty()
            && self
                .assistant_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_api_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: None,
            assistant_name: default_assistant_name(),
            system_prompt: None,
            data_dir: None,
            context: ContextConfig::default(),
            retry: RetrySettings::default(),
            pricing: BTreeMap::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for chatrecall_core::Error {
    fn from(e: ConfigError) -> Self {
        chatrecall_core::Error::Config {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.model, "gpt-3.5-turbo");
        assert_eq!(config.context.mode, ContextMode::Embedding);
        assert_eq!(config.context.similar_exchanges, 5);
        assert_eq!(config.context.recent_exchanges, 2);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model, config.model);
        assert_eq!(parsed.context.embedding_model, config.context.embedding_model);
        assert_eq!(parsed.retry.max_attempts, config.retry.max_attempts);
    }

    #[test]
    fn parses_full_history_mode_and_pricing() {
        let toml_str = r#"
model = "gpt-4"

[context]
mode = "full-history"

[pricing."my-finetune"]
input_per_m = 12.0
output_per_m = 16.0
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.context.mode, ContextMode::FullHistory);
        assert_eq!(config.context.pinned_model(), FULL_HISTORY_MODEL);

        let rates = config.rate_table();
        assert_eq!(rates.get("my-finetune"), Some(ModelPricing::new(12.0, 16.0)));
        assert!(rates.get("gpt-4").is_some());
    }

    #[test]
    fn pricing_override_replaces_default() {
        let mut config = AppConfig::default();
        config.pricing.insert(
            "gpt-4".into(),
            PriceOverride {
                input_per_m: 1.0,
                output_per_m: 2.0,
            },
        );
        assert_eq!(config.rate_table().get("gpt-4"), Some(ModelPricing::new(1.0, 2.0)));
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_retry_rejected() {
        let mut config = AppConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.retry.initial_delay_ms = 50_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn negative_price_rejected() {
        let mut config = AppConfig::default();
        config.pricing.insert(
            "gpt-4".into(),
            PriceOverride {
                input_per_m: -1.0,
                output_per_m: 0.0,
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn assistant_name_must_be_an_identifier() {
        let config = AppConfig {
            assistant_name: "Chat Recall".into(),
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.model, "gpt-3.5-turbo");
    }

    #[test]
    fn load_from_file_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        std::fs::write(&path, "temperature = 0.2\n[context]\nsimilar_exchanges = 3\n").unwrap();
        let config = AppConfig::load_from(&path).unwrap();
        assert!((config.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(config.context.similar_exchanges, 3);
        assert_eq!(config.context.recent_exchanges, 2);

        std::fs::write(&path, "temperature = 9.0\n").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ValidationError(_))
        ));

        std::fs::write(&path, "temperature = [").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("OPENAI_API_KEY", "sk-openai"),
            ("CHATRECALL_MODEL", "gpt-4"),
            ("CHATRECALL_DATA_DIR", "/var/lib/chatrecall"),
        ]);
        let mut config = AppConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.api_key.as_deref(), Some("sk-openai"));
        assert_eq!(config.model, "gpt-4");
        assert_eq!(config.data_dir(), PathBuf::from("/var/lib/chatrecall"));
    }

    #[test]
    fn chatrecall_key_wins_over_openai_key() {
        let env: HashMap<&str, &str> =
            HashMap::from([("OPENAI_API_KEY", "sk-openai"), ("CHATRECALL_API_KEY", "sk-own")]);
        let mut config = AppConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.api_key.as_deref(), Some("sk-own"));
    }

    #[test]
    fn session_paths_live_under_data_dir() {
        let config = AppConfig {
            data_dir: Some(PathBuf::from("/data")),
            ..AppConfig::default()
        };
        assert_eq!(
            config.session_embeddings_path("abc"),
            PathBuf::from("/data/sessions/abc/embeddings.db")
        );
        assert_eq!(
            config.session_usage_path("abc"),
            PathBuf::from("/data/sessions/abc/token_usage.db")
        );
        assert_eq!(config.global_usage_path(), PathBuf::from("/data/token_usage.db"));
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn config_error_converts_to_core_error() {
        let err: chatrecall_core::Error = ConfigError::ValidationError("bad".into()).into();
        assert!(matches!(err, chatrecall_core::Error::Config { .. }));
    }
}

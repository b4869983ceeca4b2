//! TOML configuration.
//!
//! Every section and key is optional; an empty file yields the defaults.
//!
//! ```toml
//! [chunking]
//! target_tokens = 256
//! max_tokens = 512
//! overlap_tokens = 32
//! version = "chunk-v1"
//!
//! [tokenizer]
//! adapter = "auto"
//! model = "text-embedding-3-small"
//! fallback_chain = ["tiktoken", "huggingface", "heuristic"]
//!
//! [tokenizer.heuristic]
//! chars_per_token = 4.0
//!
//! [cache]
//! enabled = true
//! max_size = 1000
//! ttl_seconds = 3600
//!
//! [telemetry]
//! enabled = false
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::TokenizerError;
use crate::models::ChunkingOptions;
use crate::registry::{default_fallback_chain, AdapterSettings, AUTO};
use crate::tokenizer::{DEFAULT_CHARS_PER_TOKEN, HEURISTIC, HUGGINGFACE, TIKTOKEN};

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub tokenizer: TokenizerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ChunkingConfig {
    #[serde(default = "default_target_tokens")]
    pub target_tokens: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_target_tokens() -> usize {
    256
}
fn default_max_tokens() -> usize {
    512
}
fn default_overlap_tokens() -> usize {
    32
}
fn default_version() -> String {
    "chunk-v1".to_string()
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_tokens: default_target_tokens(),
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap_tokens(),
            version: default_version(),
        }
    }
}

impl ChunkingConfig {
    pub fn to_options(&self) -> crate::error::Result<ChunkingOptions> {
        ChunkingOptions::new(
            self.target_tokens,
            self.max_tokens,
            self.overlap_tokens,
            self.version.clone(),
        )
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TokenizerConfig {
    #[serde(default = "default_adapter")]
    pub adapter: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Budget to trim chunks against. Defaults to `chunking.max_tokens`.
    #[serde(default)]
    pub max_tokens: Option<usize>,
    #[serde(default = "default_fallback_chain")]
    pub fallback_chain: Vec<String>,
    #[serde(default)]
    pub heuristic: HeuristicConfig,
    #[serde(default)]
    pub tiktoken: TiktokenConfig,
    #[serde(default)]
    pub huggingface: HuggingFaceConfig,
}

fn default_adapter() -> String {
    AUTO.to_string()
}
fn default_model() -> String {
    "text-embedding-3-small".to_string()
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            adapter: default_adapter(),
            model: default_model(),
            max_tokens: None,
            fallback_chain: default_fallback_chain(),
            heuristic: HeuristicConfig::default(),
            tiktoken: TiktokenConfig::default(),
            huggingface: HuggingFaceConfig::default(),
        }
    }
}

impl TokenizerConfig {
    pub fn adapter_settings(&self) -> AdapterSettings {
        AdapterSettings {
            chars_per_token: self.heuristic.chars_per_token,
            tiktoken_encoding: self.tiktoken.encoding.clone(),
            tokenizer_path: self.huggingface.tokenizer_path.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct HeuristicConfig {
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: f64,
}

fn default_chars_per_token() -> f64 {
    DEFAULT_CHARS_PER_TOKEN
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            chars_per_token: default_chars_per_token(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct TiktokenConfig {
    /// e.g. `cl100k_base`; derived from the model when unset.
    #[serde(default)]
    pub encoding: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct HuggingFaceConfig {
    #[serde(default)]
    pub tokenizer_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cache_size")]
    pub max_size: usize,
    /// Idle time after which an entry expires. `None` disables expiry.
    #[serde(default)]
    pub ttl_seconds: Option<f64>,
}

fn default_cache_enabled() -> bool {
    true
}
fn default_cache_size() -> usize {
    crate::cache::DEFAULT_CACHE_SIZE
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            max_size: default_cache_size(),
            ttl_seconds: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

fn default_max_history() -> usize {
    crate::telemetry::DEFAULT_MAX_HISTORY
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_history: default_max_history(),
        }
    }
}

const KNOWN_ADAPTERS: &[&str] = &[HEURISTIC, TIKTOKEN, HUGGINGFACE];

impl Config {
    /// Check every section. Failures name the offending key.
    pub fn validate(&self) -> crate::error::Result<()> {
        self.chunking.to_options()?;

        let t = &self.tokenizer;
        let adapter = t.adapter.trim().to_lowercase();
        if adapter.is_empty() {
            return Err(TokenizerError::config("adapter", "adapter must be non-empty"));
        }
        if adapter != AUTO && !KNOWN_ADAPTERS.contains(&adapter.as_str()) {
            return Err(TokenizerError::config(
                "adapter",
                format!("unknown adapter '{}'", t.adapter),
            ));
        }
        if t.model.trim().is_empty() {
            return Err(TokenizerError::config("model", "model must be non-empty"));
        }
        if t.max_tokens == Some(0) {
            return Err(TokenizerError::config("max_tokens", "max_tokens must be positive"));
        }
        if t.fallback_chain.is_empty() {
            return Err(TokenizerError::config(
                "fallback_chain",
                "fallback_chain must not be empty",
            ));
        }
        if let Some(bad) = t
            .fallback_chain
            .iter()
            .find(|name| !KNOWN_ADAPTERS.contains(&name.as_str()))
        {
            return Err(TokenizerError::config(
                "fallback_chain",
                format!("unknown adapter '{}' in fallback_chain", bad),
            ));
        }
        let ratio = t.heuristic.chars_per_token;
        if !ratio.is_finite() || ratio <= 0.0 {
            return Err(TokenizerError::config(
                "chars_per_token",
                "heuristic.chars_per_token must be a positive number",
            ));
        }

        if self.cache.max_size == 0 {
            return Err(TokenizerError::config("cache.max_size", "must be > 0"));
        }
        if let Some(ttl) = self.cache.ttl_seconds {
            if !ttl.is_finite() || ttl < 0.0 {
                return Err(TokenizerError::config(
                    "cache.ttl_seconds",
                    "must be a non-negative number",
                ));
            }
        }
        if self.telemetry.max_history == 0 {
            return Err(TokenizerError::config("telemetry.max_history", "must be > 0"));
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        let f = write_config("");
        let config = load_config(f.path()).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.tokenizer.adapter, "auto");
        assert_eq!(
            config.tokenizer.fallback_chain,
            vec!["tiktoken", "huggingface", "heuristic"]
        );
        assert_eq!(config.cache.max_size, 1000);
    }

    #[test]
    fn test_full_config() {
        let f = write_config(
            r#"
[chunking]
target_tokens = 100
max_tokens = 200
overlap_tokens = 10
version = "chunk-v2"

[tokenizer]
adapter = "heuristic"
model = "bert-base-uncased"
max_tokens = 512
fallback_chain = ["heuristic"]

[tokenizer.heuristic]
chars_per_token = 3.5

[tokenizer.tiktoken]
encoding = "o200k_base"

[cache]
enabled = false
max_size = 10
ttl_seconds = 0.5

[telemetry]
enabled = true
max_history = 50
"#,
        );
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.chunking.version, "chunk-v2");
        assert_eq!(config.tokenizer.max_tokens, Some(512));
        assert_eq!(config.tokenizer.heuristic.chars_per_token, 3.5);
        assert_eq!(config.tokenizer.tiktoken.encoding.as_deref(), Some("o200k_base"));
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.ttl_seconds, Some(0.5));
        assert!(config.telemetry.enabled);
        let settings = config.tokenizer.adapter_settings();
        assert_eq!(settings.chars_per_token, 3.5);
    }

    #[test]
    fn test_invalid_chunking_rejected() {
        let f = write_config("[chunking]\ntarget_tokens = 600\nmax_tokens = 512\n");
        let err = load_config(f.path()).unwrap_err();
        let root = err.downcast_ref::<TokenizerError>().unwrap();
        assert!(matches!(root, TokenizerError::Config { key, .. } if key == "target_tokens"));
    }

    #[test]
    fn test_unknown_fallback_entry_rejected() {
        let mut config = Config::default();
        config.tokenizer.fallback_chain = vec!["heuristic".into(), "magic".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_values_rejected() {
        let mut c = Config::default();
        c.tokenizer.heuristic.chars_per_token = 0.0;
        assert!(c.validate().is_err());

        let mut c = Config::default();
        c.cache.ttl_seconds = Some(-1.0);
        assert!(c.validate().is_err());

        let mut c = Config::default();
        c.tokenizer.model = "".into();
        assert!(c.validate().is_err());

        let mut c = Config::default();
        c.tokenizer.adapter = "sentencepiece".into();
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(&dir.path().join("nope.toml")).is_err());
    }
}

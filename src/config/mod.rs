//! Configuration
//!
//! Layered loading: defaults, then a TOML file
//! (`~/.config/tianji/engine.toml` or an explicit path), then `TIANJI_*`
//! environment variables.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub guard: GuardSettings,

    #[serde(default)]
    pub tools: ToolEndpoints,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API key; can also come from `TIANJI_API_KEY`.
    pub api_key: Option<String>,

    /// OpenAI-compatible base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model id sent on every request.
    #[serde(default = "default_model")]
    pub model: String,

    /// Fixed low temperature, biasing toward tool use and factuality.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max output tokens per completion.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<REDACTED>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How many persisted messages are replayed verbatim at rehydration.
    #[serde(default = "default_recent_window")]
    pub recent_window: usize,

    /// Conversation-turn ceiling above which the transcript is compacted
    /// down to this many most-recent turns.
    #[serde(default = "default_max_conversation_turns")]
    pub max_conversation_turns: usize,

    /// Upper bound on durable summaries, in characters.
    #[serde(default = "default_summary_max_chars")]
    pub summary_max_chars: usize,

    /// Safety net: max model/tool round-trips per turn.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            recent_window: default_recent_window(),
            max_conversation_turns: default_max_conversation_turns(),
            summary_max_chars: default_summary_max_chars(),
            max_tool_rounds: default_max_tool_rounds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardSettings {
    #[serde(default = "default_max_searches")]
    pub max_searches: usize,

    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    #[serde(default = "default_max_query_chars")]
    pub max_query_chars: usize,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            max_searches: default_max_searches(),
            similarity_threshold: default_similarity_threshold(),
            max_query_chars: default_max_query_chars(),
        }
    }
}

/// Base URLs for the HTTP-backed capability tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEndpoints {
    #[serde(default = "default_almanac_url")]
    pub almanac_base_url: String,

    #[serde(default = "default_horoscope_url")]
    pub horoscope_base_url: String,

    #[serde(default = "default_listings_url")]
    pub listings_base_url: String,
}

impl Default for ToolEndpoints {
    fn default() -> Self {
        Self {
            almanac_base_url: default_almanac_url(),
            horoscope_base_url: default_horoscope_url(),
            listings_base_url: default_listings_url(),
        }
    }
}

fn default_base_url() -> String {
    "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string()
}
fn default_model() -> String {
    "qwen-plus".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> usize {
    2048
}
fn default_recent_window() -> usize {
    10
}
fn default_max_conversation_turns() -> usize {
    40
}
fn default_summary_max_chars() -> usize {
    400
}
fn default_max_tool_rounds() -> usize {
    8
}
fn default_max_searches() -> usize {
    3
}
fn default_similarity_threshold() -> f64 {
    0.7
}
fn default_max_query_chars() -> usize {
    30
}
fn default_almanac_url() -> String {
    "https://api.tianji.example.com/almanac".to_string()
}
fn default_horoscope_url() -> String {
    "https://api.tianji.example.com/horoscope".to_string()
}
fn default_listings_url() -> String {
    "https://api.tianji.example.com/listings".to_string()
}

impl EngineConfig {
    /// Load from the default location, falling back to defaults when no
    /// config file exists.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        let mut config = match path.as_deref() {
            Some(p) if p.exists() => Self::load_from(p)?,
            _ => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Load from an explicit file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "tianji", "tianji")
            .map(|dirs| dirs.config_dir().join("engine.toml"))
    }

    /// Environment variables override file values.
    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("TIANJI_API_KEY") {
            self.provider.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("TIANJI_BASE_URL") {
            self.provider.base_url = url;
        }
        if let Ok(model) = std::env::var("TIANJI_MODEL") {
            self.provider.model = model;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.session.recent_window, 10);
        assert_eq!(config.session.max_conversation_turns, 40);
        assert_eq!(config.session.max_tool_rounds, 8);
        assert_eq!(config.guard.max_searches, 3);
        assert!((config.provider.temperature - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [provider]
            model = "qwen-max"

            [session]
            recent_window = 6
            "#,
        )
        .unwrap();
        assert_eq!(config.provider.model, "qwen-max");
        assert_eq!(config.provider.temperature, 0.2);
        assert_eq!(config.session.recent_window, 6);
        assert_eq!(config.session.max_conversation_turns, 40);
    }

    #[test]
    fn debug_redacts_api_key() {
        let mut config = EngineConfig::default();
        config.provider.api_key = Some("sk-secret".into());
        let rendered = format!("{:?}", config.provider);
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("REDACTED"));
    }
}

//! Load configuration via `config` crate with env-override support.

use std::{ops::Deref, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use serde::Deserialize;
use serde_with::{DurationMilliSeconds, serde_as};
use tracing::info;

use crate::base::{error::ConfigurationError, prompts};

use super::types::Res;

/// Default AI provider.
fn default_llm_provider() -> String {
    "gemini".to_string()
}

/// Default system prompt when no file is configured.
fn default_system_prompt() -> String {
    prompts::DEFAULT_SYSTEM_PROMPT.to_string()
}

/// Default Gemini model.
fn default_gemini_model() -> String {
    "gemini-1.5-flash".to_string()
}

/// Default Gemini REST endpoint.
fn default_gemini_api_base() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

/// Default Grok model.
fn default_grok_model() -> String {
    "grok-beta".to_string()
}

/// Default Grok (OpenAI-compatible) endpoint.
fn default_grok_api_base() -> String {
    "https://api.x.ai/v1".to_string()
}

fn default_temperature() -> f64 {
    1.0
}

fn default_top_p() -> f64 {
    0.95
}

fn default_top_k() -> u32 {
    40
}

fn default_max_output_tokens() -> u32 {
    8192
}

fn default_response_mime_type() -> String {
    "text/plain".to_string()
}

fn default_retry_tiers() -> u32 {
    1
}

fn default_retry_attempts_per_tier() -> u32 {
    3
}

fn default_retry_attempt_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_retry_tier_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_backend_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_pacing_enabled() -> bool {
    true
}

fn default_pacing_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_purge_limit() -> u32 {
    100
}

/// Configuration for the relay-bot application.
#[derive(Debug, Clone)]
pub struct Config {
    pub inner: Arc<ConfigInner>,
}

impl Deref for Config {
    type Target = ConfigInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct ConfigInner {
    /// Discord bot token (`RELAY_BOT_DISCORD_TOKEN`).
    pub discord_token: String,
    /// Discord user ID allowed to run owner-only commands (`RELAY_BOT_OWNER_ID`).
    #[serde(default)]
    pub owner_id: Option<u64>,
    /// AI provider, `gemini` or `grok` (`RELAY_BOT_LLM_PROVIDER`).
    #[serde(default = "default_llm_provider")]
    pub llm_provider: String,
    /// Optional path to a file holding the system prompt (`RELAY_BOT_SYSTEM_PROMPT_FILE`).
    #[serde(default)]
    pub system_prompt_file: Option<PathBuf>,
    /// The system prompt; replaced by the file contents when a file is configured.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Gemini API keys, comma-separated in the environment (`RELAY_BOT_GEMINI_API_KEYS`).
    #[serde(default)]
    pub gemini_api_keys: Vec<String>,
    /// Gemini model (`RELAY_BOT_GEMINI_MODEL`).
    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,
    /// Gemini REST endpoint (`RELAY_BOT_GEMINI_API_BASE`).
    #[serde(default = "default_gemini_api_base")]
    pub gemini_api_base: String,
    /// xAI API key (`RELAY_BOT_GROK_API_KEY`).
    #[serde(default)]
    pub grok_api_key: Option<String>,
    /// Grok model (`RELAY_BOT_GROK_MODEL`).
    #[serde(default = "default_grok_model")]
    pub grok_model: String,
    /// Grok endpoint (`RELAY_BOT_GROK_API_BASE`).
    #[serde(default = "default_grok_api_base")]
    pub grok_api_base: String,
    /// Sampling temperature, between 0 and 2 (`RELAY_BOT_TEMPERATURE`).
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Nucleus sampling bound, between 0 and 1 (`RELAY_BOT_TOP_P`).
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    /// Top-k sampling bound (`RELAY_BOT_TOP_K`).
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    /// Max output tokens (`RELAY_BOT_MAX_OUTPUT_TOKENS`).
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Output mime type requested from the model (`RELAY_BOT_RESPONSE_MIME_TYPE`).
    #[serde(default = "default_response_mime_type")]
    pub response_mime_type: String,
    /// Number of retry tiers (`RELAY_BOT_RETRY_TIERS`).
    #[serde(default = "default_retry_tiers")]
    pub retry_tiers: u32,
    /// Attempts within each tier (`RELAY_BOT_RETRY_ATTEMPTS_PER_TIER`).
    #[serde(default = "default_retry_attempts_per_tier")]
    pub retry_attempts_per_tier: u32,
    /// Delay between attempts in a tier, in milliseconds (`RELAY_BOT_RETRY_ATTEMPT_DELAY`).
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_retry_attempt_delay")]
    pub retry_attempt_delay: Duration,
    /// Delay between tiers, in milliseconds (`RELAY_BOT_RETRY_TIER_DELAY`).
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_retry_tier_delay")]
    pub retry_tier_delay: Duration,
    /// Cap on credential rotations per request (`RELAY_BOT_RETRY_MAX_ROTATIONS`).
    /// Defaults to tiers times attempts per tier.
    #[serde(default)]
    pub retry_max_rotations: Option<u32>,
    /// Bounded wait for a single backend call, in milliseconds (`RELAY_BOT_BACKEND_TIMEOUT`).
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_backend_timeout")]
    pub backend_timeout: Duration,
    /// Whether to pause after each reply (`RELAY_BOT_PACING_ENABLED`).
    #[serde(default = "default_pacing_enabled")]
    pub pacing_enabled: bool,
    /// Pause after each reply, in milliseconds (`RELAY_BOT_PACING_DELAY`).
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_pacing_delay")]
    pub pacing_delay: Duration,
    /// How many recent messages a purge removes (`RELAY_BOT_PURGE_LIMIT`).
    #[serde(default = "default_purge_limit")]
    pub purge_limit: u32,
}

impl Default for ConfigInner {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            owner_id: None,
            llm_provider: default_llm_provider(),
            system_prompt_file: None,
            system_prompt: default_system_prompt(),
            gemini_api_keys: Vec::new(),
            gemini_model: default_gemini_model(),
            gemini_api_base: default_gemini_api_base(),
            grok_api_key: None,
            grok_model: default_grok_model(),
            grok_api_base: default_grok_api_base(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            max_output_tokens: default_max_output_tokens(),
            response_mime_type: default_response_mime_type(),
            retry_tiers: default_retry_tiers(),
            retry_attempts_per_tier: default_retry_attempts_per_tier(),
            retry_attempt_delay: default_retry_attempt_delay(),
            retry_tier_delay: default_retry_tier_delay(),
            retry_max_rotations: None,
            backend_timeout: default_backend_timeout(),
            pacing_enabled: default_pacing_enabled(),
            pacing_delay: default_pacing_delay(),
            purge_limit: default_purge_limit(),
        }
    }
}

impl ConfigInner {
    /// Range checks for values the backend and retry policy rely on.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigurationError::InvalidParameter("temperature must be between 0 and 2".into()));
        }

        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(ConfigurationError::InvalidParameter("top_p must be between 0 and 1".into()));
        }

        if self.top_k < 1 {
            return Err(ConfigurationError::InvalidParameter("top_k must be at least 1".into()));
        }

        if self.max_output_tokens < 1 {
            return Err(ConfigurationError::InvalidParameter("max_output_tokens must be at least 1".into()));
        }

        if self.retry_tiers < 1 || self.retry_attempts_per_tier < 1 {
            return Err(ConfigurationError::InvalidRetryBudget("tiers and attempts per tier must be at least 1".into()));
        }

        if self.system_prompt.trim().is_empty() {
            return Err(ConfigurationError::EmptyPrompt("<inline>".into()));
        }

        Ok(())
    }
}

impl Config {
    /// Load from the TOML file (explicit path or `.hidden/config.toml`), then `RELAY_BOT_*` env vars on top.
    pub fn load(explicit_path: Option<&std::path::Path>) -> Res<Self> {
        Self::load_with_env(explicit_path, None)
    }

    /// Same as [`Config::load`], reading variables from `env` instead of the process environment when given.
    fn load_with_env(explicit_path: Option<&std::path::Path>, env: Option<config::Map<String, String>>) -> Res<Self> {
        let mut cfg = config::Config::builder();

        if let Some(p) = explicit_path {
            cfg = cfg.add_source(config::File::from(p.to_path_buf()));
        } else if std::path::Path::new(".hidden/config.toml").exists() {
            cfg = cfg.add_source(config::File::with_name(".hidden/config.toml"));
        }

        // Later sources win, so the environment goes last.
        cfg = cfg.add_source(
            config::Environment::default()
                .prefix("RELAY_BOT")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("gemini_api_keys")
                .source(env),
        );

        let mut inner: ConfigInner = cfg.build()?.try_deserialize()?;

        // The prompt file, when present, replaces the inline prompt.
        if let Some(path) = &inner.system_prompt_file {
            let prompt = std::fs::read_to_string(path).with_context(|| format!("Failed to read system prompt file `{}`.", path.display()))?;

            if prompt.trim().is_empty() {
                return Err(ConfigurationError::EmptyPrompt(path.display().to_string()).into());
            }

            info!("Loaded system prompt from `{}`.", path.display());
            inner.system_prompt = prompt;
        }

        Self::from_inner(inner)
    }

    /// Wrap and validate an already-built configuration.
    pub fn from_inner(inner: ConfigInner) -> Res<Self> {
        inner.validate()?;

        Ok(Config { inner: Arc::new(inner) })
    }
}

// Tests.

pub mod credentials;
pub mod gemini;
pub mod grok;

use std::{
    fmt,
    ops::{Deref, DerefMut},
};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::base::{
    config::Config,
    error::BackendError,
    types::{ConversationHistory, Res},
};

use credentials::CredentialSet;
use gemini::GeminiLlmClient;
use grok::GrokLlmClient;

// Types.

/// The supported AI providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Gemini,
    Grok,
}

impl Provider {
    /// Parse a provider name case-insensitively, falling back to Gemini on unknown values.
    pub fn parse_or_default(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "gemini" => Self::Gemini,
            "grok" => Self::Grok,
            other => {
                warn!("Unknown LLM provider `{other}`, falling back to `gemini`.");
                Self::Gemini
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Grok => "grok",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sampling and output parameters shared by every provider.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub response_mime_type: String,
}

impl GenerationParams {
    pub fn from_config(config: &Config) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            top_k: config.top_k,
            max_output_tokens: config.max_output_tokens,
            response_mime_type: config.response_mime_type.clone(),
        }
    }
}

// Traits.

/// Generic LLM client trait that backend adapters must implement.
///
/// An adapter holds a stateful conversation: its history and credential rotator
/// are mutated through `&mut self`, so exactly one task (the relay worker) drives it.
#[async_trait]
pub trait GenericLlmClient: Send + 'static {
    /// The provider behind this adapter.
    fn provider(&self) -> Provider;

    /// Send one user message and return the model's reply.
    ///
    /// On success the message and reply are appended to the history as one pair.
    /// On failure the history is left untouched.
    async fn send(&mut self, text: &str) -> Result<String, BackendError>;

    /// Move to the next credential and re-authenticate with it.
    ///
    /// Never fails; with a single credential this re-authenticates with the same one.
    fn rotate_credential(&mut self);

    /// Index of the credential currently in use.
    fn active_credential(&self) -> usize;

    /// The conversation so far.
    fn history(&self) -> &ConversationHistory;

    /// Release the session. Safe to call repeatedly.
    async fn cleanup(&mut self);
}

// Structs.

/// LLM client for the application.
///
/// Unlike the chat client this is not shared: it is owned by the relay worker,
/// which hands it back to the runtime for cleanup when it stops.
pub struct LlmClient {
    inner: Box<dyn GenericLlmClient>,
}

impl Deref for LlmClient {
    type Target = dyn GenericLlmClient;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl DerefMut for LlmClient {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.inner
    }
}

impl LlmClient {
    pub fn new(inner: Box<dyn GenericLlmClient>) -> Self {
        Self { inner }
    }

    /// Build the configured provider's adapter.
    ///
    /// Fails if the selected provider has no credentials.
    pub fn from_config(config: &Config) -> Res<Self> {
        let provider = Provider::parse_or_default(&config.llm_provider);
        let params = GenerationParams::from_config(config);

        let client = match provider {
            Provider::Gemini => {
                let credentials = CredentialSet::new(provider, config.gemini_api_keys.clone())?;
                Self::new(Box::new(GeminiLlmClient::new(
                    &config.gemini_api_base,
                    &config.gemini_model,
                    &config.system_prompt,
                    params,
                    credentials,
                    ConversationHistory::new(),
                )?))
            }
            Provider::Grok => {
                let credentials = CredentialSet::new(provider, config.grok_api_key.clone().into_iter().collect())?;
                Self::new(Box::new(GrokLlmClient::new(
                    &config.grok_api_base,
                    &config.grok_model,
                    &config.system_prompt,
                    params,
                    credentials,
                    ConversationHistory::new(),
                )))
            }
        };

        info!("Initialized `{}` backend.", provider);

        Ok(client)
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::base::{config::ConfigInner, error::ConfigurationError};

    #[test]
    fn test_provider_parse_is_case_insensitive() {
        assert_eq!(Provider::parse_or_default("GROK"), Provider::Grok);
        assert_eq!(Provider::parse_or_default(" Gemini "), Provider::Gemini);
    }

    #[test]
    fn test_provider_parse_falls_back_to_gemini() {
        assert_eq!(Provider::parse_or_default("claude"), Provider::Gemini);
    }

    #[test]
    fn test_factory_requires_credentials() {
        let config = Config { inner: Arc::new(ConfigInner::default()) };

        let err = LlmClient::from_config(&config).err().unwrap();
        assert!(matches!(err.downcast_ref::<ConfigurationError>(), Some(ConfigurationError::MissingCredentials { .. })));
    }

    #[test]
    fn test_factory_selects_provider() {
        let config = Config {
            inner: Arc::new(ConfigInner {
                llm_provider: "grok".into(),
                grok_api_key: Some("xai-test".into()),
                ..Default::default()
            }),
        };

        let client = LlmClient::from_config(&config).unwrap();
        assert_eq!(client.provider(), Provider::Grok);

        let config = Config {
            inner: Arc::new(ConfigInner {
                gemini_api_keys: vec!["a".into(), "b".into()],
                ..Default::default()
            }),
        };

        let client = LlmClient::from_config(&config).unwrap();
        assert_eq!(client.provider(), Provider::Gemini);
        assert_eq!(client.active_credential(), 0);
    }
}

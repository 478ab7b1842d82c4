//! Grok backend over xAI's OpenAI-compatible chat completions API.

use std::time::Duration;

use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use tracing::{debug, info, instrument, warn};

use crate::base::{
    error::BackendError,
    types::{ConversationHistory, HistoryEntry, Role},
};

use super::{
    GenericLlmClient, GenerationParams, Provider,
    credentials::{CredentialRotator, CredentialSet},
};

const PROVIDER: &str = "grok";

// Specific implementations.

/// Grok LLM client implementation.
pub struct GrokLlmClient {
    client: Option<Client<OpenAIConfig>>,
    credentials: CredentialRotator,
    api_base: String,
    model: String,
    system_prompt: String,
    params: GenerationParams,
    history: ConversationHistory,
}

impl GrokLlmClient {
    /// Create a new Grok client and open its conversation session.
    #[instrument(name = "GrokLlmClient::new", skip_all)]
    pub fn new(api_base: &str, model: &str, system_prompt: &str, params: GenerationParams, credentials: CredentialSet, history: ConversationHistory) -> Self {
        let credentials = CredentialRotator::new(credentials);
        let client = build_client(api_base, credentials.current());

        info!("Grok session opened for `{}`.", model);

        Self {
            client: Some(client),
            credentials,
            api_base: api_base.to_string(),
            model: model.to_string(),
            system_prompt: system_prompt.to_string(),
            params,
            history,
        }
    }
}

#[async_trait]
impl GenericLlmClient for GrokLlmClient {
    fn provider(&self) -> Provider {
        Provider::Grok
    }

    #[instrument(name = "GrokLlmClient::send", skip_all)]
    async fn send(&mut self, text: &str) -> Result<String, BackendError> {
        let client = self.client.as_ref().ok_or_else(|| BackendError::SessionClosed(PROVIDER.to_string()))?;

        let request = build_request(&self.model, &self.system_prompt, &self.params, self.history.entries(), text).map_err(map_openai_error)?;
        let response = client.chat().create(request).await.map_err(map_openai_error)?;

        let reply = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| BackendError::Malformed {
                provider: PROVIDER.to_string(),
                message: "completion has no content".to_string(),
            })?;

        self.history.append_exchange(text, reply.as_str());
        debug!("Grok history now has {} entries.", self.history.len());

        Ok(reply)
    }

    fn rotate_credential(&mut self) {
        self.credentials.advance();

        // Rebuild the client so the next call authenticates afresh, even with a single key.
        if self.client.is_some() {
            self.client = Some(build_client(&self.api_base, self.credentials.current()));
        }

        info!("Grok credential #{} of {} re-authenticated.", self.credentials.index() + 1, self.credentials.len());
    }

    fn active_credential(&self) -> usize {
        self.credentials.index()
    }

    fn history(&self) -> &ConversationHistory {
        &self.history
    }

    async fn cleanup(&mut self) {
        if self.client.take().is_some() {
            info!("Grok session closed.");
        } else {
            debug!("Grok session already closed.");
        }
    }
}

// Helpers.

fn build_client(api_base: &str, api_key: &str) -> Client<OpenAIConfig> {
    let cfg = OpenAIConfig::new().with_api_base(api_base.trim_end_matches('/')).with_api_key(api_key);

    // Rate limits and 5xx surface on the first response; the retry policy owns retries and rotation.
    let no_retry = ExponentialBackoffBuilder::new().with_max_elapsed_time(Some(Duration::ZERO)).build();

    Client::with_config(cfg).with_backoff(no_retry)
}

/// Build the chat completion request: persona, prior history, then the new message.
fn build_request(model: &str, system_prompt: &str, params: &GenerationParams, history: &[HistoryEntry], text: &str) -> Result<CreateChatCompletionRequest, OpenAIError> {
    let mut messages: Vec<ChatCompletionRequestMessage> = Vec::with_capacity(history.len() + 2);

    messages.push(ChatCompletionRequestSystemMessageArgs::default().content(system_prompt).build()?.into());

    for entry in history {
        let message: ChatCompletionRequestMessage = match entry.role {
            Role::User => ChatCompletionRequestUserMessageArgs::default().content(entry.text.as_str()).build()?.into(),
            Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default().content(entry.text.as_str()).build()?.into(),
            Role::System => ChatCompletionRequestSystemMessageArgs::default().content(entry.text.as_str()).build()?.into(),
        };

        messages.push(message);
    }

    messages.push(ChatCompletionRequestUserMessageArgs::default().content(text).build()?.into());

    // `top_k` and the response MIME type have no counterpart in the chat completions API.
    CreateChatCompletionRequestArgs::default()
        .model(model)
        .messages(messages)
        .temperature(params.temperature as f32)
        .top_p(params.top_p as f32)
        .max_completion_tokens(params.max_output_tokens)
        .build()
}

/// Map an `async-openai` error onto the backend error taxonomy.
fn map_openai_error(err: OpenAIError) -> BackendError {
    match err {
        OpenAIError::ApiError(api) => {
            let message = api.to_string();
            let lowered = message.to_lowercase();

            if lowered.contains("rate_limit") || lowered.contains("rate limit") || lowered.contains("insufficient_quota") || lowered.contains("429") {
                warn!("Grok quota exhausted: {message}");
                BackendError::QuotaExhausted {
                    provider: PROVIDER.to_string(),
                    message,
                }
            } else if lowered.contains("invalid_api_key") || lowered.contains("incorrect api key") || lowered.contains("authentication") {
                BackendError::Auth {
                    provider: PROVIDER.to_string(),
                    message,
                }
            } else {
                BackendError::Upstream {
                    provider: PROVIDER.to_string(),
                    message,
                    status: None,
                }
            }
        }
        OpenAIError::JSONDeserialize(e) => BackendError::Malformed {
            provider: PROVIDER.to_string(),
            message: e.to_string(),
        },
        other => BackendError::Upstream {
            provider: PROVIDER.to_string(),
            message: other.to_string(),
            status: None,
        },
    }
}

// Tests.

//! Gemini backend over the native `generateContent` REST API.
//!
//! This is the multi-credential adapter: a quota error on one API key is
//! answered by rotating to the next key in the configured set.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::base::{
    error::BackendError,
    types::{ConversationHistory, HistoryEntry, Res, Role},
};

use super::{
    GenericLlmClient, GenerationParams, Provider,
    credentials::{CredentialRotator, CredentialSet},
};

const PROVIDER: &str = "gemini";

// Wire types.

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig<'a>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    temperature: f64,
    top_p: f64,
    top_k: u32,
    max_output_tokens: u32,
    response_mime_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

// Specific implementations.

/// Gemini LLM client implementation.
pub struct GeminiLlmClient {
    http: Option<reqwest::Client>,
    credentials: CredentialRotator,
    endpoint: String,
    system_prompt: String,
    params: GenerationParams,
    history: ConversationHistory,
}

impl GeminiLlmClient {
    /// Create a new Gemini client and open its conversation session.
    #[instrument(name = "GeminiLlmClient::new", skip_all)]
    pub fn new(api_base: &str, model: &str, system_prompt: &str, params: GenerationParams, credentials: CredentialSet, history: ConversationHistory) -> Res<Self> {
        let http = reqwest::Client::builder().connect_timeout(Duration::from_secs(10)).build()?;
        let endpoint = format!("{}/models/{}:generateContent", api_base.trim_end_matches('/'), model);

        info!("Gemini session opened for `{}` with {} credential(s).", model, credentials.len());

        Ok(Self {
            http: Some(http),
            credentials: CredentialRotator::new(credentials),
            endpoint,
            system_prompt: system_prompt.to_string(),
            params,
            history,
        })
    }
}

#[async_trait]
impl GenericLlmClient for GeminiLlmClient {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    #[instrument(name = "GeminiLlmClient::send", skip_all)]
    async fn send(&mut self, text: &str) -> Result<String, BackendError> {
        let http = self.http.as_ref().ok_or_else(|| BackendError::SessionClosed(PROVIDER.to_string()))?;

        let body = build_request(&self.system_prompt, &self.params, self.history.entries(), text);
        let response = http.post(&self.endpoint).header("x-goog-api-key", self.credentials.current()).json(&body).send().await?;

        let status = response.status();
        let payload = response.text().await?;

        if !status.is_success() {
            return Err(classify_error(status, &payload));
        }

        let reply = parse_response(&payload)?;

        self.history.append_exchange(text, reply.as_str());
        debug!("Gemini history now has {} entries.", self.history.len());

        Ok(reply)
    }

    fn rotate_credential(&mut self) {
        let previous = self.credentials.index();
        self.credentials.advance();

        // The key is attached per request, so switching the active key re-authenticates.
        info!("Gemini credential rotated from #{} to #{} of {}.", previous + 1, self.credentials.index() + 1, self.credentials.len());
    }

    fn active_credential(&self) -> usize {
        self.credentials.index()
    }

    fn history(&self) -> &ConversationHistory {
        &self.history
    }

    async fn cleanup(&mut self) {
        if self.http.take().is_some() {
            info!("Gemini session closed.");
        } else {
            debug!("Gemini session already closed.");
        }
    }
}

// Helpers.

/// Build the request body: persona, prior history, then the new message.
fn build_request<'a>(system_prompt: &'a str, params: &'a GenerationParams, history: &'a [HistoryEntry], text: &'a str) -> GenerateContentRequest<'a> {
    // System entries travel in `systemInstruction`; `contents` only accepts user and model turns.
    let mut contents = history
        .iter()
        .filter_map(|entry| {
            let role = match entry.role {
                Role::User => "user",
                Role::Assistant => "model",
                Role::System => return None,
            };

            Some(Content {
                role: Some(role),
                parts: vec![Part { text: &entry.text }],
            })
        })
        .collect::<Vec<_>>();

    contents.push(Content {
        role: Some("user"),
        parts: vec![Part { text }],
    });

    GenerateContentRequest {
        system_instruction: Content {
            role: None,
            parts: vec![Part { text: system_prompt }],
        },
        contents,
        generation_config: GenerationConfig {
            temperature: params.temperature,
            top_p: params.top_p,
            top_k: params.top_k,
            max_output_tokens: params.max_output_tokens,
            response_mime_type: &params.response_mime_type,
        },
    }
}

/// Extract the reply text from a successful response.
fn parse_response(payload: &str) -> Result<String, BackendError> {
    let response: GenerateContentResponse = serde_json::from_str(payload).map_err(|e| BackendError::Malformed {
        provider: PROVIDER.to_string(),
        message: format!("failed to parse response: {e}"),
    })?;

    let text = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect::<String>())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(BackendError::Malformed {
            provider: PROVIDER.to_string(),
            message: "response has no candidate text".to_string(),
        });
    }

    Ok(text)
}

/// Map a non-success response onto the backend error taxonomy.
fn classify_error(status: StatusCode, payload: &str) -> BackendError {
    let body = serde_json::from_str::<ErrorEnvelope>(payload).ok().map(|e| e.error);
    let message = body.as_ref().map(|b| b.message.clone()).filter(|m| !m.is_empty()).unwrap_or_else(|| format!("{status}"));

    if status == StatusCode::TOO_MANY_REQUESTS || body.as_ref().is_some_and(|b| b.status == "RESOURCE_EXHAUSTED") {
        warn!("Gemini quota exhausted: {message}");
        return BackendError::QuotaExhausted {
            provider: PROVIDER.to_string(),
            message,
        };
    }

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return BackendError::Auth {
            provider: PROVIDER.to_string(),
            message,
        };
    }

    BackendError::Upstream {
        provider: PROVIDER.to_string(),
        message: format!("{status}: {message}"),
        status: Some(status.as_u16()),
    }
}

// Tests.

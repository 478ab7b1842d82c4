//! Typed errors for configuration, backend calls, and the relay.

use std::time::Duration;

use thiserror::Error;

use crate::base::prompts;

/// Fatal problems detected while building the relay from configuration.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("no credentials configured for provider `{provider}`")]
    MissingCredentials { provider: String },

    #[error("system prompt file `{0}` is empty")]
    EmptyPrompt(String),

    #[error("invalid generation parameter: {0}")]
    InvalidParameter(String),

    #[error("invalid retry budget: {0}")]
    InvalidRetryBudget(String),
}

/// Failure of a single backend call.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("quota exhausted on {provider}: {message}")]
    QuotaExhausted { provider: String, message: String },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("upstream error from {provider}: {message}")]
    Upstream { provider: String, message: String, status: Option<u16> },

    #[error("authentication failed for {provider}: {message}")]
    Auth { provider: String, message: String },

    #[error("malformed response from {provider}: {message}")]
    Malformed { provider: String, message: String },

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("session for {0} has been cleaned up")]
    SessionClosed(String),
}

impl BackendError {
    /// Quota exhaustion is handled by credential rotation rather than the retry budget.
    pub fn is_quota(&self) -> bool {
        matches!(self, Self::QuotaExhausted { .. })
    }

    /// Returns false for failures that another attempt cannot fix.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Auth { .. } | Self::SessionClosed(_))
    }
}

/// Outcome of a relay invocation that did not produce a model reply.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("input is empty")]
    InvalidInput,

    #[error("retry budget exhausted after {attempts} attempts: {last}")]
    BudgetExhausted { attempts: u32, last: BackendError },

    #[error("quota still exhausted after {rotations} credential rotations")]
    QuotaExhausted { rotations: u32 },

    #[error("terminal backend failure: {0}")]
    Terminal(BackendError),
}

impl RelayError {
    /// The fixed text shown to the user in place of a model reply.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidInput => prompts::EMPTY_INPUT_REPLY,
            Self::QuotaExhausted { .. } => prompts::QUOTA_FALLBACK_REPLY,
            Self::BudgetExhausted { .. } | Self::Terminal(_) => prompts::FALLBACK_REPLY,
        }
    }
}

// Tests.

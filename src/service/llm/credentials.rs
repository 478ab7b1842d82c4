//! Credential sets and the round-robin rotator used on quota exhaustion.

use std::fmt;

use crate::base::error::ConfigurationError;

use super::Provider;

/// Ordered, non-empty set of API credentials for one adapter.
#[derive(Clone)]
pub struct CredentialSet {
    tokens: Vec<String>,
}

impl CredentialSet {
    /// Build a set, dropping blank tokens. Fails if nothing usable remains.
    pub fn new(provider: Provider, tokens: Vec<String>) -> Result<Self, ConfigurationError> {
        let tokens = tokens.into_iter().map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect::<Vec<_>>();

        if tokens.is_empty() {
            return Err(ConfigurationError::MissingCredentials { provider: provider.to_string() });
        }

        Ok(Self { tokens })
    }

    pub(crate) fn len(&self) -> usize {
        self.tokens.len()
    }
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet").field("len", &self.tokens.len()).finish()
    }
}

/// Tracks the active credential and cycles through the set.
#[derive(Debug, Clone)]
pub struct CredentialRotator {
    set: CredentialSet,
    index: usize,
}

impl CredentialRotator {
    pub fn new(set: CredentialSet) -> Self {
        Self { set, index: 0 }
    }

    /// The credential in use.
    pub fn current(&self) -> &str {
        &self.set.tokens[self.index]
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn len(&self) -> usize {
        self.set.len()
    }

    /// Move to the next credential, wrapping to the first, and return it.
    pub fn advance(&mut self) -> &str {
        self.index = (self.index + 1) % self.set.len();
        self.current()
    }
}

// Tests.

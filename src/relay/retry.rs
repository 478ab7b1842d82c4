//! Tiered retry with credential rotation around a single backend call.

use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{info, instrument, warn};

use crate::{
    base::{
        config::Config,
        error::{BackendError, RelayError},
    },
    service::llm::GenericLlmClient,
};

/// How many attempts a single relay invocation may spend, and how long to wait between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryBudget {
    pub tiers: u32,
    pub attempts_per_tier: u32,
    pub attempt_delay: Duration,
    pub tier_delay: Duration,
    /// Cap on quota rotations per invocation; `None` means `tiers * attempts_per_tier`.
    pub max_rotations: Option<u32>,
}

impl RetryBudget {
    /// One tier of three attempts, two seconds apart.
    pub fn simple() -> Self {
        Self {
            tiers: 1,
            attempts_per_tier: 3,
            attempt_delay: Duration::from_secs(2),
            tier_delay: Duration::from_secs(5),
            max_rotations: None,
        }
    }

    /// Two tiers of nine attempts, two seconds apart, with five seconds between tiers.
    pub fn hardened() -> Self {
        Self {
            tiers: 2,
            attempts_per_tier: 9,
            ..Self::simple()
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            tiers: config.retry_tiers,
            attempts_per_tier: config.retry_attempts_per_tier,
            attempt_delay: config.retry_attempt_delay,
            tier_delay: config.retry_tier_delay,
            max_rotations: config.retry_max_rotations,
        }
    }

    pub fn total_attempts(&self) -> u32 {
        self.tiers.max(1).saturating_mul(self.attempts_per_tier.max(1))
    }

    pub fn rotation_limit(&self) -> u32 {
        self.max_rotations.unwrap_or_else(|| self.total_attempts())
    }
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self::simple()
    }
}

/// Runs backend calls under a [`RetryBudget`] and a per-call timeout.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    budget: RetryBudget,
    call_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(budget: RetryBudget, call_timeout: Duration) -> Self {
        Self { budget, call_timeout }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(RetryBudget::from_config(config), config.backend_timeout)
    }

    pub fn budget(&self) -> &RetryBudget {
        &self.budget
    }

    /// Send `text` to the backend and return its reply.
    ///
    /// Blank input is rejected before any call. A quota error rotates the adapter's
    /// credential and retries at once without spending an attempt. Any other retryable
    /// error (timeouts included) spends one attempt.
    #[instrument(name = "RetryPolicy::invoke", skip_all, fields(provider = %llm.provider()))]
    pub async fn invoke(&self, llm: &mut dyn GenericLlmClient, text: &str) -> Result<String, RelayError> {
        if text.trim().is_empty() {
            return Err(RelayError::InvalidInput);
        }

        let tiers = self.budget.tiers.max(1);
        let attempts_per_tier = self.budget.attempts_per_tier.max(1);
        let rotation_limit = self.budget.rotation_limit();

        let mut tier = 1;
        let mut attempt = 1;
        let mut attempts = 0;
        let mut rotations = 0;

        loop {
            let result = match timeout(self.call_timeout, llm.send(text)).await {
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout(self.call_timeout)),
            };

            let err = match result {
                Ok(reply) => {
                    info!("Backend replied after {} failed attempt(s) and {} rotation(s).", attempts, rotations);
                    return Ok(reply);
                }
                Err(err) => err,
            };

            if err.is_quota() {
                if rotations >= rotation_limit {
                    warn!("Quota still exhausted after {rotations} rotation(s), giving up.");
                    return Err(RelayError::QuotaExhausted { rotations });
                }

                rotations += 1;
                warn!("Quota exhausted on credential #{}: {err}", llm.active_credential() + 1);
                llm.rotate_credential();
                continue;
            }

            if !err.is_retryable() {
                warn!("Backend failed terminally: {err}");
                return Err(RelayError::Terminal(err));
            }

            attempts += 1;
            warn!("Attempt {attempt}/{attempts_per_tier} of tier {tier}/{tiers} failed: {err}");

            if attempt < attempts_per_tier {
                attempt += 1;
                sleep(self.budget.attempt_delay).await;
            } else if tier < tiers {
                tier += 1;
                attempt = 1;
                sleep(self.budget.tier_delay).await;
            } else {
                return Err(RelayError::BudgetExhausted { attempts, last: err });
            }
        }
    }
}

// Tests.

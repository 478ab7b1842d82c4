//! Library root for `relay-bot`.
//!
//! Relay-bot is a Discord bot that forwards messages addressed to it to a
//! generative AI backend (Gemini or Grok) and posts the reply back:
//! - Requests are queued and answered strictly one at a time, in order
//! - Quota errors rotate through the configured API keys
//! - Transient failures are retried under a tiered budget, then answered with a fixed apology
//! - Shutdown drains every queued request before releasing the backend
//!
//! The architecture is built around extensible traits that allow for
//! different implementations of the chat platform and the backend.

pub mod base;
pub mod interaction;
pub mod relay;
pub mod runtime;
pub mod service;

use base::{config::Config, types::Void};
use rustls::crypto;
use tracing::{info, warn};

/// Public async entry for the binary crate.
///
/// Sets up necessary services and runs the relay-bot:
/// - Initializes the crypto provider
/// - Creates the runtime context with the backend, chat client, and relay worker
/// - Runs until shutdown is requested, then drains and cleans up
pub async fn start(config: Config) -> Void {
    info!("Starting relay-bot ...");

    // Start the crypto provider.
    if crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed.");
    }

    // Initialize the runtime.
    let runtime = runtime::Runtime::new(config).await?;

    // Run until shutdown.
    runtime.run().await?;

    info!("Relay-bot stopped.");

    Ok(())
}

//! Service integrations for external APIs and clients.
//!
//! This module contains implementations for various services used by the relay-bot:
//! - Chat services (e.g., Discord)
//! - LLM services (e.g., Gemini, Grok)
//!
//! Each service module defines both generic traits and concrete implementations,
//! allowing for extensibility and easy testing.

pub mod chat;
pub mod llm;

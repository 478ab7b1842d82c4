//! Core components, types, and utilities for the relay-bot.
//!
//! This module contains fundamental building blocks used throughout the application:
//! - Configuration handling and environment variables.
//! - The default persona and the fixed replies.
//! - Typed errors and common types.

pub mod config;
pub mod error;
pub mod prompts;
pub mod types;

//! Event handling and user interactions for relay-bot.
//!
//! This module provides functionality for handling inbound chat messages:
//! - Ignoring the bot's own messages and stripping mentions
//! - Routing owner commands (purge, exit) away from the relay
//! - Queueing everything addressed to the bot for the relay worker

pub mod inbound;

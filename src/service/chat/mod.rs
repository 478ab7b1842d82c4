pub mod discord;

use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;

use crate::base::types::{Res, Void};

// Traits.

/// Generic "chat" trait that clients must implement.
///
/// This trait defines the core functionality for interacting with chat platforms
/// like Discord. Implementing this trait allows different chat services to be used
/// with the relay-bot.
#[async_trait]
pub trait GenericChatClient: Send + Sync + 'static {
    /// Get the bot user ID.
    ///
    /// Returns the unique identifier for the bot in the chat platform,
    /// which is used to detect when the bot is mentioned.
    fn bot_user_id(&self) -> &str;

    /// Start the chat client listener.
    ///
    /// Connects to the platform and dispatches inbound messages until the
    /// connection ends or `shutdown` is called.
    async fn start(&self) -> Void;

    /// Send a message to a channel, prefixed with the mention of the user being answered.
    ///
    /// Text longer than the platform's message limit is split over several messages.
    async fn send_message(&self, channel_id: &str, mention_prefix: &str, text: &str) -> Void;

    /// Delete up to `limit` of the most recent messages in a channel.
    ///
    /// Returns the number of messages deleted.
    async fn purge_messages(&self, channel_id: &str, limit: u32) -> Res<usize>;

    /// Disconnect from the platform. Safe to call repeatedly.
    async fn shutdown(&self) -> Void;
}

// Structs.

/// Chat client for the application.
///
/// It is designed to be trivially cloneable, allowing it to be passed around
/// without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<dyn GenericChatClient>,
}

impl Deref for ChatClient {
    type Target = dyn GenericChatClient;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl ChatClient {
    pub fn new(inner: Arc<dyn GenericChatClient>) -> Self {
        Self { inner }
    }
}

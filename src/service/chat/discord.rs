//! Discord integration for relay-bot.
//!
//! This module connects to the Discord gateway through serenity:
//! - Receiving messages and forwarding them to the inbound handler
//! - Sending (and splitting) replies
//! - Purging recent channel messages
//! - Logging guild activity (edits, deletions, member and channel changes)

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use futures::future::join_all;
use serenity::{
    Client,
    all::{
        ChannelId, Context, EventHandler, GatewayIntents, GetMessages, GuildChannel, GuildId, Http, Member, Mentionable, Message, MessageId, MessageUpdateEvent, Ready,
        ShardManager, User, UserId,
    },
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    base::{
        config::Config,
        error::ConfigurationError,
        types::{Res, Void},
    },
    interaction::inbound::{InboundContext, InboundEvent, handle_inbound_event},
    relay::RelayQueue,
};

use super::{ChatClient, GenericChatClient};

/// Discord's per-message character limit.
const MESSAGE_LIMIT: usize = 2000;

/// Discord returns at most this many messages per history page, and bulk-deletes at most this many.
const PAGE_SIZE: u32 = 100;

// Extra methods on `ChatClient` applied by the discord implementation.

impl ChatClient {
    /// Creates a new Discord chat client.
    pub async fn discord(config: &Config, queue: RelayQueue, shutdown: CancellationToken) -> Res<Self> {
        let client = DiscordChatClient::new(config, queue, shutdown).await?;
        Ok(Self { inner: Arc::new(client) })
    }
}

impl From<DiscordChatClient> for ChatClient {
    fn from(client: DiscordChatClient) -> Self {
        Self { inner: Arc::new(client) }
    }
}

// Structs.

/// Guild activity recorded in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
enum AuditEvent {
    MessageReceived { channel: ChannelId, author: String, content: String },
    MessageDeleted { channel: ChannelId, message: MessageId },
    MessageEdited { channel: ChannelId, author: String, before: Option<String>, after: String },
    MemberJoined { guild: GuildId, member: String },
    MemberLeft { guild: GuildId, member: String },
    ChannelCreated { guild: GuildId, channel: String },
    ChannelDeleted { guild: GuildId, channel: String },
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MessageReceived { channel, author, content } => write!(f, "Message received in {channel} from {author}: {content}"),
            Self::MessageDeleted { channel, message } => write!(f, "Message {message} deleted in {channel}"),
            Self::MessageEdited { channel, author, before, after } => {
                write!(f, "Message edited in {channel} by {author}: `{}` -> `{after}`", before.as_deref().unwrap_or("<not cached>"))
            }
            Self::MemberJoined { guild, member } => write!(f, "Member {member} joined guild {guild}"),
            Self::MemberLeft { guild, member } => write!(f, "Member {member} left guild {guild}"),
            Self::ChannelCreated { guild, channel } => write!(f, "Channel #{channel} created in guild {guild}"),
            Self::ChannelDeleted { guild, channel } => write!(f, "Channel #{channel} deleted in guild {guild}"),
        }
    }
}

/// Gateway event handler.
struct DiscordHandler {
    bot_user: UserId,
    inbound: InboundContext,
}

/// Discord client implementation.
#[derive(Clone)]
struct DiscordChatClient {
    token: String,
    bot_user: UserId,
    bot_user_id: String,
    http: Arc<Http>,
    owner_id: Option<String>,
    purge_limit: u32,
    queue: RelayQueue,
    shutdown: CancellationToken,
    shard_manager: Arc<Mutex<Option<Arc<ShardManager>>>>,
}

impl DiscordChatClient {
    /// Create a new Discord chat client.
    #[instrument(name = "DiscordChatClient::new", skip_all)]
    pub async fn new(config: &Config, queue: RelayQueue, shutdown: CancellationToken) -> Res<Self> {
        let token = config.discord_token.trim().to_string();

        if token.is_empty() {
            return Err(ConfigurationError::MissingCredentials { provider: "discord".to_string() }.into());
        }

        // Get the bot's user ID.

        let http = Arc::new(Http::new(&token));
        let bot_user = http.get_current_user().await?;

        info!("Discord bot user: {} ({})", bot_user.name, bot_user.id);

        Ok(Self {
            token,
            bot_user: bot_user.id,
            bot_user_id: bot_user.id.to_string(),
            http,
            owner_id: config.owner_id.map(|id| id.to_string()),
            purge_limit: config.purge_limit,
            queue,
            shutdown,
            shard_manager: Arc::new(Mutex::new(None)),
        })
    }

    /// Delete one page of messages, falling back to single deletes if the bulk call is refused.
    async fn delete_page(&self, channel: ChannelId, ids: &[MessageId]) -> usize {
        if ids.len() >= 2 {
            match channel.delete_messages(&self.http, ids.iter()).await {
                Ok(()) => return ids.len(),
                // Bulk delete refuses messages older than two weeks.
                Err(err) => warn!("Bulk delete failed, deleting one by one: {err}"),
            }
        }

        let results = join_all(ids.iter().map(|id| channel.delete_message(&self.http, *id))).await;

        results
            .into_iter()
            .filter(|result| match result {
                Ok(()) => true,
                Err(err) => {
                    debug!("Failed to delete message: {err}");
                    false
                }
            })
            .count()
    }
}

#[async_trait]
impl GenericChatClient for DiscordChatClient {
    fn bot_user_id(&self) -> &str {
        &self.bot_user_id
    }

    async fn start(&self) -> Void {
        let handler = DiscordHandler {
            bot_user: self.bot_user,
            inbound: InboundContext {
                queue: self.queue.clone(),
                chat: ChatClient::from(self.clone()),
                owner_id: self.owner_id.clone(),
                purge_limit: self.purge_limit,
                shutdown: self.shutdown.clone(),
            },
        };

        // `GUILD_MEMBERS` and `MESSAGE_CONTENT` are privileged and must be enabled for the application.
        let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_MEMBERS | GatewayIntents::GUILD_MESSAGES | GatewayIntents::DIRECT_MESSAGES | GatewayIntents::MESSAGE_CONTENT;

        let mut client = Client::builder(&self.token, intents).event_handler(handler).await?;

        *self.shard_manager.lock().await = Some(client.shard_manager.clone());

        // Runs until the gateway connection ends or the shard manager is shut down.
        client.start().await?;

        Ok(())
    }

    #[instrument(skip(self, text))]
    async fn send_message(&self, channel_id: &str, mention_prefix: &str, text: &str) -> Void {
        let channel = parse_channel_id(channel_id)?;

        for chunk in split_message(mention_prefix, text, MESSAGE_LIMIT) {
            channel.say(&self.http, chunk).await.map_err(|e| anyhow::anyhow!("Failed to send message: {}", e))?;
        }

        Ok(())
    }

    #[instrument(skip(self))]
    async fn purge_messages(&self, channel_id: &str, limit: u32) -> Res<usize> {
        let channel = parse_channel_id(channel_id)?;

        let mut remaining = limit;
        let mut before: Option<MessageId> = None;
        let mut deleted = 0;

        while remaining > 0 {
            let page_size = remaining.min(PAGE_SIZE);

            let mut builder = GetMessages::new().limit(page_size as u8);
            if let Some(before) = before {
                builder = builder.before(before);
            }

            let messages = channel.messages(&self.http, builder).await?;
            if messages.is_empty() {
                break;
            }

            let ids = messages.iter().map(|m| m.id).collect::<Vec<_>>();
            before = ids.last().copied();
            remaining = remaining.saturating_sub(ids.len() as u32);

            deleted += self.delete_page(channel, &ids).await;

            if (ids.len() as u32) < page_size {
                break;
            }
        }

        info!("Deleted {deleted} message(s) from channel {channel_id}.");

        Ok(deleted)
    }

    async fn shutdown(&self) -> Void {
        if let Some(shard_manager) = self.shard_manager.lock().await.take() {
            info!("Disconnecting from the Discord gateway ...");
            shard_manager.shutdown_all().await;
        } else {
            debug!("Discord gateway not connected.");
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for DiscordHandler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("Connected to Discord as {}.", ready.user.name);
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        if msg.author.id != self.bot_user {
            info!(
                "{}",
                AuditEvent::MessageReceived {
                    channel: msg.channel_id,
                    author: msg.author.name.clone(),
                    content: msg.content.clone(),
                }
            );
        }

        let event = InboundEvent {
            sender_id: msg.author.id.to_string(),
            sender_mention: msg.author.mention().to_string(),
            channel_id: msg.channel_id.to_string(),
            raw_text: msg.content.clone(),
            is_self: msg.author.id == self.bot_user,
            addressed: msg.mentions_user_id(self.bot_user),
        };

        let outcome = handle_inbound_event(event, &self.inbound);
        debug!("Inbound message outcome: {outcome:?}");
    }

    async fn message_delete(&self, _ctx: Context, channel_id: ChannelId, deleted_message_id: MessageId, _guild_id: Option<GuildId>) {
        info!(
            "{}",
            AuditEvent::MessageDeleted {
                channel: channel_id,
                message: deleted_message_id,
            }
        );
    }

    async fn message_update(&self, _ctx: Context, old_if_available: Option<Message>, _new: Option<Message>, event: MessageUpdateEvent) {
        if let Some(audit) = edit_audit(self.bot_user, old_if_available, event) {
            info!("{audit}");
        }
    }

    async fn guild_member_addition(&self, _ctx: Context, new_member: Member) {
        info!(
            "{}",
            AuditEvent::MemberJoined {
                guild: new_member.guild_id,
                member: new_member.user.name,
            }
        );
    }

    async fn guild_member_removal(&self, _ctx: Context, guild_id: GuildId, user: User, _member_data_if_available: Option<Member>) {
        info!("{}", AuditEvent::MemberLeft { guild: guild_id, member: user.name });
    }

    async fn channel_create(&self, _ctx: Context, channel: GuildChannel) {
        info!(
            "{}",
            AuditEvent::ChannelCreated {
                guild: channel.guild_id,
                channel: channel.name,
            }
        );
    }

    async fn channel_delete(&self, _ctx: Context, channel: GuildChannel, _messages: Option<Vec<Message>>) {
        info!(
            "{}",
            AuditEvent::ChannelDeleted {
                guild: channel.guild_id,
                channel: channel.name,
            }
        );
    }
}

// Helpers.

/// Build the audit entry for an edit. The bot's own edits and content-less updates (embeds) are skipped.
fn edit_audit(bot_user: UserId, old: Option<Message>, event: MessageUpdateEvent) -> Option<AuditEvent> {
    let author = event.author.or_else(|| old.as_ref().map(|m| m.author.clone()));

    if author.as_ref().is_some_and(|a| a.id == bot_user) {
        return None;
    }

    Some(AuditEvent::MessageEdited {
        channel: event.channel_id,
        author: author.map(|a| a.name).unwrap_or_else(|| "unknown".to_string()),
        before: old.map(|m| m.content),
        after: event.content?,
    })
}

fn parse_channel_id(channel_id: &str) -> Res<ChannelId> {
    let id = channel_id.parse::<u64>().ok().filter(|id| *id != 0).ok_or_else(|| anyhow::anyhow!("Invalid Discord channel ID: `{channel_id}`"))?;

    Ok(ChannelId::new(id))
}

/// Prefix `text` with the mention and split it into chunks of at most `limit` characters.
///
/// Chunks break at the last newline inside the window when there is one.
fn split_message(mention_prefix: &str, text: &str, limit: usize) -> Vec<String> {
    let full = if mention_prefix.is_empty() { text.to_string() } else { format!("{mention_prefix} {text}") };
    let chars = full.chars().collect::<Vec<_>>();

    if chars.len() <= limit {
        return vec![full];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let mut end = (start + limit).min(chars.len());

        if end < chars.len()
            && let Some(newline) = chars[start..end].iter().rposition(|c| *c == '\n')
            && newline > 0
        {
            end = start + newline + 1;
        }

        chunks.push(chars[start..end].iter().collect());
        start = end;
    }

    chunks
}

// Tests.

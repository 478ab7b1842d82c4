//! Routing of inbound chat messages.
//!
//! Every message the platform delivers passes through [`handle_inbound_event`]: the bot's
//! own messages are dropped, commands are executed, and messages addressed to the bot are
//! queued for the relay worker.

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, instrument, warn};

use crate::{
    base::{
        prompts,
        types::{ChatRequest, Void},
    },
    relay::{EnqueueError, RelayQueue},
    service::chat::ChatClient,
};

/// A message as seen by the platform adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub sender_id: String,
    pub sender_mention: String,
    pub channel_id: String,
    pub raw_text: String,
    /// Sent by the bot itself.
    pub is_self: bool,
    /// The bot is mentioned in the message.
    pub addressed: bool,
}

/// Everything the inbound handler needs, cloned into each platform callback.
#[derive(Clone)]
pub struct InboundContext {
    pub queue: RelayQueue,
    pub chat: ChatClient,
    pub owner_id: Option<String>,
    pub purge_limit: u32,
    pub shutdown: CancellationToken,
}

impl InboundContext {
    fn is_owner(&self, sender_id: &str) -> bool {
        self.owner_id.as_deref() == Some(sender_id)
    }
}

/// A non-relay action requested by a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `!hello`.
    Greet,
    /// Delete recent messages in the channel.
    Purge { limit: u32 },
    /// Say goodbye and shut the bot down.
    Exit,
    /// An owner-only command from someone else.
    Denied,
}

/// What happened to an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// The bot's own message.
    Ignored,
    /// Not a command and the bot was not mentioned.
    NotAddressed,
    /// Queued for the relay under this sequence number.
    Enqueued(u64),
    /// Intake is closed; the sender was told so.
    Rejected,
    /// Routed to a command instead of the relay.
    Command(Command),
}

/// Route one inbound message. Never blocks: command side effects run on their own task.
#[instrument(skip_all, fields(channel = %event.channel_id, sender = %event.sender_id))]
pub fn handle_inbound_event(event: InboundEvent, ctx: &InboundContext) -> InboundOutcome {
    if event.is_self {
        return InboundOutcome::Ignored;
    }

    let is_owner = ctx.is_owner(&event.sender_id);

    if let Some(command) = parse_prefix_command(&event.raw_text, ctx.purge_limit) {
        // Every prefix command except the greeting is owner only.
        let allowed = command == Command::Greet || is_owner;
        return dispatch_command(command, allowed, event, ctx);
    }

    if !event.addressed {
        debug!("Message does not mention the bot, skipping.");
        return InboundOutcome::NotAddressed;
    }

    let text = strip_mention(&event.raw_text, ctx.chat.bot_user_id());

    match parse_keyword(&text) {
        Some(Keyword::Clear) => return dispatch_command(Command::Purge { limit: ctx.purge_limit }, true, event, ctx),
        Some(Keyword::Exit) if is_owner => return dispatch_command(Command::Exit, true, event, ctx),
        Some(Keyword::Exit) => info!("Exit keyword from a non-owner, relaying as a normal message."),
        None => {}
    }

    let request = ChatRequest::new(&event.channel_id, &event.sender_id, &event.sender_mention, text);

    match ctx.queue.enqueue(request) {
        Ok(sequence) => {
            info!("Queued request #{sequence}.");
            InboundOutcome::Enqueued(sequence)
        }
        Err(EnqueueError::IntakeClosed) => {
            warn!("Intake is closed, rejecting message.");
            spawn_reply(ctx.chat.clone(), event.channel_id, event.sender_mention, prompts::SHUTTING_DOWN_REPLY);
            InboundOutcome::Rejected
        }
    }
}

/// Remove every mention of the bot (`<@id>` or `<@!id>`) and trim what is left.
pub fn strip_mention(text: &str, bot_user_id: &str) -> String {
    if bot_user_id.is_empty() {
        return text.trim().to_string();
    }

    text.replace(&format!("<@!{bot_user_id}>"), "").replace(&format!("<@{bot_user_id}>"), "").trim().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Keyword {
    Clear,
    Exit,
}

/// Match the first word of a mention-addressed message against the command keywords.
fn parse_keyword(text: &str) -> Option<Keyword> {
    let first = text.split_whitespace().next()?.to_lowercase();

    match first.as_str() {
        "clear" | "清除" => Some(Keyword::Clear),
        "exit" | "退出" => Some(Keyword::Exit),
        _ => None,
    }
}

/// Parse a `!` command. Unknown commands are not commands.
fn parse_prefix_command(text: &str, default_limit: u32) -> Option<Command> {
    let mut words = text.trim().strip_prefix('!')?.split_whitespace();
    let name = words.next()?.to_lowercase();

    match name.as_str() {
        "hello" => Some(Command::Greet),
        "clear" => {
            let limit = words.next().and_then(|n| n.parse::<u32>().ok()).filter(|n| *n > 0).unwrap_or(default_limit);
            Some(Command::Purge { limit })
        }
        "exit" => Some(Command::Exit),
        _ => None,
    }
}

/// Run the command's side effects on a background task, or deny it if the sender is not allowed.
fn dispatch_command(command: Command, allowed: bool, event: InboundEvent, ctx: &InboundContext) -> InboundOutcome {
    let command = if allowed { command } else { Command::Denied };

    info!("Running command {command:?}.");

    // Close intake before returning so nothing queued after the exit request is accepted.
    if command == Command::Exit {
        ctx.queue.close();
    }

    let ctx_clone = ctx.clone();
    let command_clone = command.clone();
    tokio::spawn(
        async move {
            let result = run_command(command_clone, &event, &ctx_clone).await;

            if let Err(err) = &result {
                error!("Error while handling command: {}", err);
            }
        }
        .in_current_span(),
    );

    InboundOutcome::Command(command)
}

/// Execute a command against the chat platform and lifecycle.
#[instrument(skip_all)]
pub async fn run_command(command: Command, event: &InboundEvent, ctx: &InboundContext) -> Void {
    let channel_id = &event.channel_id;
    let mention = &event.sender_mention;

    match command {
        Command::Greet => ctx.chat.send_message(channel_id, mention, prompts::GREETING_REPLY).await,
        Command::Denied => ctx.chat.send_message(channel_id, mention, prompts::OWNER_ONLY_REPLY).await,
        Command::Purge { limit } => match ctx.chat.purge_messages(channel_id, limit).await {
            Ok(count) => {
                info!("Purged {count} message(s).");
                ctx.chat.send_message(channel_id, mention, prompts::PURGE_DONE_REPLY).await
            }
            Err(err) => {
                error!("Purge failed: {err}");
                ctx.chat.send_message(channel_id, mention, prompts::PURGE_FAILED_REPLY).await
            }
        },
        Command::Exit => {
            let farewell = ctx.chat.send_message(channel_id, mention, prompts::FAREWELL_REPLY).await;

            // Shut down even if the farewell could not be sent.
            ctx.queue.close();
            ctx.shutdown.cancel();

            farewell
        }
    }
}

fn spawn_reply(chat: ChatClient, channel_id: String, mention: String, text: &'static str) {
    tokio::spawn(
        async move {
            if let Err(err) = chat.send_message(&channel_id, &mention, text).await {
                error!("Failed to send reply: {}", err);
            }
        }
        .in_current_span(),
    );
}

// Tests.

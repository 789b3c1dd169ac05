//! Discord gateway adapter using serenity.
//!
//! Turns gateway events into calls on the [`KnowledgeAgent`] and reports
//! connection state to [`BotStatus`]. Reconnection is left to serenity.

use crate::commands::{help_text, parse_command, BotCommand, ParsedCommand, TriggerDetector};
use crate::health::BotStatus;
use crate::knowledge::{KnowledgeAgent, MessageSink, UsageCounter};
use crate::{ArnoldiiError, BotConfig, Result};

use anyhow::Context as _;
use async_trait::async_trait;
use serenity::all::{
    ActivityData, ChannelId, Colour, ConnectionStage, Context, CreateEmbed, CreateMessage,
    EventHandler, GatewayIntents, Http, Message, Ready, ShardManager, ShardStageUpdateEvent,
    UserId,
};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const LATENCY_SAMPLE_INTERVAL: Duration = Duration::from_secs(15);

pub const HELLO_TEXT: &str =
    "Hello! I am Arnoldii, developed by Astragate. How can I help you today?";
pub const CLEARED_TEXT: &str = "✅ Conversation history cleared!";
pub const NOT_ADMIN_TEXT: &str = "You need administrator permissions to check API usage.";

/// Sends replies into one Discord channel
pub struct ChannelSink {
    http: Arc<Http>,
    channel_id: ChannelId,
}

impl ChannelSink {
    pub fn new(http: Arc<Http>, channel_id: ChannelId) -> Self {
        Self { http, channel_id }
    }
}

#[async_trait]
impl MessageSink for ChannelSink {
    async fn send(&self, text: &str) -> anyhow::Result<()> {
        self.channel_id
            .say(&*self.http, text)
            .await
            .with_context(|| format!("failed to send message to channel {}", self.channel_id))?;
        Ok(())
    }
}

/// Connect to the gateway and handle events until the client stops or Ctrl-C.
///
/// `ready_tx` flips to `true` on the first `Ready` event.
pub async fn run(
    config: &BotConfig,
    agent: Arc<KnowledgeAgent>,
    status: Arc<BotStatus>,
    ready_tx: watch::Sender<bool>,
) -> Result<()> {
    let token = config.require_discord_token()?;

    let handler = Handler {
        agent,
        status: status.clone(),
        ready_tx,
        command_prefix: config.command_prefix.clone(),
        bot_names: config.bot_names.clone(),
        detector: OnceLock::new(),
    };

    let intents = GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILDS;

    let mut client = serenity::Client::builder(token, intents)
        .event_handler(handler)
        .await
        .map_err(|e| ArnoldiiError::Discord(format!("failed to build discord client: {e}")))?;

    let shard_manager = client.shard_manager.clone();
    let sampler = tokio::spawn(sample_latency(shard_manager.clone(), status));
    let shutdown = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested, closing discord shards");
            shard_manager.shutdown_all().await;
        }
    });

    let result = client.start().await;
    sampler.abort();
    shutdown.abort();

    result.map_err(|e| ArnoldiiError::Discord(format!("discord gateway error: {e}")))
}

/// Copy heartbeat latency from the shard runners into the status
async fn sample_latency(shard_manager: Arc<ShardManager>, status: Arc<BotStatus>) {
    let mut ticker = tokio::time::interval(LATENCY_SAMPLE_INTERVAL);
    loop {
        ticker.tick().await;
        let latency = {
            let runners = shard_manager.runners.lock().await;
            runners.values().find_map(|runner| runner.latency)
        };
        status.set_latency(latency).await;
    }
}

// -- Serenity EventHandler --

struct Handler {
    agent: Arc<KnowledgeAgent>,
    status: Arc<BotStatus>,
    ready_tx: watch::Sender<bool>,
    command_prefix: String,
    bot_names: Vec<String>,
    /// Built once the bot's own user id is known
    detector: OnceLock<TriggerDetector>,
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!(bot_name = %ready.user.name, "{} has connected to Discord!", ready.user.name);

        ctx.set_activity(Some(ActivityData::listening("mentions and calls")));
        let _ = self
            .detector
            .set(TriggerDetector::new(&self.bot_names).with_bot_id(ready.user.id.get()));

        self.status.mark_connected(ready.user.tag()).await;
        self.ready_tx.send_replace(true);

        info!(guild_count = ready.guilds.len(), "Arnoldii is ready to chat!");
    }

    async fn shard_stage_update(&self, _ctx: Context, event: ShardStageUpdateEvent) {
        match event.new {
            ConnectionStage::Disconnected => {
                warn!(shard = %event.shard_id, "Discord shard disconnected");
                self.status.mark_disconnected().await;
            }
            ConnectionStage::Connected => {
                debug!(shard = %event.shard_id, "Discord shard connected");
                self.status.mark_reconnected().await;
            }
            _ => {}
        }
    }

    async fn message(&self, ctx: Context, message: Message) {
        let bot_id = ctx.cache.current_user().id;
        if is_ignored_author(message.author.id, message.author.bot, bot_id) {
            return;
        }

        if let Some(command) = parse_command(&message.content, &self.command_prefix) {
            self.dispatch_command(&ctx, &message, command).await;
            return;
        }

        let Some(detector) = self.detector.get() else {
            return;
        };

        let mentioned = message.mentions_user_id(bot_id) && !message.mention_everyone;
        if !detector.is_triggered(&message.content, mentioned) {
            return;
        }

        let prompt = detector.prompt_text(&message.content, mentioned);
        self.reply(&ctx, message.channel_id, &prompt).await;
    }
}

impl Handler {
    async fn dispatch_command(&self, ctx: &Context, message: &Message, command: ParsedCommand) {
        let channel_id = message.channel_id;
        if let ParsedCommand::Known(cmd, _) = &command {
            if cmd.admin_only() && !is_admin(ctx, message) {
                say(ctx, channel_id, NOT_ADMIN_TEXT).await;
                return;
            }
        }

        match command {
            ParsedCommand::Known(BotCommand::Chat, args) => {
                if args.is_empty() {
                    let hint = format!("Usage: `{}chat <message>`", self.command_prefix);
                    say(ctx, channel_id, &hint).await;
                } else {
                    self.reply(ctx, channel_id, &args).await;
                }
            }
            ParsedCommand::Known(BotCommand::Clear, _) => {
                self.agent.clear(channel_id.get()).await;
                info!(channel = channel_id.get(), "Conversation history cleared");
                say(ctx, channel_id, CLEARED_TEXT).await;
            }
            ParsedCommand::Known(BotCommand::Usage, _) => {
                let usage = self.agent.usage().await;
                let builder = CreateMessage::new().embed(usage_embed(&usage));
                if let Err(error) = channel_id.send_message(ctx, builder).await {
                    warn!(%error, "Failed to send usage report");
                }
            }
            ParsedCommand::Known(BotCommand::Hello, _) => {
                say(ctx, channel_id, HELLO_TEXT).await;
            }
            ParsedCommand::Known(BotCommand::Help, _) => {
                say(ctx, channel_id, &help_text(&self.command_prefix)).await;
            }
            ParsedCommand::Unknown(name) => {
                debug!(command = %name, "Ignoring unknown command");
            }
        }
    }

    /// Run the pipeline with a typing indicator up
    async fn reply(&self, ctx: &Context, channel_id: ChannelId, prompt: &str) {
        let typing = channel_id.start_typing(&ctx.http);
        let sink = ChannelSink::new(ctx.http.clone(), channel_id);

        let result = self.agent.handle(channel_id.get(), prompt, &sink).await;
        typing.stop();

        if let Err(error) = result {
            warn!(%error, channel = channel_id.get(), "Failed to deliver reply");
        }
    }
}

async fn say(ctx: &Context, channel_id: ChannelId, text: &str) {
    if let Err(error) = channel_id.say(ctx, text).await {
        warn!(%error, channel = channel_id.get(), "Failed to send message");
    }
}

/// Our own messages and other bots never get a reply
fn is_ignored_author(author: UserId, author_is_bot: bool, bot_id: UserId) -> bool {
    author == bot_id || author_is_bot
}

fn is_admin(ctx: &Context, message: &Message) -> bool {
    message
        .author_permissions(&ctx.cache)
        .is_some_and(|permissions| permissions.administrator())
}

/// Name/value pairs shown in the usage report
pub fn usage_fields(usage: &UsageCounter) -> [(&'static str, String); 3] {
    [
        ("Total Tokens Used", usage.total_tokens.to_string()),
        ("Requests Today", usage.requests_today.to_string()),
        ("Last Reset", usage.last_reset.to_string()),
    ]
}

fn usage_embed(usage: &UsageCounter) -> CreateEmbed {
    usage_fields(usage).into_iter().fold(
        CreateEmbed::new()
            .title("DeepSeek API Usage")
            .description("Current usage statistics for the DeepSeek API")
            .colour(Colour::BLUE),
        |embed, (name, value)| embed.field(name, value, true),
    )
}

//! Source watcher: listens on the source channels and forwards every new
//! message to a relay's ingestion endpoint.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serenity::all::{ChannelId, Client, Context, EventHandler, GatewayIntents, Message, Ready};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::platform::discord::channel_name;
use crate::relay::normalize::{RawAttachment, RawEvent, RawId};

/// Build the event record for one source message.
pub fn event_from_message(msg: &Message, channel_name: String) -> RawEvent {
    let attachments = msg
        .attachments
        .iter()
        .map(|a| RawAttachment::Detailed {
            url: a.url.clone(),
            filename: Some(a.filename.clone()),
            size: Some(a.size as u64),
            content_type: a.content_type.clone(),
        })
        .collect();

    let embeds = msg
        .embeds
        .iter()
        .filter_map(|e| serde_json::to_value(e).ok())
        .collect();

    RawEvent {
        timestamp: Some(msg.timestamp.to_string()),
        channel_id: Some(RawId::Number(msg.channel_id.get())),
        channel_name: Some(channel_name),
        author: Some(msg.author.name.clone()),
        content: Some(msg.content.clone()),
        attachments: Some(attachments),
        embeds: Some(embeds),
        embed_count: Some(msg.embeds.len() as u64),
    }
}

/// Posts events to the ingestion endpoint.
pub struct Forwarder {
    client: reqwest::Client,
    endpoint: String,
}

impl Forwarder {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build forwarding HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// One attempt; a failure is returned for logging and the event is dropped.
    pub async fn forward(&self, event: &RawEvent) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(event)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Relay answered HTTP {status}: {body}");
        }
        Ok(())
    }
}

struct WatchHandler {
    sources: HashSet<u64>,
    forwarder: Forwarder,
}

#[async_trait]
impl EventHandler for WatchHandler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!(bot_name = %ready.user.name, "Watcher connected to Discord");
        info!("Monitoring {} channel(s):", self.sources.len());
        for &id in &self.sources {
            match ChannelId::new(id).to_channel(&ctx).await {
                Ok(channel) => info!("  • #{} ({id})", channel_name(&channel)),
                Err(e) => warn!("  • {id} not found: {e}"),
            }
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if !self.sources.contains(&msg.channel_id.get()) {
            return;
        }
        let own_id = ctx.cache.current_user().id;
        if msg.author.id == own_id {
            return;
        }

        let name = match msg.channel_id.to_channel(&ctx).await {
            Ok(channel) => channel_name(&channel),
            Err(e) => {
                debug!(channel = %msg.channel_id, error = %e, "Channel lookup failed");
                "Unknown".to_string()
            }
        };

        info!(
            channel = %name,
            author = %msg.author.name,
            attachments = msg.attachments.len(),
            embeds = msg.embeds.len(),
            "New message"
        );

        let event = event_from_message(&msg, name);
        match self.forwarder.forward(&event).await {
            Ok(()) => debug!(message = %msg.id, "Forwarded to relay"),
            Err(e) => warn!(message = %msg.id, "Forward failed: {e:#}"),
        }
    }
}

/// Run watch mode until the connection stops.
pub async fn run(config: &Config) -> Result<()> {
    let watcher = &config.watcher;

    info!("Starting Discord watcher...");
    info!("  Forwarding to: {}", watcher.endpoint);

    let handler = WatchHandler {
        sources: watcher.source_channel_ids.iter().copied().collect(),
        forwarder: Forwarder::new(&watcher.endpoint, Duration::from_secs(watcher.timeout_secs))?,
    };

    let intents =
        GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGES | GatewayIntents::MESSAGE_CONTENT;
    let mut client = Client::builder(&watcher.bot_token, intents)
        .event_handler(handler)
        .await
        .context("Failed to create Discord client")?;

    client.start().await.context("Discord client stopped")?;
    Ok(())
}

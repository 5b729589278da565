//! The destination connection: resolves channel IDs and sends batches
//! through serenity's HTTP client.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serenity::all::{
    Channel, ChannelId, Client, Context, CreateAttachment, CreateEmbed, CreateEmbedAuthor,
    CreateEmbedFooter, CreateMessage, EventHandler, GatewayIntents, Http, Ready, Timestamp,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{RelayError, RelayResult};
use crate::ingest;
use crate::relay::dispatch::{Destination, DestinationId, DestinationResolver};
use crate::relay::embed::BuiltEmbed;
use crate::relay::fetch::HttpFetcher;
use crate::relay::plan::Batch;
use crate::relay::{run_dispatch_loop, Relay};

/// Plain channel name, without the leading `#`.
pub fn channel_name(channel: &Channel) -> String {
    match channel {
        Channel::Guild(c) => c.name.clone(),
        Channel::Private(c) => c.name(),
        _ => channel.id().to_string(),
    }
}

/// Convert a built embed into serenity's builder.
///
/// The API has no way to set `video` or `provider` on an outgoing embed, so
/// those are left out.
pub fn to_create_embed(embed: &BuiltEmbed) -> CreateEmbed {
    let mut builder = CreateEmbed::new();
    if let Some(ref title) = embed.title {
        builder = builder.title(title);
    }
    if let Some(ref description) = embed.description {
        builder = builder.description(description);
    }
    if let Some(ref url) = embed.url {
        builder = builder.url(url);
    }
    if let Some(color) = embed.color {
        builder = builder.color(color);
    }
    if let Some(ref ts) = embed.timestamp {
        if let Ok(timestamp) = Timestamp::parse(&ts.to_rfc3339()) {
            builder = builder.timestamp(timestamp);
        }
    }
    if let Some(ref footer) = embed.footer {
        let mut f = CreateEmbedFooter::new(&footer.text);
        if let Some(ref icon) = footer.icon_url {
            f = f.icon_url(icon);
        }
        builder = builder.footer(f);
    }
    if let Some(ref image) = embed.image {
        builder = builder.image(image);
    }
    if let Some(ref thumbnail) = embed.thumbnail {
        builder = builder.thumbnail(thumbnail);
    }
    if let Some(ref author) = embed.author {
        let mut a = CreateEmbedAuthor::new(&author.name);
        if let Some(ref url) = author.url {
            a = a.url(url);
        }
        if let Some(ref icon) = author.icon_url {
            a = a.icon_url(icon);
        }
        builder = builder.author(a);
    }
    for field in &embed.fields {
        builder = builder.field(&field.name, &field.value, field.inline);
    }
    if embed.video.is_some() || embed.provider.is_some() {
        debug!(title = ?embed.title, "Embed video/provider not settable, skipped");
    }
    builder
}

fn to_message(batch: &Batch) -> CreateMessage {
    let mut builder = CreateMessage::new();
    if let Some(ref text) = batch.text {
        builder = builder.content(text);
    }
    if !batch.embeds.is_empty() {
        builder = builder.embeds(batch.embeds.iter().map(to_create_embed).collect());
    }
    // `to_vec` copies out of the shared buffer; the batch stays intact for
    // the other destinations.
    let files: Vec<CreateAttachment> = batch
        .files
        .iter()
        .map(|f| CreateAttachment::bytes(f.bytes.to_vec(), f.filename.clone()))
        .collect();
    builder.add_files(files)
}

pub struct DiscordDestination {
    http: Arc<Http>,
    channel: ChannelId,
    name: String,
}

#[async_trait]
impl Destination for DiscordDestination {
    fn name(&self) -> String {
        format!("#{}", self.name)
    }

    async fn send(&self, batch: &Batch) -> RelayResult<()> {
        self.channel
            .send_message(&*self.http, to_message(batch))
            .await
            .map(|_| ())
            .map_err(|e| RelayError::send(self.channel.get(), e))
    }
}

/// Looks destination channels up at dispatch time, so channels that appear
/// or vanish while running are picked up.
pub struct DiscordResolver {
    http: Arc<Http>,
    lookup_timeout: Duration,
}

impl DiscordResolver {
    pub fn new(http: Arc<Http>, lookup_timeout: Duration) -> Self {
        Self {
            http,
            lookup_timeout,
        }
    }
}

#[async_trait]
impl DestinationResolver for DiscordResolver {
    async fn resolve(&self, id: DestinationId) -> RelayResult<Arc<dyn Destination>> {
        if id == 0 {
            return Err(RelayError::destination(id, "channel ID 0 is not valid"));
        }
        let channel = ChannelId::new(id);
        let lookup = channel.to_channel(&*self.http);
        let resolved = match tokio::time::timeout(self.lookup_timeout, lookup).await {
            Ok(Ok(resolved)) => resolved,
            Ok(Err(e)) => return Err(RelayError::destination(id, e)),
            Err(_) => return Err(RelayError::destination(id, "lookup timed out")),
        };

        Ok(Arc::new(DiscordDestination {
            http: self.http.clone(),
            channel,
            name: channel_name(&resolved),
        }))
    }
}

struct RelayHandler {
    destinations: Vec<DestinationId>,
}

#[async_trait]
impl EventHandler for RelayHandler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!(
            bot_name = %ready.user.name,
            guilds = ready.guilds.len(),
            "Relay connected to Discord"
        );

        for &id in &self.destinations {
            match ChannelId::new(id).to_channel(&ctx).await {
                Ok(channel) => info!("  • #{} ({id})", channel_name(&channel)),
                Err(e) => warn!("  • {id} not found: {e}"),
            }
        }
    }
}

/// Run relay mode: the destination connection, the dispatch loop and the
/// ingestion endpoint. Returns when the connection or the endpoint stops.
pub async fn run(config: &Config) -> Result<()> {
    let relay_config = &config.relay;
    let destinations = relay_config.destination_channel_ids.clone();

    info!("Starting Discord relay...");

    let handler = RelayHandler {
        destinations: destinations.clone(),
    };
    let mut client = Client::builder(&relay_config.bot_token, GatewayIntents::GUILDS)
        .event_handler(handler)
        .await
        .context("Failed to create Discord client")?;

    let fetcher = HttpFetcher::new(Duration::from_secs(relay_config.fetch_timeout_secs))?;
    let send_timeout = Duration::from_secs(relay_config.send_timeout_secs);
    let resolver = DiscordResolver::new(client.http.clone(), send_timeout);
    let relay = Relay::new(
        Arc::new(fetcher),
        Arc::new(resolver),
        destinations,
        config.limits(),
        send_timeout,
        relay_config.include_header,
    );

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run_dispatch_loop(relay, rx));

    tokio::select! {
        result = client.start() => result.context("Discord client stopped")?,
        result = ingest::serve(&config.ingest.bind, &config.ingest.path, tx) => result?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::embed::{BuiltAuthor, BuiltField, BuiltFooter, BuiltProvider};
    use crate::relay::fetch::FetchedFile;
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};

    fn full_embed() -> BuiltEmbed {
        BuiltEmbed {
            title: Some("Release".into()),
            description: Some("notes".into()),
            url: Some("https://example.com/r".into()),
            color: Some(0x00ff00),
            timestamp: Some(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()),
            footer: Some(BuiltFooter {
                text: "footer".into(),
                icon_url: None,
            }),
            image: Some("https://example.com/i.png".into()),
            thumbnail: None,
            author: Some(BuiltAuthor {
                name: "ann".into(),
                url: None,
                icon_url: Some("https://example.com/a.png".into()),
            }),
            fields: vec![BuiltField {
                name: "k".into(),
                value: "v".into(),
                inline: true,
            }],
            video: Some("https://example.com/v.mp4".into()),
            provider: Some(BuiltProvider {
                name: Some("host".into()),
                url: None,
            }),
        }
    }

    #[test]
    fn test_embed_conversion() {
        let json = serde_json::to_value(to_create_embed(&full_embed())).unwrap();

        assert_eq!(json["title"], "Release");
        assert_eq!(json["description"], "notes");
        assert_eq!(json["color"], 0x00ff00);
        assert_eq!(json["footer"]["text"], "footer");
        assert_eq!(json["image"]["url"], "https://example.com/i.png");
        assert_eq!(json["author"]["name"], "ann");
        assert_eq!(json["fields"][0]["name"], "k");
        assert_eq!(json["fields"][0]["inline"], true);
        assert!(json["timestamp"].as_str().unwrap().starts_with("2024-01-01T12:00:00"));
        assert!(json.get("video").map_or(true, |v| v.is_null()));
        assert!(json.get("provider").map_or(true, |v| v.is_null()));
    }

    #[test]
    fn test_message_conversion_leaves_batch_intact() {
        let batch = Batch {
            text: Some("hello".into()),
            files: vec![FetchedFile {
                filename: "a.txt".into(),
                bytes: Bytes::from_static(b"abc"),
                content_type: None,
            }],
            embeds: vec![full_embed()],
        };
        let before = batch.clone();

        let message = serde_json::to_value(to_message(&batch)).unwrap();

        assert_eq!(message["content"], "hello");
        assert_eq!(message["embeds"].as_array().unwrap().len(), 1);
        assert_eq!(batch, before);
    }
}

//! Turns a raw inbound event into a [`NormalizedMessage`].

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{RelayError, RelayResult};
use crate::relay::embed::EmbedSpec;

/// `<:name:id>` and `<a:name:id>` custom emoji tags.
static CUSTOM_EMOJI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<a?:(\w+):(\d+)>").expect("Invalid custom emoji regex"));

const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The event record accepted at the ingestion boundary and produced by the watcher.
///
/// Every field may be missing or null.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<RawId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<RawAttachment>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embeds: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed_count: Option<u64>,
}

/// Channel IDs arrive either as JSON numbers or strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Number(u64),
    Text(String),
}

/// An attachment is either a bare URL or an object with metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawAttachment {
    Url(String),
    Detailed {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_type: Option<String>,
    },
}

/// A remote file to relay, before it is fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentRef {
    pub url: String,
    pub filename: Option<String>,
    pub size: Option<u64>,
    pub content_type: Option<String>,
}

/// Canonical form of one inbound message. Built once, never mutated.
#[derive(Debug, Clone, Default)]
pub struct NormalizedMessage {
    pub timestamp: String,
    pub channel_id: String,
    pub channel_name: String,
    pub author: String,
    pub content: String,
    pub attachments: Vec<AttachmentRef>,
    pub embeds: Vec<EmbedSpec>,
    /// Embed count reported by the source; only meaningful when `embeds` is empty.
    pub embed_count: u64,
}

impl RawEvent {
    /// Parse and validate an ingestion body.
    pub fn from_json(body: &[u8]) -> RelayResult<Self> {
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| RelayError::invalid(format!("body is not valid JSON: {e}")))?;
        if !value.is_object() {
            return Err(RelayError::invalid("body must be a JSON object"));
        }

        let event: RawEvent = serde_json::from_value(value)
            .map_err(|e| RelayError::invalid(format!("malformed event: {e}")))?;

        for attachment in event.attachments.iter().flatten() {
            validate_attachment_url(attachment.url())?;
        }

        Ok(event)
    }
}

impl RawAttachment {
    pub fn url(&self) -> &str {
        match self {
            RawAttachment::Url(url) => url,
            RawAttachment::Detailed { url, .. } => url,
        }
    }
}

impl From<RawAttachment> for AttachmentRef {
    fn from(raw: RawAttachment) -> Self {
        match raw {
            RawAttachment::Url(url) => AttachmentRef {
                url,
                filename: None,
                size: None,
                content_type: None,
            },
            RawAttachment::Detailed {
                url,
                filename,
                size,
                content_type,
            } => AttachmentRef {
                url,
                filename: filename.filter(|f| !f.trim().is_empty()),
                size,
                content_type,
            },
        }
    }
}

fn validate_attachment_url(raw: &str) -> RelayResult<()> {
    if raw.trim().is_empty() {
        return Err(RelayError::invalid("attachment URL is empty"));
    }
    let url = reqwest::Url::parse(raw)
        .map_err(|e| RelayError::invalid(format!("attachment URL '{raw}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(RelayError::invalid(format!(
            "attachment URL '{raw}' has unsupported scheme '{other}'"
        ))),
    }
}

/// Rewrite `<a:name:id>` / `<:name:id>` to `:name:`; everything else is untouched.
pub fn rewrite_custom_emoji(text: &str) -> String {
    CUSTOM_EMOJI_RE.replace_all(text, ":$1:").into_owned()
}

/// Render an ISO-8601 timestamp for display, or return the input verbatim
/// when it cannot be parsed.
pub fn format_timestamp(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return format!("{} UTC", ts.with_timezone(&Utc).format(DISPLAY_FORMAT));
    }
    for pattern in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(trimmed, pattern) {
            return ts.format(DISPLAY_FORMAT).to_string();
        }
    }
    raw.to_string()
}

/// Normalize a validated event.
pub fn normalize(raw: RawEvent) -> NormalizedMessage {
    let embeds = raw
        .embeds
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| match serde_json::from_value::<EmbedSpec>(value) {
            Ok(spec) => Some(spec),
            Err(e) => {
                warn!(error = %RelayError::embed_build(index, e), "Dropping embed");
                None
            }
        })
        .collect();

    let channel_id = match raw.channel_id {
        Some(RawId::Number(id)) => id.to_string(),
        Some(RawId::Text(id)) => id,
        None => String::new(),
    };

    NormalizedMessage {
        timestamp: raw
            .timestamp
            .map(|ts| format_timestamp(&ts))
            .unwrap_or_default(),
        channel_id,
        channel_name: raw.channel_name.unwrap_or_default(),
        author: raw.author.unwrap_or_default(),
        content: rewrite_custom_emoji(&raw.content.unwrap_or_default()),
        attachments: raw
            .attachments
            .unwrap_or_default()
            .into_iter()
            .map(AttachmentRef::from)
            .collect(),
        embeds,
        embed_count: raw.embed_count.unwrap_or(0),
    }
}

impl NormalizedMessage {
    /// The text handed to the planner.
    ///
    /// With `include_header` the content is prefixed by a timestamp, channel
    /// and author line, and followed by a note when some of the attachments
    /// could not be fetched.
    pub fn relay_text(&self, include_header: bool, attachments_fetched: usize) -> String {
        if !include_header {
            return self.content.clone();
        }

        let timestamp = non_empty_or(&self.timestamp, "N/A");
        let channel = non_empty_or(&self.channel_name, "Unknown");
        let author = non_empty_or(&self.author, "Unknown");
        let mut text = format!("**[{timestamp}]** #{channel}\n**{author}:** {}", self.content);
        let requested = self.attachments.len();
        if attachments_fetched < requested {
            text.push_str(&format!(
                "\n📎 Attachments: {requested} ({} unavailable)",
                requested - attachments_fetched
            ));
        }
        if self.embeds.is_empty() && self.embed_count > 0 {
            text.push_str(&format!("\n📊 Embeds: {}", self.embed_count));
        }
        text
    }
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() {
        fallback
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> RelayResult<RawEvent> {
        RawEvent::from_json(value.to_string().as_bytes())
    }

    #[test]
    fn test_custom_emoji_rewritten() {
        assert_eq!(rewrite_custom_emoji("<a:wave:123456789012345>"), ":wave:");
        assert_eq!(
            rewrite_custom_emoji("hi <:pepe_sad:42> and <a:dance:7>!"),
            "hi :pepe_sad: and :dance:!"
        );
    }

    #[test]
    fn test_plain_text_unchanged() {
        let text = "no tags here, not even <this> or <:broken:> or <@123>";
        assert_eq!(rewrite_custom_emoji(text), text);
    }

    #[test]
    fn test_timestamp_with_z() {
        assert_eq!(
            format_timestamp("2024-03-05T14:07:09Z"),
            "2024-03-05 14:07:09 UTC"
        );
    }

    #[test]
    fn test_timestamp_with_offset_converted_to_utc() {
        assert_eq!(
            format_timestamp("2024-03-05T14:07:09.123+02:00"),
            "2024-03-05 12:07:09 UTC"
        );
    }

    #[test]
    fn test_naive_timestamp() {
        assert_eq!(format_timestamp("2024-03-05 14:07:09"), "2024-03-05 14:07:09");
        assert_eq!(format_timestamp("2024-03-05T14:07:09"), "2024-03-05 14:07:09");
    }

    #[test]
    fn test_malformed_timestamp_passed_through() {
        assert_eq!(format_timestamp("not-a-date"), "not-a-date");
        assert_eq!(format_timestamp(""), "");
    }

    #[test]
    fn test_missing_fields_default() {
        let msg = normalize(parse(json!({})).unwrap());
        assert_eq!(msg.timestamp, "");
        assert_eq!(msg.channel_name, "");
        assert_eq!(msg.content, "");
        assert!(msg.attachments.is_empty());
        assert!(msg.embeds.is_empty());
        assert_eq!(msg.embed_count, 0);
    }

    #[test]
    fn test_null_fields_default() {
        let msg = normalize(parse(json!({"content": null, "attachments": null})).unwrap());
        assert_eq!(msg.content, "");
        assert!(msg.attachments.is_empty());
    }

    #[test]
    fn test_full_event() {
        let msg = normalize(
            parse(json!({
                "timestamp": "2024-03-05T14:07:09Z",
                "channel_id": 1234567890,
                "channel_name": "general",
                "author": "ann",
                "content": "look <a:wave:1>",
                "attachments": [
                    "https://cdn.example.com/a/b/photo.png?ex=1",
                    {"url": "https://cdn.example.com/doc", "filename": "doc.pdf", "size": 10, "content_type": "application/pdf"}
                ],
                "embeds": [{"title": "t"}],
                "embed_count": 1
            }))
            .unwrap(),
        );

        assert_eq!(msg.timestamp, "2024-03-05 14:07:09 UTC");
        assert_eq!(msg.channel_id, "1234567890");
        assert_eq!(msg.content, "look :wave:");
        assert_eq!(msg.attachments.len(), 2);
        assert_eq!(msg.attachments[0].filename, None);
        assert_eq!(msg.attachments[1].filename.as_deref(), Some("doc.pdf"));
        assert_eq!(msg.attachments[1].size, Some(10));
        assert_eq!(msg.embeds.len(), 1);
    }

    #[test]
    fn test_string_channel_id() {
        let msg = normalize(parse(json!({"channel_id": "987"})).unwrap());
        assert_eq!(msg.channel_id, "987");
    }

    #[test]
    fn test_wrongly_typed_embed_dropped() {
        let msg = normalize(
            parse(json!({"embeds": [{"title": "kept"}, "not an embed", {"color": "red"}]})).unwrap(),
        );
        assert_eq!(msg.embeds.len(), 1);
        assert_eq!(msg.embeds[0].title.as_deref(), Some("kept"));
    }

    #[test]
    fn test_invalid_bodies_rejected() {
        assert!(RawEvent::from_json(b"not json").is_err());
        assert!(RawEvent::from_json(b"[1, 2]").is_err());
        assert!(parse(json!({"content": 5})).is_err());
        assert!(parse(json!({"attachments": "https://x"})).is_err());
        assert!(parse(json!({"attachments": [""]})).is_err());
        assert!(parse(json!({"attachments": ["ftp://example.com/a"]})).is_err());
        assert!(parse(json!({"attachments": [{"filename": "a.txt"}]})).is_err());
        assert!(parse(json!({"embed_count": -1})).is_err());
    }

    #[test]
    fn test_relay_text_with_header() {
        let msg = NormalizedMessage {
            timestamp: "2024-03-05 14:07:09 UTC".into(),
            channel_name: "general".into(),
            author: "ann".into(),
            content: "hello".into(),
            ..Default::default()
        };
        assert_eq!(
            msg.relay_text(true, 0),
            "**[2024-03-05 14:07:09 UTC]** #general\n**ann:** hello"
        );
        assert_eq!(msg.relay_text(false, 0), "hello");
    }

    #[test]
    fn test_relay_text_header_defaults_and_embed_count() {
        let msg = NormalizedMessage {
            content: "hi".into(),
            embed_count: 2,
            ..Default::default()
        };
        assert_eq!(
            msg.relay_text(true, 0),
            "**[N/A]** #Unknown\n**Unknown:** hi\n📊 Embeds: 2"
        );
    }

    #[test]
    fn test_relay_text_notes_missing_attachments() {
        let attachment = AttachmentRef {
            url: "https://cdn.example.com/a.png".into(),
            filename: None,
            size: None,
            content_type: None,
        };
        let msg = NormalizedMessage {
            content: "see files".into(),
            attachments: vec![attachment.clone(), attachment],
            ..Default::default()
        };

        assert_eq!(
            msg.relay_text(true, 0),
            "**[N/A]** #Unknown\n**Unknown:** see files\n📎 Attachments: 2 (2 unavailable)"
        );
        assert_eq!(
            msg.relay_text(true, 2),
            "**[N/A]** #Unknown\n**Unknown:** see files"
        );
        assert_eq!(msg.relay_text(false, 0), "see files");
    }
}

//! Embed specs as they arrive from the source, and their built form.
//!
//! The input side mirrors Discord's embed JSON so that embeds serialized by the
//! watcher deserialize here unchanged. Every property is optional and copied
//! independently; the only substitution is the zero-width placeholder for an
//! empty field name or value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{RelayError, RelayResult};

/// Stands in for a missing embed field name or value (Discord rejects empty ones).
pub const FIELD_PLACEHOLDER: &str = "\u{200b}";

const MAX_COLOR: i64 = 0xFF_FF_FF;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedSpec {
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub color: Option<i64>,
    pub timestamp: Option<String>,
    pub footer: Option<FooterSpec>,
    pub image: Option<MediaSpec>,
    pub thumbnail: Option<MediaSpec>,
    pub author: Option<AuthorSpec>,
    pub fields: Vec<FieldSpec>,
    pub video: Option<MediaSpec>,
    pub provider: Option<ProviderSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FooterSpec {
    pub text: String,
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaSpec {
    pub url: Option<String>,
    pub proxy_url: Option<String>,
    pub width: Option<u64>,
    pub height: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorSpec {
    pub name: String,
    pub url: Option<String>,
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldSpec {
    pub name: Option<String>,
    pub value: Option<String>,
    pub inline: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSpec {
    pub name: Option<String>,
    pub url: Option<String>,
}

/// An embed ready to hand to a destination.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuiltEmbed {
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub color: Option<u32>,
    pub timestamp: Option<DateTime<Utc>>,
    pub footer: Option<BuiltFooter>,
    pub image: Option<String>,
    pub thumbnail: Option<String>,
    pub author: Option<BuiltAuthor>,
    pub fields: Vec<BuiltField>,
    pub video: Option<String>,
    pub provider: Option<BuiltProvider>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuiltFooter {
    pub text: String,
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuiltAuthor {
    pub name: String,
    pub url: Option<String>,
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuiltField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuiltProvider {
    pub name: Option<String>,
    pub url: Option<String>,
}

impl BuiltEmbed {
    /// True when nothing the destination can render is set.
    ///
    /// `video` and `provider` are carried along but cannot be set on an
    /// outgoing embed, so they do not count.
    fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.url.is_none()
            && self.color.is_none()
            && self.timestamp.is_none()
            && self.footer.is_none()
            && self.image.is_none()
            && self.thumbnail.is_none()
            && self.author.is_none()
            && self.fields.is_empty()
    }
}

fn media_url(media: &Option<MediaSpec>) -> Option<String> {
    media
        .as_ref()
        .and_then(|m| m.url.as_ref())
        .filter(|url| !url.is_empty())
        .cloned()
}

fn or_placeholder(value: &Option<String>) -> String {
    match value.as_deref() {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => FIELD_PLACEHOLDER.to_string(),
    }
}

/// Build one embed. `index` is the embed's position in the inbound message,
/// used only for error reporting.
pub fn build_embed(index: usize, spec: &EmbedSpec) -> RelayResult<BuiltEmbed> {
    let color = match spec.color {
        Some(c) if (0..=MAX_COLOR).contains(&c) => Some(c as u32),
        Some(c) => {
            return Err(RelayError::embed_build(
                index,
                format!("color {c} is outside 0..=0xFFFFFF"),
            ))
        }
        None => None,
    };

    let timestamp = match spec.timestamp.as_deref() {
        Some(raw) => Some(
            DateTime::parse_from_rfc3339(raw)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|e| RelayError::embed_build(index, format!("timestamp '{raw}': {e}")))?,
        ),
        None => None,
    };

    let built = BuiltEmbed {
        title: spec.title.clone(),
        description: spec.description.clone(),
        url: spec.url.clone(),
        color,
        timestamp,
        // A footer without text or an author without a name is not sendable.
        footer: spec
            .footer
            .as_ref()
            .filter(|f| !f.text.is_empty())
            .map(|f| BuiltFooter {
                text: f.text.clone(),
                icon_url: f.icon_url.clone(),
            }),
        image: media_url(&spec.image),
        thumbnail: media_url(&spec.thumbnail),
        author: spec
            .author
            .as_ref()
            .filter(|a| !a.name.is_empty())
            .map(|a| BuiltAuthor {
                name: a.name.clone(),
                url: a.url.clone(),
                icon_url: a.icon_url.clone(),
            }),
        fields: spec
            .fields
            .iter()
            .map(|f| BuiltField {
                name: or_placeholder(&f.name),
                value: or_placeholder(&f.value),
                inline: f.inline,
            })
            .collect(),
        video: media_url(&spec.video),
        provider: spec.provider.as_ref().map(|p| BuiltProvider {
            name: p.name.clone(),
            url: p.url.clone(),
        }),
    };

    if built.is_empty() {
        return Err(RelayError::embed_build(index, "embed has no content"));
    }

    Ok(built)
}

/// Build every embed, dropping (and logging) the ones that fail.
pub fn build_embeds(specs: &[EmbedSpec]) -> Vec<BuiltEmbed> {
    specs
        .iter()
        .enumerate()
        .filter_map(|(index, spec)| match build_embed(index, spec) {
            Ok(embed) => Some(embed),
            Err(e) => {
                warn!(error = %e, "Dropping embed");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn titled(title: &str) -> EmbedSpec {
        EmbedSpec {
            title: Some(title.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_only_present_fields_copied() {
        let built = build_embed(0, &titled("Hello")).unwrap();
        assert_eq!(built.title.as_deref(), Some("Hello"));
        assert!(built.description.is_none());
        assert!(built.color.is_none());
        assert!(built.footer.is_none());
        assert!(built.fields.is_empty());
    }

    #[test]
    fn test_full_discord_shape() {
        let spec: EmbedSpec = serde_json::from_value(json!({
            "type": "rich",
            "title": "Release",
            "description": "v1.2.0 is out",
            "url": "https://example.com/release",
            "color": 5814783,
            "timestamp": "2024-05-01T12:30:00Z",
            "footer": {"text": "bot", "icon_url": "https://example.com/icon.png"},
            "image": {"url": "https://example.com/img.png", "width": 10, "height": 10},
            "thumbnail": {"url": "https://example.com/thumb.png"},
            "author": {"name": "Ann", "url": "https://example.com/ann"},
            "fields": [{"name": "Changes", "value": "many", "inline": true}],
            "video": {"url": "https://example.com/v.mp4"},
            "provider": {"name": "Example"}
        }))
        .unwrap();

        let built = build_embed(0, &spec).unwrap();
        assert_eq!(built.color, Some(5814783));
        assert_eq!(
            built.timestamp.map(|t| t.to_rfc3339()),
            Some("2024-05-01T12:30:00+00:00".to_string())
        );
        assert_eq!(built.footer.unwrap().text, "bot");
        assert_eq!(built.image.as_deref(), Some("https://example.com/img.png"));
        assert_eq!(built.thumbnail.as_deref(), Some("https://example.com/thumb.png"));
        assert_eq!(built.author.unwrap().name, "Ann");
        assert_eq!(built.fields.len(), 1);
        assert!(built.fields[0].inline);
        assert_eq!(built.video.as_deref(), Some("https://example.com/v.mp4"));
        assert_eq!(built.provider.unwrap().name.as_deref(), Some("Example"));
    }

    #[test]
    fn test_empty_field_parts_get_placeholder() {
        let spec = EmbedSpec {
            fields: vec![
                FieldSpec {
                    name: None,
                    value: Some("value only".into()),
                    inline: false,
                },
                FieldSpec {
                    name: Some("name only".into()),
                    value: Some(String::new()),
                    inline: true,
                },
            ],
            ..Default::default()
        };

        let built = build_embed(0, &spec).unwrap();
        assert_eq!(built.fields[0].name, FIELD_PLACEHOLDER);
        assert_eq!(built.fields[0].value, "value only");
        assert_eq!(built.fields[1].name, "name only");
        assert_eq!(built.fields[1].value, FIELD_PLACEHOLDER);
    }

    #[test]
    fn test_bad_color_rejected() {
        let spec = EmbedSpec {
            color: Some(0x1_00_00_00),
            ..titled("x")
        };
        assert!(matches!(
            build_embed(3, &spec),
            Err(RelayError::EmbedBuild { index: 3, .. })
        ));

        let spec = EmbedSpec {
            color: Some(-1),
            ..titled("x")
        };
        assert!(build_embed(0, &spec).is_err());
    }

    #[test]
    fn test_bad_timestamp_rejected() {
        let spec = EmbedSpec {
            timestamp: Some("yesterday".into()),
            ..titled("x")
        };
        assert!(build_embed(0, &spec).is_err());
    }

    #[test]
    fn test_empty_embed_rejected() {
        assert!(build_embed(0, &EmbedSpec::default()).is_err());

        let media_without_url = EmbedSpec {
            image: Some(MediaSpec::default()),
            ..Default::default()
        };
        assert!(build_embed(0, &media_without_url).is_err());
    }

    #[test]
    fn test_video_or_provider_alone_rejected() {
        let spec: EmbedSpec = serde_json::from_value(json!({
            "type": "video",
            "video": {"url": "https://example.com/v.mp4"},
            "provider": {"name": "YouTube"}
        }))
        .unwrap();
        assert!(matches!(
            build_embed(1, &spec),
            Err(RelayError::EmbedBuild { index: 1, .. })
        ));
    }

    #[test]
    fn test_nameless_author_and_textless_footer_dropped() {
        let spec: EmbedSpec = serde_json::from_value(json!({
            "author": {"url": "https://example.com/ann"},
            "footer": {"icon_url": "https://example.com/icon.png"}
        }))
        .unwrap();
        assert!(build_embed(0, &spec).is_err());

        let spec: EmbedSpec = serde_json::from_value(json!({
            "title": "kept",
            "author": {"url": "https://example.com/ann"},
            "footer": {"icon_url": "https://example.com/icon.png"}
        }))
        .unwrap();
        let built = build_embed(0, &spec).unwrap();
        assert_eq!(built.title.as_deref(), Some("kept"));
        assert!(built.author.is_none());
        assert!(built.footer.is_none());
    }

    #[test]
    fn test_failed_embed_dropped_others_kept() {
        let specs = vec![
            titled("first"),
            EmbedSpec {
                timestamp: Some("not-a-date".into()),
                ..titled("broken")
            },
            titled("third"),
        ];

        let built = build_embeds(&specs);
        let titles: Vec<_> = built.iter().filter_map(|e| e.title.as_deref()).collect();
        assert_eq!(titles, vec!["first", "third"]);
    }
}

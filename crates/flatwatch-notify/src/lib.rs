//! Delivery side of flatwatch: the notification channel contract, listing embeds, the
//! Discord REST channel and the layer that mirrors error logs to a developer channel.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flatwatch_core::Listing;
use serde::Serialize;
use thiserror::Error;

mod discord;
mod log_forward;

pub use discord::{DiscordChannel, DISCORD_API_BASE};
pub use log_forward::{forward_errors, ErrorForwardLayer};

pub const CRATE_NAME: &str = "flatwatch-notify";

/// Discord refuses embeds carrying more fields than this.
pub const MAX_EMBED_FIELDS: usize = 25;
/// Discord refuses messages carrying more embeds than this.
pub const MAX_EMBEDS_PER_MESSAGE: usize = 10;
/// Discord refuses messages whose embeds hold more text than this in total.
pub const MAX_MESSAGE_CHARS: usize = 6000;

const MAX_TITLE_CHARS: usize = 256;
const MAX_DESCRIPTION_CHARS: usize = 4096;
const MAX_FIELD_VALUE_CHARS: usize = 1024;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("transient channel failure: {0}")]
    Retryable(String),
    #[error("channel rejected the request: {0}")]
    Fatal(String),
}

impl ChannelError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

/// Outbound delivery target for listing batches and the "last update" status line.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Deliver one batch as a single message.
    async fn send(&self, embeds: &[Embed]) -> Result<(), ChannelError>;

    async fn set_status(&self, status: &str) -> Result<(), ChannelError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Embed {
    pub title: String,
    pub url: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub color: u32,
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<EmbedAuthor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<EmbedImage>,
}

impl Embed {
    /// Characters Discord counts against [`MAX_MESSAGE_CHARS`].
    pub fn char_len(&self) -> usize {
        self.title.chars().count()
            + self.description.chars().count()
            + self
                .fields
                .iter()
                .map(|field| field.name.chars().count() + field.value.chars().count())
                .sum::<usize>()
            + self
                .author
                .as_ref()
                .map_or(0, |author| author.name.chars().count())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedAuthor {
    pub name: String,
    pub icon_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedImage {
    pub url: String,
}

/// Render a listing cluster: the representative's details, its price and one
/// "Alternativní odkaz" field per absorbed duplicate.
///
/// Trailing duplicate links are dropped until the embed fits in a message on its own.
pub fn listing_embed(listing: &Listing, now: DateTime<Utc>) -> Embed {
    let mut fields = vec![EmbedField {
        name: "Cena".to_string(),
        value: listing.price.to_string(),
        inline: true,
    }];
    fields.extend(
        listing
            .duplicates
            .iter()
            .take(MAX_EMBED_FIELDS - 1)
            .map(|duplicate| EmbedField {
                name: "Alternativní odkaz".to_string(),
                value: truncate_chars(&duplicate.link, MAX_FIELD_VALUE_CHARS),
                inline: true,
            }),
    );

    let author = (!listing.source.name.is_empty()).then(|| EmbedAuthor {
        name: listing.source.name.clone(),
        icon_url: listing.source.logo_url.clone(),
    });

    let mut embed = Embed {
        title: truncate_chars(&listing.title, MAX_TITLE_CHARS),
        url: listing.link.clone(),
        description: truncate_chars(&listing.location, MAX_DESCRIPTION_CHARS),
        timestamp: now,
        color: listing.source.brand_color,
        fields,
        author,
        image: listing
            .image_url
            .as_ref()
            .map(|url| EmbedImage { url: url.clone() }),
    };
    while embed.fields.len() > 1 && embed.char_len() > MAX_MESSAGE_CHARS {
        embed.fields.pop();
    }
    embed
}

/// Split embeds into messages of at most `max_embeds` embeds and
/// [`MAX_MESSAGE_CHARS`] characters, keeping their order.
pub fn message_batches(embeds: Vec<Embed>, max_embeds: usize) -> Vec<Vec<Embed>> {
    let max_embeds = max_embeds.clamp(1, MAX_EMBEDS_PER_MESSAGE);
    let mut batches = Vec::new();
    let mut current: Vec<Embed> = Vec::new();
    let mut current_chars = 0;
    for embed in embeds {
        let chars = embed.char_len();
        if !current.is_empty()
            && (current.len() == max_embeds || current_chars + chars > MAX_MESSAGE_CHARS)
        {
            batches.push(std::mem::take(&mut current));
            current_chars = 0;
        }
        current_chars += chars;
        current.push(embed);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Channel topic written after every cycle; Discord renders the timestamp relatively.
pub fn status_line(now: DateTime<Utc>) -> String {
    format!("Last update <t:{}:R>", now.timestamp())
}

fn truncate_chars(value: &str, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use flatwatch_core::{Price, SourceIdentity};
    use std::sync::Arc;

    fn source() -> Arc<SourceIdentity> {
        Arc::new(SourceIdentity::new(
            "BRAVIS",
            0xCE0020,
            "https://www.bravis.cz/favicon.png",
        ))
    }

    fn mk_listing(link: &str, image: Option<&str>) -> Listing {
        Listing::new(
            source(),
            link,
            "Pronájem 2+kk, 54 m²",
            "Brno - Žabovřesky",
            Price::WithCharges {
                rent: 14_500,
                charges: 3_000,
            },
            image.map(str::to_string),
        )
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn embed_carries_listing_details_and_duplicates() {
        let mut listing = mk_listing("https://a", Some("https://img/a.jpg"));
        listing.duplicates.push(mk_listing("https://b", None));
        listing.duplicates.push(mk_listing("https://c", None));

        let embed = listing_embed(&listing, now());
        assert_eq!(embed.title, "Pronájem 2+kk, 54 m²");
        assert_eq!(embed.url, "https://a");
        assert_eq!(embed.description, "Brno - Žabovřesky");
        assert_eq!(embed.color, 0xCE0020);
        assert_eq!(embed.fields[0].name, "Cena");
        assert_eq!(embed.fields[0].value, "14 500 / 3 000 Kč");
        let alternates: Vec<_> = embed.fields[1..].iter().map(|f| f.value.as_str()).collect();
        assert_eq!(alternates, vec!["https://b", "https://c"]);
        assert_eq!(embed.author.as_ref().map(|a| a.name.as_str()), Some("BRAVIS"));
        assert_eq!(
            embed.image,
            Some(EmbedImage {
                url: "https://img/a.jpg".to_string()
            })
        );
    }

    #[test]
    fn embed_field_count_is_capped() {
        let mut listing = mk_listing("https://a", None);
        for i in 0..40 {
            listing.duplicates.push(mk_listing(&format!("https://dup/{i}"), None));
        }
        let embed = listing_embed(&listing, now());
        assert_eq!(embed.fields.len(), MAX_EMBED_FIELDS);
    }

    #[test]
    fn embed_serializes_to_discord_shape() {
        let embed = listing_embed(&mk_listing("https://a", None), now());
        let json = serde_json::to_value(&embed).unwrap();
        assert_eq!(json["timestamp"], "2024-03-01T12:00:00Z");
        assert_eq!(json["author"]["icon_url"], "https://www.bravis.cz/favicon.png");
        assert!(json.get("image").is_none());
    }

    fn mk_crowded_listing(i: usize, duplicates: usize) -> Listing {
        let mut listing = mk_listing(&format!("https://main/{i}"), None);
        for j in 0..duplicates {
            let link = format!("https://dup/{i}/{j}/{}", "a".repeat(100));
            listing.duplicates.push(mk_listing(&link, None));
        }
        listing
    }

    #[test]
    fn heavily_duplicated_listings_are_split_by_message_size() {
        let embeds: Vec<Embed> = (0..10)
            .map(|i| listing_embed(&mk_crowded_listing(i, 5), now()))
            .collect();
        let total: usize = embeds.iter().map(Embed::char_len).sum();
        assert!(total > MAX_MESSAGE_CHARS);

        let batches = message_batches(embeds, MAX_EMBEDS_PER_MESSAGE);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches.iter().map(Vec::len).sum::<usize>(), 10);
        for batch in &batches {
            let chars: usize = batch.iter().map(Embed::char_len).sum();
            assert!(chars <= MAX_MESSAGE_CHARS, "{chars} characters in one message");
        }
        assert_eq!(batches[0][0].url, "https://main/0");
        assert_eq!(batches[1].last().map(|e| e.url.as_str()), Some("https://main/9"));
    }

    #[test]
    fn batches_respect_the_embed_count() {
        let embeds: Vec<Embed> = (0..5)
            .map(|i| listing_embed(&mk_listing(&format!("https://a/{i}"), None), now()))
            .collect();
        let sizes: Vec<usize> = message_batches(embeds, 2).iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert!(message_batches(Vec::new(), 2).is_empty());
    }

    #[test]
    fn oversized_embed_drops_trailing_duplicate_links() {
        let mut listing = mk_listing("https://a", None);
        for i in 0..24 {
            let link = format!("https://dup/{i}/{}", "b".repeat(900));
            listing.duplicates.push(mk_listing(&link, None));
        }
        let embed = listing_embed(&listing, now());
        assert!(embed.char_len() <= MAX_MESSAGE_CHARS);
        assert!(embed.fields.len() > 1 && embed.fields.len() < MAX_EMBED_FIELDS);
        assert_eq!(embed.fields[0].name, "Cena");
        assert!(embed.fields[1].value.starts_with("https://dup/0/"));
    }

    #[test]
    fn status_line_uses_relative_discord_timestamp() {
        assert_eq!(status_line(now()), "Last update <t:1709294400:R>");
    }

    #[test]
    fn long_titles_are_truncated_on_char_boundaries() {
        let title = "ž".repeat(300);
        assert_eq!(truncate_chars(&title, MAX_TITLE_CHARS).chars().count(), 256);
        assert_eq!(truncate_chars("short", 10), "short");
    }
}

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use flatwatch_storage::{classify_reqwest_error, classify_status, RetryDisposition};
use reqwest::{RequestBuilder, StatusCode};
use serde_json::json;
use tracing::debug;

use crate::{ChannelError, Embed, NotificationChannel, MAX_EMBEDS_PER_MESSAGE, MAX_MESSAGE_CHARS};

pub const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// Longest plain-text message Discord accepts.
const MAX_CONTENT_CHARS: usize = 2000;

/// A single Discord text channel addressed through the bot REST API.
#[derive(Debug, Clone)]
pub struct DiscordChannel {
    client: reqwest::Client,
    api_base: String,
    token: String,
    channel_id: u64,
}

impl DiscordChannel {
    pub fn new(token: impl Into<String>, channel_id: u64, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("DiscordBot (flatwatch, ", env!("CARGO_PKG_VERSION"), ")"))
            .build()
            .context("building discord client")?;

        Ok(Self {
            client,
            api_base: DISCORD_API_BASE.to_string(),
            token: token.into(),
            channel_id,
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn channel_id(&self) -> u64 {
        self.channel_id
    }

    fn messages_url(&self) -> String {
        format!("{}/channels/{}/messages", self.api_base, self.channel_id)
    }

    fn channel_url(&self) -> String {
        format!("{}/channels/{}", self.api_base, self.channel_id)
    }

    /// Plain-text message, cut to Discord's length limit.
    pub async fn post_text(&self, content: &str) -> Result<(), ChannelError> {
        let content: String = content.chars().take(MAX_CONTENT_CHARS).collect();
        self.execute(
            self.client
                .post(self.messages_url())
                .json(&json!({ "content": content })),
        )
        .await
    }

    async fn execute(&self, request: RequestBuilder) -> Result<(), ChannelError> {
        let response = request
            .header("Authorization", format!("Bot {}", self.token))
            .send()
            .await
            .map_err(|err| match classify_reqwest_error(&err) {
                RetryDisposition::Retryable => ChannelError::Retryable(err.to_string()),
                RetryDisposition::NonRetryable => ChannelError::Fatal(err.to_string()),
            })?;

        let status = response.status();
        if status.is_success() {
            debug!(channel_id = self.channel_id, %status, "discord request accepted");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(error_for_status(status, &body))
    }
}

/// Server errors and rate limits are transient; any other rejection is final.
///
/// A 4xx other than 429 means Discord refused this exact payload or the bot's access to
/// the channel, and resending it unchanged gets the same answer. Those surface as
/// `Fatal` instead of joining the indefinite delivery retry.
pub(crate) fn error_for_status(status: StatusCode, body: &str) -> ChannelError {
    let message = if body.is_empty() {
        format!("discord answered {status}")
    } else {
        format!("discord answered {status}: {body}")
    };
    match classify_status(status) {
        RetryDisposition::Retryable => ChannelError::Retryable(message),
        RetryDisposition::NonRetryable => ChannelError::Fatal(message),
    }
}

#[async_trait]
impl NotificationChannel for DiscordChannel {
    async fn send(&self, embeds: &[Embed]) -> Result<(), ChannelError> {
        if embeds.is_empty() {
            return Ok(());
        }
        if embeds.len() > MAX_EMBEDS_PER_MESSAGE {
            return Err(ChannelError::Fatal(format!(
                "{} embeds exceed the per-message limit of {MAX_EMBEDS_PER_MESSAGE}",
                embeds.len()
            )));
        }
        let chars: usize = embeds.iter().map(Embed::char_len).sum();
        if chars > MAX_MESSAGE_CHARS {
            return Err(ChannelError::Fatal(format!(
                "{chars} embed characters exceed the per-message limit of {MAX_MESSAGE_CHARS}"
            )));
        }
        self.execute(
            self.client
                .post(self.messages_url())
                .json(&json!({ "embeds": embeds })),
        )
        .await
    }

    async fn set_status(&self, status: &str) -> Result<(), ChannelError> {
        self.execute(
            self.client
                .patch(self.channel_url())
                .json(&json!({ "topic": status })),
        )
        .await
    }
}

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use tracing::{error, info, instrument};

use crate::alerts::{AlertNotification, DispatchError, NotificationSink};
use crate::config::Discord;

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

impl EmbedField {
    fn inline(name: impl ToString, value: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            inline: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Default)]
pub struct MessageBuilder {
    content: Option<String>,
    embeds: Vec<Embed>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: impl ToString) -> Self {
        self.content = Some(content.to_string());
        self
    }

    pub fn add_embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }

    pub fn build(self) -> Message {
        Message {
            content: self.content,
            embeds: self.embeds,
        }
    }
}

const RED: u32 = 15158332;
const ORANGE: u32 = 15105570;

/// Posts alerts as embeds to a Discord webhook
#[derive(Debug, Clone)]
pub struct DiscordSink {
    client: Client,
    discord: Discord,
}

impl DiscordSink {
    pub fn new(discord: Discord) -> Self {
        Self {
            client: Client::new(),
            discord,
        }
    }

    pub fn build_embed(&self, notification: &AlertNotification) -> Embed {
        let subject = notification.subject();
        let metric = &notification.metric;
        let down = metric.id.ends_with(":availability");

        let (title, description, color) = if down {
            (
                "🔴 Website Down",
                format!("Website **{subject}** could not be reached"),
                RED,
            )
        } else {
            (
                "⚠️ Threshold Exceeded",
                format!("Website **{subject}** exceeded its threshold"),
                ORANGE,
            )
        };

        let mut fields = vec![
            EmbedField::inline("📈 Metric", format!("`{}`", metric.id)),
            EmbedField::inline("📊 Value", metric.value),
            EmbedField::inline("⚠️ Threshold", metric.threshold),
        ];
        if let Some(err) = &notification.error {
            fields.push(EmbedField {
                name: "❌ Error".to_string(),
                value: err.clone(),
                inline: false,
            });
        }

        Embed {
            title: Some(title.to_string()),
            description: Some(description),
            color: Some(color),
            fields,
            footer: notification.website.as_ref().map(|w| EmbedFooter {
                text: format!("Website: {} | {}", w.id, w.url),
            }),
            timestamp: Some(Utc::now().to_rfc3339()),
        }
    }

    #[instrument(skip(self, message))]
    pub async fn send_message(&self, message: &Message) -> Result<(), DispatchError> {
        let response = self
            .client
            .post(&self.discord.url)
            .json(message)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            error!("Discord message failed with status: {status}");
            if let Ok(error_text) = response.text().await {
                error!("Discord API error response: {error_text}");
            }
            return Err(DispatchError::Status(status.as_u16()));
        }

        info!("Successfully sent Discord message");
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for DiscordSink {
    async fn dispatch(&self, notification: &AlertNotification) -> Result<(), DispatchError> {
        let mut builder = MessageBuilder::new().add_embed(self.build_embed(notification));
        if let Some(user_id) = &self.discord.user_id {
            builder = builder.content(format!("🔴 `{}` <@{user_id}>", notification.subject()));
        }

        self.send_message(&builder.build()).await
    }
}

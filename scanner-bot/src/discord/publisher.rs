//! Twilight-backed Publisher implementation
//!
//! Publishes the scanner table as a single embed per (channel, interval)
//! and edits it in place on every tick. An HTTP 404 on any operation maps
//! to `PublishError::NotFound`, the signal that the destination message or
//! channel was deleted out from under us.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use twilight_http::error::ErrorType;
use twilight_http::Client as HttpClient;
use twilight_model::channel::message::embed::{Embed, EmbedFooter};
use twilight_model::id::marker::{ChannelMarker, MessageMarker};
use twilight_model::id::Id;
use twilight_model::util::Timestamp;

use scanner_core::{format_interval, SessionCalendar};
use scanner_services::{OutputHandle, PublishError, Publisher, UpdateContent};

/// Discord embed descriptions cap at 4096 characters; leave room for the
/// code fence.
const DESCRIPTION_BUDGET: usize = 4096 - 8;

const EMBED_COLOR: u32 = 0x2B6CB0;

pub struct DiscordPublisher {
    http: Arc<HttpClient>,
    calendar: SessionCalendar,
}

impl DiscordPublisher {
    pub fn new(http: Arc<HttpClient>, calendar: SessionCalendar) -> Self {
        Self { http, calendar }
    }

    fn channel(handle: OutputHandle) -> Id<ChannelMarker> {
        Id::new(handle.channel_id)
    }

    fn message(handle: OutputHandle) -> Id<MessageMarker> {
        Id::new(handle.message_id)
    }
}

#[async_trait]
impl Publisher for DiscordPublisher {
    async fn publish_initial(&self, channel_id: u64) -> Result<OutputHandle, PublishError> {
        let embed = placeholder_embed();
        let message = self
            .http
            .create_message(Id::new(channel_id))
            .embeds(&[embed])
            .await
            .map_err(map_http_error)?
            .model()
            .await
            .map_err(|e| PublishError::Api(e.to_string()))?;

        debug!(
            "Posted placeholder message {} in channel {}",
            message.id, channel_id
        );
        Ok(OutputHandle {
            channel_id,
            message_id: message.id.get(),
        })
    }

    async fn publish_update(
        &self,
        handle: OutputHandle,
        content: &UpdateContent,
    ) -> Result<(), PublishError> {
        let embed = update_embed(content, &self.calendar);
        self.http
            .update_message(Self::channel(handle), Self::message(handle))
            .embeds(Some(&[embed]))
            .await
            .map_err(map_http_error)?;
        Ok(())
    }

    async fn publish_stopped(&self, handle: OutputHandle) -> Result<(), PublishError> {
        let embed = stopped_embed();
        self.http
            .update_message(Self::channel(handle), Self::message(handle))
            .embeds(Some(&[embed]))
            .await
            .map_err(map_http_error)?;
        Ok(())
    }

    async fn resolve(&self, handle: OutputHandle) -> Result<(), PublishError> {
        self.http
            .message(Self::channel(handle), Self::message(handle))
            .await
            .map_err(map_http_error)?;
        Ok(())
    }
}

fn map_http_error(error: twilight_http::Error) -> PublishError {
    if let ErrorType::Response { status, .. } = error.kind() {
        if status.get() == 404 {
            return PublishError::NotFound;
        }
    }
    PublishError::Api(error.to_string())
}

fn base_embed(title: String, description: String) -> Embed {
    Embed {
        author: None,
        color: Some(EMBED_COLOR),
        description: Some(description),
        fields: Vec::new(),
        footer: None,
        image: None,
        kind: "rich".to_string(),
        provider: None,
        thumbnail: None,
        timestamp: None,
        title: Some(title),
        url: None,
        video: None,
    }
}

fn placeholder_embed() -> Embed {
    base_embed(
        "VWAP Scanner".to_string(),
        "Starting up, first scan incoming...".to_string(),
    )
}

fn stopped_embed() -> Embed {
    base_embed("VWAP Scanner".to_string(), "Scanner stopped.".to_string())
}

fn update_embed(content: &UpdateContent, calendar: &SessionCalendar) -> Embed {
    let body = match &content.movers {
        Some(movers) => {
            let mut body = clamp_table(
                &content.table,
                DESCRIPTION_BUDGET.saturating_sub(movers.len() + 1),
            );
            body.push('\n');
            body.push_str(movers);
            body
        }
        None => clamp_table(&content.table, DESCRIPTION_BUDGET),
    };

    let mut embed = base_embed(
        format!("VWAP Scanner · every {}", format_interval(content.interval_secs)),
        format!("```\n{}\n```", body),
    );
    let boundary = calendar.next_boundary(content.computed_at);
    embed.footer = Some(EmbedFooter {
        icon_url: None,
        proxy_icon_url: None,
        text: format!(
            "Session {} (weight {:.1}) · next session {} UTC",
            content.session_name,
            content.session_weight,
            boundary.format("%H:%M")
        ),
    });
    embed.timestamp = Timestamp::from_secs(content.computed_at.timestamp()).ok();
    embed
}

/// Drop whole trailing lines until the table fits the budget.
fn clamp_table(table: &str, budget: usize) -> String {
    if table.len() <= budget {
        return table.to_string();
    }
    let mut out = String::new();
    for line in table.lines() {
        if out.len() + line.len() + 1 > budget {
            break;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line);
    }
    out
}

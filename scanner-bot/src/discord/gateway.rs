//! Gateway connection and slash command surface
//!
//! Maintains the shard connection with automatic reconnection and serves
//! the `/start` and `/stop` commands. `/start` registers one broadcast loop
//! per configured interval in the invoking channel; `/stop` tears down
//! every loop registered there. All interaction responses are ephemeral.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use twilight_gateway::{Event, EventTypeFlags, Intents, Shard, ShardId, StreamExt as _};
use twilight_http::Client as HttpClient;
use twilight_model::application::interaction::{Interaction, InteractionData};
use twilight_model::channel::message::MessageFlags;
use twilight_model::http::interaction::{
    InteractionResponse, InteractionResponseData, InteractionResponseType,
};
use twilight_model::id::marker::{ApplicationMarker, GuildMarker};
use twilight_model::id::Id;

use scanner_core::format_interval;
use scanner_services::{ChannelScheduler, EntryLabels, SchedulerError};

pub struct CommandGateway {
    token: String,
    http: Arc<HttpClient>,
    scheduler: ChannelScheduler,
    intervals: Vec<u32>,
}

impl CommandGateway {
    pub fn new(
        token: String,
        http: Arc<HttpClient>,
        scheduler: ChannelScheduler,
        intervals: Vec<u32>,
    ) -> Self {
        Self {
            token,
            http,
            scheduler,
            intervals,
        }
    }

    /// Run indefinitely, reconnecting on gateway failure.
    pub async fn run(self: Arc<Self>) {
        loop {
            match self.run_gateway_loop().await {
                Ok(()) => {
                    warn!("Gateway closed normally, reconnecting in 5s...");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Err(e) => {
                    error!("Gateway error: {}, reconnecting in 10s...", e);
                    tokio::time::sleep(Duration::from_secs(10)).await;
                }
            }
        }
    }

    async fn run_gateway_loop(&self) -> Result<(), GatewayError> {
        info!("Connecting to Discord Gateway...");

        let application = self
            .http
            .current_user_application()
            .await
            .map_err(|e| GatewayError::Api(e.to_string()))?
            .model()
            .await
            .map_err(|e| GatewayError::Api(e.to_string()))?;
        let application_id = application.id;

        self.register_commands(application_id).await?;

        let mut shard = Shard::new(ShardId::ONE, self.token.clone(), Intents::GUILDS);

        while let Some(item) = shard.next_event(EventTypeFlags::all()).await {
            let event = match item {
                Ok(event) => event,
                Err(source) => {
                    error!("Error receiving gateway event: {}", source);
                    return Err(GatewayError::Gateway(source.to_string()));
                }
            };

            match event {
                Event::Ready(ready) => {
                    info!("Gateway connected as {}", ready.user.name);
                }
                Event::InteractionCreate(interaction) => {
                    self.handle_interaction(application_id, interaction.0).await;
                }
                Event::GatewayClose(_) => {
                    warn!("Gateway closed by server");
                    return Ok(());
                }
                _ => {}
            }
        }

        Ok(())
    }

    async fn register_commands(
        &self,
        application_id: Id<ApplicationMarker>,
    ) -> Result<(), GatewayError> {
        let client = self.http.interaction(application_id);

        client
            .create_global_command()
            .chat_input("start", "Start the VWAP scanner in this channel")
            .await
            .map_err(|e| GatewayError::Api(e.to_string()))?;
        client
            .create_global_command()
            .chat_input("stop", "Stop the VWAP scanner in this channel")
            .await
            .map_err(|e| GatewayError::Api(e.to_string()))?;

        info!("Registered /start and /stop commands");
        Ok(())
    }

    async fn handle_interaction(
        &self,
        application_id: Id<ApplicationMarker>,
        interaction: Interaction,
    ) {
        let name = match &interaction.data {
            Some(InteractionData::ApplicationCommand(data)) => data.name.clone(),
            _ => return,
        };

        let channel = match &interaction.channel {
            Some(channel) => channel,
            None => {
                warn!("Command {} arrived without a channel, ignoring", name);
                return;
            }
        };
        let channel_id = channel.id.get();
        let channel_name = channel.name.clone();

        let reply = match name.as_str() {
            "start" => {
                self.handle_start(channel_id, channel_name, interaction.guild_id)
                    .await
            }
            "stop" => self.handle_stop(channel_id).await,
            other => {
                warn!("Unknown command: {}", other);
                return;
            }
        };

        self.respond_ephemeral(application_id, &interaction, reply)
            .await;
    }

    async fn handle_start(
        &self,
        channel_id: u64,
        channel_name: Option<String>,
        guild_id: Option<Id<GuildMarker>>,
    ) -> String {
        let labels = EntryLabels {
            guild_id: guild_id.map(|id| id.get()),
            server_name: match guild_id {
                Some(id) => self.guild_name(id).await,
                None => None,
            },
            channel_name,
        };

        let mut started = Vec::new();
        let mut already = Vec::new();
        for &interval in &self.intervals {
            match self
                .scheduler
                .start(channel_id, interval, labels.clone())
                .await
            {
                Ok(()) => started.push(format_interval(interval)),
                Err(SchedulerError::AlreadyRunning(_)) => already.push(format_interval(interval)),
                Err(e) => {
                    warn!("Failed to start scanner in channel {}: {}", channel_id, e);
                    return format!("Failed to start scanner: {}", e);
                }
            }
        }

        match (started.is_empty(), already.is_empty()) {
            (false, true) => format!("Scanner started (every {})", started.join(", ")),
            (false, false) => format!(
                "Scanner started (every {}); already running: {}",
                started.join(", "),
                already.join(", ")
            ),
            (true, false) => "Scanner is already running in this channel".to_string(),
            (true, true) => "No scan intervals configured".to_string(),
        }
    }

    async fn handle_stop(&self, channel_id: u64) -> String {
        let stopped = self.scheduler.stop_channel(channel_id).await;
        if stopped == 0 {
            "No scanner is running in this channel".to_string()
        } else {
            format!("Scanner stopped ({} table(s))", stopped)
        }
    }

    async fn guild_name(&self, guild_id: Id<GuildMarker>) -> Option<String> {
        let guild = self.http.guild(guild_id).await.ok()?.model().await.ok()?;
        Some(guild.name)
    }

    async fn respond_ephemeral(
        &self,
        application_id: Id<ApplicationMarker>,
        interaction: &Interaction,
        content: String,
    ) {
        let response = InteractionResponse {
            kind: InteractionResponseType::ChannelMessageWithSource,
            data: Some(InteractionResponseData {
                content: Some(content),
                flags: Some(MessageFlags::EPHEMERAL),
                ..Default::default()
            }),
        };

        if let Err(e) = self
            .http
            .interaction(application_id)
            .create_response(interaction.id, &interaction.token, &response)
            .await
        {
            warn!("Failed to respond to interaction: {}", e);
        }
    }
}

/// Errors from the gateway connection
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Discord API error: {0}")]
    Api(String),
}

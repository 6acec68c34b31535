//! Discord integration: publisher implementation and command gateway

pub mod gateway;
pub mod publisher;

pub use gateway::CommandGateway;
pub use publisher::DiscordPublisher;

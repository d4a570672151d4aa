//! Outbound chat-platform actions.
//!
//! Engines never talk to the platform directly. They return
//! [`Effect`](crate::effect::Effect)s and the applier drives a [`Platform`].

mod rest;

pub use rest::RestPlatform;

use crate::ids::{ChannelId, GuildId, RoleId, UserId};
use async_trait::async_trait;
use thiserror::Error;

/// Errors from outbound platform calls.
///
/// These are logged and counted, never propagated into engine state.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("platform returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected response: {0}")]
    Decode(String),
}

/// The narrow set of platform capabilities the bot needs.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Post a message to a channel.
    async fn send_message(&self, channel_id: ChannelId, text: &str) -> Result<(), PlatformError>;

    /// Give a member a role.
    async fn add_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<(), PlatformError>;

    /// Take a role away from a member.
    async fn remove_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<(), PlatformError>;

    /// Create a private text channel visible to `member` and return its id.
    async fn create_channel(
        &self,
        guild_id: GuildId,
        name: &str,
        member: UserId,
    ) -> Result<ChannelId, PlatformError>;

    /// Delete a channel.
    async fn delete_channel(&self, channel_id: ChannelId) -> Result<(), PlatformError>;
}

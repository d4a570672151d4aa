//! Discord REST implementation of [`Platform`].

use super::{Platform, PlatformError};
use crate::config::DiscordConfig;
use crate::ids::{ChannelId, GuildId, RoleId, UserId};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// `VIEW_CHANNEL` permission bit.
const VIEW_CHANNEL: &str = "1024";

/// REST client authenticated with a bot token.
pub struct RestPlatform {
    http: reqwest::Client,
    api_base: String,
    token: String,
    ticket_category_id: Option<u64>,
}

#[derive(Deserialize)]
struct CreatedChannel {
    id: String,
}

impl RestPlatform {
    /// Build a client from the `[discord]` section.
    pub fn new(config: &DiscordConfig) -> Result<Self, PlatformError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("guildkeeper/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            ticket_category_id: config.ticket_category_id,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.api_base, path))
            .header("Authorization", format!("Bot {}", self.token))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, PlatformError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        debug!(status = status.as_u16(), body = %body, "Platform request rejected");
        Err(PlatformError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Platform for RestPlatform {
    async fn send_message(&self, channel_id: ChannelId, text: &str) -> Result<(), PlatformError> {
        let request = self
            .request(Method::POST, &format!("/channels/{}/messages", channel_id))
            .json(&json!({ "content": text }));
        self.send(request).await?;
        Ok(())
    }

    async fn add_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<(), PlatformError> {
        let path = format!("/guilds/{}/members/{}/roles/{}", guild_id, user_id, role_id);
        self.send(self.request(Method::PUT, &path)).await?;
        Ok(())
    }

    async fn remove_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<(), PlatformError> {
        let path = format!("/guilds/{}/members/{}/roles/{}", guild_id, user_id, role_id);
        self.send(self.request(Method::DELETE, &path)).await?;
        Ok(())
    }

    async fn create_channel(
        &self,
        guild_id: GuildId,
        name: &str,
        member: UserId,
    ) -> Result<ChannelId, PlatformError> {
        // The @everyone role shares the guild's id.
        let mut body = json!({
            "name": name,
            "type": 0,
            "permission_overwrites": [
                { "id": guild_id.to_string(), "type": 0, "deny": VIEW_CHANNEL },
                { "id": member.to_string(), "type": 1, "allow": VIEW_CHANNEL },
            ],
        });
        if let Some(parent) = self.ticket_category_id {
            body["parent_id"] = json!(parent.to_string());
        }

        let request = self
            .request(Method::POST, &format!("/guilds/{}/channels", guild_id))
            .json(&body);
        let created: CreatedChannel = self.send(request).await?.json().await?;

        created
            .id
            .parse()
            .map_err(|_| PlatformError::Decode(format!("channel id '{}'", created.id)))
    }

    async fn delete_channel(&self, channel_id: ChannelId) -> Result<(), PlatformError> {
        let path = format!("/channels/{}", channel_id);
        self.send(self.request(Method::DELETE, &path)).await?;
        Ok(())
    }
}

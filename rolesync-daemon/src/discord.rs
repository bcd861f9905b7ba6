//! Discord platform client.
//!
//! Role changes and messages go over the REST API. Member enumeration is a
//! gateway command and is handed to the [`GatewayForwarder`] queue. Guild
//! snapshots and role metadata come from the [`LiveState`].
//!
//! [`GatewayForwarder`]: crate::gateway::GatewayForwarder

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use rolesync_core::{
    ChannelId, GuildId, GuildSnapshot, MemberId, PlatformClient, PlatformError, PlatformResult,
    RoleId, RoleInfo,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::DiscordConfig;
use crate::gateway::{GatewayCommand, LiveState};

/// 429 body.
#[derive(Debug, Deserialize)]
struct RateLimitBody {
    /// Seconds, fractional.
    retry_after: f64,
}

#[derive(Debug, Deserialize)]
struct DmChannel {
    id: ChannelId,
}

pub struct DiscordClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
    live: Arc<LiveState>,
    gateway: mpsc::Sender<GatewayCommand>,
}

impl DiscordClient {
    pub fn new(
        config: &DiscordConfig,
        live: Arc<LiveState>,
        gateway: mpsc::Sender<GatewayCommand>,
    ) -> Result<Self, PlatformError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("rolesync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PlatformError::Transport {
                reason: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            http,
            api_base: config.api_base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            live,
            gateway,
        })
    }

    pub fn live(&self) -> &Arc<LiveState> {
        &self.live
    }

    /// Send one request. `endpoint` is the route template used in errors and
    /// logs; `path` is the concrete path.
    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> PlatformResult<reqwest::Response> {
        let url = format!("{}{}", self.api_base, path);
        let mut builder = self
            .http
            .request(method, &url)
            .header("Authorization", format!("Bot {}", self.token));
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        let response = builder.send().await.map_err(|e| PlatformError::Transport {
            reason: format!("{}: {}", endpoint, e),
        })?;
        check_status(endpoint, response).await
    }

    async fn open_dm(&self, member: &MemberId) -> PlatformResult<ChannelId> {
        let endpoint = "POST /users/@me/channels";
        let response = self
            .request(
                Method::POST,
                endpoint,
                "/users/@me/channels",
                Some(serde_json::json!({ "recipient_id": member })),
            )
            .await?;
        let channel: DmChannel = response.json().await.map_err(|e| PlatformError::Request {
            endpoint: endpoint.to_string(),
            status: StatusCode::OK.as_u16(),
            message: format!("unexpected body: {}", e),
        })?;
        Ok(channel.id)
    }
}

impl std::fmt::Debug for DiscordClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordClient")
            .field("api_base", &self.api_base)
            .field("guilds", &self.live.guild_count())
            .finish_non_exhaustive()
    }
}

async fn check_status(
    endpoint: &str,
    response: reqwest::Response,
) -> PlatformResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let header_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<f64>().ok());
        let body_secs = response
            .json::<RateLimitBody>()
            .await
            .ok()
            .map(|b| b.retry_after);
        let secs = body_secs.or(header_secs).unwrap_or(1.0);
        return Err(PlatformError::RateLimited {
            endpoint: endpoint.to_string(),
            retry_after_ms: (secs.max(0.0) * 1000.0).ceil() as u64,
        });
    }

    if status == StatusCode::NOT_FOUND {
        return Err(PlatformError::NotFound {
            what: endpoint.to_string(),
        });
    }

    let message = response.text().await.unwrap_or_default();
    Err(PlatformError::Request {
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl PlatformClient for DiscordClient {
    async fn request_full_membership(&self, guild: &GuildId) -> PlatformResult<()> {
        self.gateway
            .send(GatewayCommand::request_all_members(guild.clone()))
            .await
            .map_err(|_| PlatformError::Unavailable {
                reason: "gateway command queue closed".to_string(),
            })
    }

    async fn grant_role(
        &self,
        guild: &GuildId,
        member: &MemberId,
        role: &RoleId,
    ) -> PlatformResult<()> {
        self.request(
            Method::PUT,
            "PUT /guilds/{guild}/members/{member}/roles/{role}",
            &format!("/guilds/{}/members/{}/roles/{}", guild, member, role),
            None,
        )
        .await?;
        Ok(())
    }

    async fn revoke_role(
        &self,
        guild: &GuildId,
        member: &MemberId,
        role: &RoleId,
    ) -> PlatformResult<()> {
        self.request(
            Method::DELETE,
            "DELETE /guilds/{guild}/members/{member}/roles/{role}",
            &format!("/guilds/{}/members/{}/roles/{}", guild, member, role),
            None,
        )
        .await?;
        Ok(())
    }

    async fn send_direct_message(&self, member: &MemberId, text: &str) -> PlatformResult<()> {
        let channel = self.open_dm(member).await?;
        self.send_channel_message(&channel, text).await
    }

    async fn send_channel_message(&self, channel: &ChannelId, text: &str) -> PlatformResult<()> {
        self.request(
            Method::POST,
            "POST /channels/{channel}/messages",
            &format!("/channels/{}/messages", channel),
            Some(serde_json::json!({ "content": text })),
        )
        .await?;
        Ok(())
    }

    async fn guild_snapshot(&self, guild: &GuildId) -> PlatformResult<GuildSnapshot> {
        self.live
            .snapshot(guild)
            .ok_or_else(|| PlatformError::NotFound {
                what: format!("guild {}", guild),
            })
    }

    async fn guild_role(&self, guild: &GuildId, role: &RoleId) -> PlatformResult<Option<RoleInfo>> {
        self.live
            .role(guild, role)
            .ok_or_else(|| PlatformError::NotFound {
                what: format!("guild {}", guild),
            })
    }
}

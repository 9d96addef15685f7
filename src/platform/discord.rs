//! Discord REST implementation of [`ChatPlatform`].

use std::collections::BTreeSet;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::config::DiscordConfig;
use crate::error::PlatformError;
use crate::platform::ChatPlatform;

const USER_AGENT: &str = concat!("DiscordBot (uos-linker, ", env!("CARGO_PKG_VERSION"), ")");

#[derive(Debug, Deserialize)]
struct GuildMember {
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RateLimitBody {
    #[serde(default)]
    retry_after: f64,
}

pub struct DiscordPlatform {
    client: Client,
    api_base_url: String,
    guild_id: String,
    bot_token: SecretString,
}

impl DiscordPlatform {
    pub fn new(config: &DiscordConfig) -> Result<Self, PlatformError> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            client,
            api_base_url: config.api_base_url.clone(),
            guild_id: config.guild_id.clone(),
            bot_token: config.bot_token.clone(),
        })
    }

    fn member_url(&self, member_id: &str) -> String {
        format!(
            "{}/guilds/{}/members/{}",
            self.api_base_url, self.guild_id, member_id
        )
    }

    async fn change_role(
        &self,
        method: Method,
        member_id: &str,
        role_id: &str,
        reason: &str,
    ) -> Result<(), PlatformError> {
        let url = format!("{}/roles/{}", self.member_url(member_id), role_id);
        let response = self
            .client
            .request(method, &url)
            .header(
                "Authorization",
                format!("Bot {}", self.bot_token.expose_secret()),
            )
            .header("X-Audit-Log-Reason", encode_reason(reason))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status, body, role_id))
    }
}

/// The audit-log header must be URL-encoded.
fn encode_reason(reason: &str) -> String {
    url::form_urlencoded::byte_serialize(reason.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

fn classify_failure(status: StatusCode, body: String, role_id: &str) -> PlatformError {
    match status {
        StatusCode::FORBIDDEN => PlatformError::PermissionDenied {
            role_id: role_id.to_string(),
            reason: body,
        },
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = serde_json::from_str::<RateLimitBody>(&body)
                .map(|b| b.retry_after)
                .unwrap_or(1.0);
            PlatformError::RateLimited {
                retry_after_ms: (retry_after * 1000.0).max(0.0) as u64,
            }
        }
        _ => PlatformError::UnexpectedStatus {
            status: status.as_u16(),
            body: body.chars().take(256).collect(),
        },
    }
}

#[async_trait]
impl ChatPlatform for DiscordPlatform {
    async fn list_member_roles(
        &self,
        member_id: &str,
    ) -> Result<Option<BTreeSet<String>>, PlatformError> {
        let response = self
            .client
            .get(self.member_url(member_id))
            .header(
                "Authorization",
                format!("Bot {}", self.bot_token.expose_secret()),
            )
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, body, ""));
        }
        let member: GuildMember = response.json().await?;
        Ok(Some(member.roles.into_iter().collect()))
    }

    async fn add_role(
        &self,
        member_id: &str,
        role_id: &str,
        reason: &str,
    ) -> Result<(), PlatformError> {
        self.change_role(Method::PUT, member_id, role_id, reason)
            .await
    }

    async fn remove_role(
        &self,
        member_id: &str,
        role_id: &str,
        reason: &str,
    ) -> Result<(), PlatformError> {
        self.change_role(Method::DELETE, member_id, role_id, reason)
            .await
    }
}

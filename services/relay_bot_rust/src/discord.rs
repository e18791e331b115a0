//! Discord REST publish gateway.
//!
//! The relay keeps one tracked message per topic alive by editing it in
//! place, so the REST surface covers everything it needs: send, edit,
//! delete, recent history, and own-identity lookup. No gateway socket is
//! opened because the bot serves no interactive commands.

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

const API_BASE: &str = "https://discord.com/api/v10";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const HISTORY_PAGE_SIZE: usize = 100;
const SWEEP_DELETE_PAUSE: Duration = Duration::from_millis(600);

/// Chat transport failures the reconciliation engine branches on.
/// "Already gone" is a value, not an exception path.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message or channel not found")]
    NotFound,
    #[error("missing permission")]
    Forbidden,
    #[error("discord api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("malformed discord response: {0}")]
    Malformed(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Channel operations the reconciliation engine needs. Implemented by the
/// live REST client and by in-memory fakes in tests.
#[async_trait]
pub trait MessageGateway: Send + Sync {
    async fn send(&self, channel_id: u64, content: &str) -> Result<u64, ChatError>;
    async fn edit(&self, channel_id: u64, message_id: u64, content: &str) -> Result<u64, ChatError>;
    async fn delete(&self, channel_id: u64, message_id: u64) -> Result<(), ChatError>;
    /// Delete recent messages authored by this bot, newest first, pausing
    /// between deletions to stay under the rate limit. Returns how many
    /// were deleted; permission denial stops the sweep without failing it.
    async fn sweep_own_messages(&self, channel_id: u64, limit: usize) -> Result<usize, ChatError>;
}

#[derive(Clone)]
pub struct DiscordClient {
    http: Client,
    token: String,
    user_id: u64,
}

// The token stays out of debug output.
impl std::fmt::Debug for DiscordClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordClient")
            .field("user_id", &self.user_id)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
    #[serde(default)]
    author: Option<AuthorRef>,
}

#[derive(Debug, Deserialize)]
struct AuthorRef {
    id: String,
}

impl DiscordClient {
    /// Build the client and resolve the bot's own identity. A failure here
    /// means the credential is unusable and the process should not start.
    pub async fn connect(token: &str) -> Result<Self, ChatError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("DiscordBot (voidcast, 0.1)")
            .build()?;
        let mut client = Self {
            http,
            token: token.to_string(),
            user_id: 0,
        };
        let me: AuthorRef = client.get_json("/users/@me").await?;
        client.user_id = parse_snowflake(&me.id)?;
        Ok(client)
    }

    pub fn user_id(&self) -> u64 {
        self.user_id
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{API_BASE}{path}"))
            .header(AUTHORIZATION, format!("Bot {}", self.token))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ChatError> {
        let response = self.request(Method::GET, path).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn check(response: Response) -> Result<Response, ChatError> {
        match response.status() {
            StatusCode::NOT_FOUND => Err(ChatError::NotFound),
            StatusCode::FORBIDDEN => Err(ChatError::Forbidden),
            status if status.is_success() => Ok(response),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(ChatError::Api { status, body })
            }
        }
    }

    async fn recent_messages(
        &self,
        channel_id: u64,
        limit: usize,
        before: Option<u64>,
    ) -> Result<Vec<MessageRef>, ChatError> {
        let mut path = format!("/channels/{channel_id}/messages?limit={limit}");
        if let Some(before) = before {
            path.push_str(&format!("&before={before}"));
        }
        self.get_json(&path).await
    }
}

#[async_trait]
impl MessageGateway for DiscordClient {
    async fn send(&self, channel_id: u64, content: &str) -> Result<u64, ChatError> {
        let response = self
            .request(Method::POST, &format!("/channels/{channel_id}/messages"))
            .json(&serde_json::json!({ "content": content }))
            .send()
            .await?;
        let message: MessageRef = Self::check(response).await?.json().await?;
        parse_snowflake(&message.id)
    }

    async fn edit(&self, channel_id: u64, message_id: u64, content: &str) -> Result<u64, ChatError> {
        let response = self
            .request(
                Method::PATCH,
                &format!("/channels/{channel_id}/messages/{message_id}"),
            )
            .json(&serde_json::json!({ "content": content }))
            .send()
            .await?;
        let message: MessageRef = Self::check(response).await?.json().await?;
        parse_snowflake(&message.id)
    }

    async fn delete(&self, channel_id: u64, message_id: u64) -> Result<(), ChatError> {
        let response = self
            .request(
                Method::DELETE,
                &format!("/channels/{channel_id}/messages/{message_id}"),
            )
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn sweep_own_messages(&self, channel_id: u64, limit: usize) -> Result<usize, ChatError> {
        let own_id = self.user_id.to_string();
        let mut deleted = 0;
        let mut before = None;
        let mut remaining = limit;

        while remaining > 0 {
            let page_size = remaining.min(HISTORY_PAGE_SIZE);
            let page = match self.recent_messages(channel_id, page_size, before).await {
                Ok(page) => page,
                Err(ChatError::Forbidden) => {
                    log::warn!("missing permission to read history of channel {channel_id}");
                    return Ok(deleted);
                }
                Err(err) => return Err(err),
            };
            if page.is_empty() {
                break;
            }
            remaining = remaining.saturating_sub(page.len());

            for message in &page {
                let id = parse_snowflake(&message.id)?;
                before = Some(id);
                let own = message.author.as_ref().map_or(false, |a| a.id == own_id);
                if !own {
                    continue;
                }
                match self.delete(channel_id, id).await {
                    Ok(()) => {
                        deleted += 1;
                        tokio::time::sleep(SWEEP_DELETE_PAUSE).await;
                    }
                    Err(ChatError::NotFound) => {}
                    Err(ChatError::Forbidden) => {
                        log::warn!(
                            "missing permission to delete message {id} in channel {channel_id}"
                        );
                        return Ok(deleted);
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(deleted)
    }
}

fn parse_snowflake(raw: &str) -> Result<u64, ChatError> {
    raw.parse()
        .map_err(|_| ChatError::Malformed(format!("bad snowflake id: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snowflakes_parse_to_integers() {
        assert_eq!(parse_snowflake("1125599").unwrap(), 1_125_599);
    }

    #[test]
    fn malformed_snowflakes_are_rejected() {
        assert!(matches!(
            parse_snowflake("not-a-number"),
            Err(ChatError::Malformed(_))
        ));
    }
}

//! Minimal Telegram Bot API client: the inbound command feed and the
//! outbound notification channel.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use commands::UpdateFeed;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use state::InboundMessage;
use tracing::{debug, info};

pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Bot API hard limit for a single message text.
pub const MESSAGE_LIMIT: usize = 4096;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ParseMode {
    #[default]
    Markdown,
    MarkdownV2,
    #[serde(rename = "HTML")]
    Html,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    from: Option<User>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
}

impl From<Update> for InboundMessage {
    fn from(update: Update) -> Self {
        let (sender_id, text) = match update.message {
            Some(message) => (message.from.map(|u| u.id), message.text),
            None => (None, None),
        };
        InboundMessage {
            offset: update.update_id,
            sender_id,
            text,
        }
    }
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: ParseMode,
}

#[derive(Clone)]
pub struct TelegramClient {
    base_url: String,
    token: String,
    http: reqwest::Client,
}

impl TelegramClient {
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build telegram http client")?;
        Ok(Self {
            base_url: DEFAULT_API_URL.to_string(),
            token: token.into(),
            http,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    /// Fetches pending updates starting at `offset`.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<InboundMessage>> {
        let request = self
            .http
            .get(self.method_url("getUpdates"))
            .query(&[("offset", offset)]);
        let updates: Vec<Update> = self.call("getUpdates", request).await?;
        debug!(count = updates.len(), offset, "updates received");
        Ok(updates.into_iter().map(InboundMessage::from).collect())
    }

    pub async fn send_message(&self, chat_id: i64, text: &str, parse_mode: ParseMode) -> Result<()> {
        let request = self.http.post(self.method_url("sendMessage")).json(&SendMessage {
            chat_id,
            text,
            parse_mode,
        });
        let _: serde_json::Value = self.call("sendMessage", request).await?;
        Ok(())
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T> {
        // Request URLs embed the bot token; strip them from errors.
        let response = request
            .send()
            .await
            .map_err(|e| anyhow!("telegram {method} request failed: {}", e.without_url()))?;
        let status = response.status();
        let body: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| anyhow!("telegram {method} returned {status} with unreadable body: {}", e.without_url()))?;

        if !status.is_success() || !body.ok {
            return Err(anyhow!(
                "telegram {method} returned {status}: {}",
                body.description.unwrap_or_else(|| "no description".into())
            ));
        }
        body.result
            .ok_or_else(|| anyhow!("telegram {method} response has no result"))
    }
}

#[async_trait]
impl UpdateFeed for TelegramClient {
    async fn updates_from(&self, from: i64) -> Result<Vec<InboundMessage>> {
        self.get_updates(from).await
    }
}

/// Outbound text channel to a fixed destination.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str, parse_mode: ParseMode) -> Result<()>;
}

pub struct TelegramNotifier {
    client: TelegramClient,
    chat_id: i64,
}

impl TelegramNotifier {
    pub fn new(client: TelegramClient, chat_id: i64) -> Self {
        Self { client, chat_id }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str, parse_mode: ParseMode) -> Result<()> {
        self.client.send_message(self.chat_id, text, parse_mode).await?;
        info!(chat_id = self.chat_id, chars = text.chars().count(), "notification sent");
        Ok(())
    }
}

//! Telegram front door
//!
//! Long-polls the Bot API for messages, treats every line of a message as a
//! candidate and replies with the proxies that verified.

use crate::cancel::CancelToken;
use crate::config::BotConfig;
use crate::proxy::engine::VerificationEngine;
use crate::proxy::io::read_lines;
use crate::proxy::models::VerificationResult;
use crate::proxy::probe::{Probe, ProbeClient};
use crate::Result;
use anyhow::{bail, Context};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Reply sent when nothing in a message verified
pub const NO_LIVE_PROXIES: &str = "no live proxies found";

/// Pause before polling again after a failed `getUpdates`
const RETRY_DELAY: Duration = Duration::from_secs(3);

/// Envelope of every Bot API response
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
}

/// Bot API client bound to one verification engine
pub struct TelegramBot<P = ProbeClient> {
    client: Client,
    /// `{api_url}/bot{token}`
    base_url: String,
    poll_timeout: Duration,
    engine: Arc<VerificationEngine<P>>,
}

impl<P: Probe> TelegramBot<P> {
    pub fn new(config: &BotConfig, engine: Arc<VerificationEngine<P>>) -> Result<Self> {
        let Some(token) = config.api_token.as_deref().filter(|t| !t.is_empty()) else {
            bail!("TELEGRAM_API_TOKEN is not set");
        };

        // long polls must not trip the client timeout
        let client = Client::builder()
            .timeout(config.poll_timeout + Duration::from_secs(10))
            .build()
            .context("Failed to build Bot API client")?;

        Ok(Self {
            client,
            base_url: format!("{}/bot{}", config.api_url.trim_end_matches('/'), token),
            poll_timeout: config.poll_timeout,
            engine,
        })
    }

    async fn call<T, B>(&self, method: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let response: ApiResponse<T> = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .json(body)
            .send()
            .await
            .with_context(|| format!("{} request failed", method))?
            .json()
            .await
            .with_context(|| format!("{} returned an unreadable response", method))?;

        if !response.ok {
            bail!(
                "{} failed: {}",
                method,
                response.description.unwrap_or_else(|| "no description".to_string())
            );
        }

        response
            .result
            .with_context(|| format!("{} returned no result", method))
    }

    pub async fn get_me(&self) -> Result<User> {
        self.call("getMe", &json!({})).await
    }

    /// Wait up to `poll_timeout` for updates newer than `offset`
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let body = json!({
            "offset": offset,
            "timeout": self.poll_timeout.as_secs(),
            "allowed_updates": ["message"],
        });
        self.call("getUpdates", &body).await
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<Message> {
        self.call("sendMessage", &SendMessage { chat_id, text }).await
    }

    /// Verify the lines of one message and reply in its chat
    pub async fn handle(&self, message: Message) -> Result<()> {
        let Some(text) = message.text.as_deref() else {
            return Ok(());
        };
        let lines = read_lines(text);
        debug!(chat_id = message.chat.id, candidates = lines.len(), "checking message");

        let result = match self.engine.await_lines(&CancelToken::new(), lines).await {
            Ok(result) => result,
            Err(interrupted) => interrupted.partial,
        };

        self.send_message(message.chat.id, &reply_text(&result)).await?;
        Ok(())
    }

    /// Poll for messages until `cancel` fires; each message is handled on
    /// its own task.
    pub async fn run(self: Arc<Self>, cancel: CancelToken) -> Result<()> {
        let me = self.get_me().await.context("Failed to authorize bot")?;
        info!(
            username = me.username.as_deref().unwrap_or_default(),
            "Authorized on bot account"
        );

        let mut offset = 0;
        loop {
            let updates = tokio::select! {
                reason = cancel.cancelled() => {
                    info!(%reason, "bot stopped receiving updates");
                    return Ok(());
                }
                updates = self.get_updates(offset) => updates,
            };

            let updates = match updates {
                Ok(updates) => updates,
                Err(e) => {
                    warn!(error = %format!("{e:#}"), "getUpdates failed, retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(RETRY_DELAY) => continue,
                    }
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                let Some(message) = update.message else {
                    continue;
                };
                info!(
                    from = message.from.as_ref().and_then(|u| u.username.as_deref()).unwrap_or_default(),
                    text = message.text.as_deref().unwrap_or_default(),
                    "message received"
                );

                let bot = Arc::clone(&self);
                tokio::spawn(async move {
                    let chat_id = message.chat.id;
                    if let Err(e) = bot.handle(message).await {
                        error!(chat_id, error = %format!("{e:#}"), "sending message failed");
                    }
                });
            }
        }
    }
}

/// Live proxies one per line, or [`NO_LIVE_PROXIES`]
pub fn reply_text(result: &VerificationResult) -> String {
    if result.is_empty() {
        return NO_LIVE_PROXIES.to_string();
    }
    result.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n")
}

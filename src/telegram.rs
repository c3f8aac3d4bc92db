use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::commands::CommandHandler;

const API_BASE: &str = "https://api.telegram.org";
const LONG_POLL_SECS: u64 = 30;
const RETRY_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct User {
    pub id: i64,
    pub first_name: String,
    pub username: Option<String>,
}

#[derive(Serialize)]
struct GetUpdates {
    offset: i64,
    timeout: u64,
    allowed_updates: [&'static str; 1],
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
}

/// Minimal Telegram Bot API client: long-polling plus plain-text replies
pub struct TelegramBot {
    client: reqwest::Client,
    token: String,
}

impl TelegramBot {
    pub fn new(token: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(LONG_POLL_SECS + 10))
            .build()
            .context("Failed to create Telegram HTTP client")?;

        Ok(Self { client, token })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", API_BASE, self.token, method)
    }

    async fn call<B, T>(&self, method: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: for<'de> Deserialize<'de>,
    {
        let response: ApiResponse<T> = self
            .client
            .post(self.method_url(method))
            .json(body)
            .send()
            .await
            .with_context(|| format!("Telegram {} request failed", method))?
            .json()
            .await
            .with_context(|| format!("Telegram {} returned an unreadable body", method))?;

        match response {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            ApiResponse { description, .. } => bail!(
                "Telegram {} error: {}",
                method,
                description.unwrap_or_else(|| "unknown error".to_string())
            ),
        }
    }

    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        self.call(
            "getUpdates",
            &GetUpdates {
                offset,
                timeout: LONG_POLL_SECS,
                allowed_updates: ["message"],
            },
        )
        .await
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        let _: serde_json::Value = self.call("sendMessage", &SendMessage { chat_id, text }).await?;
        Ok(())
    }
}

/// Poll for messages forever, answering each on its own task.
///
/// Polling failures are logged and retried after a pause.
pub async fn run(bot: TelegramBot, handler: Arc<CommandHandler>) {
    let bot = Arc::new(bot);
    let mut offset = 0;

    info!("Telegram bot polling for messages");

    loop {
        let updates = match bot.get_updates(offset).await {
            Ok(updates) => updates,
            Err(e) => {
                error!(
                    error = %e,
                    retry_secs = RETRY_DELAY.as_secs(),
                    "Polling failed - will retry"
                );
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }
        };

        if !updates.is_empty() {
            debug!(count = updates.len(), "Received updates");
        }

        for update in updates {
            offset = offset.max(update.update_id + 1);
            if let Some(message) = update.message {
                let bot = bot.clone();
                let handler = handler.clone();
                tokio::spawn(async move { answer(&bot, &handler, message).await });
            }
        }
    }
}

#[instrument(skip_all, fields(chat_id = message.chat.id))]
async fn answer(bot: &TelegramBot, handler: &CommandHandler, message: Message) {
    let Some(text) = message.text.as_deref() else {
        return;
    };
    if !text.starts_with('/') {
        return;
    }

    let (user_id, first_name) = match &message.from {
        Some(user) => {
            info!(
                user_id = user.id,
                username = %user.username.as_deref().unwrap_or("-"),
                text = %text,
                "Command received"
            );
            (user.id.to_string(), user.first_name.as_str())
        }
        None => (message.chat.id.to_string(), "there"),
    };

    let reply = handler.handle(&user_id, first_name, text).await;
    if let Err(e) = bot.send_message(message.chat.id, &reply).await {
        warn!(error = %e, "Failed to send reply");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_url() {
        let bot = TelegramBot::new("123:abc".to_string()).unwrap();
        assert_eq!(
            bot.method_url("getUpdates"),
            "https://api.telegram.org/bot123:abc/getUpdates"
        );
    }

    #[test]
    fn test_deserialize_updates() {
        let json = r#"{
            "ok": true,
            "result": [
                {
                    "update_id": 1001,
                    "message": {
                        "message_id": 5,
                        "date": 1700000000,
                        "chat": {"id": -42, "type": "private"},
                        "from": {"id": 77, "is_bot": false, "first_name": "Sara", "username": "sara"},
                        "text": "/get 185103"
                    }
                },
                {"update_id": 1002, "edited_message": {}}
            ]
        }"#;

        let response: ApiResponse<Vec<Update>> = serde_json::from_str(json).unwrap();
        assert!(response.ok);
        let updates = response.result.unwrap();
        assert_eq!(updates.len(), 2);

        let message = updates[0].message.as_ref().unwrap();
        assert_eq!(message.chat.id, -42);
        assert_eq!(message.text.as_deref(), Some("/get 185103"));
        let from = message.from.as_ref().unwrap();
        assert_eq!(from.id, 77);
        assert_eq!(from.first_name, "Sara");
        assert!(updates[1].message.is_none());
    }

    #[test]
    fn test_deserialize_error_response() {
        let json = r#"{"ok": false, "error_code": 401, "description": "Unauthorized"}"#;
        let response: ApiResponse<Vec<Update>> = serde_json::from_str(json).unwrap();
        assert!(!response.ok);
        assert!(response.result.is_none());
        assert_eq!(response.description.as_deref(), Some("Unauthorized"));
    }

    #[test]
    fn test_request_bodies() {
        let body = serde_json::to_value(GetUpdates {
            offset: 7,
            timeout: LONG_POLL_SECS,
            allowed_updates: ["message"],
        })
        .unwrap();
        assert_eq!(body["offset"], 7);
        assert_eq!(body["allowed_updates"][0], "message");

        let body = serde_json::to_value(SendMessage {
            chat_id: 9,
            text: "hi",
        })
        .unwrap();
        assert_eq!(body["chat_id"], 9);
        assert_eq!(body["text"], "hi");
    }
}

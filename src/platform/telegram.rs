use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use teloxide::types::{ChatId, InlineKeyboardMarkup, MessageId, ParseMode};
use tracing::{debug, error};

use super::ReplySender;
use crate::config::TelegramConfig;

/// Telegram rejects messages above 4096 chars; keep some headroom.
const MAX_MESSAGE_LEN: usize = 4000;

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<ParseMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<&'a InlineKeyboardMarkup>,
}

#[derive(Debug, Serialize)]
struct AnswerCallbackRequest<'a> {
    callback_query_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    show_alert: bool,
}

#[derive(Debug, Serialize)]
struct DeleteMessageRequest {
    chat_id: i64,
    message_id: i32,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Longest HTML entity Telegram accepts, e.g. `&#x10FFFF;`.
const MAX_ENTITY_LEN: usize = 10;

/// Split long messages for Telegram's message size limit.
///
/// With `html` set, a cut never lands inside an entity (`&amp;`) or a tag
/// (`<b>`), since Telegram rejects a chunk that ends in half of one.
pub(crate) fn split_message(text: &str, max_len: usize, html: bool) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        // Walk back to a valid UTF-8 char boundary so slicing doesn't panic
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        let mut actual_end = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .or_else(|| text[start..end].rfind(' '))
                .map(|pos| start + pos + 1)
                .unwrap_or(end)
        } else {
            end
        };
        if html && actual_end < text.len() {
            actual_end = start + markup_safe_len(&text[start..actual_end]);
        }

        chunks.push(text[start..actual_end].to_string());
        start = actual_end;
    }

    chunks
}

/// Length of the longest prefix of `chunk` that does not end inside an HTML
/// entity or tag. Never returns 0, so splitting always advances.
fn markup_safe_len(chunk: &str) -> usize {
    let mut cut = chunk.len();

    if let Some(amp) = chunk.rfind('&') {
        if !chunk[amp..].contains(';') && chunk.len() - amp < MAX_ENTITY_LEN {
            cut = amp;
        }
    }
    if let Some(lt) = chunk[..cut].rfind('<') {
        if !chunk[lt..cut].contains('>') {
            cut = lt;
        }
    }

    if cut == 0 {
        chunk.len()
    } else {
        cut
    }
}

/// Bot API client over a single long-lived HTTP session.
pub struct TelegramClient {
    client: reqwest::Client,
    api_base: String,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tg-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build Telegram HTTP client")?;

        Ok(Self {
            client,
            api_base: format!(
                "{}/bot{}",
                config.api_base.trim_end_matches('/'),
                config.bot_token
            ),
        })
    }

    async fn call<T: Serialize + ?Sized>(&self, method: &str, payload: &T) -> Result<()> {
        let url = format!("{}/{}", self.api_base, method);

        debug!("Calling Telegram method: {}", method);

        // The URL carries the bot token, keep it out of error messages.
        let response = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| e.without_url())
            .with_context(|| format!("Failed to call Telegram {}", method))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            error!("Telegram {} failed ({}): {}", method, status, body);
            anyhow::bail!("Telegram API error ({}) on {}: {}", status, method, body);
        }

        let parsed: ApiResponse = serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse Telegram {} response", method))?;
        if !parsed.ok {
            anyhow::bail!(
                "Telegram {} rejected: {}",
                method,
                parsed.description.unwrap_or_default()
            );
        }

        Ok(())
    }
}

#[async_trait]
impl ReplySender for TelegramClient {
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        parse_mode: Option<ParseMode>,
        reply_markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<()> {
        let html = matches!(parse_mode, Some(ParseMode::Html));
        let chunks = split_message(text, MAX_MESSAGE_LEN, html);
        let last = chunks.len().saturating_sub(1);

        for (i, chunk) in chunks.iter().enumerate() {
            let request = SendMessageRequest {
                chat_id: chat_id.0,
                text: chunk,
                parse_mode,
                // Buttons go under the final chunk only
                reply_markup: if i == last { reply_markup } else { None },
            };
            self.call("sendMessage", &request).await?;
        }

        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<()> {
        let request = AnswerCallbackRequest {
            callback_query_id: callback_id,
            text: text.filter(|t| !t.is_empty()),
            show_alert,
        };
        self.call("answerCallbackQuery", &request).await
    }

    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<()> {
        let request = DeleteMessageRequest {
            chat_id: chat_id.0,
            message_id: message_id.0,
        };
        self.call("deleteMessage", &request).await
    }
}

//! Per-update request context.
//!
//! Upstream payload shape is not guaranteed (photos, stickers and service
//! messages have no text, callback queries have no message sender), so every
//! field of [`RawEvent`] decodes leniently: a missing or mistyped field
//! becomes `None` instead of failing the whole update.

use std::sync::Arc;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use teloxide::types::{ChatId, InlineKeyboardMarkup, MessageId, ParseMode};
use tracing::debug;

use crate::platform::ReplySender;

pub const DEFAULT_LANGUAGE: &str = "en";

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).ok())
}

/// A Telegram update as delivered by the webhook.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEvent {
    #[serde(default, deserialize_with = "lenient")]
    pub update_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    pub message: Option<RawMessage>,
    #[serde(default, deserialize_with = "lenient")]
    pub callback_query: Option<RawCallbackQuery>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMessage {
    #[serde(default, deserialize_with = "lenient")]
    pub message_id: Option<i32>,
    #[serde(default, deserialize_with = "lenient")]
    pub from: Option<RawUser>,
    #[serde(default, deserialize_with = "lenient")]
    pub chat: Option<RawChat>,
    #[serde(default, deserialize_with = "lenient")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawUser {
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub first_name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub language_code: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawChat {
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCallbackQuery {
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub from: Option<RawUser>,
    #[serde(default, deserialize_with = "lenient")]
    pub message: Option<RawMessage>,
    #[serde(default, deserialize_with = "lenient")]
    pub data: Option<String>,
}

impl RawEvent {
    pub fn from_slice(body: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(body)
    }
}

/// Split command-shaped text into its token and arguments.
///
/// `"/start@mybot a  b"` gives `Some("/start")` and `["a", "b"]`; text that
/// does not start with `/` gives no token and no arguments.
pub fn parse_command(text: &str) -> (Option<String>, Vec<String>) {
    if !text.starts_with('/') {
        return (None, Vec::new());
    }

    let mut parts = text.split_whitespace();
    let token = parts
        .next()
        .map(|first| first.split('@').next().unwrap_or(first).to_string());
    let args = parts.map(str::to_string).collect();

    (token, args)
}

/// Read-only view of one update, built once and handed to the handler.
pub struct RequestContext {
    pub update_id: Option<i64>,
    pub conversation_id: Option<ChatId>,
    pub sender_id: Option<i64>,
    pub sender_username: Option<String>,
    pub sender_first_name: Option<String>,
    pub language_code: String,
    pub message_id: Option<MessageId>,
    pub text: String,
    pub command_token: Option<String>,
    pub args: Vec<String>,
    pub callback_query_id: Option<String>,
    pub callback_data: Option<String>,
    outbound: Arc<dyn ReplySender>,
}

impl RequestContext {
    pub fn new(event: &RawEvent, outbound: Arc<dyn ReplySender>) -> Self {
        let callback = event.callback_query.as_ref();
        // A callback query's own message was sent by the bot; the chat is
        // still the one to answer in.
        let message = event
            .message
            .as_ref()
            .or_else(|| callback.and_then(|c| c.message.as_ref()));
        let sender = event
            .message
            .as_ref()
            .and_then(|m| m.from.as_ref())
            .or_else(|| callback.and_then(|c| c.from.as_ref()));

        let text = event
            .message
            .as_ref()
            .and_then(|m| m.text.as_deref())
            .unwrap_or_default()
            .trim()
            .to_string();
        let (command_token, args) = parse_command(&text);

        Self {
            update_id: event.update_id,
            conversation_id: message.and_then(|m| m.chat.as_ref()).and_then(|c| c.id).map(ChatId),
            sender_id: sender.and_then(|s| s.id),
            sender_username: sender.and_then(|s| s.username.clone()),
            sender_first_name: sender.and_then(|s| s.first_name.clone()),
            language_code: sender
                .and_then(|s| s.language_code.clone())
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            message_id: message.and_then(|m| m.message_id).map(MessageId),
            text,
            command_token,
            args,
            callback_query_id: callback.and_then(|c| c.id.clone()),
            callback_data: callback.and_then(|c| c.data.clone()),
            outbound,
        }
    }

    /// Whether the text looked like a command, matched or not.
    pub fn is_command(&self) -> bool {
        self.command_token.is_some()
    }

    /// Reply to the originating chat in HTML mode. No-op for updates without a chat.
    pub async fn reply(&self, text: &str) -> Result<()> {
        self.reply_with_markup(text, None).await
    }

    pub async fn reply_with_markup(
        &self,
        text: &str,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<()> {
        match self.conversation_id {
            Some(chat_id) => {
                self.outbound
                    .send_message(chat_id, text, Some(ParseMode::Html), markup)
                    .await
            }
            None => {
                debug!("Reply dropped, update {:?} has no chat", self.update_id);
                Ok(())
            }
        }
    }

    /// Answer the callback query carried by this update, if any.
    pub async fn answer_callback(&self, text: Option<&str>, show_alert: bool) -> Result<()> {
        match self.callback_query_id.as_deref() {
            Some(id) => self.outbound.answer_callback(id, text, show_alert).await,
            None => Ok(()),
        }
    }

    /// Delete the message that triggered this update.
    ///
    /// Available to handlers alongside `reply`; none of the built-in commands
    /// delete messages.
    #[allow(dead_code)]
    pub async fn delete_message(&self) -> Result<()> {
        match (self.conversation_id, self.message_id) {
            (Some(chat_id), Some(message_id)) => {
                self.outbound.delete_message(chat_id, message_id).await
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::testing::RecordingSender;

    fn ctx_from(json: serde_json::Value) -> (RequestContext, Arc<RecordingSender>) {
        let sender = Arc::new(RecordingSender::default());
        let event: RawEvent = serde_json::from_value(json).unwrap();
        (RequestContext::new(&event, sender.clone()), sender)
    }

    #[test]
    fn test_parse_command_with_mention_and_spaces() {
        let (token, args) = parse_command("/start@mybot arg1  arg2");
        assert_eq!(token.as_deref(), Some("/start"));
        assert_eq!(args, vec!["arg1", "arg2"]);
    }

    #[test]
    fn test_parse_plain_text() {
        let (token, args) = parse_command("hello");
        assert_eq!(token, None);
        assert!(args.is_empty());
    }

    #[test]
    fn test_parse_bare_slash() {
        let (token, args) = parse_command("/");
        assert_eq!(token.as_deref(), Some("/"));
        assert!(args.is_empty());
    }

    #[test]
    fn test_parse_empty_text() {
        assert_eq!(parse_command(""), (None, Vec::new()));
    }

    #[test]
    fn test_full_message_fields() {
        let (ctx, _) = ctx_from(serde_json::json!({
            "update_id": 5,
            "message": {
                "message_id": 10,
                "from": {"id": 42, "username": "a", "first_name": "A", "language_code": "ru"},
                "chat": {"id": -100},
                "text": "  /stock AAPL  "
            }
        }));
        assert_eq!(ctx.update_id, Some(5));
        assert_eq!(ctx.conversation_id, Some(ChatId(-100)));
        assert_eq!(ctx.sender_id, Some(42));
        assert_eq!(ctx.sender_username.as_deref(), Some("a"));
        assert_eq!(ctx.sender_first_name.as_deref(), Some("A"));
        assert_eq!(ctx.language_code, "ru");
        assert_eq!(ctx.message_id, Some(MessageId(10)));
        assert_eq!(ctx.text, "/stock AAPL");
        assert_eq!(ctx.command_token.as_deref(), Some("/stock"));
        assert_eq!(ctx.args, vec!["AAPL"]);
        assert!(ctx.is_command());
    }

    #[test]
    fn test_empty_update_defaults() {
        let (ctx, _) = ctx_from(serde_json::json!({}));
        assert_eq!(ctx.update_id, None);
        assert_eq!(ctx.conversation_id, None);
        assert_eq!(ctx.sender_id, None);
        assert_eq!(ctx.sender_username, None);
        assert_eq!(ctx.language_code, "en");
        assert_eq!(ctx.message_id, None);
        assert_eq!(ctx.text, "");
        assert_eq!(ctx.command_token, None);
        assert!(ctx.args.is_empty());
        assert!(!ctx.is_command());
    }

    #[test]
    fn test_photo_message_without_text() {
        let (ctx, _) = ctx_from(serde_json::json!({
            "update_id": 1,
            "message": {"message_id": 3, "chat": {"id": 9}, "photo": [{"file_id": "x"}]}
        }));
        assert_eq!(ctx.text, "");
        assert_eq!(ctx.conversation_id, Some(ChatId(9)));
        assert_eq!(ctx.sender_id, None);
    }

    #[test]
    fn test_mistyped_fields_degrade_to_absent() {
        let (ctx, _) = ctx_from(serde_json::json!({
            "update_id": "nope",
            "message": {"from": {"id": "42", "username": 7}, "chat": [], "text": 12}
        }));
        assert_eq!(ctx.update_id, None);
        assert_eq!(ctx.sender_id, None);
        assert_eq!(ctx.sender_username, None);
        assert_eq!(ctx.conversation_id, None);
        assert_eq!(ctx.text, "");
    }

    #[test]
    fn test_callback_query_context() {
        let (ctx, _) = ctx_from(serde_json::json!({
            "update_id": 2,
            "callback_query": {
                "id": "cb-9",
                "from": {"id": 7, "first_name": "B"},
                "message": {"message_id": 4, "chat": {"id": 55}},
                "data": "menu:1"
            }
        }));
        assert_eq!(ctx.sender_id, Some(7));
        assert_eq!(ctx.conversation_id, Some(ChatId(55)));
        assert_eq!(ctx.callback_query_id.as_deref(), Some("cb-9"));
        assert_eq!(ctx.callback_data.as_deref(), Some("menu:1"));
        assert_eq!(ctx.text, "");
    }

    #[tokio::test]
    async fn test_reply_targets_chat() {
        let (ctx, sender) = ctx_from(serde_json::json!({
            "message": {"chat": {"id": 77}, "text": "hi"}
        }));
        ctx.reply("hello back").await.unwrap();
        assert_eq!(
            sender.sent.lock().unwrap().clone(),
            vec![(77, "hello back".to_string())]
        );
    }

    #[tokio::test]
    async fn test_reply_without_chat_is_noop() {
        let (ctx, sender) = ctx_from(serde_json::json!({"update_id": 1}));
        ctx.reply("nobody").await.unwrap();
        assert!(sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_answer_and_delete() {
        let (ctx, sender) = ctx_from(serde_json::json!({
            "callback_query": {
                "id": "cb-1",
                "message": {"message_id": 8, "chat": {"id": 3}}
            }
        }));
        ctx.answer_callback(Some("done"), true).await.unwrap();
        ctx.delete_message().await.unwrap();
        assert_eq!(
            sender.answered.lock().unwrap().clone(),
            vec![("cb-1".to_string(), Some("done".to_string()), true)]
        );
        assert_eq!(sender.deleted.lock().unwrap().clone(), vec![(3, 8)]);
    }
}

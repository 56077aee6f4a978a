pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;
use teloxide::types::{ChatId, InlineKeyboardMarkup, MessageId, ParseMode};

/// Outbound side of the chat platform.
///
/// Every call is a single bounded request; failures are returned to the
/// caller as-is; containment happens in the dispatcher.
#[async_trait]
pub trait ReplySender: Send + Sync {
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        parse_mode: Option<ParseMode>,
        reply_markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<()>;

    /// Must be called for every callback query to dismiss the client's loading state.
    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<()>;

    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<()>;
}

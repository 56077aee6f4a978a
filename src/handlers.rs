//! Built-in bot commands and the echo fallback.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use teloxide::utils::html;
use tracing::debug;

use crate::context::RequestContext;
use crate::i18n::{Translator, HELP_MESSAGE, START_MESSAGE};
use crate::router::{CommandRegistry, Handler};

/// Replies with one translated text.
pub struct TranslatedReply {
    key: &'static str,
    translator: Arc<Translator>,
}

#[async_trait]
impl Handler for TranslatedReply {
    async fn handle(&self, ctx: &RequestContext) -> Result<()> {
        let text = self.translator.translate(self.key, &ctx.language_code, &[]);
        ctx.reply(&text).await
    }
}

pub struct Ping;

#[async_trait]
impl Handler for Ping {
    async fn handle(&self, ctx: &RequestContext) -> Result<()> {
        ctx.reply("🏓 Pong!").await
    }
}

/// Catch-all: echoes text back, acknowledges button presses.
pub struct Echo;

#[async_trait]
impl Handler for Echo {
    async fn handle(&self, ctx: &RequestContext) -> Result<()> {
        if ctx.callback_query_id.is_some() {
            debug!("Acknowledging button press: {:?}", ctx.callback_data);
            return ctx.answer_callback(None, false).await;
        }

        if ctx.text.is_empty() {
            return ctx.reply("I can only handle text messages for now.").await;
        }

        ctx.reply(&format!("You said: {}", html::escape(&ctx.text)))
            .await
    }
}

pub fn register_handlers(registry: &mut CommandRegistry, translator: Arc<Translator>) {
    registry.register(
        "start",
        Arc::new(TranslatedReply {
            key: START_MESSAGE,
            translator: translator.clone(),
        }),
    );
    registry.register(
        "help",
        Arc::new(TranslatedReply {
            key: HELP_MESSAGE,
            translator,
        }),
    );
    registry.register("ping", Arc::new(Ping));
    registry.set_fallback(Arc::new(Echo));
}

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::context::RequestContext;

/// Business logic for one command (or the catch-all).
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &RequestContext) -> Result<()>;
}

/// What [`CommandRegistry::resolve`] picked for a context.
#[derive(Clone)]
pub enum Resolved {
    Command {
        token: String,
        handler: Arc<dyn Handler>,
    },
    Fallback(Arc<dyn Handler>),
}

/// Normalize a command name to `/name`.
pub fn normalize_token(token: &str) -> String {
    format!("/{}", token.trim_start_matches('/'))
}

/// Command token to handler table, plus one optional fallback.
///
/// Built once at startup and read-only afterwards.
#[derive(Default)]
pub struct CommandRegistry {
    commands: HashMap<String, Arc<dyn Handler>>,
    fallback: Option<Arc<dyn Handler>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command handler. The last registration for a token wins.
    pub fn register(&mut self, token: &str, handler: Arc<dyn Handler>) {
        let key = normalize_token(token);
        if self.commands.insert(key.clone(), handler).is_some() {
            warn!("Replaced existing handler for {}", key);
        } else {
            info!("Registered command handler: {}", key);
        }
    }

    pub fn set_fallback(&mut self, handler: Arc<dyn Handler>) {
        if self.fallback.replace(handler).is_some() {
            warn!("Replaced existing fallback handler");
        }
    }

    pub fn resolve(&self, ctx: &RequestContext) -> Option<Resolved> {
        if let Some(token) = ctx.command_token.as_deref() {
            if let Some(handler) = self.commands.get(token) {
                return Some(Resolved::Command {
                    token: token.to_string(),
                    handler: handler.clone(),
                });
            }
        }

        self.fallback.clone().map(Resolved::Fallback)
    }

    /// Registered command tokens, sorted.
    pub fn commands(&self) -> Vec<&str> {
        let mut tokens: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        tokens.sort_unstable();
        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RawEvent;
    use crate::platform::testing::RecordingSender;

    struct Named(&'static str);

    #[async_trait]
    impl Handler for Named {
        async fn handle(&self, ctx: &RequestContext) -> Result<()> {
            ctx.reply(self.0).await
        }
    }

    fn ctx(text: &str) -> RequestContext {
        let event: RawEvent =
            serde_json::from_value(serde_json::json!({"message": {"text": text}})).unwrap();
        RequestContext::new(&event, Arc::new(RecordingSender::default()))
    }

    fn handler_ptr(handler: &Arc<dyn Handler>) -> *const () {
        Arc::as_ptr(handler) as *const ()
    }

    #[test]
    fn test_normalize_token() {
        assert_eq!(normalize_token("ping"), "/ping");
        assert_eq!(normalize_token("/ping"), "/ping");
        assert_eq!(normalize_token("//ping"), "/ping");
    }

    #[test]
    fn test_registered_command_resolves() {
        let ping: Arc<dyn Handler> = Arc::new(Named("ping"));
        let mut registry = CommandRegistry::new();
        registry.register("ping", ping.clone());

        match registry.resolve(&ctx("/ping")) {
            Some(Resolved::Command { token, handler }) => {
                assert_eq!(token, "/ping");
                assert_eq!(handler_ptr(&handler), handler_ptr(&ping));
            }
            _ => panic!("expected command handler"),
        }
    }

    #[test]
    fn test_mention_suffix_resolves() {
        let mut registry = CommandRegistry::new();
        registry.register("/start", Arc::new(Named("start")));
        assert!(matches!(
            registry.resolve(&ctx("/start@mybot")),
            Some(Resolved::Command { .. })
        ));
    }

    #[test]
    fn test_unregistered_uses_fallback() {
        let fallback: Arc<dyn Handler> = Arc::new(Named("echo"));
        let mut registry = CommandRegistry::new();
        registry.register("ping", Arc::new(Named("ping")));
        registry.set_fallback(fallback.clone());

        for text in ["/unknown", "hello"] {
            match registry.resolve(&ctx(text)) {
                Some(Resolved::Fallback(handler)) => {
                    assert_eq!(handler_ptr(&handler), handler_ptr(&fallback))
                }
                _ => panic!("expected fallback for {text}"),
            }
        }
    }

    #[test]
    fn test_unregistered_without_fallback() {
        let mut registry = CommandRegistry::new();
        registry.register("ping", Arc::new(Named("ping")));
        assert!(registry.resolve(&ctx("/unknown")).is_none());
        assert!(registry.resolve(&ctx("hello")).is_none());
    }

    #[test]
    fn test_last_registration_wins() {
        let second: Arc<dyn Handler> = Arc::new(Named("second"));
        let mut registry = CommandRegistry::new();
        registry.register("help", Arc::new(Named("first")));
        registry.register("/help", second.clone());

        assert_eq!(registry.commands(), vec!["/help"]);
        match registry.resolve(&ctx("/help")) {
            Some(Resolved::Command { handler, .. }) => {
                assert_eq!(handler_ptr(&handler), handler_ptr(&second))
            }
            _ => panic!("expected command handler"),
        }
    }

    #[test]
    fn test_commands_sorted() {
        let mut registry = CommandRegistry::new();
        registry.register("start", Arc::new(Named("s")));
        registry.register("help", Arc::new(Named("h")));
        assert_eq!(registry.commands(), vec!["/help", "/start"]);
    }
}

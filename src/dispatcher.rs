//! Routes one decoded update to its handler.
//!
//! Nothing in here propagates: tracking failures, handler errors and handler
//! panics are logged and contained so a single update can never abort the
//! batch it arrived in.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::Result;
use futures::FutureExt;
use tracing::{error, info, warn};

use crate::context::{RawEvent, RequestContext};
use crate::i18n::{Translator, ERROR_OCCURRED};
use crate::platform::ReplySender;
use crate::router::{CommandRegistry, Handler, Resolved};
use crate::tracker::{TrackOutcome, UserTracker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tracking {
    /// The update carried no sender.
    Untracked,
    Written,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    Command(String),
    CommandFailed(String),
    Fallback,
    FallbackFailed,
    Unhandled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub tracking: Tracking,
    pub handler: HandlerOutcome,
}

pub struct DispatchEngine {
    registry: CommandRegistry,
    tracker: UserTracker,
    outbound: Arc<dyn ReplySender>,
    translator: Translator,
}

impl DispatchEngine {
    pub fn new(
        registry: CommandRegistry,
        tracker: UserTracker,
        outbound: Arc<dyn ReplySender>,
        translator: Translator,
    ) -> Self {
        Self {
            registry,
            tracker,
            outbound,
            translator,
        }
    }

    pub async fn dispatch(&self, event: &RawEvent) -> DispatchOutcome {
        let ctx = RequestContext::new(event, self.outbound.clone());
        let tracking = self.track(&ctx).await;

        let handler = match self.registry.resolve(&ctx) {
            Some(Resolved::Command { token, handler }) => {
                info!("Dispatching to command handler: {}", token);
                match invoke(&handler, &ctx).await {
                    Ok(()) => HandlerOutcome::Command(token),
                    Err(e) => {
                        error!("Error in command handler {}: {:#}", token, e);
                        self.reply_error(&ctx).await;
                        HandlerOutcome::CommandFailed(token)
                    }
                }
            }
            Some(Resolved::Fallback(handler)) => {
                if ctx.is_command() {
                    info!("Unknown command, dispatching to default handler");
                } else {
                    info!("Dispatching to default handler");
                }
                match invoke(&handler, &ctx).await {
                    Ok(()) => HandlerOutcome::Fallback,
                    Err(e) => {
                        // No reply here, free-form chatter must not loop on errors
                        error!("Error in default handler: {:#}", e);
                        HandlerOutcome::FallbackFailed
                    }
                }
            }
            None => HandlerOutcome::Unhandled,
        };

        DispatchOutcome { tracking, handler }
    }

    async fn track(&self, ctx: &RequestContext) -> Tracking {
        let Some(user_id) = ctx.sender_id else {
            return Tracking::Untracked;
        };

        match self
            .tracker
            .upsert(
                user_id,
                ctx.sender_username.as_deref(),
                ctx.sender_first_name.as_deref(),
            )
            .await
        {
            Ok(TrackOutcome::Written) => Tracking::Written,
            Ok(TrackOutcome::Skipped) => Tracking::Skipped,
            Err(e) => {
                error!("Auto-tracking failed for user {}: {}", user_id, e);
                Tracking::Failed
            }
        }
    }

    async fn reply_error(&self, ctx: &RequestContext) {
        let text = self
            .translator
            .translate(ERROR_OCCURRED, &ctx.language_code, &[]);
        if let Err(e) = ctx.reply(&text).await {
            warn!("Failed to send error reply: {:#}", e);
        }
    }
}

async fn invoke(handler: &Arc<dyn Handler>, ctx: &RequestContext) -> Result<()> {
    match AssertUnwindSafe(handler.handle(ctx)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(anyhow::anyhow!("handler panicked: {}", panic_message(&*panic))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    /// Counts invocations and optionally fails or panics.
    #[derive(Default)]
    pub struct SpyHandler {
        pub calls: AtomicUsize,
        pub fail: bool,
        pub panic: bool,
    }

    impl SpyHandler {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        pub fn panicking() -> Self {
            Self {
                panic: true,
                ..Default::default()
            }
        }

        pub fn count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Handler for SpyHandler {
        async fn handle(&self, _ctx: &RequestContext) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.panic {
                panic!("handler exploded");
            }
            if self.fail {
                anyhow::bail!("handler failed");
            }
            Ok(())
        }
    }
}

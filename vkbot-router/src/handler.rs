//! Handler trait and the error sink handlers report into.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;
use vkbot_core::{BotError, Message, Reply, Result};

/// Produces a reply for a message. An empty [`Reply`] means "no reply".
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<Reply>;
}

/// Plain closures are handlers: `|_: &Message| -> Result<Reply> { Ok(Reply::text("pong")) }`.
#[async_trait]
impl<F> Handler for F
where
    F: Fn(&Message) -> Result<Reply> + Send + Sync,
{
    async fn handle(&self, message: &Message) -> Result<Reply> {
        (self)(message)
    }
}

pub type ErrorCallback = dyn Fn(Option<&Message>, &BotError) + Send + Sync;

/// Destination for errors raised while dispatching or delivering. Holds at most one callback.
#[derive(Clone, Default)]
pub struct ErrorSink {
    callback: Option<Arc<ErrorCallback>>,
}

impl ErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback<F>(callback: F) -> Self
    where
        F: Fn(Option<&Message>, &BotError) + Send + Sync + 'static,
    {
        Self {
            callback: Some(Arc::new(callback)),
        }
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// Shows `error` to the callback, if any, without taking ownership. Returns whether a
    /// callback saw it.
    pub fn notify(&self, message: Option<&Message>, error: &BotError) -> bool {
        match &self.callback {
            Some(callback) => {
                callback(message, error);
                true
            }
            None => false,
        }
    }

    /// Hands `error` to the callback. Without a callback the error cannot be handled
    /// and comes back as [`BotError::Unhandled`], which callers treat as fatal.
    pub fn report(&self, message: Option<&Message>, error: BotError) -> Result<()> {
        if self.notify(message, &error) {
            return Ok(());
        }
        error!(
            message_id = ?message.map(|m| m.id),
            error = %error,
            "No error handler registered"
        );
        Err(BotError::Unhandled(Box::new(error)))
    }
}

impl fmt::Debug for ErrorSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorSink")
            .field("has_callback", &self.has_callback())
            .finish()
    }
}

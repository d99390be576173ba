//! # vkbot-router
//!
//! Routes normalized messages to registered handlers. Action messages go to every handler
//! registered for that exact action name; other messages go to every handler whose prefix the
//! normalized body starts with. Handler errors and panics are reported to the [`ErrorSink`];
//! they never stop the remaining handlers.

mod handler;

pub use handler::{ErrorCallback, ErrorSink, Handler};

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, info, instrument, warn};
use vkbot_core::{BotError, Message, ReadState, Reply, Result};

/// Outcome of routing one message.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub message: Message,
    /// Non-empty replies in handler registration order.
    pub replies: Vec<Reply>,
    /// At least one action handler matched; the message should be marked read.
    pub action_routed: bool,
}

/// Handler registry plus error sink. Built once, then shared read-only.
#[derive(Clone, Default)]
pub struct Router {
    message_handlers: Vec<(String, Arc<dyn Handler>)>,
    action_handlers: Vec<(String, Arc<dyn Handler>)>,
    error_sink: ErrorSink,
}

/// Lowercased, trimmed body with a leading `"/ "` collapsed to `"/"`.
pub fn normalize_body(body: &str) -> String {
    let body = body.trim().to_lowercase();
    match body.strip_prefix("/ ") {
        Some(rest) => format!("/{}", rest),
        None => body,
    }
}

fn upsert(routes: &mut Vec<(String, Arc<dyn Handler>)>, key: String, handler: Arc<dyn Handler>) {
    match routes.iter_mut().find(|(k, _)| *k == key) {
        Some(entry) => entry.1 = handler,
        None => routes.push((key, handler)),
    }
}

fn panic_text(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for bodies starting with `prefix` (matched case-insensitively).
    /// Registering the same prefix again replaces the earlier handler in its original slot.
    pub fn add_message_handler(mut self, prefix: &str, handler: Arc<dyn Handler>) -> Self {
        upsert(&mut self.message_handlers, prefix.to_lowercase(), handler);
        self
    }

    /// Registers a handler for the exact action name.
    pub fn add_action_handler(mut self, name: &str, handler: Arc<dyn Handler>) -> Self {
        upsert(&mut self.action_handlers, name.to_string(), handler);
        self
    }

    pub fn with_error_sink(mut self, sink: ErrorSink) -> Self {
        self.error_sink = sink;
        self
    }

    pub fn error_sink(&self) -> &ErrorSink {
        &self.error_sink
    }

    pub fn has_action(&self, name: &str) -> bool {
        self.action_handlers.iter().any(|(k, _)| k == name)
    }

    /// Runs one handler, converting an error or a panic into [`BotError::Handler`].
    async fn invoke(&self, handler: &Arc<dyn Handler>, message: &Message) -> Result<Reply> {
        match AssertUnwindSafe(handler.handle(message)).catch_unwind().await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(BotError::Handler(e))) => Err(BotError::Handler(e)),
            Ok(Err(e)) => Err(BotError::Handler(e.to_string())),
            Err(payload) => Err(BotError::Handler(format!(
                "handler panicked: {}",
                panic_text(payload.as_ref())
            ))),
        }
    }

    /// Runs every handler in `handlers` that `matches`, collecting non-empty replies.
    /// Only an unhandled error (no error callback) is returned.
    async fn run_matching<M>(
        &self,
        handlers: &[(String, Arc<dyn Handler>)],
        matches: M,
        message: &Message,
    ) -> Result<Vec<Reply>>
    where
        M: Fn(&str) -> bool,
    {
        let mut replies = Vec::new();
        for (key, handler) in handlers.iter().filter(|(k, _)| matches(k.as_str())) {
            debug!(message_id = message.id, route = %key, "step: handler processing");
            match self.invoke(handler, message).await {
                Ok(reply) if reply.is_empty() => {}
                Ok(reply) => replies.push(reply),
                Err(e) => {
                    warn!(message_id = message.id, route = %key, error = %e, "Handler failed");
                    self.error_sink.report(Some(message), e)?;
                }
            }
        }
        Ok(replies)
    }

    /// Runs every action handler registered under `name`.
    #[instrument(skip(self, message), fields(message_id = message.id))]
    pub async fn route_action(&self, name: &str, message: &Message) -> Result<Vec<Reply>> {
        self.run_matching(&self.action_handlers, |k| k == name, message)
            .await
    }

    /// Runs every message handler whose prefix the normalized body starts with.
    pub async fn route_message(&self, message: &Message) -> Result<Vec<Reply>> {
        let body = normalize_body(&message.body);
        self.run_matching(&self.message_handlers, |k| body.starts_with(k), message)
            .await
    }

    /// Routes a batch in order. Outbound and already-read messages are dropped; every other
    /// message yields one [`Dispatched`], with or without replies.
    #[instrument(skip(self, messages), fields(count = messages.len()))]
    pub async fn dispatch(&self, messages: Vec<Message>) -> Result<Vec<Dispatched>> {
        let mut out = Vec::with_capacity(messages.len());
        for message in messages {
            if message.is_outbound || message.read_state != ReadState::Unread {
                debug!(message_id = message.id, "Skipping outbound or read message");
                continue;
            }

            let (replies, action_routed) = match message.action_name() {
                Some(name) => {
                    let replies = self.route_action(name, &message).await?;
                    (replies, self.has_action(name))
                }
                None => (self.route_message(&message).await?, false),
            };

            info!(
                message_id = message.id,
                replies = replies.len(),
                action_routed,
                "step: message dispatched"
            );
            out.push(Dispatched {
                message,
                replies,
                action_routed,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_body() {
        assert_eq!(normalize_body("  /PING  "), "/ping");
        assert_eq!(normalize_body("/ help me"), "/help me");
        assert_eq!(normalize_body("hello"), "hello");
        assert_eq!(normalize_body(""), "");
    }

    fn reply(text: &'static str) -> Arc<dyn Handler> {
        Arc::new(move |_: &Message| -> Result<Reply> { Ok(Reply::text(text)) })
    }

    #[test]
    fn test_reregistering_replaces_in_place() {
        let router = Router::new()
            .add_message_handler("/x", reply("a"))
            .add_message_handler("/y", reply("b"))
            .add_message_handler("/X", reply("c"));
        let keys: Vec<&str> = router
            .message_handlers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect();
        assert_eq!(keys, vec!["/x", "/y"]);
    }
}

//! Integration tests for [`vkbot_router::Router`].
//!
//! Covers: all-matches prefix routing in registration order, action exclusivity, outbound and
//! read filtering, `"/ "` normalization, error callback vs unhandled errors, and panic capture.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use vkbot_core::{BotError, Message, ReadState, Reply, Result};
use vkbot_router::{ErrorSink, Handler, Router};

fn text_message(id: i64, body: &str) -> Message {
    Message {
        id,
        body: body.to_string(),
        sender_id: 7,
        peer_id: 7,
        ..Default::default()
    }
}

fn action_message(id: i64, action: &str) -> Message {
    Message {
        id,
        body: "/a".to_string(),
        sender_id: 7,
        peer_id: 2000000001,
        conversation_id: Some(1),
        action: Some(action.to_string()),
        action_target_id: Some(99),
        ..Default::default()
    }
}

fn reply(text: &'static str) -> Arc<dyn Handler> {
    Arc::new(move |_: &Message| -> Result<Reply> { Ok(Reply::text(text)) })
}

struct CountingHandler {
    calls: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl Handler for CountingHandler {
    async fn handle(&self, _message: &Message) -> Result<Reply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Reply::none())
    }
}

fn collecting_sink() -> (ErrorSink, Arc<Mutex<Vec<(Option<i64>, String)>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let captured = seen.clone();
    let sink = ErrorSink::with_callback(move |m, e| {
        captured
            .lock()
            .unwrap()
            .push((m.map(|m| m.id), e.to_string()));
    });
    (sink, seen)
}

/// **Test: every matching prefix fires; replies come back in registration order.**
///
/// **Setup:** handlers for `/a` and `/ab`.
/// **Action:** dispatch "/ab hello".
/// **Expected:** replies from `/a` then `/ab`.
#[tokio::test]
async fn test_all_matching_prefixes_fire_in_order() {
    let router = Router::new()
        .add_message_handler("/a", reply("from /a"))
        .add_message_handler("/ab", reply("from /ab"))
        .add_message_handler("/b", reply("from /b"));

    let out = router
        .dispatch(vec![text_message(1, "/ab hello")])
        .await
        .unwrap();

    assert_eq!(out.len(), 1);
    let texts: Vec<&str> = out[0].replies.iter().map(|r| r.text.as_str()).collect();
    assert_eq!(texts, vec!["from /a", "from /ab"]);
    assert!(!out[0].action_routed);
}

/// **Test: a message with an action reaches only action handlers, never prefix handlers.**
#[tokio::test]
async fn test_action_is_exclusive_of_prefix_routing() {
    let prefix_calls = Arc::new(AtomicUsize::new(0));
    let router = Router::new()
        .add_message_handler(
            "/a",
            Arc::new(CountingHandler {
                calls: prefix_calls.clone(),
            }),
        )
        .add_action_handler("chat_invite_user", reply("welcome"));

    let out = router
        .dispatch(vec![action_message(5, "chat_invite_user")])
        .await
        .unwrap();

    assert_eq!(prefix_calls.load(Ordering::SeqCst), 0);
    assert_eq!(out[0].replies, vec![Reply::text("welcome")]);
    assert!(out[0].action_routed);
}

/// **Test: an action without a registered handler is neither replied to nor action-routed.**
#[tokio::test]
async fn test_unregistered_action_not_routed() {
    let router = Router::new().add_message_handler("/a", reply("nope"));

    let out = router
        .dispatch(vec![action_message(5, "chat_kick_user")])
        .await
        .unwrap();

    assert!(out[0].replies.is_empty());
    assert!(!out[0].action_routed);
}

/// **Test: outbound and already-read messages never reach handlers.**
#[tokio::test]
async fn test_outbound_and_read_messages_filtered() {
    let calls = Arc::new(AtomicUsize::new(0));
    let router = Router::new().add_message_handler(
        "/",
        Arc::new(CountingHandler {
            calls: calls.clone(),
        }),
    );

    let mut outbound = text_message(1, "/ping");
    outbound.is_outbound = true;
    let mut read = text_message(2, "/ping");
    read.read_state = ReadState::Read;
    let fresh = text_message(3, "/ping");

    let out = router.dispatch(vec![outbound, read, fresh]).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].message.id, 3);
}

/// **Test: "/ ping" and "  /PING " both route to the `/ping` handler.**
#[tokio::test]
async fn test_body_normalization() {
    let router = Router::new().add_message_handler("/ping", reply("pong"));

    let out = router
        .dispatch(vec![text_message(1, "/ ping"), text_message(2, "  /PING ")])
        .await
        .unwrap();

    assert_eq!(out[0].replies, vec![Reply::text("pong")]);
    assert_eq!(out[1].replies, vec![Reply::text("pong")]);
}

/// **Test: unmatched messages still appear with no replies; empty replies are discarded.**
#[tokio::test]
async fn test_unmatched_and_empty_replies() {
    let router = Router::new().add_message_handler("/quiet", reply(""));

    let out = router
        .dispatch(vec![text_message(1, "hello"), text_message(2, "/quiet")])
        .await
        .unwrap();

    assert_eq!(out.len(), 2);
    assert!(out[0].replies.is_empty());
    assert!(out[1].replies.is_empty());
}

/// **Test: a failing handler is reported with its message; the other handlers still run.**
#[tokio::test]
async fn test_handler_error_goes_to_callback() {
    let (sink, seen) = collecting_sink();
    let failing: Arc<dyn Handler> = Arc::new(|_: &Message| -> Result<Reply> {
        Err(BotError::Remote {
            code: 9,
            message: "flood control".to_string(),
        })
    });
    let router = Router::new()
        .add_message_handler("/x", failing)
        .add_message_handler("/x y", reply("still here"))
        .with_error_sink(sink);

    let out = router
        .dispatch(vec![text_message(4, "/x y")])
        .await
        .unwrap();

    assert_eq!(out[0].replies, vec![Reply::text("still here")]);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, Some(4));
    assert!(seen[0].1.contains("flood control"));
}

/// **Test: a panicking handler is captured as a handler error.**
#[tokio::test]
async fn test_handler_panic_captured() {
    let (sink, seen) = collecting_sink();
    let panicking: Arc<dyn Handler> =
        Arc::new(|_: &Message| -> Result<Reply> { panic!("handler exploded") });
    let router = Router::new()
        .add_message_handler("/boom", panicking)
        .with_error_sink(sink);

    let out = router
        .dispatch(vec![text_message(8, "/boom")])
        .await
        .unwrap();

    assert!(out[0].replies.is_empty());
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].1.contains("handler exploded"));
}

/// **Test: without an error callback a handler failure is returned as Unhandled.**
#[tokio::test]
async fn test_handler_error_without_callback_is_unhandled() {
    let failing: Arc<dyn Handler> =
        Arc::new(|_: &Message| -> Result<Reply> { Err(BotError::Handler("bad".to_string())) });
    let router = Router::new().add_message_handler("/x", failing);

    let err = router
        .dispatch(vec![text_message(1, "/x")])
        .await
        .unwrap_err();

    assert!(matches!(err, BotError::Unhandled(_)));
    assert!(err.is_fatal());
}

/// **Test: route_action fires every handler for the name and returns their replies.**
#[tokio::test]
async fn test_route_action_direct() {
    let router = Router::new()
        .add_action_handler("friend_add", reply("hi friend"))
        .add_action_handler("friend_delete", reply("bye"));

    let message = Message::action_event("friend_add", 42);
    let replies = router.route_action("friend_add", &message).await.unwrap();

    assert_eq!(replies, vec![Reply::text("hi friend")]);
    assert!(router.has_action("friend_delete"));
    assert!(!router.has_action("chat_kick_user"));
}

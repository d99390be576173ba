//! Integration tests for [`vkbot_api::VkApiClient`] against a mockito server.
//!
//! Covers: session acquisition in both account modes, reply sending and addressing, error
//! classification (remote, malformed, network), long-poll query building, relationship calls
//! and identity detection.

use std::time::Duration;

use mockito::{Matcher, Server};
use vkbot_api::{ApiConfig, VkApiClient};
use vkbot_core::{
    AccountMode, BotError, Button, Cursor, Keyboard, LongPollRequest, RelationshipDirection,
    RemoteApi, Reply, ReplyTarget,
};

const TEST_TOKEN: &str = "test_token_12345";

fn client_for(server: &Server) -> VkApiClient {
    let config = ApiConfig::new(TEST_TOKEN)
        .with_api_url(format!("{}/method/", server.url()))
        .with_request_interval(Duration::ZERO);
    VkApiClient::new(config).unwrap()
}

fn form(pairs: &[(&str, &str)]) -> Matcher {
    Matcher::AllOf(
        pairs
            .iter()
            .map(|(k, v)| Matcher::UrlEncoded(k.to_string(), v.to_string()))
            .collect(),
    )
}

/// **Test: user-mode acquisition calls messages.getLongPollServer and decodes a numeric cursor.**
#[tokio::test]
async fn test_acquire_session_user_mode() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/method/messages.getLongPollServer")
        .match_body(form(&[
            ("need_pts", "0"),
            ("lp_version", "3"),
            ("access_token", TEST_TOKEN),
            ("v", "5.131"),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"response":{"key":"abc","server":"im.vk.com/nim1","ts":1668805076}}"#)
        .create_async()
        .await;

    let info = client_for(&server)
        .acquire_session(AccountMode::User)
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(info.key, "abc");
    assert_eq!(info.server, "im.vk.com/nim1");
    assert_eq!(info.cursor, Cursor::Number(1668805076));
}

/// **Test: group-mode acquisition sends group_id and decodes a string cursor.**
#[tokio::test]
async fn test_acquire_session_group_mode() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/method/groups.getLongPollServer")
        .match_body(form(&[("group_id", "777")]))
        .with_body(r#"{"response":{"key":"gk","server":"https://lp.vk.com/wh777","ts":"15"}}"#)
        .create_async()
        .await;

    let config = ApiConfig::new(TEST_TOKEN)
        .with_api_url(format!("{}/method/", server.url()))
        .with_request_interval(Duration::ZERO)
        .with_group_id(Some(777));
    let client = VkApiClient::new(config).unwrap();
    let info = client.acquire_session(AccountMode::Group).await.unwrap();

    mock.assert_async().await;
    assert_eq!(info.cursor, Cursor::Text("15".to_string()));
}

/// **Test: group-mode acquisition without a group id is a config error.**
#[tokio::test]
async fn test_acquire_session_group_mode_requires_group_id() {
    let server = Server::new_async().await;
    let err = client_for(&server)
        .acquire_session(AccountMode::Group)
        .await
        .unwrap_err();
    assert!(matches!(err, BotError::Config(_)));
}

/// **Test: send_reply addresses by peer id and attaches the keyboard JSON.**
#[tokio::test]
async fn test_send_reply_with_keyboard() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/method/messages.send")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("peer_id".into(), "2000000001".into()),
            Matcher::UrlEncoded("message".into(), "hello".into()),
            Matcher::UrlEncoded("dont_parse_links".into(), "1".into()),
            Matcher::Regex("random_id=\\d+".into()),
            Matcher::Regex("keyboard=".into()),
        ]))
        .with_body(r#"{"response": 321}"#)
        .create_async()
        .await;

    let keyboard = Keyboard {
        one_time: true,
        buttons: vec![vec![Button::text("Yes", None)]],
        ..Default::default()
    };
    let id = client_for(&server)
        .send_reply(
            &ReplyTarget::Peer(2000000001),
            &Reply::text("hello").with_keyboard(keyboard),
        )
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(id, 321);
}

/// **Test: chat and user targets use chat_id and user_id.**
#[tokio::test]
async fn test_send_reply_chat_and_user_targets() {
    let mut server = Server::new_async().await;
    let chat = server
        .mock("POST", "/method/messages.send")
        .match_body(form(&[("chat_id", "42")]))
        .with_body(r#"{"response": 1}"#)
        .create_async()
        .await;
    let user = server
        .mock("POST", "/method/messages.send")
        .match_body(form(&[("user_id", "7")]))
        .with_body(r#"{"response": 2}"#)
        .create_async()
        .await;

    let client = client_for(&server);
    assert_eq!(
        client
            .send_reply(&ReplyTarget::Chat(42), &Reply::text("a"))
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        client
            .send_reply(&ReplyTarget::User(7), &Reply::text("b"))
            .await
            .unwrap(),
        2
    );
    chat.assert_async().await;
    user.assert_async().await;
}

/// **Test: a remote error envelope becomes BotError::Remote.**
#[tokio::test]
async fn test_remote_error_classified() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/method/messages.send")
        .with_body(r#"{"error":{"error_code":901,"error_msg":"Can't send messages for users without permission"}}"#)
        .create_async()
        .await;

    let err = client_for(&server)
        .send_reply(&ReplyTarget::User(1), &Reply::text("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, BotError::Remote { code: 901, .. }));
}

/// **Test: a non-JSON body becomes BotError::MalformedResponse.**
#[tokio::test]
async fn test_malformed_response_classified() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/method/messages.markAsRead")
        .with_status(502)
        .with_body("<html>Bad Gateway</html>")
        .create_async()
        .await;

    let err = client_for(&server).mark_read(5).await.unwrap_err();
    assert!(matches!(err, BotError::MalformedResponse(_)));
}

/// **Test: an unreachable endpoint becomes BotError::Network.**
#[tokio::test]
async fn test_network_error_classified() {
    let config = ApiConfig::new(TEST_TOKEN)
        .with_api_url("http://127.0.0.1:1/method/")
        .with_request_interval(Duration::ZERO);
    let client = VkApiClient::new(config).unwrap();

    let err = client.mark_read(5).await.unwrap_err();
    assert!(matches!(err, BotError::Network(_)));
}

/// **Test: user-mode long poll sends act, key, ts, wait, mode, version and returns the raw body.**
#[tokio::test]
async fn test_long_poll_user_query() {
    let mut server = Server::new_async().await;
    let body = r#"{"ts":1668805077,"updates":[]}"#;
    let mock = server
        .mock("GET", "/nim1")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("act".into(), "a_check".into()),
            Matcher::UrlEncoded("key".into(), "abc".into()),
            Matcher::UrlEncoded("ts".into(), "1668805076".into()),
            Matcher::UrlEncoded("wait".into(), "1".into()),
            Matcher::UrlEncoded("mode".into(), "2".into()),
            Matcher::UrlEncoded("version".into(), "2".into()),
        ]))
        .with_body(body)
        .create_async()
        .await;

    let request = LongPollRequest {
        account_mode: AccountMode::User,
        server: format!("{}/nim1", server.url()),
        key: "abc".into(),
        cursor: Cursor::Number(1668805076),
        wait: 1,
        mode: 2,
        version: 2,
    };
    let raw = client_for(&server).long_poll(&request).await.unwrap();

    mock.assert_async().await;
    assert_eq!(raw, body.as_bytes());
}

/// **Test: a 5xx from the long-poll server is a network error.**
#[tokio::test]
async fn test_long_poll_server_error_is_network() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/wh1")
        .match_query(Matcher::Any)
        .with_status(503)
        .create_async()
        .await;

    let request = LongPollRequest {
        account_mode: AccountMode::Group,
        server: format!("{}/wh1", server.url()),
        key: "gk".into(),
        cursor: Cursor::Text("3".into()),
        wait: 1,
        mode: 2,
        version: 2,
    };
    let err = client_for(&server).long_poll(&request).await.unwrap_err();
    assert!(matches!(err, BotError::Network(_)));
}

/// **Test: outgoing pending requests are fetched with out=1; add/delete decode their statuses.**
#[tokio::test]
async fn test_relationship_calls() {
    let mut server = Server::new_async().await;
    let outgoing = server
        .mock("POST", "/method/friends.getRequests")
        .match_body(form(&[("out", "1")]))
        .with_body(r#"{"response":{"count":2,"items":[11,12]}}"#)
        .create_async()
        .await;
    let add = server
        .mock("POST", "/method/friends.add")
        .match_body(form(&[("user_id", "11")]))
        .with_body(r#"{"response": 2}"#)
        .create_async()
        .await;
    let delete = server
        .mock("POST", "/method/friends.delete")
        .match_body(form(&[("user_id", "12")]))
        .with_body(r#"{"response":{"success":1,"out_request_deleted":1}}"#)
        .create_async()
        .await;

    let client = client_for(&server);
    let ids = client
        .pending_relationships(RelationshipDirection::Outgoing)
        .await
        .unwrap();
    assert_eq!(ids, vec![11, 12]);
    assert!(client.accept_relationship(11).await.unwrap());
    assert!(client.remove_relationship(12).await.unwrap());

    outgoing.assert_async().await;
    add.assert_async().await;
    delete.assert_async().await;
}

/// **Test: identity detection falls back to users.get when groups.getById is rejected.**
#[tokio::test]
async fn test_detect_identity_user() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/method/groups.getById")
        .with_body(r#"{"error":{"error_code":100,"error_msg":"One of the parameters specified was missing or invalid"}}"#)
        .create_async()
        .await;
    server
        .mock("POST", "/method/users.get")
        .with_body(r#"{"response":[{"id":329007844,"first_name":"Test","last_name":"Bot"}]}"#)
        .create_async()
        .await;

    let mut client = client_for(&server);
    let identity = client.detect_identity().await.unwrap();
    assert_eq!(identity.mode, AccountMode::User);
    assert_eq!(identity.id, 329007844);
    assert!(client.config().group_id.is_none());
}

/// **Test: identity detection recognizes a group token and stores its id.**
#[tokio::test]
async fn test_detect_identity_group() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/method/groups.getById")
        .with_body(r#"{"response":[{"id":777,"name":"Test group","screen_name":"club777"}]}"#)
        .create_async()
        .await;

    let mut client = client_for(&server);
    let identity = client.detect_identity().await.unwrap();
    assert_eq!(identity.mode, AccountMode::Group);
    assert_eq!(identity.id, 777);
    assert_eq!(client.config().group_id, Some(777));
}
